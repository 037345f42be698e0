//! Dispatch of inbound responses to sessions and transfers.

use drip_net::{InboundEvent, Transport};
use drip_protocol::transfer::{decode_response, ResponseKind, ResponsePayload};

use crate::events::TransferEvent;
use crate::notify::ErrorSink;
use crate::orchestrator::Engine;
use crate::session::AuthorizationOutcome;
use crate::transfer::AckOutcome;

impl<T: Transport, S: ErrorSink> Engine<T, S> {
    /// Decode one inbound event and apply it. Undecodable payloads and
    /// responses for unknown sessions or transfers are dropped.
    pub(crate) async fn route(&mut self, event: InboundEvent) {
        let payload = match decode_response(&event.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(kind = ?event.kind, error = %e, "dropping undecodable response");
                return;
            }
        };
        match event.kind {
            ResponseKind::Authorization => self.on_authorization(payload).await,
            ResponseKind::Transfer => self.on_transfer_response(payload).await,
        }
    }

    async fn on_authorization(&mut self, payload: ResponsePayload) {
        let Some(session_id) = payload.session_id else {
            tracing::debug!(from = %payload.sender_id, "authorization response without session");
            return;
        };
        let Some(session) = self.registry.session_mut(&session_id) else {
            tracing::debug!(session_id = %session_id, "authorization response for unknown session");
            return;
        };

        let before = session.states();
        let outcome = session
            .handle_authorization_response(&self.transport, &payload.sender_id, payload.accepted)
            .await;

        let errors = match outcome {
            AuthorizationOutcome::Ignored | AuthorizationOutcome::Waiting => Vec::new(),
            AuthorizationOutcome::Authorized { errors } => {
                self.emit(TransferEvent::SessionAuthorized { session_id });
                errors
            }
            AuthorizationOutcome::Rejected { errors } => {
                self.emit(TransferEvent::SessionRejected {
                    session_id,
                    peer: payload.sender_id.clone(),
                });
                self.emit(TransferEvent::SessionCancelled { session_id });
                errors
            }
        };
        self.emit_changes(&session_id, &before);
        for error in errors {
            self.report(error);
        }
    }

    async fn on_transfer_response(&mut self, payload: ResponsePayload) {
        let Some(transfer_id) = payload.transfer_id else {
            tracing::debug!(from = %payload.sender_id, "transfer response without transfer id");
            return;
        };
        let Some(transfer) = self.registry.transfer_mut(&transfer_id) else {
            tracing::debug!(transfer_id = %transfer_id, "response for unknown transfer");
            return;
        };
        if transfer.recipient() != &payload.sender_id {
            tracing::warn!(
                transfer_id = %transfer_id,
                from = %payload.sender_id,
                "response from a peer that is not the recipient"
            );
            return;
        }

        let before = transfer.state();

        if payload.cancelled {
            transfer.cancelled_by_peer();
            let state = transfer.state();
            tracing::info!(transfer_id = %transfer_id, "recipient cancelled transfer");
            self.registry.remove_transfer(&transfer_id);
            if state != before {
                self.emit(TransferEvent::StateChanged { transfer_id, state });
            }
            return;
        }

        let result = transfer
            .advance(&self.transport, payload.offset, payload.amount_received)
            .await;
        let (state, amount_sent, size) = (transfer.state(), transfer.amount_sent(), transfer.size());

        match result {
            Ok(AckOutcome::Stale) => {}
            Ok(AckOutcome::Advanced | AckOutcome::Completed) => {
                self.emit(TransferEvent::Progress {
                    transfer_id: transfer_id.clone(),
                    amount_sent,
                    size,
                });
            }
            Err(e) => self.report(e),
        }
        if state != before {
            self.emit(TransferEvent::StateChanged { transfer_id, state });
        }
    }
}
