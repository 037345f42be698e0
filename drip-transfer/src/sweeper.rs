//! Periodic retransmission of unacknowledged artifacts.

use drip_net::Transport;
use drip_protocol::types::TransferId;
use tokio::time::Instant;

use crate::error::TransferError;
use crate::events::TransferEvent;
use crate::notify::ErrorSink;
use crate::orchestrator::Engine;
use crate::transfer::{TimeoutOutcome, TransferState};

impl<T: Transport, S: ErrorSink> Engine<T, S> {
    /// Resend every overdue transfer's outstanding artifact, abandoning the
    /// ones that ran out of retries.
    pub(crate) async fn sweep(&mut self, now: Instant) {
        let timeout = self.config.retry_timeout;
        let max_retries = self.config.max_retries;

        let overdue: Vec<TransferId> = self
            .registry
            .sessions()
            .flat_map(|s| s.transfers())
            .filter(|t| t.is_overdue(now, timeout))
            .map(|t| t.id().clone())
            .collect();
        if overdue.is_empty() {
            return;
        }
        tracing::debug!(count = overdue.len(), "sweeping overdue transfers");

        for transfer_id in overdue {
            let Some(transfer) = self.registry.transfer_mut(&transfer_id) else {
                continue;
            };
            let result = transfer.on_timeout(&self.transport, max_retries).await;
            let retry_count = transfer.retry_count();

            match result {
                Ok(TimeoutOutcome::Resent) => {
                    self.emit(TransferEvent::Retried {
                        transfer_id,
                        retry_count,
                    });
                }
                Ok(TimeoutOutcome::Exhausted) => {
                    self.registry.remove_transfer(&transfer_id);
                    self.report(TransferError::RetryBudgetExceeded {
                        transfer_id: transfer_id.clone(),
                        retries: retry_count,
                    });
                    self.emit(TransferEvent::StateChanged {
                        transfer_id,
                        state: TransferState::Failed,
                    });
                }
                Err(e) => {
                    self.report(e);
                    self.emit(TransferEvent::StateChanged {
                        transfer_id,
                        state: TransferState::Failed,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use drip_files::FileSource;
    use drip_net::sim::SimNetwork;
    use drip_net::testing::drain_messages;
    use drip_protocol::transfer::{encode_response, ResponseKind, ResponsePayload, TransferMessage};
    use drip_protocol::types::PeerId;
    use drip_net::InboundEvent;

    use super::*;
    use crate::config::TransferConfig;
    use crate::orchestrator::tests::{drain, engine};

    #[tokio::test(start_paused = true)]
    async fn pending_transfers_are_not_swept() {
        let (net, _inbound) = SimNetwork::new();
        let mut p1 = net.add_peer(PeerId::from("p1")).await;
        let (mut engine, _events, mut errors) = engine(&net, TransferConfig::default());

        let files = vec![FileSource::from_bytes("a.txt", b"a".to_vec())];
        engine.create_session(files, vec![PeerId::from("p1")]).await.unwrap();
        drain_messages(&mut p1);

        for _ in 0..20 {
            tokio::time::advance(Duration::from_secs(10)).await;
            engine.sweep(Instant::now()).await;
        }
        assert!(drain_messages(&mut p1).is_empty());
        assert!(drain(&mut errors).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_transfer_is_resent_then_abandoned() {
        let (net, _inbound) = SimNetwork::new();
        let mut p1 = net.add_peer(PeerId::from("p1")).await;
        let config = TransferConfig {
            max_retries: 3,
            ..TransferConfig::default()
        };
        let (mut engine, mut events, mut errors) = engine(&net, config);

        let files = vec![FileSource::from_bytes("a.txt", b"abc".to_vec())];
        let sid = engine
            .create_session(files, vec![PeerId::from("p1")])
            .await
            .unwrap();
        let payload = ResponsePayload::authorization(sid, PeerId::from("p1"), true);
        engine
            .route(InboundEvent {
                kind: ResponseKind::Authorization,
                payload: encode_response(&payload).unwrap().into(),
            })
            .await;
        drain_messages(&mut p1);
        drain(&mut events);

        // Not yet overdue.
        tokio::time::advance(Duration::from_secs(9)).await;
        engine.sweep(Instant::now()).await;
        assert!(drain_messages(&mut p1).is_empty());

        for expected in 1..=3 {
            tokio::time::advance(Duration::from_secs(10)).await;
            engine.sweep(Instant::now()).await;
            let msgs = drain_messages(&mut p1);
            assert!(matches!(msgs.as_slice(), [TransferMessage::Info(_)]));
            assert!(matches!(
                drain(&mut events).as_slice(),
                [TransferEvent::Retried { retry_count, .. }] if *retry_count == expected
            ));
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        engine.sweep(Instant::now()).await;
        assert!(drain_messages(&mut p1).is_empty(), "no resend after abandonment");
        let errors = drain(&mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("max retries for a-"));
        assert_eq!(engine.registry.transfer_count(), 0);

        engine.finish_sessions();
        assert!(engine.registry.is_empty());
        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            TransferEvent::SessionFinished { summary, .. } if summary.failed == 1
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn resend_failure_marks_only_that_transfer_failed() {
        let (net, _inbound) = SimNetwork::new();
        let mut p1 = net.add_peer(PeerId::from("p1")).await;
        let mut p2 = net.add_peer(PeerId::from("p2")).await;
        let (mut engine, _events, mut errors) = engine(&net, TransferConfig::default());

        let files = vec![FileSource::from_bytes("a.txt", b"abc".to_vec())];
        let sid = engine
            .create_session(files, vec![PeerId::from("p1"), PeerId::from("p2")])
            .await
            .unwrap();
        for peer in ["p1", "p2"] {
            let payload = ResponsePayload::authorization(sid, PeerId::from(peer), true);
            engine
                .route(InboundEvent {
                    kind: ResponseKind::Authorization,
                    payload: encode_response(&payload).unwrap().into(),
                })
                .await;
        }
        drain_messages(&mut p1);
        drain_messages(&mut p2);

        net.fail_sends_to(&PeerId::from("p2")).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        engine.sweep(Instant::now()).await;

        assert_eq!(drain(&mut errors).len(), 1);
        let states: Vec<(PeerId, TransferState)> = engine
            .registry
            .session(&sid)
            .unwrap()
            .transfers()
            .map(|t| (t.recipient().clone(), t.state()))
            .collect();
        assert!(states.contains(&(PeerId::from("p1"), TransferState::InfoSent)));
        assert!(states.contains(&(PeerId::from("p2"), TransferState::Failed)));
        assert_eq!(drain_messages(&mut p1).len(), 1);
    }
}
