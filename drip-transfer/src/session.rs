//! A group of transfers sharing one all-or-nothing authorization.
//!
//! A session is created from files × recipients. Nothing streams until every
//! recipient accepted; a single rejection cancels the whole session.

use std::collections::{BTreeMap, HashMap};

use drip_files::FileSource;
use drip_net::Transport;
use drip_protocol::transfer::{Manifest, SessionCancel};
use drip_protocol::types::{PeerId, SessionId, TransferId};
use futures::future::join_all;

use crate::error::TransferError;
use crate::transfer::{Transfer, TransferState};

/// What an authorization response did to a session.
#[derive(Debug)]
pub enum AuthorizationOutcome {
    /// Unknown peer, or the session is already over.
    Ignored,
    /// Accepted, still waiting on other recipients.
    Waiting,
    /// The last acceptance arrived and every transfer was started.
    Authorized { errors: Vec<TransferError> },
    /// A recipient declined and the session was cancelled.
    Rejected { errors: Vec<TransferError> },
}

/// Final tally of a session's transfers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl SessionSummary {
    fn record(&mut self, state: TransferState) {
        match state {
            TransferState::Completed => self.completed += 1,
            TransferState::Cancelled => self.cancelled += 1,
            TransferState::Failed => self.failed += 1,
            _ => {}
        }
    }
}

pub struct Session {
    id: SessionId,
    recipients: BTreeMap<PeerId, bool>,
    manifest: Manifest,
    transfers: BTreeMap<TransferId, Transfer>,
    cancelled: bool,
    /// Outcomes of transfers already removed from the session.
    removed: SessionSummary,
}

impl Session {
    /// Build a session with one transfer per (file, recipient) pair.
    ///
    /// Returns `None` when there is nothing to send, nobody to send it to, or
    /// `chunk_size` is zero. Duplicate recipients are collapsed.
    pub fn create(files: &[FileSource], recipients: &[PeerId], chunk_size: u32) -> Option<Self> {
        Self::create_avoiding(files, recipients, chunk_size, |_| false)
    }

    /// Like [`Session::create`], drawing new transfer ids until none is
    /// `in_use` or taken by another transfer of this session.
    pub fn create_avoiding(
        files: &[FileSource],
        recipients: &[PeerId],
        chunk_size: u32,
        mut in_use: impl FnMut(&TransferId) -> bool,
    ) -> Option<Self> {
        if files.is_empty() || recipients.is_empty() || chunk_size == 0 {
            return None;
        }
        let id = SessionId::random();

        let mut unique: Vec<PeerId> = Vec::with_capacity(recipients.len());
        for peer in recipients {
            if !unique.contains(peer) {
                unique.push(peer.clone());
            }
        }

        let mut transfers = BTreeMap::new();
        let mut entries = Vec::with_capacity(files.len() * unique.len());
        for file in files {
            for peer in &unique {
                let mut transfer = Transfer::new(id, file.clone(), peer.clone(), chunk_size);
                while transfers.contains_key(transfer.id()) || in_use(transfer.id()) {
                    transfer.regenerate_id();
                }
                entries.push(transfer.manifest_entry());
                transfers.insert(transfer.id().clone(), transfer);
            }
        }

        Some(Self {
            id,
            recipients: unique.iter().cloned().map(|p| (p, false)).collect(),
            manifest: Manifest {
                session_id: id,
                recipients: unique,
                transfers: entries,
            },
            transfers,
            cancelled: false,
            removed: SessionSummary::default(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn recipients(&self) -> impl Iterator<Item = &PeerId> {
        self.recipients.keys()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// True once every recipient has accepted.
    pub fn fully_authorized(&self) -> bool {
        !self.recipients.is_empty() && self.recipients.values().all(|accepted| *accepted)
    }

    /// True once no transfer is left that could still make progress.
    pub fn is_finished(&self) -> bool {
        self.transfers.values().all(|t| t.state().is_terminal())
    }

    pub fn transfer_ids(&self) -> impl Iterator<Item = &TransferId> {
        self.transfers.keys()
    }

    pub fn transfer(&self, id: &TransferId) -> Option<&Transfer> {
        self.transfers.get(id)
    }

    pub fn transfer_mut(&mut self, id: &TransferId) -> Option<&mut Transfer> {
        self.transfers.get_mut(id)
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }

    pub fn transfers_mut(&mut self) -> impl Iterator<Item = &mut Transfer> {
        self.transfers.values_mut()
    }

    /// Current state of every transfer still held by the session.
    pub fn states(&self) -> HashMap<TransferId, TransferState> {
        self.transfers
            .iter()
            .map(|(id, t)| (id.clone(), t.state()))
            .collect()
    }

    /// Drop a transfer, remembering its final state for the summary.
    pub fn remove_transfer(&mut self, id: &TransferId) -> Option<Transfer> {
        let transfer = self.transfers.remove(id)?;
        self.removed.record(transfer.state());
        Some(transfer)
    }

    pub fn summary(&self) -> SessionSummary {
        let mut summary = self.removed;
        for t in self.transfers.values() {
            summary.record(t.state());
        }
        summary
    }

    /// Send the manifest to every recipient.
    pub async fn request_authorization<T: Transport>(&self, transport: &T) -> Result<(), TransferError> {
        tracing::info!(
            session_id = %self.id,
            recipients = self.recipients.len(),
            transfers = self.transfers.len(),
            "requesting authorization"
        );
        transport
            .request_authorization(&self.manifest)
            .await
            .map_err(|e| TransferError::transport(self.id, "request authorization for", e))
    }

    /// Apply one recipient's decision.
    pub async fn handle_authorization_response<T: Transport>(
        &mut self,
        transport: &T,
        peer: &PeerId,
        accepted: bool,
    ) -> AuthorizationOutcome {
        if self.cancelled {
            return AuthorizationOutcome::Ignored;
        }
        let Some(decision) = self.recipients.get_mut(peer) else {
            tracing::debug!(session_id = %self.id, peer_id = %peer, "authorization from unknown peer");
            return AuthorizationOutcome::Ignored;
        };

        if !accepted {
            tracing::info!(session_id = %self.id, peer_id = %peer, "session rejected");
            let mut errors = vec![TransferError::Rejected { peer: peer.clone() }];
            errors.extend(self.cancel(transport).await.unwrap_or_default());
            return AuthorizationOutcome::Rejected { errors };
        }

        // Acceptance is sticky; a repeat must not restart anything.
        if *decision {
            return AuthorizationOutcome::Ignored;
        }
        *decision = true;
        tracing::debug!(session_id = %self.id, peer_id = %peer, "recipient accepted");

        if !self.fully_authorized() {
            return AuthorizationOutcome::Waiting;
        }
        tracing::info!(session_id = %self.id, "session authorized, starting transfers");
        let errors = self.start_all(transport).await;
        AuthorizationOutcome::Authorized { errors }
    }

    /// Start every pending transfer concurrently.
    async fn start_all<T: Transport>(&mut self, transport: &T) -> Vec<TransferError> {
        join_all(self.transfers.values_mut().map(|t| t.start(transport)))
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Cancel the session: one batch signal, then a cancel per live transfer.
    ///
    /// Returns `None` if the session was already cancelled.
    pub async fn cancel<T: Transport>(&mut self, transport: &T) -> Option<Vec<TransferError>> {
        if self.cancelled {
            return None;
        }
        self.cancelled = true;
        tracing::info!(session_id = %self.id, "cancelling session");

        let mut errors = Vec::new();
        let batch = SessionCancel {
            session_id: self.id,
            recipients: self.manifest.recipients.clone(),
        };
        if let Err(e) = transport.cancel_session(&batch).await {
            errors.push(TransferError::transport(self.id, "cancel session", e));
        }

        let results = join_all(
            self.transfers
                .values_mut()
                .filter(|t| !t.state().is_terminal())
                .map(|t| t.cancel(transport)),
        )
        .await;
        errors.extend(results.into_iter().filter_map(Result::err));
        Some(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drip_net::sim::{SimNetwork, SimPeer};
    use drip_net::testing::{drain_messages, init_test_tracing};
    use drip_protocol::transfer::TransferMessage;

    fn files() -> Vec<FileSource> {
        vec![
            FileSource::from_bytes("a.txt", b"alpha".to_vec()),
            FileSource::from_bytes("b.txt", b"beta".to_vec()),
        ]
    }

    fn peers(names: &[&str]) -> Vec<PeerId> {
        names.iter().map(|n| PeerId::from(*n)).collect()
    }

    async fn network(names: &[&str]) -> (SimNetwork, Vec<SimPeer>) {
        init_test_tracing();
        let (net, _inbound) = SimNetwork::new();
        let mut sim_peers = Vec::new();
        for name in names {
            sim_peers.push(net.add_peer(PeerId::from(*name)).await);
        }
        (net, sim_peers)
    }

    #[test]
    fn create_builds_cross_product() {
        let session = Session::create(&files(), &peers(&["p1", "p2"]), 4).unwrap();
        assert_eq!(session.transfers().count(), 4);
        assert_eq!(session.manifest().transfers.len(), 4);
        assert_eq!(session.manifest().recipients, peers(&["p1", "p2"]));
        assert!(!session.fully_authorized());
        assert!(session
            .transfers()
            .all(|t| t.state() == TransferState::Pending && t.session_id() == session.id()));
    }

    #[test]
    fn create_rejects_empty_input_and_dedups_recipients() {
        assert!(Session::create(&[], &peers(&["p1"]), 4).is_none());
        assert!(Session::create(&files(), &[], 4).is_none());

        let session = Session::create(&files(), &peers(&["p1", "p1"]), 4).unwrap();
        assert_eq!(session.recipients().count(), 1);
        assert_eq!(session.transfers().count(), 2);
    }

    #[test]
    fn create_rejects_zero_chunk_size() {
        assert!(Session::create(&files(), &peers(&["p1"]), 0).is_none());
    }

    #[test]
    fn create_redraws_ids_that_are_in_use() {
        let mut rejected = Vec::new();
        let session = Session::create_avoiding(&files(), &peers(&["p1", "p2"]), 4, |id| {
            // Refuse the first three ids drawn.
            if rejected.len() < 3 {
                rejected.push(id.clone());
                true
            } else {
                false
            }
        })
        .unwrap();

        assert_eq!(rejected.len(), 3);
        assert_eq!(session.transfers().count(), 4);
        for id in &rejected {
            assert!(session.transfer(id).is_none());
        }
        let mut announced: Vec<_> = session
            .manifest()
            .transfers
            .iter()
            .map(|e| e.transfer_id.clone())
            .collect();
        announced.sort();
        let held: Vec<_> = session.transfer_ids().cloned().collect();
        assert_eq!(announced, held);
    }

    #[tokio::test]
    async fn waits_for_every_recipient_before_streaming() {
        let (net, mut sim) = network(&["p1", "p2"]).await;
        let transport = net.transport();
        let mut session = Session::create(&files(), &peers(&["p1", "p2"]), 4).unwrap();

        session.request_authorization(&transport).await.unwrap();
        for peer in &mut sim {
            let msgs = drain_messages(peer);
            assert!(matches!(msgs.as_slice(), [TransferMessage::Authorize(_)]));
        }

        let outcome = session
            .handle_authorization_response(&transport, &PeerId::from("p1"), true)
            .await;
        assert!(matches!(outcome, AuthorizationOutcome::Waiting));
        assert!(drain_messages(&mut sim[0]).is_empty(), "nothing streams before full authorization");

        let outcome = session
            .handle_authorization_response(&transport, &PeerId::from("p2"), true)
            .await;
        assert!(matches!(outcome, AuthorizationOutcome::Authorized { ref errors } if errors.is_empty()));
        assert!(session.fully_authorized());
        for peer in &mut sim {
            let infos = drain_messages(peer);
            assert_eq!(infos.len(), 2);
            assert!(infos.iter().all(|m| matches!(m, TransferMessage::Info(_))));
        }
        assert!(session.transfers().all(|t| t.state() == TransferState::InfoSent));

        // A repeated acceptance restarts nothing.
        let outcome = session
            .handle_authorization_response(&transport, &PeerId::from("p2"), true)
            .await;
        assert!(matches!(outcome, AuthorizationOutcome::Ignored));
        assert!(drain_messages(&mut sim[1]).is_empty());
    }

    #[tokio::test]
    async fn rejection_cancels_everything() {
        let (net, mut sim) = network(&["p1", "p2"]).await;
        let transport = net.transport();
        let mut session = Session::create(&files(), &peers(&["p1", "p2"]), 4).unwrap();
        session.request_authorization(&transport).await.unwrap();
        for peer in &mut sim {
            drain_messages(peer);
        }

        session
            .handle_authorization_response(&transport, &PeerId::from("p1"), true)
            .await;
        let outcome = session
            .handle_authorization_response(&transport, &PeerId::from("p2"), false)
            .await;
        let AuthorizationOutcome::Rejected { errors } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], TransferError::Rejected { peer } if peer.as_str() == "p2"));
        assert!(session.is_cancelled());
        assert!(session.is_finished());
        assert!(session.transfers().all(|t| t.state() == TransferState::Cancelled));

        for peer in &mut sim {
            let msgs = drain_messages(peer);
            let batches = msgs
                .iter()
                .filter(|m| matches!(m, TransferMessage::SessionCancel(_)))
                .count();
            let cancels = msgs
                .iter()
                .filter(|m| matches!(m, TransferMessage::Cancel(_)))
                .count();
            assert_eq!((batches, cancels), (1, 2));
            assert!(!msgs.iter().any(|m| matches!(m, TransferMessage::Info(_))));
        }

        // Late responses change nothing.
        let outcome = session
            .handle_authorization_response(&transport, &PeerId::from("p1"), false)
            .await;
        assert!(matches!(outcome, AuthorizationOutcome::Ignored));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (net, mut sim) = network(&["p1"]).await;
        let transport = net.transport();
        let mut session = Session::create(&files(), &peers(&["p1"]), 4).unwrap();

        assert!(session.cancel(&transport).await.unwrap().is_empty());
        let first = drain_messages(&mut sim[0]);
        assert_eq!(first.len(), 3);

        assert!(session.cancel(&transport).await.is_none());
        assert!(drain_messages(&mut sim[0]).is_empty());
    }

    #[tokio::test]
    async fn cancel_skips_terminal_transfers() {
        let (net, mut sim) = network(&["p1"]).await;
        let transport = net.transport();
        let files = vec![FileSource::from_bytes("empty.txt", Vec::new())];
        let mut session = Session::create(&files, &peers(&["p1"]), 4).unwrap();

        session
            .handle_authorization_response(&transport, &PeerId::from("p1"), true)
            .await;
        let id = session.transfer_ids().next().unwrap().clone();
        session
            .transfer_mut(&id)
            .unwrap()
            .advance(&transport, 0, 0)
            .await
            .unwrap();
        assert!(session.is_finished());
        drain_messages(&mut sim[0]);

        session.cancel(&transport).await.unwrap();
        let msgs = drain_messages(&mut sim[0]);
        assert!(matches!(msgs.as_slice(), [TransferMessage::SessionCancel(_)]));
        assert_eq!(session.summary().completed, 1);
    }
}
