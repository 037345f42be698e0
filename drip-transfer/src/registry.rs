//! Live sessions and the transfer-id index used to route acks.

use std::collections::HashMap;

use drip_protocol::types::{SessionId, TransferId};

use crate::session::Session;
use crate::transfer::Transfer;

#[derive(Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    index: HashMap<TransferId, SessionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfer ids must not collide with any live session's; see
    /// [`Session::create_avoiding`].
    pub fn insert(&mut self, session: Session) {
        let id = session.id();
        for transfer_id in session.transfer_ids() {
            self.index.insert(transfer_id.clone(), id);
        }
        self.sessions.insert(id, session);
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn session_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Whether a live session already uses this transfer id.
    pub fn contains_transfer(&self, transfer_id: &TransferId) -> bool {
        self.index.contains_key(transfer_id)
    }

    pub fn transfer(&self, transfer_id: &TransferId) -> Option<&Transfer> {
        let session_id = self.index.get(transfer_id)?;
        self.sessions.get(session_id)?.transfer(transfer_id)
    }

    pub fn transfer_mut(&mut self, transfer_id: &TransferId) -> Option<&mut Transfer> {
        let session_id = self.index.get(transfer_id)?;
        self.sessions.get_mut(session_id)?.transfer_mut(transfer_id)
    }

    /// Remove a single transfer; later acks for it become no-ops.
    pub fn remove_transfer(&mut self, transfer_id: &TransferId) -> Option<Transfer> {
        let session_id = self.index.remove(transfer_id)?;
        self.sessions.get_mut(&session_id)?.remove_transfer(transfer_id)
    }

    /// Remove a session together with every transfer it still holds.
    pub fn remove_session(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        for transfer_id in session.transfer_ids() {
            self.index.remove(transfer_id);
        }
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn transfer_count(&self) -> usize {
        self.index.len()
    }
}
