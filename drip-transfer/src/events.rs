//! Events published by the orchestrator to the application layer.

use drip_protocol::types::{PeerId, SessionId, TransferId};

use crate::session::SessionSummary;
use crate::transfer::TransferState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A send action produced a session; the manifest is on its way.
    SessionCreated {
        session_id: SessionId,
        transfer_ids: Vec<TransferId>,
    },
    /// Every recipient accepted; streaming has started.
    SessionAuthorized { session_id: SessionId },
    /// A recipient declined; the session is being cancelled.
    SessionRejected { session_id: SessionId, peer: PeerId },
    /// The session was cancelled (by the user, a rejection, or shutdown).
    SessionCancelled { session_id: SessionId },
    /// Every transfer is terminal and the session has been dropped.
    SessionFinished {
        session_id: SessionId,
        summary: SessionSummary,
    },
    StateChanged {
        transfer_id: TransferId,
        state: TransferState,
    },
    /// An ack was applied.
    Progress {
        transfer_id: TransferId,
        amount_sent: u64,
        size: u64,
    },
    /// The outstanding artifact was resent after a timeout.
    Retried {
        transfer_id: TransferId,
        retry_count: u32,
    },
}
