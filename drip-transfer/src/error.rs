//! Failure taxonomy of the transfer engine.
//!
//! Every variant is surfaced through the [`ErrorSink`](crate::notify::ErrorSink)
//! as its display string. None of them stop the engine.

use drip_protocol::types::{PeerId, TransferId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// A transport call failed. `target` is a transfer or session id.
    #[error("failed to {action} {target}: {reason}")]
    Transport {
        target: String,
        action: &'static str,
        reason: String,
    },
    /// A recipient declined the session.
    #[error("{peer} does not allow the transfer")]
    Rejected { peer: PeerId },
    /// The transfer timed out more often than allowed.
    #[error("max retries for {transfer_id} exceeded ({retries}), cancelling transfer")]
    RetryBudgetExceeded { transfer_id: TransferId, retries: u32 },
    /// The file source could not be read.
    #[error("couldn't read {transfer_id}: {source}")]
    Read {
        transfer_id: TransferId,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn transport(
        target: impl ToString,
        action: &'static str,
        error: anyhow::Error,
    ) -> Self {
        Self::Transport {
            target: target.to_string(),
            action,
            reason: format!("{error:#}"),
        }
    }
}
