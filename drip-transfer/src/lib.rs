//! Transfer orchestration: sessions, stop-and-wait transfers, response
//! routing, and timeout-driven retransmission, owned by a single actor.

pub mod config;
pub mod error;
pub mod events;
pub mod notify;
pub mod orchestrator;
pub mod registry;
mod router;
pub mod session;
mod sweeper;
pub mod transfer;

pub use config::TransferConfig;
pub use error::TransferError;
pub use events::TransferEvent;
pub use notify::{ErrorSink, TracingSink};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use session::{Session, SessionSummary};
pub use transfer::{Transfer, TransferState, TransferStatus};
