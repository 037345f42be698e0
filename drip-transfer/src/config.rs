//! Tuning knobs for chunking and retransmission.

use std::time::Duration;

use anyhow::Result;
use drip_files::CHUNK_SIZE;

/// How often the retry sweeper runs.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// How long a transfer may go without an ack before its last artifact is resent.
pub const RETRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts tolerated before a transfer is abandoned.
pub const MAX_RETRIES: u32 = 10;

/// Configuration of the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Bytes per chunk message.
    pub chunk_size: u32,
    /// Period of the retry sweep.
    pub retry_interval: Duration,
    /// Ack staleness that triggers a resend.
    pub retry_timeout: Duration,
    /// Resends allowed before abandoning a transfer.
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            retry_interval: RETRY_INTERVAL,
            retry_timeout: RETRY_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

impl TransferConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.retry_interval.is_zero() {
            anyhow::bail!("retry_interval must be greater than zero");
        }
        Ok(())
    }
}
