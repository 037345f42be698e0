//! One file streamed to one recipient.
//!
//! A [`Transfer`] is a stop-and-wait state machine: it keeps exactly one
//! artifact (the info message or a chunk) in flight and only moves on when an
//! ack matching that artifact arrives. Anything else is stale and ignored.
//!
//! ```text
//! Pending ──start──▶ InfoSent ──ack──▶ Streaming ──ack, EOF──▶ Completed
//!                       │                  │
//!                       └──── cancel ──────┴──▶ Cancelled
//!                       └── send/read error, retries exhausted ──▶ Failed
//! ```

use std::time::Duration;

use bytes::Bytes;
use drip_files::{ChunkReader, FileSource};
use drip_net::Transport;
use drip_protocol::transfer::{CancelSignal, ChunkMessage, InfoMessage, ManifestEntry};
use drip_protocol::types::{PeerId, SessionId, TransferId};
use tokio::time::Instant;

use crate::error::TransferError;

/// Lifecycle state of a [`Transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Waiting for the session to be authorized.
    Pending,
    /// Info message sent, waiting for its ack.
    InfoSent,
    /// At least one chunk in flight or acknowledged.
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InfoSent => "info-sent",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The artifact awaiting an ack.
#[derive(Debug, Clone)]
enum Outstanding {
    None,
    Info,
    Chunk { offset: u64, data: Bytes },
}

/// What an incoming ack did to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ack did not match the outstanding artifact.
    Stale,
    /// The next chunk is in flight.
    Advanced,
    /// The final ack arrived.
    Completed,
}

/// What a retry timeout did to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The outstanding artifact was sent again.
    Resent,
    /// The retry budget is spent; the transfer is now `Failed`.
    Exhausted,
}

/// Point-in-time view of a transfer for status queries and events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub transfer_id: TransferId,
    pub session_id: SessionId,
    pub recipient: PeerId,
    pub name: String,
    pub size: u64,
    pub amount_sent: u64,
    pub retry_count: u32,
    pub state: TransferState,
}

pub struct Transfer {
    id: TransferId,
    session_id: SessionId,
    recipient: PeerId,
    source: FileSource,
    chunk_size: u32,
    reader: Option<ChunkReader>,
    amount_sent: u64,
    retry_count: u32,
    last_ack_time: Instant,
    state: TransferState,
    outstanding: Outstanding,
}

impl Transfer {
    pub fn new(session_id: SessionId, source: FileSource, recipient: PeerId, chunk_size: u32) -> Self {
        Self {
            id: TransferId::for_file(source.name()),
            session_id,
            recipient,
            source,
            chunk_size,
            reader: None,
            amount_sent: 0,
            retry_count: 0,
            last_ack_time: Instant::now(),
            state: TransferState::Pending,
            outstanding: Outstanding::None,
        }
    }

    /// Draw a fresh id for a transfer that has not been announced yet.
    pub(crate) fn regenerate_id(&mut self) {
        self.id = TransferId::for_file(self.source.name());
    }

    pub fn id(&self) -> &TransferId {
        &self.id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn recipient(&self) -> &PeerId {
        &self.recipient
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }

    pub fn amount_sent(&self) -> u64 {
        self.amount_sent
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn last_ack_time(&self) -> Instant {
        self.last_ack_time
    }

    pub fn status(&self) -> TransferStatus {
        TransferStatus {
            transfer_id: self.id.clone(),
            session_id: self.session_id,
            recipient: self.recipient.clone(),
            name: self.source.name().to_string(),
            size: self.source.size(),
            amount_sent: self.amount_sent,
            retry_count: self.retry_count,
            state: self.state,
        }
    }

    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            transfer_id: self.id.clone(),
            recipient: self.recipient.clone(),
            size: self.source.size(),
        }
    }

    fn info_message(&self) -> InfoMessage {
        InfoMessage {
            transfer_id: self.id.clone(),
            recipient: self.recipient.clone(),
            name: self.source.name().to_string(),
            size: self.source.size(),
        }
    }

    /// Announce the file to the recipient. A no-op unless `Pending`.
    pub async fn start<T: Transport>(&mut self, transport: &T) -> Result<(), TransferError> {
        if self.state != TransferState::Pending {
            return Ok(());
        }
        self.state = TransferState::InfoSent;
        self.outstanding = Outstanding::Info;
        self.last_ack_time = Instant::now();
        tracing::debug!(transfer_id = %self.id, peer_id = %self.recipient, size = self.size(), "sending info");
        self.send_info(transport).await
    }

    async fn send_info<T: Transport>(&mut self, transport: &T) -> Result<(), TransferError> {
        let info = self.info_message();
        if let Err(e) = transport.send_info(&info).await {
            self.fail();
            return Err(TransferError::transport(&self.id, "start transferring", e));
        }
        Ok(())
    }

    async fn read_next_chunk(&mut self) -> Result<Bytes, TransferError> {
        if self.reader.is_none() {
            let reader = self.source.open().await.map_err(|source| TransferError::Read {
                transfer_id: self.id.clone(),
                source,
            })?;
            self.reader = Some(reader);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Bytes::new());
        };
        reader
            .read_chunk(self.amount_sent, self.chunk_size)
            .await
            .map_err(|source| TransferError::Read {
                transfer_id: self.id.clone(),
                source,
            })
    }

    async fn send_chunk<T: Transport>(
        &mut self,
        transport: &T,
        offset: u64,
        data: &Bytes,
    ) -> Result<(), TransferError> {
        let chunk = ChunkMessage {
            transfer_id: self.id.clone(),
            recipient: self.recipient.clone(),
            offset,
            data: data.to_vec(),
        };
        if let Err(e) = transport.send_chunk(&chunk).await {
            self.fail();
            return Err(TransferError::transport(&self.id, "send chunk for", e));
        }
        Ok(())
    }

    /// Whether an ack of `amount` bytes at `offset` acknowledges the artifact
    /// in flight. Info is acked with zero bytes at offset zero.
    fn matches_outstanding(&self, offset: u64, amount: u64) -> bool {
        match &self.outstanding {
            Outstanding::None => false,
            Outstanding::Info => offset == 0 && amount == 0,
            Outstanding::Chunk { offset: o, data } => *o == offset && data.len() as u64 == amount,
        }
    }

    /// Apply an ack and send the next chunk, or complete at end of file.
    ///
    /// Acks that do not match the outstanding artifact change nothing.
    pub async fn advance<T: Transport>(
        &mut self,
        transport: &T,
        offset: u64,
        amount: u64,
    ) -> Result<AckOutcome, TransferError> {
        if self.state.is_terminal() || !self.matches_outstanding(offset, amount) {
            tracing::trace!(transfer_id = %self.id, offset, amount, "ignoring stale ack");
            return Ok(AckOutcome::Stale);
        }

        self.amount_sent += amount;
        self.retry_count = 0;
        self.last_ack_time = Instant::now();
        self.outstanding = Outstanding::None;

        let data = match self.read_next_chunk().await {
            Ok(data) => data,
            Err(e) => {
                self.fail();
                return Err(e);
            }
        };

        if data.is_empty() {
            if self.amount_sent < self.size() {
                self.fail();
                return Err(TransferError::Read {
                    transfer_id: self.id.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "source ended at {} of {} bytes",
                            self.amount_sent,
                            self.size()
                        ),
                    ),
                });
            }
            self.state = TransferState::Completed;
            self.reader = None;
            tracing::info!(transfer_id = %self.id, peer_id = %self.recipient, bytes = self.amount_sent, "transfer complete");
            return Ok(AckOutcome::Completed);
        }

        let offset = self.amount_sent;
        self.state = TransferState::Streaming;
        self.outstanding = Outstanding::Chunk {
            offset,
            data: data.clone(),
        };
        self.send_chunk(transport, offset, &data).await?;
        Ok(AckOutcome::Advanced)
    }

    /// Send the outstanding artifact again, unchanged.
    pub async fn resend<T: Transport>(&mut self, transport: &T) -> Result<(), TransferError> {
        match self.outstanding.clone() {
            Outstanding::None => Ok(()),
            Outstanding::Info => self.send_info(transport).await,
            Outstanding::Chunk { offset, data } => self.send_chunk(transport, offset, &data).await,
        }
    }

    /// Whether the last ack is at least `timeout` old. Only in-flight
    /// transfers can time out.
    pub fn is_overdue(&self, now: Instant, timeout: Duration) -> bool {
        matches!(self.state, TransferState::InfoSent | TransferState::Streaming)
            && now.saturating_duration_since(self.last_ack_time) >= timeout
    }

    /// Count a timeout and resend, or give up once `max_retries` is exceeded.
    pub async fn on_timeout<T: Transport>(
        &mut self,
        transport: &T,
        max_retries: u32,
    ) -> Result<TimeoutOutcome, TransferError> {
        self.retry_count += 1;
        if self.retry_count > max_retries {
            self.fail();
            return Ok(TimeoutOutcome::Exhausted);
        }
        tracing::debug!(transfer_id = %self.id, retry = self.retry_count, "resending after timeout");
        self.resend(transport).await?;
        Ok(TimeoutOutcome::Resent)
    }

    /// Stop the transfer and tell the recipient.
    ///
    /// The state is `Cancelled` before the signal goes out and stays so even
    /// if sending fails. Returns `Ok(false)` when already terminal.
    pub async fn cancel<T: Transport>(&mut self, transport: &T) -> Result<bool, TransferError> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        self.state = TransferState::Cancelled;
        self.outstanding = Outstanding::None;
        self.reader = None;
        let signal = CancelSignal {
            transfer_id: self.id.clone(),
            recipient: self.recipient.clone(),
        };
        transport
            .send_cancel(&signal)
            .await
            .map_err(|e| TransferError::transport(&self.id, "cancel transferring", e))?;
        Ok(true)
    }

    /// The recipient stopped tracking this transfer.
    pub fn cancelled_by_peer(&mut self) {
        if !self.state.is_terminal() {
            self.state = TransferState::Cancelled;
            self.outstanding = Outstanding::None;
            self.reader = None;
        }
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = TransferState::Failed;
        }
        self.outstanding = Outstanding::None;
        self.reader = None;
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("recipient", &self.recipient)
            .field("state", &self.state)
            .field("amount_sent", &self.amount_sent)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}
