//! Transfer protocol messages.
//!
//! Outbound messages are wrapped in a versioned [`Frame`] and encoded with
//! postcard. Inbound responses travel as a [`ResponsePayload`] tagged with a
//! [`ResponseKind`] by the transport.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PeerId, SessionId, TransferId};

/// Version of the wire schema in this module.
pub const PROTOCOL_VERSION: u8 = 1;

/// One entry of a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub transfer_id: TransferId,
    pub recipient: PeerId,
    pub size: u64,
}

/// Authorization request listing a session's recipients and transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub session_id: SessionId,
    pub recipients: Vec<PeerId>,
    pub transfers: Vec<ManifestEntry>,
}

impl Manifest {
    /// Entries addressed to a single recipient.
    pub fn entries_for<'a>(&'a self, peer: &'a PeerId) -> impl Iterator<Item = &'a ManifestEntry> {
        self.transfers.iter().filter(move |e| &e.recipient == peer)
    }
}

/// First message of a transfer, announcing the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    pub transfer_id: TransferId,
    pub recipient: PeerId,
    pub name: String,
    pub size: u64,
}

/// A slice of file data starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub transfer_id: TransferId,
    pub recipient: PeerId,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Per-transfer cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSignal {
    pub transfer_id: TransferId,
    pub recipient: PeerId,
}

/// Batch cancellation of a whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCancel {
    pub session_id: SessionId,
    pub recipients: Vec<PeerId>,
}

/// Any message a sender puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMessage {
    Authorize(Manifest),
    Info(InfoMessage),
    Chunk(ChunkMessage),
    Cancel(CancelSignal),
    SessionCancel(SessionCancel),
}

impl TransferMessage {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Authorize(_) => "authorize",
            Self::Info(_) => "info",
            Self::Chunk(_) => "chunk",
            Self::Cancel(_) => "cancel",
            Self::SessionCancel(_) => "session-cancel",
        }
    }
}

/// Versioned envelope around a [`TransferMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub version: u8,
    pub message: TransferMessage,
}

/// Which stage of the protocol a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    Authorization,
    Transfer,
}

/// A peer's reply to a manifest, info, chunk, or cancel message.
///
/// Authorization responses carry `session_id` and `accepted`. Transfer
/// responses carry `transfer_id` and either `cancelled` or an ack of
/// `amount_received` bytes at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub session_id: Option<SessionId>,
    pub transfer_id: Option<TransferId>,
    pub sender_id: PeerId,
    pub offset: u64,
    pub amount_received: u64,
    pub cancelled: bool,
    pub accepted: bool,
}

impl ResponsePayload {
    /// An authorization decision for a session.
    pub fn authorization(session_id: SessionId, sender_id: PeerId, accepted: bool) -> Self {
        Self {
            session_id: Some(session_id),
            transfer_id: None,
            sender_id,
            offset: 0,
            amount_received: 0,
            cancelled: false,
            accepted,
        }
    }

    /// An acknowledgment of `amount_received` bytes written at `offset`.
    pub fn ack(
        transfer_id: TransferId,
        sender_id: PeerId,
        offset: u64,
        amount_received: u64,
    ) -> Self {
        Self {
            session_id: None,
            transfer_id: Some(transfer_id),
            sender_id,
            offset,
            amount_received,
            cancelled: false,
            accepted: true,
        }
    }

    /// The peer no longer tracks this transfer.
    pub fn cancelled(transfer_id: TransferId, sender_id: PeerId) -> Self {
        Self {
            session_id: None,
            transfer_id: Some(transfer_id),
            sender_id,
            offset: 0,
            amount_received: 0,
            cancelled: true,
            accepted: false,
        }
    }
}

/// Errors when decoding protocol bytes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version {found} (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion { found: u8 },
    #[error("invalid protocol data: {0}")]
    Postcard(#[from] postcard::Error),
}

/// Serialize a message inside a current-version [`Frame`].
pub fn encode_frame(message: &TransferMessage) -> Result<Vec<u8>, ProtocolError> {
    let frame = Frame {
        version: PROTOCOL_VERSION,
        message: message.clone(),
    };
    Ok(postcard::to_allocvec(&frame)?)
}

/// Deserialize a [`Frame`] and unwrap its message, rejecting other versions.
pub fn decode_frame(data: &[u8]) -> Result<TransferMessage, ProtocolError> {
    let frame: Frame = postcard::from_bytes(data)?;
    if frame.version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            found: frame.version,
        });
    }
    Ok(frame.message)
}

/// Serialize a `ResponsePayload` to compact binary via postcard.
pub fn encode_response(payload: &ResponsePayload) -> Result<Vec<u8>, ProtocolError> {
    Ok(postcard::to_allocvec(payload)?)
}

/// Deserialize a `ResponsePayload` from postcard bytes.
pub fn decode_response(data: &[u8]) -> Result<ResponsePayload, ProtocolError> {
    Ok(postcard::from_bytes(data)?)
}
