//! Simulated transport implementing the [`Transport`] trait.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use drip_protocol::transfer::{
    encode_frame, CancelSignal, ChunkMessage, InfoMessage, Manifest, SessionCancel,
    TransferMessage,
};
use drip_protocol::types::PeerId;

use crate::transport::{Transport, TransportMetrics};

use super::network::SimNetworkInner;

/// The local node's side of a [`SimNetwork`](super::SimNetwork).
///
/// Encodes each message as a protocol frame and routes it through the
/// network, which applies failures, loss, and latency.
pub struct SimTransport {
    network: Arc<SimNetworkInner>,
    metrics: TransportMetrics,
}

impl SimTransport {
    pub(crate) fn new(network: Arc<SimNetworkInner>) -> Self {
        Self {
            network,
            metrics: TransportMetrics::new(),
        }
    }

    async fn send_to(&self, to: &PeerId, message: &TransferMessage) -> Result<()> {
        let frame = encode_frame(message)
            .with_context(|| format!("failed to encode {} frame", message.label()))?;
        tracing::trace!(peer_id = %to, kind = message.label(), bytes = frame.len(), "sim send");
        self.network
            .route_to_peer(to, Bytes::from(frame), &self.metrics)
            .await
    }
}

impl Transport for SimTransport {
    async fn request_authorization(&self, manifest: &Manifest) -> Result<()> {
        let message = TransferMessage::Authorize(manifest.clone());
        for recipient in &manifest.recipients {
            self.send_to(recipient, &message).await?;
        }
        Ok(())
    }

    async fn send_info(&self, info: &InfoMessage) -> Result<()> {
        self.send_to(&info.recipient, &TransferMessage::Info(info.clone()))
            .await
    }

    async fn send_chunk(&self, chunk: &ChunkMessage) -> Result<()> {
        self.send_to(&chunk.recipient, &TransferMessage::Chunk(chunk.clone()))
            .await
    }

    async fn send_cancel(&self, signal: &CancelSignal) -> Result<()> {
        self.send_to(&signal.recipient, &TransferMessage::Cancel(signal.clone()))
            .await
    }

    async fn cancel_session(&self, cancel: &SessionCancel) -> Result<()> {
        let message = TransferMessage::SessionCancel(cancel.clone());
        for recipient in &cancel.recipients {
            self.send_to(recipient, &message).await?;
        }
        Ok(())
    }

    fn transport_metrics(&self) -> &TransportMetrics {
        &self.metrics
    }
}
