//! Simulated remote peer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use drip_protocol::transfer::{decode_frame, encode_response, ResponseKind, ResponsePayload, TransferMessage};
use drip_protocol::types::PeerId;
use tokio::sync::mpsc;

use crate::transport::TransportMetrics;

use super::network::SimNetworkInner;

/// Peer metrics are the transport metrics.
pub type PeerMetrics = TransportMetrics;

/// A simulated remote peer: receives frames from the local node and sends
/// responses back through the network.
pub struct SimPeer {
    id: PeerId,
    network: Arc<SimNetworkInner>,
    frame_rx: mpsc::UnboundedReceiver<Bytes>,
    metrics: PeerMetrics,
}

impl SimPeer {
    pub(crate) fn new(
        id: PeerId,
        network: Arc<SimNetworkInner>,
        frame_rx: mpsc::UnboundedReceiver<Bytes>,
    ) -> Self {
        Self {
            id,
            network,
            frame_rx,
            metrics: PeerMetrics::new(),
        }
    }

    /// Get the peer's identifier.
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Receive the next decodable message addressed to this peer.
    ///
    /// Undecodable frames are logged and skipped. Returns `None` once the
    /// network has been dropped.
    pub async fn recv(&mut self) -> Option<TransferMessage> {
        loop {
            let frame = self.frame_rx.recv().await?;
            self.metrics.record_received(frame.len());
            match decode_frame(&frame) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(peer_id = %self.id, error = %e, "undecodable frame");
                }
            }
        }
    }

    /// Return a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<TransferMessage> {
        while let Ok(frame) = self.frame_rx.try_recv() {
            self.metrics.record_received(frame.len());
            if let Ok(message) = decode_frame(&frame) {
                return Some(message);
            }
        }
        None
    }

    /// Send a response back to the local node.
    pub async fn respond(&self, kind: ResponseKind, payload: &ResponsePayload) -> Result<()> {
        let bytes = encode_response(payload).context("failed to encode response")?;
        self.network
            .route_to_local(&self.id, kind, Bytes::from(bytes), &self.metrics)
            .await
    }

    /// Get peer metrics.
    pub fn metrics(&self) -> &PeerMetrics {
        &self.metrics
    }

    /// Get the number of frames received.
    pub fn frames_received(&self) -> u64 {
        self.metrics.responses_received.load(Ordering::Relaxed)
    }
}
