//! Abstract transport trait for the transfer protocol.
//!
//! Defines the [`Transport`] trait the orchestrator sends through, and the
//! [`InboundEvent`]s a transport delivers back. The simulated network
//! ([`SimTransport`](crate::sim::SimTransport)) implements it for tests and the
//! loopback runner.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use bytes::Bytes;
use drip_protocol::transfer::{
    CancelSignal, ChunkMessage, InfoMessage, Manifest, ResponseKind, SessionCancel,
};

/// Metrics tracked by a transport implementation.
pub struct TransportMetrics {
    pub messages_sent: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub send_failures: AtomicU64,
    pub responses_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl TransportMetrics {
    /// Create new zeroed metrics.
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            responses_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Record a sent message.
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a received response.
    pub fn record_received(&self, bytes: usize) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a message lost in transit.
    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send call that returned an error.
    pub fn record_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// An opaque response delivered by the transport, tagged with its kind.
///
/// The payload decodes to a
/// [`ResponsePayload`](drip_protocol::transfer::ResponsePayload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub kind: ResponseKind,
    pub payload: Bytes,
}

/// Outbound half of the transfer protocol.
///
/// Every call resolves once the message has been handed to the delivery
/// layer, or fails. Delivery itself is unreliable: a successful call does not
/// mean the peer received the message.
pub trait Transport: Send + Sync {
    /// Send a manifest to every recipient it lists.
    fn request_authorization(&self, manifest: &Manifest) -> impl Future<Output = Result<()>> + Send;

    /// Send the first message of a transfer.
    fn send_info(&self, info: &InfoMessage) -> impl Future<Output = Result<()>> + Send;

    /// Send one chunk of file data.
    fn send_chunk(&self, chunk: &ChunkMessage) -> impl Future<Output = Result<()>> + Send;

    /// Cancel a single transfer on its recipient.
    fn send_cancel(&self, signal: &CancelSignal) -> impl Future<Output = Result<()>> + Send;

    /// Cancel a whole session on every listed recipient.
    fn cancel_session(&self, cancel: &SessionCancel) -> impl Future<Output = Result<()>> + Send;

    /// Get transport metrics.
    fn transport_metrics(&self) -> &TransportMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_default_is_zeroed() {
        let m = TransportMetrics::new();
        assert_eq!(m.messages_sent.load(Ordering::Relaxed), 0);
        assert_eq!(m.messages_dropped.load(Ordering::Relaxed), 0);
        assert_eq!(m.send_failures.load(Ordering::Relaxed), 0);
        assert_eq!(m.responses_received.load(Ordering::Relaxed), 0);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 0);
        assert_eq!(m.bytes_received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn metrics_record_helpers() {
        let m = TransportMetrics::new();

        m.record_sent(100);
        m.record_sent(200);
        assert_eq!(m.messages_sent.load(Ordering::Relaxed), 2);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 300);

        m.record_received(50);
        assert_eq!(m.responses_received.load(Ordering::Relaxed), 1);
        assert_eq!(m.bytes_received.load(Ordering::Relaxed), 50);

        m.record_dropped();
        m.record_dropped();
        assert_eq!(m.messages_dropped.load(Ordering::Relaxed), 2);

        m.record_failure();
        assert_eq!(m.send_failures.load(Ordering::Relaxed), 1);
    }
}
