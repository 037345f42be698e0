//! Shared test utilities for drip tests.
//!
//! Provides tracing setup and wait helpers that eliminate duplicated test
//! boilerplate across crates.

use std::time::Duration;

use drip_protocol::transfer::TransferMessage;

use crate::sim::SimPeer;

/// Default timeout for waiting on a simulated peer.
pub const PEER_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise a tracing subscriber for tests.
///
/// Respects the `RUST_LOG` environment variable, defaults to `debug`.
/// Uses `with_test_writer()` to integrate with `cargo test` output capture.
/// Safe to call multiple times; later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Wait for the next message addressed to `peer`.
///
/// Panics if nothing arrives within [`PEER_RECV_TIMEOUT`].
pub async fn expect_message(peer: &mut SimPeer) -> TransferMessage {
    match tokio::time::timeout(PEER_RECV_TIMEOUT, peer.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => panic!("network closed while waiting on peer {}", peer.id()),
        Err(_) => panic!(
            "timed out waiting for a message to peer {} (after {:?})",
            peer.id(),
            PEER_RECV_TIMEOUT
        ),
    }
}

/// Drain every message currently queued for `peer`.
pub fn drain_messages(peer: &mut SimPeer) -> Vec<TransferMessage> {
    let mut messages = Vec::new();
    while let Some(message) = peer.try_recv() {
        messages.push(message);
    }
    messages
}
