//! Deterministic in-process network simulation harness.
//!
//! Provides [`SimNetwork`] to create simulated remote peers that exchange
//! protocol frames with the local node via in-process channels, with
//! configurable latency, message loss, disconnection, and send failures. All
//! tests run without real sockets.
//!
//! # Example
//!
//! ```ignore
//! let (sim, mut inbound) = SimNetwork::new();
//! let mut alice = sim.add_peer(PeerId::from("alice")).await;
//! let transport = sim.transport();
//! sim.set_loss_rate(0.05).await;
//!
//! transport.send_info(&info).await?;
//! let message = alice.recv().await;
//! ```

mod network;
mod peer;
mod transport;

pub use network::SimNetwork;
pub use peer::{PeerMetrics, SimPeer};
pub use transport::SimTransport;
