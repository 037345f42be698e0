//! Transport abstraction, transport metrics, and a simulated network.

pub mod sim;
pub mod testing;
pub mod transport;

pub use transport::{InboundEvent, Transport, TransportMetrics};
