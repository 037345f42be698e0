//! Integration tests covering loopback sends end-to-end.

mod helpers;

mod graceful_degradation;
mod loopback_send;
