//! Shared identifiers and the versioned wire schema for drip transfers.

pub mod transfer;
pub mod types;
