//! Identifiers shared across all drip crates.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Identifier of a reachable peer, as published by the peer directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one batch send. Wraps 16 random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Generate a fresh random session ID.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Encode the session ID as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Identifier of one (file, recipient) transfer.
///
/// Derived from the file name plus a random suffix so that repeated sends of
/// same-named files never collide: `report.pdf` becomes `report-9f3a01c2.pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub String);

impl TransferId {
    /// Derive a fresh transfer ID from a file name.
    pub fn for_file(file_name: &str) -> Self {
        Self::with_suffix(file_name, rand::random())
    }

    fn with_suffix(file_name: &str, suffix: u32) -> Self {
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let id = match path.extension() {
            Some(ext) => format!("{stem}-{suffix:08x}.{}", ext.to_string_lossy()),
            None => format!("{stem}-{suffix:08x}"),
        };
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
