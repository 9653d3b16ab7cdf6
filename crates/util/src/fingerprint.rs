//! Content fingerprinting used for transfer change detection.
//!
//! A fingerprint is a change token, not an integrity guarantee: equal
//! content always produces the same fingerprint, and distinct content
//! collides only with negligible probability. Nothing downstream relies on
//! the digest algorithm beyond that.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded digest of an artifact's rendered bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint arbitrary bytes.
    pub fn of_bytes(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Self(format!("{digest:x}"))
    }

    /// The hex digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}
