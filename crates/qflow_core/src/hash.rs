//! Content hashes for module identity and input signatures.
//!
//! Uses BLAKE3 for all hashing operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A BLAKE3 hash (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The number of bytes in a hash
    pub const LEN: usize = 32;

    /// Compute BLAKE3 hash of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash the canonical JSON rendering of a value
    #[must_use]
    pub fn of_json(value: &serde_json::Value) -> Self {
        Self::compute(value.to_string().as_bytes())
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `len` hex characters, used as a short signature
    #[must_use]
    pub fn prefix(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.min(Self::LEN * 2));
        hex
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
