//! Content-addressed event identifiers.
//!
//! An [`EventId`] is the SHA-256 digest of an event's canonical encoding.
//! The same bytes hash to the same id on every peer, which is what lets
//! peers agree on history without coordination.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest identifying one event by content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        EventId(bytes)
    }

    /// The underlying digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex form of the full digest.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(EventId(bytes))
    }

    /// Truncated form for logs (first 8 hex chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({}...)", self.short())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher producing [`EventId`]s.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            inner: Sha256::new(),
        }
    }

    /// Feed more bytes in.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> EventId {
        let digest = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        EventId(bytes)
    }

    /// Hash a single buffer.
    pub fn hash(data: &[u8]) -> EventId {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(Hasher::hash(b"event"), Hasher::hash(b"event"));
        assert_ne!(Hasher::hash(b"event"), Hasher::hash(b"other"));
    }

    #[test]
    fn test_hex_round_trip() {
        let id = Hasher::hash(b"round trip");
        assert_eq!(EventId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(EventId::from_hex("not hex"), None);
    }

    #[test]
    fn test_ordering_is_lexicographic_over_bytes() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[0] = 2;
        assert!(EventId::from_bytes(a) < EventId::from_bytes(b));
    }
}
