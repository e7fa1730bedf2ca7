//! Actor identity.
//!
//! Every peer that mutates replicated state carries a stable actor id.
//! Counter accumulators are keyed by actor so that replayed deltas never
//! double-count, and the register tie-break compares actor ids when two
//! writes are truly concurrent.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// A stable, totally ordered identifier for a mutating peer.
///
/// The ordering is lexicographic over the id string. It is arbitrary but
/// fixed, which is exactly what the concurrent-write tie-break needs: every
/// peer picks the same winner without coordination.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create an actor id from an explicit string.
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }

    /// Generate a fresh, globally unique actor id.
    pub fn generate() -> Self {
        ActorId(Ulid::new().to_string())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_ordering_is_lexicographic() {
        let a = ActorId::new("A");
        let b = ActorId::new("B");
        assert!(a < b);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ActorId::generate();
        let b = ActorId::generate();
        assert_ne!(a, b);
    }
}
