//! Event definition and builder.
//!
//! An event is one node of the causal DAG: an opaque CRDT delta, links to
//! the parent events it causally follows, a height, and the identity of the
//! CRDT instance it belongs to. Events are immutable; the id is computed
//! from the canonical encoding at build time and never changes.
//!
//! The canonical block encoding deliberately excludes the id: the id of a
//! block is the hash of its bytes, so `decode(bytes).id == hash(bytes)` by
//! construction and a tampered block is unrepresentable.

use crate::hash::{EventId, Hasher};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one CRDT instance: a field of a document.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId {
    pub doc: String,
    pub field: String,
}

impl InstanceId {
    pub fn new(doc: impl Into<String>, field: impl Into<String>) -> Self {
        InstanceId {
            doc: doc.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doc, self.field)
    }
}

/// A node in the causal event DAG.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Content id: SHA-256 of the canonical block encoding.
    pub id: EventId,

    /// The CRDT instance this event mutates.
    pub instance: InstanceId,

    /// Ids of the causal parents, sorted. Empty for a root event, one for
    /// a linear edit, two or more when merging concurrent branches.
    pub parents: Vec<EventId>,

    /// Causal depth: 1 + max parent height, 0 for roots.
    pub height: u64,

    /// The CRDT delta, opaque at this layer.
    pub delta: Vec<u8>,
}

/// Canonical wire form; the id is derived from these bytes, never stored.
#[derive(Serialize)]
struct WireRef<'a> {
    instance: &'a InstanceId,
    parents: &'a [EventId],
    height: u64,
    delta: &'a [u8],
}

#[derive(Deserialize)]
struct WireOwned {
    instance: InstanceId,
    parents: Vec<EventId>,
    height: u64,
    delta: Vec<u8>,
}

impl Event {
    /// Canonical block encoding of this event.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireRef {
            instance: &self.instance,
            parents: &self.parents,
            height: self.height,
            delta: &self.delta,
        })
    }

    /// Decode a block, deriving the id from the block bytes.
    pub fn decode(bytes: &[u8]) -> Result<Event, serde_json::Error> {
        let wire: WireOwned = serde_json::from_slice(bytes)?;
        Ok(Event {
            id: Hasher::hash(bytes),
            instance: wire.instance,
            parents: wire.parents,
            height: wire.height,
            delta: wire.delta,
        })
    }

    /// Check that the id matches the content.
    pub fn verify(&self) -> bool {
        match self.encode() {
            Ok(bytes) => Hasher::hash(&bytes) == self.id,
            Err(_) => false,
        }
    }

    /// True for events with no causal parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Number of parents (branching factor at this node).
    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }
}

/// Builder for events; computes the content id on `build`.
#[derive(Clone, Debug, Default)]
pub struct EventBuilder {
    instance: Option<InstanceId>,
    parents: Vec<EventId>,
    height: u64,
    delta: Vec<u8>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: InstanceId) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_parents(mut self, parents: Vec<EventId>) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_parent(mut self, parent: EventId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    pub fn with_delta(mut self, delta: Vec<u8>) -> Self {
        self.delta = delta;
        self
    }

    /// Build the event, sorting parents and computing the content id.
    pub fn build(self) -> Result<Event, serde_json::Error> {
        let mut parents = self.parents;
        parents.sort();
        parents.dedup();

        let instance = self.instance.unwrap_or_else(|| InstanceId::new("", ""));
        let bytes = serde_json::to_vec(&WireRef {
            instance: &instance,
            parents: &parents,
            height: self.height,
            delta: &self.delta,
        })?;

        Ok(Event {
            id: Hasher::hash(&bytes),
            instance,
            parents,
            height: self.height,
            delta: self.delta,
        })
    }
}
