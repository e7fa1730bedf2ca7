//! Per-instance head tracking.
//!
//! The head store maps a CRDT instance to the set of event ids at its
//! causal frontier: the events with no locally known descendant. The set
//! must stay mutually non-ancestral; only the Merkle clock writes it, and
//! only through the owning transaction. Sync code never touches heads
//! directly, it goes through `add_event`.

use crate::event::InstanceId;
use crate::hash::EventId;
use crate::blockstore::StoreError;
use std::collections::{BTreeSet, HashMap};

/// Keyed get/set of the head set per instance.
pub trait HeadStore {
    /// The current frontier for an instance; empty when unknown.
    fn heads(&self, instance: &InstanceId) -> Result<BTreeSet<EventId>, StoreError>;

    /// Replace the frontier for an instance.
    fn set_heads(
        &mut self,
        instance: &InstanceId,
        heads: BTreeSet<EventId>,
    ) -> Result<(), StoreError>;
}

/// In-memory head store.
#[derive(Clone, Debug, Default)]
pub struct MemoryHeadStore {
    heads: HashMap<InstanceId, BTreeSet<EventId>>,
}

impl MemoryHeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances with a recorded frontier.
    pub fn instances(&self) -> impl Iterator<Item = &InstanceId> {
        self.heads.keys()
    }
}

impl HeadStore for MemoryHeadStore {
    fn heads(&self, instance: &InstanceId) -> Result<BTreeSet<EventId>, StoreError> {
        Ok(self.heads.get(instance).cloned().unwrap_or_default())
    }

    fn set_heads(
        &mut self,
        instance: &InstanceId,
        heads: BTreeSet<EventId>,
    ) -> Result<(), StoreError> {
        if heads.is_empty() {
            self.heads.remove(instance);
        } else {
            self.heads.insert(instance.clone(), heads);
        }
        Ok(())
    }
}
