//! The shared root store: the durable base all transactions stage against.
//!
//! Holds event blocks, per-instance head sets, materialized CRDT state,
//! and a version counter per instance for optimistic conflict detection.
//! The store is dependency-injected everywhere it is needed; there is no
//! process-wide instance.

use crate::pool::CallbackPool;
use crate::txn::Txn;
use mcrs_core::State;
use mcrs_merkle::{EventId, InstanceId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct RootInner {
    pub(crate) blocks: HashMap<EventId, Vec<u8>>,
    pub(crate) heads: HashMap<InstanceId, BTreeSet<EventId>>,
    pub(crate) states: HashMap<InstanceId, State>,
    pub(crate) versions: HashMap<InstanceId, u64>,
    pub(crate) next_txn_id: u64,
}

/// Shared, lock-guarded base store. Cheap to clone.
#[derive(Clone, Default)]
pub struct Rootstore {
    pub(crate) inner: Arc<Mutex<RootInner>>,
    pub(crate) pool: Option<CallbackPool>,
}

impl Rootstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a bounded pool for async transaction callbacks. Without one,
    /// async callbacks fall back to a detached thread per transaction.
    pub fn with_callback_pool(mut self, pool: CallbackPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Open a new transaction against this store.
    pub fn begin(&self) -> Txn {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_txn_id += 1;
            inner.next_txn_id
        };
        Txn::new(id, self.clone())
    }

    /// Read a committed block.
    pub fn block(&self, id: &EventId) -> Option<Vec<u8>> {
        self.inner.lock().blocks.get(id).cloned()
    }

    /// Whether a block has been committed.
    pub fn has_block(&self, id: &EventId) -> bool {
        self.inner.lock().blocks.contains_key(id)
    }

    /// Number of committed blocks.
    pub fn block_count(&self) -> usize {
        self.inner.lock().blocks.len()
    }

    /// Committed frontier for an instance.
    pub fn heads_of(&self, instance: &InstanceId) -> BTreeSet<EventId> {
        self.inner
            .lock()
            .heads
            .get(instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed materialized state for an instance.
    pub fn state_of(&self, instance: &InstanceId) -> Option<State> {
        self.inner.lock().states.get(instance).cloned()
    }

    /// Current version of an instance (bumps on every committed write).
    pub fn version_of(&self, instance: &InstanceId) -> u64 {
        self.inner
            .lock()
            .versions
            .get(instance)
            .copied()
            .unwrap_or(0)
    }

    /// Instances with a committed frontier.
    pub fn instances(&self) -> Vec<InstanceId> {
        self.inner.lock().heads.keys().cloned().collect()
    }
}
