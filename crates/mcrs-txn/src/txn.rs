//! The transaction: staged writes, optimistic commit, and callbacks.

use crate::pool::Job;
use crate::rootstore::Rootstore;
use mcrs_core::State;
use mcrs_merkle::{
    content_id, BlockStore, ClockError, Event, EventId, HeadStore, InstanceId, MerkleClock,
    StoreError,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

/// Errors from transaction operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    /// A concurrent writer committed to an instance this transaction read.
    /// Nothing was applied; rebuild the mutation against fresh heads.
    #[error("conflict on {instance}: concurrent commit since read")]
    Conflict { instance: InstanceId },

    /// The transaction already reached a terminal state.
    #[error("transaction is no longer active")]
    Finalized,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle of a transaction. `Active` moves to exactly one of the
/// terminal states and never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Discarded,
}

/// A scoped unit of work over the root store.
///
/// All reads record the instance version they observed; all writes stage
/// locally. `commit` applies everything atomically or nothing at all.
/// `discard` is always safe, and a no-op after commit, so callers can
/// discard unconditionally on every exit path.
pub struct Txn {
    id: u64,
    root: Rootstore,
    status: TxnStatus,

    staged_blocks: HashMap<EventId, Vec<u8>>,
    staged_heads: HashMap<InstanceId, BTreeSet<EventId>>,
    staged_states: HashMap<InstanceId, State>,

    // Interior mutability: reads happen through &self store traits.
    read_versions: Mutex<HashMap<InstanceId, u64>>,

    on_success: Vec<Job>,
    on_error: Vec<Job>,
    on_discard: Vec<Job>,
    on_success_async: Vec<Job>,
    on_error_async: Vec<Job>,
    on_discard_async: Vec<Job>,
}

impl Txn {
    pub(crate) fn new(id: u64, root: Rootstore) -> Self {
        Txn {
            id,
            root,
            status: TxnStatus::Active,
            staged_blocks: HashMap::new(),
            staged_heads: HashMap::new(),
            staged_states: HashMap::new(),
            read_versions: Mutex::new(HashMap::new()),
            on_success: Vec::new(),
            on_error: Vec::new(),
            on_discard: Vec::new(),
            on_success_async: Vec::new(),
            on_error_async: Vec::new(),
            on_discard_async: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    fn record_read(&self, instance: &InstanceId) {
        let mut reads = self.read_versions.lock();
        if !reads.contains_key(instance) {
            reads.insert(instance.clone(), self.root.version_of(instance));
        }
    }

    /// Staged materialized state, falling back to the committed base.
    pub fn state(&self, instance: &InstanceId) -> Option<State> {
        if let Some(state) = self.staged_states.get(instance) {
            return Some(state.clone());
        }
        self.record_read(instance);
        self.root.state_of(instance)
    }

    /// Stage a materialized state write.
    pub fn put_state(&mut self, instance: &InstanceId, state: State) {
        self.record_read(instance);
        self.staged_states.insert(instance.clone(), state);
    }

    /// The head updates this transaction would commit, for post-commit
    /// advertisement to peers.
    pub fn staged_head_updates(&self) -> Vec<(InstanceId, BTreeSet<EventId>)> {
        self.staged_heads
            .iter()
            .map(|(instance, heads)| (instance.clone(), heads.clone()))
            .collect()
    }

    /// Register a callback to run synchronously after a successful commit.
    pub fn on_success(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_success.push(Box::new(f));
    }

    /// Register a callback to run synchronously after a failed commit.
    pub fn on_error(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_error.push(Box::new(f));
    }

    /// Register a callback to run synchronously after a discard.
    pub fn on_discard(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_discard.push(Box::new(f));
    }

    /// Like [`Txn::on_success`], but run off the commit path.
    pub fn on_success_async(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_success_async.push(Box::new(f));
    }

    /// Like [`Txn::on_error`], but run off the commit path.
    pub fn on_error_async(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_error_async.push(Box::new(f));
    }

    /// Like [`Txn::on_discard`], but run off the commit path.
    pub fn on_discard_async(&mut self, f: impl FnOnce() + Send + 'static) {
        self.on_discard_async.push(Box::new(f));
    }

    /// Persist an event and advance the frontier, all staged.
    ///
    /// This is the transactional form of [`MerkleClock::add_event`]: the
    /// block lands in the staged block set and the frontier update in the
    /// staged head set, so a discard drops both.
    pub fn apply_event(&mut self, clock: &MerkleClock, event: &Event) -> Result<bool, ClockError> {
        let mut blocks = StagedBlocks {
            root: &self.root,
            staged: &mut self.staged_blocks,
        };
        let mut heads = StagedHeads {
            root: &self.root,
            staged: &mut self.staged_heads,
            reads: &self.read_versions,
        };
        clock.add_event(&mut blocks, &mut heads, event)
    }

    fn dispatch_async(&mut self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        match &self.root.pool {
            Some(pool) => pool.submit(jobs),
            None => {
                std::thread::spawn(move || {
                    for job in jobs {
                        job();
                    }
                });
            }
        }
    }

    /// Attempt to apply all staged writes atomically.
    ///
    /// Fails with [`TxnError::Conflict`] if any instance this transaction
    /// read was committed to concurrently; in that case nothing is applied
    /// and the transaction ends in the `Discarded` state.
    pub fn commit(&mut self) -> Result<(), TxnError> {
        if self.status != TxnStatus::Active {
            return Err(TxnError::Finalized);
        }

        let conflict = {
            let mut inner = self.root.inner.lock();

            let reads = self.read_versions.lock();
            let stale = reads.iter().find_map(|(instance, version)| {
                let current = inner.versions.get(instance).copied().unwrap_or(0);
                (current != *version).then(|| instance.clone())
            });
            drop(reads);

            match stale {
                Some(instance) => Some(instance),
                None => {
                    inner.blocks.extend(self.staged_blocks.drain());
                    let touched: Vec<InstanceId> = self
                        .staged_heads
                        .keys()
                        .chain(self.staged_states.keys())
                        .cloned()
                        .collect();
                    for (instance, heads) in self.staged_heads.drain() {
                        inner.heads.insert(instance, heads);
                    }
                    for (instance, state) in self.staged_states.drain() {
                        inner.states.insert(instance, state);
                    }
                    for instance in touched {
                        *inner.versions.entry(instance).or_insert(0) += 1;
                    }
                    None
                }
            }
        };

        match conflict {
            Some(instance) => {
                debug!(txn = self.id, %instance, "commit conflict");
                self.status = TxnStatus::Discarded;
                for job in std::mem::take(&mut self.on_error) {
                    job();
                }
                let jobs = std::mem::take(&mut self.on_error_async);
                self.dispatch_async(jobs);
                Err(TxnError::Conflict { instance })
            }
            None => {
                debug!(txn = self.id, "committed");
                self.status = TxnStatus::Committed;
                for job in std::mem::take(&mut self.on_success) {
                    job();
                }
                let jobs = std::mem::take(&mut self.on_success_async);
                self.dispatch_async(jobs);
                Ok(())
            }
        }
    }

    /// Drop all staged writes. Safe to call on every exit path: after a
    /// commit (either outcome) this is a no-op.
    pub fn discard(&mut self) {
        if self.status != TxnStatus::Active {
            return;
        }
        debug!(txn = self.id, "discarded");
        self.status = TxnStatus::Discarded;
        self.staged_blocks.clear();
        self.staged_heads.clear();
        self.staged_states.clear();
        for job in std::mem::take(&mut self.on_discard) {
            job();
        }
        let jobs = std::mem::take(&mut self.on_discard_async);
        self.dispatch_async(jobs);
    }
}

// Disjoint-field views over a transaction, so clock operations can borrow
// the block side and the head side mutably at the same time.
struct StagedBlocks<'a> {
    root: &'a Rootstore,
    staged: &'a mut HashMap<EventId, Vec<u8>>,
}

impl BlockStore for StagedBlocks<'_> {
    fn put(&mut self, bytes: Vec<u8>) -> Result<EventId, StoreError> {
        let id = content_id(&bytes);
        if !self.root.has_block(&id) {
            self.staged.entry(id).or_insert(bytes);
        }
        Ok(id)
    }

    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(bytes) = self.staged.get(id) {
            return Ok(Some(bytes.clone()));
        }
        Ok(self.root.block(id))
    }

    fn has(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.staged.contains_key(id) || self.root.has_block(id))
    }
}

struct StagedHeads<'a> {
    root: &'a Rootstore,
    staged: &'a mut HashMap<InstanceId, BTreeSet<EventId>>,
    reads: &'a Mutex<HashMap<InstanceId, u64>>,
}

impl StagedHeads<'_> {
    fn record_read(&self, instance: &InstanceId) {
        let mut reads = self.reads.lock();
        if !reads.contains_key(instance) {
            reads.insert(instance.clone(), self.root.version_of(instance));
        }
    }
}

impl HeadStore for StagedHeads<'_> {
    fn heads(&self, instance: &InstanceId) -> Result<BTreeSet<EventId>, StoreError> {
        if let Some(heads) = self.staged.get(instance) {
            return Ok(heads.clone());
        }
        self.record_read(instance);
        Ok(self.root.heads_of(instance))
    }

    fn set_heads(
        &mut self,
        instance: &InstanceId,
        heads: BTreeSet<EventId>,
    ) -> Result<(), StoreError> {
        self.record_read(instance);
        self.staged.insert(instance.clone(), heads);
        Ok(())
    }
}

impl BlockStore for Txn {
    fn put(&mut self, bytes: Vec<u8>) -> Result<EventId, StoreError> {
        let id = content_id(&bytes);
        if !self.root.has_block(&id) {
            self.staged_blocks.entry(id).or_insert(bytes);
        }
        Ok(id)
    }

    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(bytes) = self.staged_blocks.get(id) {
            return Ok(Some(bytes.clone()));
        }
        Ok(self.root.block(id))
    }

    fn has(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.staged_blocks.contains_key(id) || self.root.has_block(id))
    }
}

impl HeadStore for Txn {
    fn heads(&self, instance: &InstanceId) -> Result<BTreeSet<EventId>, StoreError> {
        if let Some(heads) = self.staged_heads.get(instance) {
            return Ok(heads.clone());
        }
        self.record_read(instance);
        Ok(self.root.heads_of(instance))
    }

    fn set_heads(
        &mut self,
        instance: &InstanceId,
        heads: BTreeSet<EventId>,
    ) -> Result<(), StoreError> {
        self.record_read(instance);
        self.staged_heads.insert(instance.clone(), heads);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcrs_core::{ActorId, CrdtKind, Delta};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn instance(doc: &str) -> InstanceId {
        InstanceId::new(doc, "score")
    }

    fn commit_increment(root: &Rootstore, doc: &str, actor: &str, amount: u64) {
        let mut txn = root.begin();
        write_increment(&mut txn, doc, actor, amount);
        txn.commit().unwrap();
    }

    fn write_increment(txn: &mut Txn, doc: &str, actor: &str, amount: u64) {
        let inst = instance(doc);
        let clock = MerkleClock::new(inst.clone(), CrdtKind::PCounter);
        let mut state = txn
            .state(&inst)
            .unwrap_or_else(|| State::new(CrdtKind::PCounter));
        let delta = state
            .as_pcounter()
            .unwrap()
            .delta_for_increment(&ActorId::new(actor), amount);
        let delta = Delta::PCounter(delta);
        let heads = txn.heads(&inst).unwrap();
        let event = clock.new_event(&*txn, &heads, &delta).unwrap();
        txn.apply_event(&clock, &event).unwrap();
        state.merge(&delta).unwrap();
        txn.put_state(&inst, state);
    }

    #[test]
    fn discard_leaves_root_untouched() {
        let root = Rootstore::new();
        let mut txn = root.begin();
        write_increment(&mut txn, "doc1", "A", 5);
        txn.discard();
        assert_eq!(root.block_count(), 0);
        assert!(root.heads_of(&instance("doc1")).is_empty());
        assert!(root.state_of(&instance("doc1")).is_none());
    }

    #[test]
    fn commit_applies_all_staged_writes() {
        let root = Rootstore::new();
        commit_increment(&root, "doc1", "A", 5);
        assert_eq!(root.block_count(), 1);
        assert_eq!(root.heads_of(&instance("doc1")).len(), 1);
        let state = root.state_of(&instance("doc1")).unwrap();
        assert_eq!(state.as_pcounter().unwrap().value(), 5);
    }

    #[test]
    fn conflicting_txn_applies_nothing() {
        let root = Rootstore::new();

        let mut loser = root.begin();
        write_increment(&mut loser, "doc1", "A", 1);

        // A concurrent writer lands on the same instance first.
        commit_increment(&root, "doc1", "B", 10);
        let blocks_before = root.block_count();

        let err = loser.commit().unwrap_err();
        assert_eq!(
            err,
            TxnError::Conflict {
                instance: instance("doc1")
            }
        );
        assert_eq!(loser.status(), TxnStatus::Discarded);
        assert_eq!(root.block_count(), blocks_before);
        let state = root.state_of(&instance("doc1")).unwrap();
        assert_eq!(state.as_pcounter().unwrap().value(), 10);
    }

    #[test]
    fn disjoint_instances_do_not_conflict() {
        let root = Rootstore::new();

        let mut a = root.begin();
        write_increment(&mut a, "doc1", "A", 1);

        commit_increment(&root, "doc2", "B", 2);

        a.commit().unwrap();
        assert_eq!(
            root.state_of(&instance("doc1"))
                .unwrap()
                .as_pcounter()
                .unwrap()
                .value(),
            1
        );
    }

    #[test]
    fn commit_after_commit_is_rejected() {
        let root = Rootstore::new();
        let mut txn = root.begin();
        write_increment(&mut txn, "doc1", "A", 1);
        txn.commit().unwrap();
        assert_eq!(txn.commit().unwrap_err(), TxnError::Finalized);
    }

    #[test]
    fn discard_after_commit_is_noop() {
        let root = Rootstore::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut txn = root.begin();
        let f = fired.clone();
        txn.on_discard(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        write_increment(&mut txn, "doc1", "A", 1);
        txn.commit().unwrap();
        txn.discard();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(txn.status(), TxnStatus::Committed);
    }

    #[test]
    fn success_callbacks_fire_once_in_registration_order() {
        let root = Rootstore::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut txn = root.begin();
        for i in 0..3 {
            let order = order.clone();
            txn.on_success(move || order.lock().push(i));
        }
        let errs = Arc::new(AtomicUsize::new(0));
        let e = errs.clone();
        txn.on_error(move || {
            e.fetch_add(1, Ordering::SeqCst);
        });
        txn.commit().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(errs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn error_callbacks_fire_on_conflict() {
        let root = Rootstore::new();
        let mut loser = root.begin();
        write_increment(&mut loser, "doc1", "A", 1);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        loser.on_error(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = fired.clone();
        loser.on_success(move || {
            s.fetch_add(100, Ordering::SeqCst);
        });
        commit_increment(&root, "doc1", "B", 10);
        loser.commit().unwrap_err();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_callbacks_run_off_the_commit_path() {
        let pool = crate::CallbackPool::current(4);
        let root = Rootstore::new().with_callback_pool(pool);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut txn = root.begin();
        for i in 0..3 {
            let tx = tx.clone();
            txn.on_success_async(move || {
                let _ = tx.send(i);
            });
        }
        write_increment(&mut txn, "doc1", "A", 1);
        txn.commit().unwrap();
        for expected in 0..3 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got, expected);
        }
    }
}
