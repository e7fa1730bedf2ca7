//! The Merkle clock: event construction and causal replay.
//!
//! One clock serves one CRDT instance. It builds new events against the
//! current frontier and folds known events into materialized state in an
//! order every peer reproduces exactly: parents always before children,
//! siblings by ascending height then lexicographic id. The tie-break is
//! what keeps intermediate bookkeeping convergent even though the final
//! CRDT merge is itself commutative.

use crate::blockstore::{BlockStore, StoreError};
use crate::event::{Event, EventBuilder, InstanceId};
use crate::hash::EventId;
use crate::headstore::HeadStore;
use mcrs_core::{CrdtKind, Delta, MergeError, State};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Errors from clock operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// Underlying store failure; the operation aborts.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An event that cannot be admitted: unparseable, id mismatch, wrong
    /// instance, or parents that are not locally resolvable.
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// A block referenced by the DAG is not in the block store.
    #[error("missing block: {0}")]
    MissingBlock(EventId),

    /// The delta kind disagrees with the instance's declared kind.
    #[error(transparent)]
    Merge(#[from] MergeError),
}

impl ClockError {
    fn malformed(reason: impl Into<String>) -> Self {
        ClockError::MalformedEvent {
            reason: reason.into(),
        }
    }
}

/// A Merkle clock bound to one CRDT instance.
#[derive(Clone, Debug)]
pub struct MerkleClock {
    instance: InstanceId,
    kind: CrdtKind,
}

impl MerkleClock {
    pub fn new(instance: InstanceId, kind: CrdtKind) -> Self {
        MerkleClock { instance, kind }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn kind(&self) -> CrdtKind {
        self.kind
    }

    /// Load and decode one event block.
    pub fn load_event<B: BlockStore>(&self, blocks: &B, id: &EventId) -> Result<Event, ClockError> {
        let bytes = blocks.get(id)?.ok_or(ClockError::MissingBlock(*id))?;
        Event::decode(&bytes).map_err(|e| ClockError::malformed(e.to_string()))
    }

    /// The height an event built on `heads` will carry: 1 + the maximum
    /// parent height, or 0 when there are no parents.
    pub fn next_height<B: BlockStore>(
        &self,
        blocks: &B,
        heads: &BTreeSet<EventId>,
    ) -> Result<u64, ClockError> {
        let mut max = None;
        for head in heads {
            let parent = self.load_event(blocks, head)?;
            max = Some(max.unwrap_or(0).max(parent.height));
        }
        Ok(match max {
            Some(h) => h + 1,
            None => 0,
        })
    }

    /// Build a new event for `delta` with the given heads as parents.
    ///
    /// Pure with respect to local state: nothing is persisted; the caller
    /// follows up with [`MerkleClock::add_event`].
    pub fn new_event<B: BlockStore>(
        &self,
        blocks: &B,
        heads: &BTreeSet<EventId>,
        delta: &Delta,
    ) -> Result<Event, ClockError> {
        if delta.kind() != self.kind {
            return Err(MergeError::TypeMismatch {
                state: self.kind,
                delta: delta.kind(),
            }
            .into());
        }
        let height = self.next_height(blocks, heads)?;
        let bytes = serde_json::to_vec(delta).map_err(|e| ClockError::malformed(e.to_string()))?;
        EventBuilder::new()
            .with_instance(self.instance.clone())
            .with_parents(heads.iter().copied().collect())
            .with_height(height)
            .with_delta(bytes)
            .build()
            .map_err(|e| ClockError::malformed(e.to_string()))
    }

    /// Existence check, delegated to the block store.
    pub fn has_event<B: BlockStore>(&self, blocks: &B, id: &EventId) -> Result<bool, ClockError> {
        Ok(blocks.has(id)?)
    }

    /// Persist an event and advance the frontier.
    ///
    /// Idempotent: re-adding an already-stored event is a no-op (detected
    /// by id collision) and returns `false`. Parents must already be
    /// resolvable locally; sync code achieves this by applying fetched
    /// events in causal order. The head update removes any parents from
    /// the frontier and inserts the new event, which preserves the
    /// non-ancestral invariant: an event whose parents are exactly the
    /// current head set collapses the frontier to a singleton.
    pub fn add_event<B: BlockStore, H: HeadStore>(
        &self,
        blocks: &mut B,
        heads: &mut H,
        event: &Event,
    ) -> Result<bool, ClockError> {
        if event.instance != self.instance {
            return Err(ClockError::malformed(format!(
                "event for instance {} added to clock for {}",
                event.instance, self.instance
            )));
        }
        if !event.verify() {
            return Err(ClockError::malformed(format!(
                "id {} does not match content",
                event.id.short()
            )));
        }

        if blocks.has(&event.id)? {
            debug!(id = %event.id.short(), "event already stored, skipping");
            return Ok(false);
        }

        let mut expected_height = None;
        for parent in &event.parents {
            if !blocks.has(parent)? {
                return Err(ClockError::malformed(format!(
                    "parent {} is not resolvable",
                    parent.short()
                )));
            }
            let parent_event = self.load_event(blocks, parent)?;
            expected_height = Some(expected_height.unwrap_or(0).max(parent_event.height));
        }
        let expected = expected_height.map(|h| h + 1).unwrap_or(0);
        if event.height != expected {
            return Err(ClockError::malformed(format!(
                "height {} does not follow from parents (expected {})",
                event.height, expected
            )));
        }

        let bytes = event
            .encode()
            .map_err(|e| ClockError::malformed(e.to_string()))?;
        blocks.put(bytes)?;

        let mut frontier = heads.heads(&self.instance)?;
        for parent in &event.parents {
            frontier.remove(parent);
        }
        frontier.insert(event.id);
        heads.set_heads(&self.instance, frontier.clone())?;

        debug!(
            instance = %self.instance,
            id = %event.id.short(),
            height = event.height,
            heads = frontier.len(),
            "event added"
        );
        Ok(true)
    }

    /// All events reachable from `heads`, including the heads themselves.
    fn ancestor_closure<B: BlockStore>(
        &self,
        blocks: &B,
        heads: &BTreeSet<EventId>,
    ) -> Result<HashSet<EventId>, ClockError> {
        let mut known = HashSet::new();
        let mut queue: VecDeque<EventId> = heads.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if known.insert(id) {
                let event = self.load_event(blocks, &id)?;
                queue.extend(event.parents.iter().copied());
            }
        }
        Ok(known)
    }

    /// Collect the events between a previously merged frontier and a newer
    /// one, in deterministic causal order.
    ///
    /// The walk descends from `to` and stops at anything covered by `from`
    /// (the heads or any of their ancestors), so the result is exactly the
    /// causal gap. Every event is emitted after all of its parents; ties
    /// among ready siblings break by ascending height, then id.
    pub fn replay<B: BlockStore>(
        &self,
        blocks: &B,
        from: &BTreeSet<EventId>,
        to: &BTreeSet<EventId>,
    ) -> Result<Vec<Event>, ClockError> {
        let covered = self.ancestor_closure(blocks, from)?;

        // Gather the gap.
        let mut collected: HashMap<EventId, Event> = HashMap::new();
        let mut queue: VecDeque<EventId> = to
            .iter()
            .filter(|id| !covered.contains(*id))
            .copied()
            .collect();
        while let Some(id) = queue.pop_front() {
            if collected.contains_key(&id) {
                continue;
            }
            let event = self.load_event(blocks, &id)?;
            for parent in &event.parents {
                if !covered.contains(parent) && !collected.contains_key(parent) {
                    queue.push_back(*parent);
                }
            }
            collected.insert(id, event);
        }

        // Topological order over the gap, deterministic across peers.
        let mut children: HashMap<EventId, Vec<EventId>> = HashMap::new();
        let mut pending_parents: HashMap<EventId, usize> = HashMap::new();
        for (id, event) in &collected {
            let in_gap = event
                .parents
                .iter()
                .filter(|p| collected.contains_key(*p))
                .count();
            pending_parents.insert(*id, in_gap);
            for parent in &event.parents {
                if collected.contains_key(parent) {
                    children.entry(*parent).or_default().push(*id);
                }
            }
        }

        let mut ready: BTreeSet<(u64, EventId)> = pending_parents
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| (collected[id].height, *id))
            .collect();

        let mut ordered = Vec::with_capacity(collected.len());
        while let Some(&(height, id)) = ready.iter().next() {
            ready.remove(&(height, id));
            if let Some(next) = children.get(&id) {
                for child in next {
                    let n = pending_parents
                        .get_mut(child)
                        .map(|n| {
                            *n -= 1;
                            *n
                        })
                        .unwrap_or(0);
                    if n == 0 {
                        ready.insert((collected[child].height, *child));
                    }
                }
            }
            if let Some(event) = collected.remove(&id) {
                ordered.push(event);
            }
        }
        Ok(ordered)
    }

    /// Replay the gap between `from` and `to` and fold each delta into
    /// `state`. Returns the number of deltas applied.
    ///
    /// A delta that fails to decode or disagrees with the declared kind is
    /// logged and skipped; sibling events still fold, so one bad event
    /// never aborts the instance's replay.
    pub fn fold<B: BlockStore>(
        &self,
        blocks: &B,
        from: &BTreeSet<EventId>,
        to: &BTreeSet<EventId>,
        state: &mut State,
    ) -> Result<usize, ClockError> {
        let mut applied = 0;
        for event in self.replay(blocks, from, to)? {
            let delta: Delta = match serde_json::from_slice(&event.delta) {
                Ok(delta) => delta,
                Err(e) => {
                    warn!(id = %event.id.short(), error = %e, "undecodable delta, skipping");
                    continue;
                }
            };
            match state.merge(&delta) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(id = %event.id.short(), error = %e, "type mismatch, skipping");
                }
            }
        }
        Ok(applied)
    }
}
