//! Reconciliation: fetch the causal gap, apply it, fold it.

use crate::source::BlockSource;
use crate::transport::{Envelope, Message, PeerId, Transport, TransportError};
use mcrs_core::{CrdtKind, Delta, State};
use mcrs_merkle::{ClockError, Event, EventId, HeadStore, InstanceId, MerkleClock, StoreError};
use mcrs_txn::{Rootstore, TxnError};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors from replication.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// The attempt exceeded its deadline. Nothing was applied locally.
    #[error("sync attempt exceeded its deadline")]
    Cancelled,

    /// The peer stopped answering mid-fetch. The causally complete part of
    /// the gap was applied; the next contact resumes from what remains.
    #[error("sync incomplete: applied {applied}, {missing} events unresolved")]
    Incomplete { applied: usize, missing: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A fetched block did not decode to an event for the right instance.
    #[error("invalid block from peer: {0}")]
    BadBlock(String),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Txn(#[from] TxnError),
}

/// What a completed reconciliation did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Events fetched and applied.
    pub applied: usize,
    /// Advertised heads that were already known locally.
    pub already_known: usize,
}

/// Replication settings.
#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Peers that receive our head advertisements. Empty means this
    /// replica never pushes; it can still reconcile what it receives.
    pub targets: Vec<PeerId>,

    /// Ids per fetch request.
    pub fetch_batch: usize,

    /// Deadline for one reconcile attempt.
    pub deadline: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        ReplicatorConfig {
            targets: Vec::new(),
            fetch_batch: 32,
            deadline: Duration::from_secs(5),
        }
    }
}

impl ReplicatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, peer: PeerId) -> Self {
        self.targets.push(peer);
        self
    }

    pub fn with_targets(mut self, peers: impl IntoIterator<Item = PeerId>) -> Self {
        self.targets.extend(peers);
        self
    }

    pub fn with_fetch_batch(mut self, batch: usize) -> Self {
        self.fetch_batch = batch.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// One replica's replication endpoint.
pub struct Replicator<T: Transport> {
    root: Rootstore,
    transport: Arc<T>,
    config: ReplicatorConfig,
}

impl<T: Transport> Replicator<T> {
    pub fn new(root: Rootstore, transport: Arc<T>, config: ReplicatorConfig) -> Self {
        Replicator {
            root,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &ReplicatorConfig {
        &self.config
    }

    /// Announce a new frontier to the configured targets, and only those.
    /// Unreachable targets are logged and skipped; returns how many peers
    /// were reached.
    pub async fn advertise(
        &self,
        instance: &InstanceId,
        kind: CrdtKind,
        heads: &BTreeSet<EventId>,
    ) -> usize {
        let mut reached = 0;
        for target in &self.config.targets {
            let message = Message::AdvertiseHeads {
                instance: instance.clone(),
                kind,
                heads: heads.clone(),
            };
            match self.transport.send(target, message).await {
                Ok(()) => {
                    debug!(%instance, peer = %target, heads = heads.len(), "advertised heads");
                    reached += 1;
                }
                Err(e) => {
                    warn!(%instance, peer = %target, error = %e, "advertise failed");
                }
            }
        }
        reached
    }

    /// Answer a peer's fetch request from the local committed store.
    pub fn serve_fetch(&self, ids: Vec<EventId>) -> Message {
        let mut blocks = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.root.block(&id) {
                Some(bytes) => blocks.push(bytes),
                None => missing.push(id),
            }
        }
        Message::Blocks { blocks, missing }
    }

    /// Reconcile an advertised frontier under the configured deadline.
    ///
    /// A timed-out attempt is abandoned before anything is committed, so
    /// local state is exactly as before.
    pub async fn reconcile<S: BlockSource>(
        &self,
        source: &S,
        instance: &InstanceId,
        kind: CrdtKind,
        heads: &BTreeSet<EventId>,
    ) -> Result<ReconcileOutcome, SyncError> {
        tokio::time::timeout(
            self.config.deadline,
            self.reconcile_inner(source, instance, kind, heads),
        )
        .await
        .map_err(|_| SyncError::Cancelled)?
    }

    async fn reconcile_inner<S: BlockSource>(
        &self,
        source: &S,
        instance: &InstanceId,
        kind: CrdtKind,
        heads: &BTreeSet<EventId>,
    ) -> Result<ReconcileOutcome, SyncError> {
        let clock = MerkleClock::new(instance.clone(), kind);

        let mut wanted: VecDeque<EventId> = Vec::new().into();
        let mut already_known = 0;
        for head in heads {
            if self.root.has_block(head) {
                already_known += 1;
            } else {
                wanted.push_back(*head);
            }
        }
        if wanted.is_empty() {
            debug!(%instance, "all advertised heads already known");
            return Ok(ReconcileOutcome {
                applied: 0,
                already_known,
            });
        }

        // Fetch the gap: walk down from the advertised heads, requesting
        // only ids not already local, until every parent resolves or the
        // source gives out.
        let mut fetched: HashMap<EventId, Event> = HashMap::new();
        let mut unresolved: BTreeSet<EventId> = BTreeSet::new();
        let mut source_down = false;
        while !wanted.is_empty() && !source_down {
            let batch: Vec<EventId> = {
                let take = wanted.len().min(self.config.fetch_batch);
                wanted.drain(..take).collect()
            };
            let results = match source.fetch(&batch).await {
                Ok(results) => results,
                Err(e) => {
                    warn!(%instance, error = %e, "block source dropped mid-fetch");
                    unresolved.extend(batch);
                    source_down = true;
                    continue;
                }
            };
            for (id, bytes) in results {
                let Some(bytes) = bytes else {
                    unresolved.insert(id);
                    continue;
                };
                let event = Event::decode(&bytes)
                    .map_err(|e| SyncError::BadBlock(e.to_string()))?;
                if event.id != id {
                    return Err(SyncError::BadBlock(format!(
                        "block content hashes to {}, not the requested {}",
                        event.id.short(),
                        id.short()
                    )));
                }
                if event.instance != *instance {
                    return Err(SyncError::BadBlock(format!(
                        "event for instance {} advertised under {}",
                        event.instance, instance
                    )));
                }
                for parent in &event.parents {
                    if !self.root.has_block(parent)
                        && !fetched.contains_key(parent)
                        && !wanted.contains(parent)
                    {
                        wanted.push_back(*parent);
                    }
                }
                fetched.insert(id, event);
            }
        }
        unresolved.extend(wanted.drain(..));

        // Parents always carry a strictly smaller height, so ascending
        // (height, id) is a topological order with the same tie-break as
        // replay.
        let mut ordered: Vec<Event> = fetched.into_values().collect();
        ordered.sort_by_key(|event| (event.height, event.id));

        let mut txn = self.root.begin();
        let mut state = txn
            .state(instance)
            .unwrap_or_else(|| State::new(kind));
        let mut applied = 0;
        let mut skipped = 0;
        for event in &ordered {
            let resolvable = {
                let has = |id: &EventId| {
                    matches!(
                        mcrs_merkle::BlockStore::has(&txn, id),
                        Ok(true)
                    )
                };
                event.parents.iter().all(|p| has(p))
            };
            if !resolvable {
                skipped += 1;
                continue;
            }
            if !txn.apply_event(&clock, event)? {
                continue;
            }
            applied += 1;
            match serde_json::from_slice::<Delta>(&event.delta) {
                Ok(delta) => {
                    if let Err(e) = state.merge(&delta) {
                        warn!(id = %event.id.short(), error = %e, "type mismatch, delta skipped");
                    }
                }
                Err(e) => {
                    warn!(id = %event.id.short(), error = %e, "undecodable delta, skipped");
                }
            }
        }
        if applied > 0 {
            txn.put_state(instance, state);
        }
        let merged_heads = txn.heads(instance)?;
        txn.commit()?;

        let missing = unresolved.len() + skipped;
        if missing > 0 {
            warn!(%instance, applied, missing, "reconcile incomplete");
            return Err(SyncError::Incomplete { applied, missing });
        }
        debug!(%instance, applied, heads = merged_heads.len(), "reconciled");
        Ok(ReconcileOutcome {
            applied,
            already_known,
        })
    }

    /// Dispatch one incoming envelope from the transport's subscription.
    pub async fn handle_message<S: BlockSource>(
        &self,
        source: &S,
        envelope: Envelope,
    ) -> Result<(), SyncError> {
        let (from, message, responder) = envelope.split();
        match message {
            Message::AdvertiseHeads {
                instance,
                kind,
                heads,
            } => {
                self.reconcile(source, &instance, kind, &heads).await?;
                Ok(())
            }
            Message::FetchBlocks { ids } => {
                if !responder.send(self.serve_fetch(ids)) {
                    debug!(peer = %from, "fetch request had no live reply channel");
                }
                Ok(())
            }
            // Block replies travel back through the request's own channel,
            // never the subscription; one landing here is unsolicited.
            Message::Blocks { .. } => {
                debug!(peer = %from, "ignoring unsolicited block reply");
                Ok(())
            }
        }
    }
}
