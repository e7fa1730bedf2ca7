//! The database: schema-checked mutations over the replicated store.
//!
//! Every mutation follows the same path: compute the delta against the
//! field's materialized state, build an event on the current heads, stage
//! block, heads, and folded state in one transaction, and commit. Losers
//! of a concurrent commit rebuild the mutation against fresh heads and
//! retry.

use crate::error::DbError;
use crate::schema::CollectionSchema;
use mcrs_core::{ActorId, CompositeDelta, CrdtKind, Delta, RegisterDelta, State};
use mcrs_merkle::{EventId, HeadStore, InstanceId, MerkleClock};
use mcrs_txn::{Rootstore, Txn, TxnError};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Notified after a commit with the instance's new frontier, off the
/// commit path. The replicator subscribes one of these to advertise.
pub type HeadListener = Arc<dyn Fn(&InstanceId, CrdtKind, &BTreeSet<EventId>) + Send + Sync>;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// One sub-field operation inside a composite update.
enum FieldOp {
    SetRegister(Vec<u8>),
    Increment(u64),
    Decrement(u64),
}

/// A batch of sub-field operations applied as one composite delta, and
/// therefore one event.
pub struct CompositeUpdate {
    ops: BTreeMap<String, FieldOp>,
}

impl CompositeUpdate {
    pub fn new() -> Self {
        CompositeUpdate {
            ops: BTreeMap::new(),
        }
    }

    pub fn set_register(mut self, field: impl Into<String>, value: Vec<u8>) -> Self {
        self.ops.insert(field.into(), FieldOp::SetRegister(value));
        self
    }

    pub fn increment(mut self, field: impl Into<String>, amount: u64) -> Self {
        self.ops.insert(field.into(), FieldOp::Increment(amount));
        self
    }

    pub fn decrement(mut self, field: impl Into<String>, amount: u64) -> Self {
        self.ops.insert(field.into(), FieldOp::Decrement(amount));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Default for CompositeUpdate {
    fn default() -> Self {
        Self::new()
    }
}

/// A replica's document database.
pub struct Database {
    actor: ActorId,
    root: Rootstore,
    schemas: RwLock<HashMap<String, CollectionSchema>>,
    listeners: RwLock<Vec<HeadListener>>,
    retry_attempts: u32,
}

impl Database {
    /// Open a database over a root store with a freshly generated actor id.
    pub fn new(root: Rootstore) -> Self {
        Self::with_actor(root, ActorId::generate())
    }

    pub fn with_actor(root: Rootstore, actor: ActorId) -> Self {
        Database {
            actor,
            root,
            schemas: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    pub fn root(&self) -> &Rootstore {
        &self.root
    }

    /// Declare a collection. Redefining replaces the previous schema.
    pub fn define_collection(&self, schema: CollectionSchema) {
        debug!(collection = schema.name(), "collection defined");
        self.schemas.write().insert(schema.name().to_owned(), schema);
    }

    /// Register a listener for post-commit head updates.
    pub fn on_head_update(&self, listener: HeadListener) {
        self.listeners.write().push(listener);
    }

    fn field_kind(&self, collection: &str, field: &str) -> Result<CrdtKind, DbError> {
        let schemas = self.schemas.read();
        let schema = schemas
            .get(collection)
            .ok_or_else(|| DbError::UnknownCollection(collection.to_owned()))?;
        schema.kind_of(field).ok_or_else(|| DbError::UnknownField {
            collection: collection.to_owned(),
            field: field.to_owned(),
        })
    }

    fn instance(collection: &str, doc: &str, field: &str) -> InstanceId {
        InstanceId::new(format!("{}/{}", collection, doc), field)
    }

    /// Run `build` inside a fresh transaction, retrying on conflict.
    ///
    /// `build` is re-invoked from scratch for each attempt, so it must
    /// derive everything it writes from reads inside the transaction.
    pub fn commit_with_retry<F>(&self, attempts: u32, mut build: F) -> Result<(), DbError>
    where
        F: FnMut(&mut Txn) -> Result<(), DbError>,
    {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let mut txn = self.root.begin();
            if let Err(e) = build(&mut txn) {
                txn.discard();
                return Err(e);
            }
            match txn.commit() {
                Ok(()) => return Ok(()),
                Err(TxnError::Conflict { instance }) => {
                    debug!(%instance, attempt, "commit lost a race, rebuilding");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DbError::RetriesExhausted(attempts))
    }

    /// The shared mutation path: delta from state, event on current heads,
    /// everything staged in one transaction.
    fn mutate<F>(&self, instance: InstanceId, kind: CrdtKind, make: F) -> Result<(), DbError>
    where
        F: Fn(u64, &State) -> Result<Delta, DbError>,
    {
        let clock = MerkleClock::new(instance.clone(), kind);
        self.commit_with_retry(self.retry_attempts, |txn| {
            let mut state = txn
                .state(&instance)
                .unwrap_or_else(|| State::new(kind));
            let heads = txn.heads(&instance)?;
            let height = clock.next_height(&*txn, &heads)?;
            let delta = make(height, &state)?;
            let event = clock.new_event(&*txn, &heads, &delta)?;
            txn.apply_event(&clock, &event)?;
            state.merge(&delta)?;
            txn.put_state(&instance, state);

            let new_heads = txn.heads(&instance)?;
            for listener in self.listeners.read().iter().cloned() {
                let inst = instance.clone();
                let heads = new_heads.clone();
                txn.on_success_async(move || listener(&inst, kind, &heads));
            }
            Ok(())
        })
    }

    /// Overwrite a register field.
    pub fn set_register(
        &self,
        collection: &str,
        doc: &str,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), DbError> {
        let kind = self.field_kind(collection, field)?;
        if kind != CrdtKind::Register {
            return Err(DbError::KindMismatch {
                field: field.to_owned(),
                declared: kind,
                requested: CrdtKind::Register,
            });
        }
        let actor = self.actor.clone();
        self.mutate(
            Self::instance(collection, doc, field),
            kind,
            move |height, _| {
                Ok(Delta::Register(RegisterDelta {
                    value: value.clone(),
                    height,
                    actor: actor.clone(),
                }))
            },
        )
    }

    /// Add to a counter field. Works for both grow-only and PN counters;
    /// the delta carries this actor's new cumulative total.
    pub fn increment(
        &self,
        collection: &str,
        doc: &str,
        field: &str,
        amount: u64,
    ) -> Result<(), DbError> {
        let kind = self.field_kind(collection, field)?;
        let actor = self.actor.clone();
        match kind {
            CrdtKind::PCounter => self.mutate(
                Self::instance(collection, doc, field),
                kind,
                move |_, state| {
                    let counter = state.as_pcounter().ok_or_else(|| DbError::KindMismatch {
                        field: field.to_owned(),
                        declared: state.kind(),
                        requested: CrdtKind::PCounter,
                    })?;
                    Ok(Delta::PCounter(counter.delta_for_increment(&actor, amount)))
                },
            ),
            CrdtKind::PnCounter => self.mutate(
                Self::instance(collection, doc, field),
                kind,
                move |_, state| {
                    let counter = state.as_pncounter().ok_or_else(|| DbError::KindMismatch {
                        field: field.to_owned(),
                        declared: state.kind(),
                        requested: CrdtKind::PnCounter,
                    })?;
                    Ok(Delta::PnCounter(
                        counter.delta_for_increment(&actor, amount),
                    ))
                },
            ),
            declared => Err(DbError::KindMismatch {
                field: field.to_owned(),
                declared,
                requested: CrdtKind::PCounter,
            }),
        }
    }

    /// Subtract from a PN counter field. Rejected for any other kind,
    /// including grow-only counters.
    pub fn decrement(
        &self,
        collection: &str,
        doc: &str,
        field: &str,
        amount: u64,
    ) -> Result<(), DbError> {
        let kind = self.field_kind(collection, field)?;
        if kind != CrdtKind::PnCounter {
            return Err(DbError::KindMismatch {
                field: field.to_owned(),
                declared: kind,
                requested: CrdtKind::PnCounter,
            });
        }
        let actor = self.actor.clone();
        self.mutate(
            Self::instance(collection, doc, field),
            kind,
            move |_, state| {
                let counter = state.as_pncounter().ok_or_else(|| DbError::KindMismatch {
                    field: field.to_owned(),
                    declared: state.kind(),
                    requested: CrdtKind::PnCounter,
                })?;
                Ok(Delta::PnCounter(
                    counter.delta_for_decrement(&actor, amount),
                ))
            },
        )
    }

    /// Apply a batch of sub-field operations to a composite field as one
    /// event.
    pub fn update_composite(
        &self,
        collection: &str,
        doc: &str,
        field: &str,
        update: CompositeUpdate,
    ) -> Result<(), DbError> {
        let kind = self.field_kind(collection, field)?;
        if kind != CrdtKind::Composite {
            return Err(DbError::KindMismatch {
                field: field.to_owned(),
                declared: kind,
                requested: CrdtKind::Composite,
            });
        }
        let actor = self.actor.clone();
        self.mutate(
            Self::instance(collection, doc, field),
            kind,
            move |height, state| {
                let composite = state.as_composite().ok_or_else(|| DbError::KindMismatch {
                    field: field.to_owned(),
                    declared: state.kind(),
                    requested: CrdtKind::Composite,
                })?;
                let mut delta = CompositeDelta::new();
                for (name, op) in &update.ops {
                    let sub = composite.field(name);
                    let sub_delta = Self::sub_delta(name, sub, op, height, &actor)?;
                    delta = delta.with_field(name.clone(), sub_delta);
                }
                Ok(Delta::Composite(delta))
            },
        )
    }

    /// Build one sub-field delta against its current sub-state. A first
    /// write picks the sub-field's kind; later writes must agree with it.
    fn sub_delta(
        name: &str,
        sub: Option<&State>,
        op: &FieldOp,
        height: u64,
        actor: &ActorId,
    ) -> Result<Delta, DbError> {
        let mismatch = |declared: CrdtKind, requested: CrdtKind| DbError::KindMismatch {
            field: name.to_owned(),
            declared,
            requested,
        };
        match op {
            FieldOp::SetRegister(value) => match sub {
                None | Some(State::Register(_)) => Ok(Delta::Register(RegisterDelta {
                    value: value.clone(),
                    height,
                    actor: actor.clone(),
                })),
                Some(other) => Err(mismatch(other.kind(), CrdtKind::Register)),
            },
            FieldOp::Increment(amount) => match sub {
                Some(State::PnCounter(counter)) => Ok(Delta::PnCounter(
                    counter.delta_for_increment(actor, *amount),
                )),
                Some(State::PCounter(counter)) => {
                    Ok(Delta::PCounter(counter.delta_for_increment(actor, *amount)))
                }
                None => Ok(Delta::PCounter(
                    mcrs_core::PCounter::new().delta_for_increment(actor, *amount),
                )),
                Some(other) => Err(mismatch(other.kind(), CrdtKind::PCounter)),
            },
            FieldOp::Decrement(amount) => match sub {
                Some(State::PnCounter(counter)) => Ok(Delta::PnCounter(
                    counter.delta_for_decrement(actor, *amount),
                )),
                None => Ok(Delta::PnCounter(
                    mcrs_core::PnCounter::new().delta_for_decrement(actor, *amount),
                )),
                Some(other) => Err(mismatch(other.kind(), CrdtKind::PnCounter)),
            },
        }
    }

    /// Materialized state of one field, if any event has touched it.
    pub fn state_of(
        &self,
        collection: &str,
        doc: &str,
        field: &str,
    ) -> Result<Option<State>, DbError> {
        self.field_kind(collection, field)?;
        Ok(self.root.state_of(&Self::instance(collection, doc, field)))
    }

    /// Current register value, or `None` when unwritten.
    pub fn register_value(
        &self,
        collection: &str,
        doc: &str,
        field: &str,
    ) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self
            .state_of(collection, doc, field)?
            .and_then(|state| state.as_register().and_then(|r| r.value().map(<[u8]>::to_vec))))
    }

    /// Current counter value; zero when unwritten. A grow-only total past
    /// the i64 range reads as `i64::MAX`.
    pub fn counter_value(&self, collection: &str, doc: &str, field: &str) -> Result<i64, DbError> {
        let value = match self.state_of(collection, doc, field)? {
            Some(State::PCounter(counter)) => {
                i64::try_from(counter.value()).unwrap_or(i64::MAX)
            }
            Some(State::PnCounter(counter)) => counter.value(),
            _ => 0,
        };
        Ok(value)
    }

    /// Current frontier of one field.
    pub fn heads_of(&self, collection: &str, doc: &str, field: &str) -> BTreeSet<EventId> {
        self.root.heads_of(&Self::instance(collection, doc, field))
    }
}
