//! The closed set of CRDT kinds and the uniform merge dispatch.
//!
//! A field's kind is declared once, from schema metadata, and never changes.
//! Dispatch is a tagged enum rather than trait objects: the set of payload
//! types is closed, and the wire encoding needs a stable tag anyway.

use crate::composite::{CompositeDelta, CompositeState};
use crate::error::MergeError;
use crate::lwwreg::{LwwRegister, RegisterDelta};
use crate::pcounter::{PCounter, PCounterDelta};
use crate::pncounter::{PnCounter, PnCounterDelta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared CRDT kind of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CrdtKind {
    Register,
    PCounter,
    PnCounter,
    Composite,
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrdtKind::Register => "register",
            CrdtKind::PCounter => "pcounter",
            CrdtKind::PnCounter => "pncounter",
            CrdtKind::Composite => "composite",
        };
        write!(f, "{}", name)
    }
}

/// A CRDT delta, the payload of one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    Register(RegisterDelta),
    PCounter(PCounterDelta),
    PnCounter(PnCounterDelta),
    Composite(CompositeDelta),
}

impl Delta {
    /// The kind this delta belongs to.
    pub fn kind(&self) -> CrdtKind {
        match self {
            Delta::Register(_) => CrdtKind::Register,
            Delta::PCounter(_) => CrdtKind::PCounter,
            Delta::PnCounter(_) => CrdtKind::PnCounter,
            Delta::Composite(_) => CrdtKind::Composite,
        }
    }
}

/// Materialized CRDT state: the fold of all known deltas for one instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Register(LwwRegister),
    PCounter(PCounter),
    PnCounter(PnCounter),
    Composite(CompositeState),
}

impl State {
    /// The empty state for a declared kind.
    pub fn new(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::Register => State::Register(LwwRegister::new()),
            CrdtKind::PCounter => State::PCounter(PCounter::new()),
            CrdtKind::PnCounter => State::PnCounter(PnCounter::new()),
            CrdtKind::Composite => State::Composite(CompositeState::new()),
        }
    }

    /// The kind of this state.
    pub fn kind(&self) -> CrdtKind {
        match self {
            State::Register(_) => CrdtKind::Register,
            State::PCounter(_) => CrdtKind::PCounter,
            State::PnCounter(_) => CrdtKind::PnCounter,
            State::Composite(_) => CrdtKind::Composite,
        }
    }

    /// Fold a delta into this state.
    ///
    /// Commutative, associative, and idempotent for every kind. A delta of
    /// the wrong kind is a [`MergeError::TypeMismatch`].
    pub fn merge(&mut self, delta: &Delta) -> Result<(), MergeError> {
        match (self, delta) {
            (State::Register(reg), Delta::Register(d)) => {
                reg.merge(d);
                Ok(())
            }
            (State::PCounter(counter), Delta::PCounter(d)) => {
                counter.merge(d);
                Ok(())
            }
            (State::PnCounter(counter), Delta::PnCounter(d)) => {
                counter.merge(d);
                Ok(())
            }
            (State::Composite(composite), Delta::Composite(d)) => composite.merge(d),
            (state, delta) => Err(MergeError::TypeMismatch {
                state: state.kind(),
                delta: delta.kind(),
            }),
        }
    }

    /// Join another state of the same kind into this one.
    pub fn merge_state(&mut self, other: &Self) -> Result<(), MergeError> {
        match (self, other) {
            (State::Register(a), State::Register(b)) => {
                a.merge_state(b);
                Ok(())
            }
            (State::PCounter(a), State::PCounter(b)) => {
                a.merge_state(b);
                Ok(())
            }
            (State::PnCounter(a), State::PnCounter(b)) => {
                a.merge_state(b);
                Ok(())
            }
            (State::Composite(a), State::Composite(b)) => a.merge_state(b),
            (a, b) => Err(MergeError::TypeMismatch {
                state: a.kind(),
                delta: b.kind(),
            }),
        }
    }

    /// Borrow the register state, if this is a register.
    pub fn as_register(&self) -> Option<&LwwRegister> {
        match self {
            State::Register(reg) => Some(reg),
            _ => None,
        }
    }

    /// Borrow the positive counter state, if this is one.
    pub fn as_pcounter(&self) -> Option<&PCounter> {
        match self {
            State::PCounter(counter) => Some(counter),
            _ => None,
        }
    }

    /// Borrow the PN counter state, if this is one.
    pub fn as_pncounter(&self) -> Option<&PnCounter> {
        match self {
            State::PnCounter(counter) => Some(counter),
            _ => None,
        }
    }

    /// Borrow the composite state, if this is one.
    pub fn as_composite(&self) -> Option<&CompositeState> {
        match self {
            State::Composite(composite) => Some(composite),
            _ => None,
        }
    }
}
