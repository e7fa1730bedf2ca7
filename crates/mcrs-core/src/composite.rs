//! Composite (object) CRDT.
//!
//! A composite groups named sub-fields, each with its own CRDT kind, under
//! one instance. A composite delta updates any subset of the sub-fields at
//! once; the merge dispatches per field. A sub-delta whose kind disagrees
//! with the sub-field's established kind is a type mismatch for the whole
//! composite delta.

use crate::crdt::{Delta, State};
use crate::error::MergeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A composite delta: sub-deltas keyed by field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeDelta {
    pub fields: BTreeMap<String, Delta>,
}

impl CompositeDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a sub-delta for a field.
    pub fn with_field(mut self, name: impl Into<String>, delta: Delta) -> Self {
        self.fields.insert(name.into(), delta);
        self
    }
}

/// Materialized composite state: sub-states keyed by field name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeState {
    fields: BTreeMap<String, State>,
}

impl CompositeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a composite delta in, field by field.
    ///
    /// A field seen for the first time takes the kind of its sub-delta.
    /// The mismatch check runs over the whole delta, nested composites
    /// included, before anything is applied, so a rejected delta leaves
    /// the state untouched.
    pub fn merge(&mut self, delta: &CompositeDelta) -> Result<(), MergeError> {
        self.check_kinds(delta)?;
        for (name, sub) in &delta.fields {
            let state = self
                .fields
                .entry(name.clone())
                .or_insert_with(|| State::new(sub.kind()));
            state.merge(sub)?;
        }
        Ok(())
    }

    /// Recursively compare the delta's kinds against established fields.
    fn check_kinds(&self, delta: &CompositeDelta) -> Result<(), MergeError> {
        for (name, sub) in &delta.fields {
            let Some(existing) = self.fields.get(name) else {
                continue;
            };
            if existing.kind() != sub.kind() {
                return Err(MergeError::TypeMismatch {
                    state: existing.kind(),
                    delta: sub.kind(),
                });
            }
            if let (State::Composite(inner), Delta::Composite(nested)) = (existing, sub) {
                inner.check_kinds(nested)?;
            }
        }
        Ok(())
    }

    /// Join another composite state in, field by field.
    pub fn merge_state(&mut self, other: &Self) -> Result<(), MergeError> {
        for (name, sub) in &other.fields {
            match self.fields.get_mut(name) {
                Some(state) => state.merge_state(sub)?,
                None => {
                    self.fields.insert(name.clone(), sub.clone());
                }
            }
        }
        Ok(())
    }

    /// Sub-state of a field, if present.
    pub fn field(&self, name: &str) -> Option<&State> {
        self.fields.get(name)
    }

    /// Iterate over all sub-fields.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &State)> {
        self.fields.iter()
    }

    /// Number of sub-fields observed so far.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
