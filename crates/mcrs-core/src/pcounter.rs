//! Grow-only (positive) counter.
//!
//! Each delta carries the emitting actor's *cumulative* total rather than a
//! raw increment. The merge keeps the per-actor maximum, so re-delivering a
//! delta is a no-op and out-of-order arrival cannot double-count. The
//! materialized value is the sum over all actors.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A positive counter delta: one actor's cumulative contribution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PCounterDelta {
    pub actor: ActorId,
    /// The actor's total contribution after the increment, not the step.
    pub total: u64,
}

/// Materialized state of a grow-only counter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PCounter {
    totals: BTreeMap<ActorId, u64>,
}

impl PCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta in, keeping the per-actor maximum.
    pub fn merge(&mut self, delta: &PCounterDelta) {
        self.totals
            .entry(delta.actor.clone())
            .and_modify(|t| *t = (*t).max(delta.total))
            .or_insert(delta.total);
    }

    /// Fold another counter state in (per-actor max join).
    pub fn merge_state(&mut self, other: &Self) {
        for (actor, total) in &other.totals {
            self.totals
                .entry(actor.clone())
                .and_modify(|t| *t = (*t).max(*total))
                .or_insert(*total);
        }
    }

    /// Produce the delta an actor should emit to add `amount`.
    pub fn delta_for_increment(&self, actor: &ActorId, amount: u64) -> PCounterDelta {
        PCounterDelta {
            actor: actor.clone(),
            total: self.total_of(actor).saturating_add(amount),
        }
    }

    /// The cumulative total recorded for one actor.
    pub fn total_of(&self, actor: &ActorId) -> u64 {
        self.totals.get(actor).copied().unwrap_or(0)
    }

    /// Materialized value: sum over all actors, saturating at `u64::MAX`.
    pub fn value(&self) -> u64 {
        self.totals
            .values()
            .fold(0u64, |acc, total| acc.saturating_add(*total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_accumulates_per_actor() {
        let mut counter = PCounter::new();
        let a = ActorId::new("A");
        let b = ActorId::new("B");

        let d1 = counter.delta_for_increment(&a, 5);
        counter.merge(&d1);
        let d2 = counter.delta_for_increment(&a, 3);
        counter.merge(&d2);
        let d3 = counter.delta_for_increment(&b, 2);
        counter.merge(&d3);

        assert_eq!(counter.value(), 10);
        assert_eq!(counter.total_of(&a), 8);
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut counter = PCounter::new();
        let a = ActorId::new("A");

        let d = counter.delta_for_increment(&a, 7);
        counter.merge(&d);
        counter.merge(&d);
        counter.merge(&d);

        assert_eq!(counter.value(), 7);
    }

    #[test]
    fn test_out_of_order_delivery_keeps_max() {
        let a = ActorId::new("A");
        let older = PCounterDelta {
            actor: a.clone(),
            total: 4,
        };
        let newer = PCounterDelta { actor: a, total: 9 };

        let mut counter = PCounter::new();
        counter.merge(&newer);
        counter.merge(&older);

        assert_eq!(counter.value(), 9);
    }

    #[test]
    fn test_value_saturates_instead_of_overflowing() {
        let mut counter = PCounter::new();
        counter.merge(&PCounterDelta {
            actor: ActorId::new("A"),
            total: u64::MAX,
        });
        counter.merge(&PCounterDelta {
            actor: ActorId::new("B"),
            total: u64::MAX,
        });
        assert_eq!(counter.value(), u64::MAX);
    }

    #[test]
    fn test_state_join_commutative() {
        let mut c1 = PCounter::new();
        c1.merge(&PCounterDelta {
            actor: ActorId::new("A"),
            total: 5,
        });
        let mut c2 = PCounter::new();
        c2.merge(&PCounterDelta {
            actor: ActorId::new("B"),
            total: 3,
        });

        let mut left = c1.clone();
        left.merge_state(&c2);
        let mut right = c2.clone();
        right.merge_state(&c1);

        assert_eq!(left.value(), right.value());
        assert_eq!(left.value(), 8);
    }
}
