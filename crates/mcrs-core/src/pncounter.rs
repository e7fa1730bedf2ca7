//! Positive/negative counter.
//!
//! Two independent per-actor accumulators, one for additions and one for
//! subtractions, each merged with the same cumulative-max rule as the
//! positive counter. The materialized value is total added minus total
//! subtracted, so the counter can go up and down while every individual
//! accumulator stays monotonic and replay-safe.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A PN-counter delta: one actor's cumulative totals on both accumulators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounterDelta {
    pub actor: ActorId,
    /// Actor's cumulative added total.
    pub added: u64,
    /// Actor's cumulative subtracted total.
    pub subtracted: u64,
}

/// Materialized state of a positive/negative counter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    added: BTreeMap<ActorId, u64>,
    subtracted: BTreeMap<ActorId, u64>,
}

fn merge_max(map: &mut BTreeMap<ActorId, u64>, actor: &ActorId, total: u64) {
    map.entry(actor.clone())
        .and_modify(|t| *t = (*t).max(total))
        .or_insert(total);
}

impl PnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta in, per-actor max on each accumulator independently.
    pub fn merge(&mut self, delta: &PnCounterDelta) {
        merge_max(&mut self.added, &delta.actor, delta.added);
        merge_max(&mut self.subtracted, &delta.actor, delta.subtracted);
    }

    /// Fold another counter state in.
    pub fn merge_state(&mut self, other: &Self) {
        for (actor, total) in &other.added {
            merge_max(&mut self.added, actor, *total);
        }
        for (actor, total) in &other.subtracted {
            merge_max(&mut self.subtracted, actor, *total);
        }
    }

    /// Produce the delta an actor should emit to add `amount`.
    pub fn delta_for_increment(&self, actor: &ActorId, amount: u64) -> PnCounterDelta {
        PnCounterDelta {
            actor: actor.clone(),
            added: self.added_of(actor).saturating_add(amount),
            subtracted: self.subtracted_of(actor),
        }
    }

    /// Produce the delta an actor should emit to subtract `amount`.
    pub fn delta_for_decrement(&self, actor: &ActorId, amount: u64) -> PnCounterDelta {
        PnCounterDelta {
            actor: actor.clone(),
            added: self.added_of(actor),
            subtracted: self.subtracted_of(actor).saturating_add(amount),
        }
    }

    /// Cumulative added total for one actor.
    pub fn added_of(&self, actor: &ActorId) -> u64 {
        self.added.get(actor).copied().unwrap_or(0)
    }

    /// Cumulative subtracted total for one actor.
    pub fn subtracted_of(&self, actor: &ActorId) -> u64 {
        self.subtracted.get(actor).copied().unwrap_or(0)
    }

    /// Materialized value: total added minus total subtracted.
    ///
    /// Accumulated in i128 and clamped to the i64 range, so totals near
    /// `u64::MAX` saturate instead of wrapping.
    pub fn value(&self) -> i64 {
        let added: i128 = self.added.values().map(|t| i128::from(*t)).sum();
        let subtracted: i128 = self.subtracted.values().map(|t| i128::from(*t)).sum();
        let value = added - subtracted;
        i64::try_from(value).unwrap_or(if value > 0 { i64::MAX } else { i64::MIN })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_deltas_merge_in_either_order() {
        let plus = PnCounterDelta {
            actor: ActorId::new("A"),
            added: 10,
            subtracted: 0,
        };
        let minus = PnCounterDelta {
            actor: ActorId::new("B"),
            added: 0,
            subtracted: 3,
        };

        let mut forward = PnCounter::new();
        forward.merge(&plus);
        forward.merge(&minus);

        let mut reverse = PnCounter::new();
        reverse.merge(&minus);
        reverse.merge(&plus);

        assert_eq!(forward.value(), 7);
        assert_eq!(reverse.value(), 7);
    }

    #[test]
    fn test_duplicate_delivery_keeps_value() {
        let plus = PnCounterDelta {
            actor: ActorId::new("A"),
            added: 10,
            subtracted: 0,
        };
        let minus = PnCounterDelta {
            actor: ActorId::new("B"),
            added: 0,
            subtracted: 3,
        };

        let mut counter = PnCounter::new();
        counter.merge(&plus);
        counter.merge(&minus);
        counter.merge(&plus);
        counter.merge(&minus);

        assert_eq!(counter.value(), 7);
    }

    #[test]
    fn test_increment_then_decrement_same_actor() {
        let mut counter = PnCounter::new();
        let a = ActorId::new("A");

        let d1 = counter.delta_for_increment(&a, 5);
        counter.merge(&d1);
        let d2 = counter.delta_for_decrement(&a, 2);
        counter.merge(&d2);

        assert_eq!(counter.value(), 3);
        assert_eq!(counter.added_of(&a), 5);
        assert_eq!(counter.subtracted_of(&a), 2);
    }

    #[test]
    fn test_value_can_go_negative() {
        let mut counter = PnCounter::new();
        let a = ActorId::new("A");
        let d = counter.delta_for_decrement(&a, 4);
        counter.merge(&d);
        assert_eq!(counter.value(), -4);
    }

    #[test]
    fn test_value_saturates_at_extreme_totals() {
        let mut counter = PnCounter::new();
        counter.merge(&PnCounterDelta {
            actor: ActorId::new("A"),
            added: u64::MAX,
            subtracted: 0,
        });
        // Pure increments must never read as negative.
        assert_eq!(counter.value(), i64::MAX);

        counter.merge(&PnCounterDelta {
            actor: ActorId::new("B"),
            added: 0,
            subtracted: u64::MAX,
        });
        assert_eq!(counter.value(), 0);

        counter.merge(&PnCounterDelta {
            actor: ActorId::new("C"),
            added: 0,
            subtracted: u64::MAX,
        });
        assert_eq!(counter.value(), i64::MIN);
    }

    #[test]
    fn test_state_join_associative() {
        let mk = |actor: &str, added, subtracted| {
            let mut c = PnCounter::new();
            c.merge(&PnCounterDelta {
                actor: ActorId::new(actor),
                added,
                subtracted,
            });
            c
        };
        let c1 = mk("A", 1, 0);
        let c2 = mk("B", 2, 0);
        let c3 = mk("C", 0, 1);

        let mut left = c1.clone();
        left.merge_state(&c2);
        left.merge_state(&c3);

        let mut bc = c2.clone();
        bc.merge_state(&c3);
        let mut right = c1.clone();
        right.merge_state(&bc);

        assert_eq!(left.value(), right.value());
        assert_eq!(left.value(), 2);
    }
}
