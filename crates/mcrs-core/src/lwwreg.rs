//! Last-Writer-Wins register.
//!
//! The register keeps the value written by the delta with the greatest
//! causal height. On equal height the greater actor id wins. No wall-clock
//! time is ever consulted: height is the only ordering signal, and the
//! actor tie-break is an arbitrary-but-fixed rule so that every peer
//! resolves true concurrency to the same winner.

use crate::actor::ActorId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single register write.
///
/// `height` is taken from the event that carries this delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDelta {
    /// The written value, opaque to the merge rule.
    pub value: Vec<u8>,
    /// Causal height of the owning event.
    pub height: u64,
    /// The writing peer, used as the concurrency tie-break.
    pub actor: ActorId,
}

impl RegisterDelta {
    /// True if this delta beats `other` under the merge rule.
    fn wins_over(&self, other: &Self) -> bool {
        match self.height.cmp(&other.height) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.actor.cmp(&other.actor) {
                Ordering::Greater => true,
                Ordering::Less => false,
                // Same actor at the same height: compare values so the
                // rule stays total and deterministic.
                Ordering::Equal => self.value >= other.value,
            },
        }
    }
}

/// Materialized state of a last-writer-wins register.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister {
    winner: Option<RegisterDelta>,
}

impl LwwRegister {
    /// An empty register with no write observed yet.
    pub fn new() -> Self {
        Self { winner: None }
    }

    /// Fold one write into the register.
    pub fn merge(&mut self, delta: &RegisterDelta) {
        let take = match &self.winner {
            Some(current) => delta.wins_over(current),
            None => true,
        };
        if take {
            self.winner = Some(delta.clone());
        }
    }

    /// Fold another register state in (pairwise join).
    pub fn merge_state(&mut self, other: &Self) {
        if let Some(delta) = &other.winner {
            self.merge(delta);
        }
    }

    /// The current value, if any write has been observed.
    pub fn value(&self) -> Option<&[u8]> {
        self.winner.as_ref().map(|d| d.value.as_slice())
    }

    /// Height of the winning write.
    pub fn height(&self) -> u64 {
        self.winner.as_ref().map(|d| d.height).unwrap_or(0)
    }

    /// Actor that produced the winning write.
    pub fn actor(&self) -> Option<&ActorId> {
        self.winner.as_ref().map(|d| &d.actor)
    }
}
