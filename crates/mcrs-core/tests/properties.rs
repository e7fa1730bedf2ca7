//! Property-based tests for the CRDT merge laws.
//!
//! Convergence rests on three laws holding for every payload kind:
//! - Commutativity: merging deltas in any order yields the same state
//! - Associativity: grouping of state joins does not matter
//! - Idempotence: re-merging an already-seen delta changes nothing
//!
//! The permutation tests model N replicas receiving the same delta set in
//! shuffled order and assert they materialize the identical value.

use mcrs_core::{
    ActorId, CrdtKind, Delta, PnCounter, PnCounterDelta, RegisterDelta, State,
};
use proptest::prelude::*;

fn actor_strategy() -> impl Strategy<Value = ActorId> {
    "[A-F]".prop_map(ActorId::new)
}

fn pn_delta_strategy() -> impl Strategy<Value = PnCounterDelta> {
    (actor_strategy(), 0u64..1000, 0u64..1000).prop_map(|(actor, added, subtracted)| {
        PnCounterDelta {
            actor,
            added,
            subtracted,
        }
    })
}

fn register_delta_strategy() -> impl Strategy<Value = RegisterDelta> {
    (prop::collection::vec(any::<u8>(), 0..16), 0u64..50, actor_strategy()).prop_map(
        |(value, height, actor)| RegisterDelta {
            value,
            height,
            actor,
        },
    )
}

proptest! {
    #[test]
    fn pncounter_merge_is_commutative(a in pn_delta_strategy(), b in pn_delta_strategy()) {
        let mut forward = PnCounter::new();
        forward.merge(&a);
        forward.merge(&b);

        let mut reverse = PnCounter::new();
        reverse.merge(&b);
        reverse.merge(&a);

        prop_assert_eq!(forward, reverse);
    }

    #[test]
    fn pncounter_merge_is_idempotent(a in pn_delta_strategy()) {
        let mut once = PnCounter::new();
        once.merge(&a);

        let mut twice = PnCounter::new();
        twice.merge(&a);
        twice.merge(&a);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn pncounter_state_join_is_associative(
        a in pn_delta_strategy(),
        b in pn_delta_strategy(),
        c in pn_delta_strategy(),
    ) {
        let single = |d: &PnCounterDelta| {
            let mut counter = PnCounter::new();
            counter.merge(d);
            counter
        };

        let mut left = single(&a);
        left.merge_state(&single(&b));
        left.merge_state(&single(&c));

        let mut bc = single(&b);
        bc.merge_state(&single(&c));
        let mut right = single(&a);
        right.merge_state(&bc);

        prop_assert_eq!(left, right);
    }

    #[test]
    fn pncounter_converges_under_permutation_and_duplication(
        deltas in prop::collection::vec(pn_delta_strategy(), 1..8),
        seed in any::<u64>(),
    ) {
        let mut reference = PnCounter::new();
        for d in &deltas {
            reference.merge(d);
        }

        // Shuffled, with one delta delivered twice.
        let mut shuffled = deltas.clone();
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let duplicate = shuffled[0].clone();

        let mut replica = PnCounter::new();
        for d in &shuffled {
            replica.merge(d);
        }
        replica.merge(&duplicate);

        prop_assert_eq!(replica.value(), reference.value());
    }

    #[test]
    fn register_merge_is_commutative(a in register_delta_strategy(), b in register_delta_strategy()) {
        let mut forward = State::new(CrdtKind::Register);
        forward.merge(&Delta::Register(a.clone())).unwrap();
        forward.merge(&Delta::Register(b.clone())).unwrap();

        let mut reverse = State::new(CrdtKind::Register);
        reverse.merge(&Delta::Register(b)).unwrap();
        reverse.merge(&Delta::Register(a)).unwrap();

        prop_assert_eq!(forward, reverse);
    }

    #[test]
    fn register_tie_break_is_deterministic(
        value_a in prop::collection::vec(any::<u8>(), 1..8),
        value_b in prop::collection::vec(any::<u8>(), 1..8),
        height in 0u64..50,
    ) {
        let a = RegisterDelta { value: value_a, height, actor: ActorId::new("A") };
        let b = RegisterDelta { value: value_b, height, actor: ActorId::new("B") };

        let mut peer_one = State::new(CrdtKind::Register);
        peer_one.merge(&Delta::Register(a.clone())).unwrap();
        peer_one.merge(&Delta::Register(b.clone())).unwrap();

        let mut peer_two = State::new(CrdtKind::Register);
        peer_two.merge(&Delta::Register(b.clone())).unwrap();
        peer_two.merge(&Delta::Register(a)).unwrap();

        // Equal height: the greater actor id must win on every peer.
        prop_assert_eq!(&peer_one, &peer_two);
        prop_assert_eq!(
            peer_one.as_register().unwrap().value(),
            Some(b.value.as_slice())
        );
    }

    #[test]
    fn register_higher_height_always_wins(
        a in register_delta_strategy(),
        b in register_delta_strategy(),
    ) {
        prop_assume!(a.height != b.height);
        let winner = if a.height > b.height { &a } else { &b };

        let mut reg = State::new(CrdtKind::Register);
        reg.merge(&Delta::Register(a.clone())).unwrap();
        reg.merge(&Delta::Register(b.clone())).unwrap();

        prop_assert_eq!(
            reg.as_register().unwrap().value(),
            Some(winner.value.as_slice())
        );
    }
}
