//! # mcrs-core
//!
//! CRDT payload types for the Cinnabar MCRS (Merkle-Clock Replication Store).
//!
//! Each field of a replicated document is backed by one of a closed set of
//! CRDT kinds: a last-writer-wins register, a grow-only counter, a
//! positive/negative counter, or a composite object grouping sub-fields.
//! Every kind exposes the same capability: fold a delta into the current
//! state, deterministically, so that any two peers that have seen the same
//! set of deltas in any order hold the identical value.

pub mod actor;
pub mod composite;
pub mod crdt;
pub mod error;
pub mod lwwreg;
pub mod pcounter;
pub mod pncounter;

pub use actor::ActorId;
pub use composite::{CompositeDelta, CompositeState};
pub use crdt::{CrdtKind, Delta, State};
pub use error::MergeError;
pub use lwwreg::{LwwRegister, RegisterDelta};
pub use pcounter::{PCounter, PCounterDelta};
pub use pncounter::{PnCounter, PnCounterDelta};
