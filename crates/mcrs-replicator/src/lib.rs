//! Peer replication for the Merkle-clock store.
//!
//! Replication is pull-based: a writer advertises its new heads to its
//! configured targets, and each receiver fetches exactly the event blocks
//! it is missing, applies them in causal order inside a transaction, and
//! folds the deltas into materialized state. Known events and
//! already-merged heads are safe no-ops, so duplicate or re-ordered
//! advertisements converge to the same result.

mod replicator;
mod source;
mod transport;

pub use replicator::{ReconcileOutcome, Replicator, ReplicatorConfig, SyncError};
pub use source::{BlockSource, StoreSource, TransportSource};
pub use transport::{
    Envelope, MemoryTransport, Message, PeerId, Responder, Transport, TransportError,
};
