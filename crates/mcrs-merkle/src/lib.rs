//! # mcrs-merkle
//!
//! The Merkle clock: a content-addressed, hash-linked event DAG that
//! establishes causal order between document mutations without synchronized
//! clocks.
//!
//! This crate provides:
//! - [`EventId`] content identifiers (SHA-256 over the encoded event)
//! - [`Event`] DAG nodes carrying one CRDT delta and links to causal parents
//! - [`BlockStore`] / [`HeadStore`] traits for content-addressed persistence
//!   and per-instance frontier tracking
//! - [`MerkleClock`] for building new events against the current heads and
//!   replaying known events into materialized CRDT state in causal order
//!
//! An event's id is derived purely from its content, so the same mutation
//! hashes to the same id on every peer. Two peers that have stored the same
//! set of events therefore agree on the full causal history byte for byte.

mod blockstore;
mod clock;
mod event;
mod hash;
mod headstore;

pub use blockstore::{content_id, BlockStore, MemoryBlockStore, StoreError};
pub use clock::{ClockError, MerkleClock};
pub use event::{Event, EventBuilder, InstanceId};
pub use hash::{EventId, Hasher};
pub use headstore::{HeadStore, MemoryHeadStore};
