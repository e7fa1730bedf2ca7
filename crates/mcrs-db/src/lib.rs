//! # mcrs-db
//!
//! Document layer for the MCRS (Merkle-Clock Replication Store).
//!
//! Collections declare the CRDT kind of each field once; mutations are
//! schema-checked, computed as deltas against materialized state, and
//! committed as events on the field's Merkle clock inside a transaction.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mcrs_core::CrdtKind;
//! use mcrs_db::{CollectionSchema, Database};
//! use mcrs_txn::Rootstore;
//!
//! let db = Database::new(Rootstore::new());
//! db.define_collection(
//!     CollectionSchema::new("players")
//!         .with_field("name", CrdtKind::Register)
//!         .with_field("points", CrdtKind::PnCounter),
//! );
//!
//! db.set_register("players", "alice", "name", b"Alice".to_vec())?;
//! db.increment("players", "alice", "points", 10)?;
//! db.decrement("players", "alice", "points", 3)?;
//! assert_eq!(db.counter_value("players", "alice", "points")?, 7);
//! ```

pub mod database;
pub mod error;
pub mod schema;

pub use database::{CompositeUpdate, Database, HeadListener};
pub use error::DbError;
pub use schema::CollectionSchema;
