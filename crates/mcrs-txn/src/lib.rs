//! # mcrs-txn
//!
//! The transaction boundary of the Cinnabar MCRS: a batch of block-store,
//! head-store, and materialized-state writes that lands atomically or not
//! at all.
//!
//! Concurrency is optimistic. A transaction records the version of every
//! instance it reads; at commit time any version that moved means a
//! concurrent writer won and the commit fails with `Conflict`, leaving no
//! trace. The loser retries the whole mutation against fresh heads rather
//! than blocking.
//!
//! Success, error, and discard callbacks fire exactly once after the
//! terminal state is reached, in registration order. The async variants
//! run on a bounded worker pool off the commit path and exist only for
//! side effects, such as telling the replicator a new head exists.

mod pool;
mod rootstore;
mod txn;

pub use pool::CallbackPool;
pub use rootstore::Rootstore;
pub use txn::{Txn, TxnError, TxnStatus};
