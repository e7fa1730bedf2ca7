//! Error type for the document layer.

use mcrs_core::{CrdtKind, MergeError};
use mcrs_merkle::{ClockError, StoreError};
use mcrs_txn::TxnError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("collection {0} is not defined")]
    UnknownCollection(String),

    #[error("field {field} is not defined in collection {collection}")]
    UnknownField { collection: String, field: String },

    /// The mutation asked for an operation the field's declared kind does
    /// not support, for example decrementing a grow-only counter.
    #[error("field {field} is declared {declared}, cannot apply a {requested} operation")]
    KindMismatch {
        field: String,
        declared: CrdtKind,
        requested: CrdtKind,
    },

    /// Concurrent writers kept winning; the mutation was rebuilt and
    /// retried until the attempt budget ran out.
    #[error("conflict persisted after {0} attempts")]
    RetriesExhausted(u32),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Txn(#[from] TxnError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
