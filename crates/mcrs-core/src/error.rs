//! Error types for CRDT merging.

use crate::crdt::CrdtKind;
use thiserror::Error;

/// Errors raised when folding a delta into a state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The delta's CRDT kind disagrees with the state's declared kind.
    ///
    /// The caller is expected to log and skip the offending delta rather
    /// than abort a whole replay: sibling instances may still fold cleanly.
    #[error("type mismatch: state is {state}, delta is {delta}")]
    TypeMismatch { state: CrdtKind, delta: CrdtKind },
}
