//! Content-addressed block storage.
//!
//! The block store holds immutable byte blocks keyed by the hash of their
//! content. The core never reasons about storage location, only content
//! identity: the same bytes yield the same id anywhere, which gives dedup
//! and cross-peer agreement for free.

use crate::hash::{EventId, Hasher};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from the underlying durable stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An I/O failure in the block or head store. The surrounding
    /// operation aborts and its transaction is discarded.
    #[error("store failure: {0}")]
    Failure(String),
}

/// The content id of a block: SHA-256 of its bytes.
pub fn content_id(bytes: &[u8]) -> EventId {
    Hasher::hash(bytes)
}

/// Content-addressed storage for immutable blocks.
pub trait BlockStore {
    /// Store a block, returning its content id. Re-putting identical bytes
    /// is a no-op that returns the same id.
    fn put(&mut self, bytes: Vec<u8>) -> Result<EventId, StoreError>;

    /// Fetch a block by id.
    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Existence check.
    fn has(&self, id: &EventId) -> Result<bool, StoreError>;
}

/// In-memory block store.
#[derive(Clone, Debug, Default)]
pub struct MemoryBlockStore {
    blocks: HashMap<EventId, Vec<u8>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&mut self, bytes: Vec<u8>) -> Result<EventId, StoreError> {
        let id = content_id(&bytes);
        self.blocks.entry(id).or_insert(bytes);
        Ok(id)
    }

    fn get(&self, id: &EventId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blocks.get(id).cloned())
    }

    fn has(&self, id: &EventId) -> Result<bool, StoreError> {
        Ok(self.blocks.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_is_content_addressed() {
        let mut store = MemoryBlockStore::new();
        let id = store.put(b"block".to_vec()).unwrap();

        assert_eq!(id, content_id(b"block"));
        assert!(store.has(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), Some(b"block".to_vec()));
    }

    #[test]
    fn test_duplicate_put_is_noop() {
        let mut store = MemoryBlockStore::new();
        let first = store.put(b"block".to_vec()).unwrap();
        let second = store.put(b"block".to_vec()).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_block_is_none() {
        let store = MemoryBlockStore::new();
        let id = content_id(b"absent");
        assert_eq!(store.get(&id).unwrap(), None);
        assert!(!store.has(&id).unwrap());
    }
}
