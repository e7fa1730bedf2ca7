//! The pull side of replication: where missing blocks come from.

use crate::replicator::SyncError;
use crate::transport::{Message, PeerId, Transport};
use async_trait::async_trait;
use mcrs_merkle::{content_id, EventId};
use mcrs_txn::Rootstore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Supplies event blocks by id during reconciliation.
///
/// A source is typically another replica reached over the transport; for
/// tests and single-process topologies it can read a peer's store
/// directly. Ids the source does not hold come back as `None`.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn fetch(&self, ids: &[EventId]) -> Result<Vec<(EventId, Option<Vec<u8>>)>, SyncError>;
}

/// A source backed directly by a peer's root store.
pub struct StoreSource {
    root: Rootstore,
}

impl StoreSource {
    pub fn new(root: Rootstore) -> Self {
        Self { root }
    }
}

#[async_trait]
impl BlockSource for StoreSource {
    async fn fetch(&self, ids: &[EventId]) -> Result<Vec<(EventId, Option<Vec<u8>>)>, SyncError> {
        Ok(ids.iter().map(|id| (*id, self.root.block(id))).collect())
    }
}

/// A source that fetches blocks from a remote peer over the transport.
///
/// Each fetch becomes one [`Message::FetchBlocks`] request; the peer's
/// serving loop answers with [`Message::Blocks`]. Returned blocks are
/// matched back to the requested ids by their content hash, so a peer
/// cannot satisfy an id with the wrong bytes.
pub struct TransportSource<T: Transport> {
    transport: Arc<T>,
    peer: PeerId,
}

impl<T: Transport> TransportSource<T> {
    pub fn new(transport: Arc<T>, peer: PeerId) -> Self {
        Self { transport, peer }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }
}

#[async_trait]
impl<T: Transport> BlockSource for TransportSource<T> {
    async fn fetch(&self, ids: &[EventId]) -> Result<Vec<(EventId, Option<Vec<u8>>)>, SyncError> {
        let request = Message::FetchBlocks { ids: ids.to_vec() };
        let reply = self.transport.request(&self.peer, request).await?;
        let Message::Blocks { blocks, missing } = reply else {
            return Err(SyncError::BadBlock(
                "fetch answered with a non-block message".into(),
            ));
        };
        if !missing.is_empty() {
            debug!(peer = %self.peer, missing = missing.len(), "peer lacks requested blocks");
        }
        let mut by_id: HashMap<EventId, Vec<u8>> = blocks
            .into_iter()
            .map(|bytes| (content_id(&bytes), bytes))
            .collect();
        Ok(ids.iter().map(|id| (*id, by_id.remove(id))).collect())
    }
}
