//! Transport abstraction for replication messages.

use async_trait::async_trait;
use mcrs_core::CrdtKind;
use mcrs_merkle::{EventId, InstanceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages exchanged between replicas.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// A writer announces the new frontier of one instance.
    AdvertiseHeads {
        instance: InstanceId,
        kind: CrdtKind,
        heads: BTreeSet<EventId>,
    },
    /// A receiver asks for event blocks it is missing. Answered with one
    /// [`Message::Blocks`] reply.
    FetchBlocks { ids: Vec<EventId> },
    /// The answer to a fetch: every held block, plus the requested ids the
    /// responder does not hold.
    Blocks {
        blocks: Vec<Vec<u8>>,
        missing: Vec<EventId>,
    },
}

/// Transport failures.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer not reachable: {0}")]
    PeerNotFound(PeerId),

    #[error("send to {0} failed: channel closed")]
    SendFailed(PeerId),

    #[error("peer {0} dropped the request without replying")]
    NoReply(PeerId),
}

/// An incoming message plus the channel for answering it, if the sender
/// asked for an answer.
pub struct Envelope {
    pub from: PeerId,
    pub message: Message,
    reply: Option<oneshot::Sender<Message>>,
}

impl Envelope {
    pub fn wants_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Break the envelope apart so the message can be consumed while the
    /// reply channel stays usable.
    pub fn split(self) -> (PeerId, Message, Responder) {
        (self.from, self.message, Responder(self.reply))
    }
}

/// The reply half of a request envelope.
pub struct Responder(Option<oneshot::Sender<Message>>);

impl Responder {
    /// Answer the request. Returns false when the message had no reply
    /// channel or the requester has already hung up.
    pub fn send(self, message: Message) -> bool {
        match self.0 {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

/// Point-to-point message delivery between replicas.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver a message to one peer, expecting no answer.
    async fn send(&self, peer: &PeerId, message: Message) -> Result<(), TransportError>;

    /// Deliver a request to one peer and wait for its reply.
    async fn request(&self, peer: &PeerId, message: Message) -> Result<Message, TransportError>;

    /// Take the stream of incoming messages, tagged with their sender.
    /// Yields `None` once per transport; later calls return `None`.
    fn subscribe(&self) -> Option<mpsc::Receiver<Envelope>>;
}

type Inbox = mpsc::Sender<Envelope>;

/// In-memory transport for tests and single-process simulation. Peers are
/// wired together explicitly with [`MemoryTransport::connect_to`].
pub struct MemoryTransport {
    local_id: PeerId,
    inbox_tx: Inbox,
    inbox_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    outgoing: Arc<Mutex<HashMap<PeerId, Inbox>>>,
}

impl MemoryTransport {
    pub fn new(local_id: PeerId) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            local_id,
            inbox_tx: tx,
            inbox_rx: Mutex::new(Some(rx)),
            outgoing: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Wire a one-way link from this transport to `other`'s inbox.
    pub fn connect_to(&self, other: &MemoryTransport) {
        self.outgoing
            .lock()
            .insert(other.local_id.clone(), other.inbox_tx.clone());
    }

    /// Sever the link to a peer, simulating a dropped connection.
    pub fn disconnect(&self, peer: &PeerId) {
        self.outgoing.lock().remove(peer);
    }

    fn inbox_of(&self, peer: &PeerId) -> Result<Inbox, TransportError> {
        self.outgoing
            .lock()
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::PeerNotFound(peer.clone()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, peer: &PeerId, message: Message) -> Result<(), TransportError> {
        let tx = self.inbox_of(peer)?;
        tx.send(Envelope {
            from: self.local_id.clone(),
            message,
            reply: None,
        })
        .await
        .map_err(|_| TransportError::SendFailed(peer.clone()))
    }

    async fn request(&self, peer: &PeerId, message: Message) -> Result<Message, TransportError> {
        let tx = self.inbox_of(peer)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Envelope {
            from: self.local_id.clone(),
            message,
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_| TransportError::SendFailed(peer.clone()))?;
        reply_rx
            .await
            .map_err(|_| TransportError::NoReply(peer.clone()))
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.inbox_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_connected_peer() {
        let a = MemoryTransport::new(PeerId::new("a"));
        let b = MemoryTransport::new(PeerId::new("b"));
        a.connect_to(&b);

        let mut inbox = b.subscribe().unwrap();
        a.send(b.local_id(), Message::FetchBlocks { ids: vec![] })
            .await
            .unwrap();

        let envelope = inbox.recv().await.unwrap();
        assert_eq!(envelope.from, PeerId::new("a"));
        assert!(!envelope.wants_reply());
        assert!(matches!(envelope.message, Message::FetchBlocks { .. }));
    }

    #[tokio::test]
    async fn test_send_to_unconnected_peer_fails() {
        let a = MemoryTransport::new(PeerId::new("a"));
        let err = a
            .send(&PeerId::new("nowhere"), Message::FetchBlocks { ids: vec![] })
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::PeerNotFound(PeerId::new("nowhere")));
    }

    #[tokio::test]
    async fn test_disconnect_severs_the_link() {
        let a = MemoryTransport::new(PeerId::new("a"));
        let b = MemoryTransport::new(PeerId::new("b"));
        a.connect_to(&b);
        a.disconnect(b.local_id());

        let err = a
            .send(b.local_id(), Message::FetchBlocks { ids: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn test_request_is_answered_through_the_envelope() {
        let a = MemoryTransport::new(PeerId::new("a"));
        let b = MemoryTransport::new(PeerId::new("b"));
        a.connect_to(&b);

        let mut inbox = b.subscribe().unwrap();
        let server = tokio::spawn(async move {
            let envelope = inbox.recv().await.unwrap();
            assert!(envelope.wants_reply());
            let (from, message, responder) = envelope.split();
            assert_eq!(from, PeerId::new("a"));
            assert!(matches!(message, Message::FetchBlocks { .. }));
            assert!(responder.send(Message::Blocks {
                blocks: vec![b"block".to_vec()],
                missing: vec![],
            }));
        });

        let reply = a
            .request(b.local_id(), Message::FetchBlocks { ids: vec![] })
            .await
            .unwrap();
        match reply {
            Message::Blocks { blocks, missing } => {
                assert_eq!(blocks, vec![b"block".to_vec()]);
                assert!(missing.is_empty());
            }
            other => panic!("expected Blocks, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_request_surfaces_no_reply() {
        let a = MemoryTransport::new(PeerId::new("a"));
        let b = MemoryTransport::new(PeerId::new("b"));
        a.connect_to(&b);

        let mut inbox = b.subscribe().unwrap();
        let server = tokio::spawn(async move {
            // Drop the envelope without answering.
            let _ = inbox.recv().await.unwrap();
        });

        let err = a
            .request(b.local_id(), Message::FetchBlocks { ids: vec![] })
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NoReply(PeerId::new("b")));
        server.await.unwrap();
    }
}
