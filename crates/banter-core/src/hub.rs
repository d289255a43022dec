//! The hub: single coordinator for room membership and message fan-out.
//!
//! All registration, deregistration, and broadcast requests are funneled
//! through one bounded channel into a single event loop that owns the room
//! registry exclusively. That loop is the only writer, so the registry needs
//! no lock, and every room sees broadcasts in the exact order the hub
//! processed them.

use crate::connection::{ConnectionHandle, ConnectionId, EnqueueResult};
use crate::room::Room;
use crate::store::{MessageStore, NewMessage};
use banter_protocol::{codec, WireMessage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Capacity of the hub's request channel.
const REQUEST_QUEUE_CAPACITY: usize = 256;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Deadline for persisting one chat message. Independent of any caller
    /// timeout; on expiry the message is delivered without a durable record.
    pub persist_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            persist_timeout: Duration::from_secs(5),
        }
    }
}

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub event loop is no longer running.
    #[error("Hub is no longer running")]
    Closed,
}

/// Hub statistics.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// Number of rooms with at least one registered connection.
    pub room_count: usize,
    /// Number of registered connections across all rooms.
    pub connection_count: usize,
    /// Connections forcibly evicted for a full outbound queue since start.
    pub evictions: u64,
}

/// A request submitted into the hub's event stream.
enum HubRequest {
    Register(ConnectionHandle),
    Unregister {
        id: ConnectionId,
        room_id: i64,
    },
    Broadcast(WireMessage),
    RoomCount {
        room_id: i64,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle for submitting requests to a running hub.
///
/// Cheap to clone; all clones feed the same event loop.
#[derive(Clone)]
pub struct HubHandle {
    requests: mpsc::Sender<HubRequest>,
}

impl HubHandle {
    /// Register a connection with its room.
    ///
    /// The connection must already have passed the authorization gate.
    /// Registration itself cannot fail; a synthetic join notification is
    /// broadcast to the room, the joining connection included.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.submit(HubRequest::Register(handle)).await
    }

    /// Remove a connection from its room.
    ///
    /// Idempotent: unregistering a connection that is already gone is a
    /// no-op. Closes the connection's outbound queue and broadcasts a leave
    /// notification to the remaining members.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn unregister(&self, id: ConnectionId, room_id: i64) -> Result<(), HubError> {
        self.submit(HubRequest::Unregister { id, room_id }).await
    }

    /// Broadcast a message to every connection in its room.
    ///
    /// Chat-kind messages are persisted first, best-effort, under the hub's
    /// persistence deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn broadcast(&self, message: WireMessage) -> Result<(), HubError> {
        self.submit(HubRequest::Broadcast(message)).await
    }

    /// Get the number of connections currently registered to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn room_count(&self, room_id: i64) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubRequest::RoomCount { room_id, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Get hub statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has shut down.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubRequest::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    async fn submit(&self, request: HubRequest) -> Result<(), HubError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| HubError::Closed)
    }
}

/// The central coordinator.
///
/// Owns the room registry; mutated only from within [`Hub::run`].
pub struct Hub {
    rooms: HashMap<i64, Room>,
    store: Arc<dyn MessageStore>,
    config: HubConfig,
    evictions: u64,
}

impl Hub {
    /// Spawn the hub event loop and return a handle to it.
    ///
    /// The loop runs until every `HubHandle` clone has been dropped.
    #[must_use]
    pub fn spawn(store: Arc<dyn MessageStore>, config: HubConfig) -> HubHandle {
        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE_CAPACITY);

        let hub = Self {
            rooms: HashMap::new(),
            store,
            config,
            evictions: 0,
        };
        tokio::spawn(hub.run(inbox));

        info!("Chat hub started");
        HubHandle { requests }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<HubRequest>) {
        while let Some(request) = inbox.recv().await {
            match request {
                HubRequest::Register(handle) => self.register(handle),
                HubRequest::Unregister { id, room_id } => self.unregister(id, room_id),
                HubRequest::Broadcast(message) => self.broadcast(message).await,
                HubRequest::RoomCount { room_id, reply } => {
                    let _ = reply.send(self.rooms.get(&room_id).map_or(0, Room::len));
                }
                HubRequest::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
            }
        }

        debug!("Chat hub stopped");
    }

    fn stats(&self) -> HubStats {
        HubStats {
            room_count: self.rooms.len(),
            connection_count: self.rooms.values().map(Room::len).sum(),
            evictions: self.evictions,
        }
    }

    fn register(&mut self, handle: ConnectionHandle) {
        let room_id = handle.room_id;
        let join = WireMessage::join(room_id, handle.user_id, handle.username.clone());

        let room = self.rooms.entry(room_id).or_insert_with(|| {
            debug!(room = room_id, "Creating room bucket");
            Room::new()
        });

        debug!(
            connection = %handle.id(),
            room = room_id,
            members = room.len() + 1,
            "Connection registered"
        );
        room.insert(handle);

        // The joining connection receives its own join notification.
        self.fan_out(&join);
    }

    fn unregister(&mut self, id: ConnectionId, room_id: i64) {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        let Some(handle) = room.remove(id) else {
            return;
        };

        debug!(
            connection = %id,
            room = room_id,
            remaining = room.len(),
            "Connection unregistered"
        );

        if room.is_empty() {
            self.rooms.remove(&room_id);
            debug!(room = room_id, "Room drained, removing bucket");
        }

        let leave = WireMessage::leave(room_id, handle.user_id, handle.username.clone());

        // Dropping the handle closes the outbound queue, which tells the
        // connection's writer to send a close frame and stop.
        drop(handle);

        self.fan_out(&leave);
    }

    async fn broadcast(&mut self, mut message: WireMessage) {
        if message.is_chat() {
            message.created_at = Some(self.persist(&message).await);
        }

        self.fan_out(&message);
    }

    /// Persist a chat message under the configured deadline.
    ///
    /// Persistence is best-effort: a failed or slow write is logged and the
    /// message is delivered anyway, stamped with the broadcast time.
    async fn persist(&self, message: &WireMessage) -> DateTime<Utc> {
        let record = NewMessage {
            room_id: message.room_id,
            user_id: message.user_id,
            username: message.username.clone(),
            content: message.content.clone(),
        };

        match tokio::time::timeout(self.config.persist_timeout, self.store.append(record)).await {
            Ok(Ok(stored)) => stored.created_at,
            Ok(Err(e)) => {
                warn!(room = message.room_id, error = %e, "Failed to persist message");
                Utc::now()
            }
            Err(_) => {
                warn!(
                    room = message.room_id,
                    timeout_ms = self.config.persist_timeout.as_millis() as u64,
                    "Message persistence timed out"
                );
                Utc::now()
            }
        }
    }

    /// Serialize a message once and offer it to every connection in its room.
    ///
    /// Recipients whose queue is full are evicted on the spot so one slow
    /// consumer never stalls delivery to the rest of the room.
    fn fan_out(&mut self, message: &WireMessage) {
        let room_id = message.room_id;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        let frame = match codec::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = room_id, error = %e, "Failed to encode message");
                return;
            }
        };

        let mut evicted = Vec::new();
        for handle in room.iter() {
            match handle.enqueue(frame.clone()) {
                EnqueueResult::Delivered => {}
                EnqueueResult::Full => {
                    warn!(
                        connection = %handle.id(),
                        room = room_id,
                        "Outbound queue full, evicting connection"
                    );
                    evicted.push(handle.id());
                }
                EnqueueResult::Closed => {
                    evicted.push(handle.id());
                }
            }
        }

        for id in evicted {
            room.remove(id);
            self.evictions += 1;
        }

        trace!(room = room_id, recipients = room.len(), "Broadcast message");

        if room.is_empty() {
            self.rooms.remove(&room_id);
            debug!(room = room_id, "Room drained, removing bucket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError, StoredMessage};
    use async_trait::async_trait;
    use banter_protocol::MessageKind;
    use bytes::Bytes;

    fn connection(
        user_id: i64,
        username: &str,
        room_id: i64,
        capacity: usize,
    ) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(user_id, username, room_id, tx), rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<Bytes>) -> WireMessage {
        let frame = rx.recv().await.expect("expected a frame");
        codec::decode(&frame).expect("frame should decode")
    }

    #[tokio::test]
    async fn test_register_broadcasts_join_to_whole_room() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        let (bob, mut bob_rx) = connection(2, "bob", 7, 16);

        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();
        assert_eq!(hub.room_count(7).await.unwrap(), 2);

        // The joiner itself receives the join notification.
        let msg = next_message(&mut alice_rx).await;
        assert_eq!(msg.kind, MessageKind::Join);
        assert_eq!(msg.content, "alice joined the room");

        let msg = next_message(&mut alice_rx).await;
        assert_eq!(msg.content, "bob joined the room");

        let msg = next_message(&mut bob_rx).await;
        assert_eq!(msg.kind, MessageKind::Join);
        assert_eq!(msg.username, "bob");
    }

    #[tokio::test]
    async fn test_chat_broadcast_persists_and_delivers() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::spawn(store.clone(), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        let (bob, mut bob_rx) = connection(2, "bob", 7, 16);
        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();

        hub.broadcast(WireMessage::chat(7, 1, "alice", "hello"))
            .await
            .unwrap();

        // Skip the join notifications.
        next_message(&mut alice_rx).await;
        next_message(&mut alice_rx).await;
        next_message(&mut bob_rx).await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let msg = next_message(rx).await;
            assert_eq!(msg.kind, MessageKind::Message);
            assert_eq!(msg.content, "hello");
            assert_eq!(msg.user_id, 1);
            assert!(msg.created_at.is_some());
        }

        let records = store.recent(7, 100).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].room_id, 7);
        assert_eq!(records[0].user_id, 1);
        assert_eq!(records[0].content, "hello");
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::spawn(store.clone(), HubConfig::default());

        hub.broadcast(WireMessage::chat(7, 1, "alice", "anyone there?"))
            .await
            .unwrap();

        assert_eq!(hub.room_count(7).await.unwrap(), 0);
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.room_count, 0);
        assert_eq!(stats.connection_count, 0);

        // The chat record is still persisted; only delivery is skipped.
        assert_eq!(store.recent(7, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_preserves_broadcast_order() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        hub.register(alice).await.unwrap();

        for i in 0..5 {
            hub.broadcast(WireMessage::chat(7, 1, "alice", format!("m{i}")))
                .await
                .unwrap();
        }

        next_message(&mut alice_rx).await; // join
        for i in 0..5 {
            assert_eq!(next_message(&mut alice_rx).await.content, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_without_stalling_room() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        // Alice's queue holds two frames; both join notifications fill it.
        let (alice, mut alice_rx) = connection(1, "alice", 7, 2);
        let (bob, mut bob_rx) = connection(2, "bob", 7, 256);
        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();

        hub.broadcast(WireMessage::chat(7, 2, "bob", "too fast for alice"))
            .await
            .unwrap();

        // Alice was evicted; bob still got the message.
        assert_eq!(hub.room_count(7).await.unwrap(), 1);
        assert_eq!(hub.stats().await.unwrap().evictions, 1);

        next_message(&mut bob_rx).await; // bob's own join
        assert_eq!(next_message(&mut bob_rx).await.content, "too fast for alice");

        // Alice's queue still holds the frames that fit, then closes.
        next_message(&mut alice_rx).await;
        next_message(&mut alice_rx).await;
        assert!(alice_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_last_connection_removes_room() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        let (alice, _alice_rx) = connection(1, "alice", 7, 16);
        let alice_id = alice.id();
        hub.register(alice).await.unwrap();
        assert_eq!(hub.room_count(7).await.unwrap(), 1);

        hub.unregister(alice_id, 7).await.unwrap();
        assert_eq!(hub.room_count(7).await.unwrap(), 0);
        assert_eq!(hub.stats().await.unwrap().room_count, 0);

        // Re-registering recreates the bucket.
        let (alice_again, _rx) = connection(1, "alice", 7, 16);
        hub.register(alice_again).await.unwrap();
        assert_eq!(hub.room_count(7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unregister_broadcasts_leave_and_closes_queue() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        let (bob, mut bob_rx) = connection(2, "bob", 7, 16);
        let alice_id = alice.id();
        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();

        hub.unregister(alice_id, 7).await.unwrap();

        // Alice got both joins, then her queue closed without a leave.
        next_message(&mut alice_rx).await;
        next_message(&mut alice_rx).await;
        assert!(alice_rx.recv().await.is_none());

        next_message(&mut bob_rx).await; // bob's join
        let msg = next_message(&mut bob_rx).await;
        assert_eq!(msg.kind, MessageKind::Leave);
        assert_eq!(msg.content, "alice left the room");
    }

    #[tokio::test]
    async fn test_unregister_absent_connection_is_noop() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        let (bob, _bob_rx) = connection(2, "bob", 7, 16);
        let bob_id = bob.id();
        hub.register(alice).await.unwrap();
        hub.register(bob).await.unwrap();

        hub.unregister(bob_id, 7).await.unwrap();
        hub.unregister(bob_id, 7).await.unwrap();

        next_message(&mut alice_rx).await; // alice's join
        next_message(&mut alice_rx).await; // bob's join
        let msg = next_message(&mut alice_rx).await;
        assert_eq!(msg.kind, MessageKind::Leave);

        // The second unregister produced no second leave.
        assert_eq!(hub.room_count(7).await.unwrap(), 1);
        assert!(alice_rx.try_recv().is_err());
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(&self, _message: NewMessage) -> Result<StoredMessage, StoreError> {
            Err(StoreError::Backend("disk on fire".to_string()))
        }

        async fn recent(
            &self,
            _room_id: i64,
            _limit: usize,
        ) -> Result<Vec<StoredMessage>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_block_delivery() {
        let hub = Hub::spawn(Arc::new(FailingStore), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        hub.register(alice).await.unwrap();

        hub.broadcast(WireMessage::chat(7, 1, "alice", "still delivered"))
            .await
            .unwrap();

        next_message(&mut alice_rx).await; // join
        let msg = next_message(&mut alice_rx).await;
        assert_eq!(msg.content, "still delivered");
        assert!(msg.created_at.is_some());
    }

    struct StallingStore;

    #[async_trait]
    impl MessageStore for StallingStore {
        async fn append(&self, _message: NewMessage) -> Result<StoredMessage, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(StoreError::Backend("unreachable".to_string()))
        }

        async fn recent(
            &self,
            _room_id: i64,
            _limit: usize,
        ) -> Result<Vec<StoredMessage>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_deadline_does_not_block_delivery() {
        let hub = Hub::spawn(Arc::new(StallingStore), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        hub.register(alice).await.unwrap();

        hub.broadcast(WireMessage::chat(7, 1, "alice", "slow store"))
            .await
            .unwrap();

        next_message(&mut alice_rx).await; // join
        let msg = next_message(&mut alice_rx).await;
        assert_eq!(msg.content, "slow store");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = Hub::spawn(Arc::new(MemoryStore::new()), HubConfig::default());

        let (alice, mut alice_rx) = connection(1, "alice", 7, 16);
        let (carol, mut carol_rx) = connection(3, "carol", 8, 16);
        hub.register(alice).await.unwrap();
        hub.register(carol).await.unwrap();

        hub.broadcast(WireMessage::chat(7, 1, "alice", "room 7 only"))
            .await
            .unwrap();

        next_message(&mut alice_rx).await; // join
        assert_eq!(next_message(&mut alice_rx).await.content, "room 7 only");

        next_message(&mut carol_rx).await; // join
        assert!(carol_rx.try_recv().is_err());
    }
}
