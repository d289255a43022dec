//! Connection handles for the hub.
//!
//! A `ConnectionHandle` is the hub's non-owning view of one live, room-scoped
//! connection: its identity plus the sending side of its bounded outbound
//! queue. The connection's writer task owns the receiving side and the socket
//! itself; the hub never touches either.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default capacity of a connection's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique identifier for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        // Combine timestamp with atomic counter for guaranteed uniqueness
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(timestamp.wrapping_add(counter))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{:x}", self.0)
    }
}

/// Outcome of a non-blocking enqueue onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The frame was queued for delivery.
    Delivered,
    /// The queue is full; the consumer is not keeping up.
    Full,
    /// The queue was closed; the connection is being torn down.
    Closed,
}

/// The hub's handle to one live connection.
///
/// The hub is the single producer on the outbound queue; the connection's
/// writer task is the single consumer. Dropping the handle closes the queue,
/// which is the writer's signal to terminate.
pub struct ConnectionHandle {
    id: ConnectionId,
    /// Authenticated user this connection belongs to.
    pub user_id: i64,
    /// Display name used in broadcast messages.
    pub username: String,
    /// The one room this connection is registered to for its lifetime.
    pub room_id: i64,
    outbound: mpsc::Sender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle around the sending side of a connection's outbound
    /// queue.
    #[must_use]
    pub fn new(
        user_id: i64,
        username: impl Into<String>,
        room_id: i64,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            user_id,
            username: username.into(),
            room_id,
            outbound,
        }
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Offer an encoded frame to the outbound queue without blocking.
    ///
    /// Overflow is reported, never resolved by waiting; the hub treats a
    /// full queue as an unresponsive consumer.
    pub fn enqueue(&self, frame: Bytes) -> EnqueueResult {
        match self.outbound.try_send(frame) {
            Ok(()) => EnqueueResult::Delivered,
            Err(TrySendError::Full(_)) => EnqueueResult::Full,
            Err(TrySendError::Closed(_)) => EnqueueResult::Closed,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}
