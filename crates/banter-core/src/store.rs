//! Persistence contract for chat history.
//!
//! The hub appends chat-kind messages through this trait and the history
//! endpoint reads them back; connections never touch the store directly.
//! Join/leave notifications are not persisted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from a message store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A chat message to be appended to the store.
///
/// The display name is carried alongside so backends that join it from a
/// user table at read time can ignore it on write.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
}

/// A persisted chat record, joined with the sender's display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Durable append-only store for chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message, assigning its id and creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails the write.
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Fetch the most recent `limit` messages for a room, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails the read.
    async fn recent(&self, room_id: i64, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;
}

/// In-memory message store.
///
/// Used by tests and by server runs without a database configured. History
/// does not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    rooms: Mutex<HashMap<i64, Vec<StoredMessage>>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let stored = StoredMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            room_id: message.room_id,
            user_id: message.user_id,
            username: message.username,
            content: message.content,
            created_at: Utc::now(),
        };

        let mut rooms = self.rooms.lock().await;
        rooms.entry(stored.room_id).or_default().push(stored.clone());

        Ok(stored)
    }

    async fn recent(&self, room_id: i64, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let rooms = self.rooms.lock().await;
        let Some(messages) = rooms.get(&room_id) else {
            return Ok(Vec::new());
        };

        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(room_id: i64, content: &str) -> NewMessage {
        NewMessage {
            room_id,
            user_id: 42,
            username: "alice".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_assigns_id_and_timestamp() {
        let store = MemoryStore::new();

        let first = store.append(message(7, "one")).await.unwrap();
        let second = store.append(message(7, "two")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(first.created_at <= second.created_at);
    }

    #[tokio::test]
    async fn test_recent_returns_chronological_tail() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.append(message(7, &format!("m{i}"))).await.unwrap();
        }

        let recent = store.recent(7, 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_recent_unknown_room_is_empty() {
        let store = MemoryStore::new();
        assert!(store.recent(99, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let store = MemoryStore::new();
        store.append(message(1, "in room 1")).await.unwrap();
        store.append(message(2, "in room 2")).await.unwrap();

        let recent = store.recent(1, 100).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "in room 1");
    }
}
