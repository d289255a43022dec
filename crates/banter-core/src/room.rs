//! Room buckets.
//!
//! A `Room` is the set of connections currently registered to one room
//! identifier. Buckets are ephemeral runtime groupings: the hub creates one
//! on the first registration and deletes it the moment it drains, so a room
//! id appears in the registry iff at least one connection is registered.

use crate::connection::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;

/// The set of connections registered to one room.
#[derive(Debug, Default)]
pub struct Room {
    members: HashMap<ConnectionId, ConnectionHandle>,
}

impl Room {
    /// Create an empty room bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no registered connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is registered to this room.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Add a connection to the room.
    pub fn insert(&mut self, handle: ConnectionHandle) {
        self.members.insert(handle.id(), handle);
    }

    /// Remove a connection from the room.
    ///
    /// Returns the removed handle, if it was registered. Dropping the
    /// returned handle closes the connection's outbound queue.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.members.remove(&id)
    }

    /// Iterate over the registered connection handles.
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.members.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle(user_id: i64) -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(1);
        ConnectionHandle::new(user_id, format!("user-{user_id}"), 7, tx)
    }

    #[tokio::test]
    async fn test_room_insert_remove() {
        let mut room = Room::new();
        assert!(room.is_empty());

        let first = handle(1);
        let first_id = first.id();
        room.insert(first);
        room.insert(handle(2));

        assert_eq!(room.len(), 2);
        assert!(room.contains(first_id));

        assert!(room.remove(first_id).is_some());
        assert_eq!(room.len(), 1);
        assert!(!room.contains(first_id));

        // Removing an absent connection
        assert!(room.remove(first_id).is_none());
    }
}
