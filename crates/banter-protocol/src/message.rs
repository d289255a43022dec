//! Chat event types for the banter wire protocol.
//!
//! Every event flowing through a room is one of these messages. The same
//! shape is used for live delivery and for persisted history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A user-authored chat message. The only kind that is persisted.
    Message,
    /// Synthetic notification that a user joined the room.
    Join,
    /// Synthetic notification that a user left the room.
    Leave,
}

/// A chat event as it appears on the wire.
///
/// Immutable once built; the hub serializes a message exactly once per
/// broadcast and fans the encoded bytes out to every recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Room the event belongs to.
    pub room_id: i64,
    /// Sender's user ID.
    pub user_id: i64,
    /// Sender's display name.
    pub username: String,
    /// Message body. For join/leave events this is a synthetic notice.
    pub content: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Assigned at persistence time; chat messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireMessage {
    /// Create a user-authored chat message.
    ///
    /// `created_at` starts out unset; the hub fills it in once the
    /// message has been persisted.
    #[must_use]
    pub fn chat(
        room_id: i64,
        user_id: i64,
        username: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            room_id,
            user_id,
            username: username.into(),
            content: content.into(),
            kind: MessageKind::Message,
            created_at: None,
        }
    }

    /// Create a synthetic join notification for a room.
    #[must_use]
    pub fn join(room_id: i64, user_id: i64, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            room_id,
            user_id,
            content: format!("{username} joined the room"),
            username,
            kind: MessageKind::Join,
            created_at: None,
        }
    }

    /// Create a synthetic leave notification for a room.
    #[must_use]
    pub fn leave(room_id: i64, user_id: i64, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            room_id,
            user_id,
            content: format!("{username} left the room"),
            username,
            kind: MessageKind::Leave,
            created_at: None,
        }
    }

    /// Whether this is a user-authored chat message.
    #[must_use]
    pub fn is_chat(&self) -> bool {
        self.kind == MessageKind::Message
    }

    /// Set the persistence timestamp.
    #[must_use]
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message() {
        let msg = WireMessage::chat(7, 42, "alice", "hello");
        assert_eq!(msg.room_id, 7);
        assert_eq!(msg.user_id, 42);
        assert!(msg.is_chat());
        assert!(msg.created_at.is_none());
    }

    #[test]
    fn test_join_leave_content() {
        let join = WireMessage::join(7, 42, "alice");
        assert_eq!(join.content, "alice joined the room");
        assert_eq!(join.kind, MessageKind::Join);

        let leave = WireMessage::leave(7, 42, "alice");
        assert_eq!(leave.content, "alice left the room");
        assert_eq!(leave.kind, MessageKind::Leave);
    }

    #[test]
    fn test_kind_tags() {
        let json = serde_json::to_string(&WireMessage::chat(1, 2, "bob", "hi")).unwrap();
        assert!(json.contains(r#""type":"message""#));

        let json = serde_json::to_string(&WireMessage::join(1, 2, "bob")).unwrap();
        assert!(json.contains(r#""type":"join""#));

        let json = serde_json::to_string(&WireMessage::leave(1, 2, "bob")).unwrap();
        assert!(json.contains(r#""type":"leave""#));
    }

    #[test]
    fn test_created_at_serialized_only_when_present() {
        let join = WireMessage::join(1, 2, "bob");
        let json = serde_json::to_string(&join).unwrap();
        assert!(!json.contains("created_at"));

        let chat = WireMessage::chat(1, 2, "bob", "hi").with_created_at(Utc::now());
        let json = serde_json::to_string(&chat).unwrap();
        assert!(json.contains("created_at"));
    }
}
