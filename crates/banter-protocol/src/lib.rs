//! # banter-protocol
//!
//! Wire message schema and codec for the banter chat hub.
//!
//! A single JSON object shape is used both over the WebSocket and for
//! persisted chat records:
//!
//! ```json
//! { "room_id": 7, "user_id": 42, "username": "alice",
//!   "content": "hello", "type": "message",
//!   "created_at": "2026-08-06T12:00:00Z" }
//! ```
//!
//! `type` is one of `message`, `join`, `leave`; `created_at` is present
//! for `message` events only.
//!
//! ## Example
//!
//! ```rust
//! use banter_protocol::{codec, WireMessage};
//!
//! let msg = WireMessage::chat(7, 42, "alice", "hello");
//! let encoded = codec::encode(&msg).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(msg.content, decoded.content);
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, ProtocolError};
pub use message::{MessageKind, WireMessage};
