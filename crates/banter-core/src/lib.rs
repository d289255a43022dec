//! # banter-core
//!
//! Room registry, hub event loop, and connection handles for the banter
//! chat hub.
//!
//! This crate provides the coordination layer:
//!
//! - **Hub** - single event loop owning the room registry and fanning
//!   messages out to room members
//! - **Room** - the set of connections currently registered to one room
//! - **ConnectionHandle** - the hub's view of a live connection and its
//!   bounded outbound queue
//! - **MessageStore** - contract for the durable chat history backend
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ register/    ┌─────────────┐    ┌─────────────┐
//! │  Connection │ broadcast ──▶│     Hub     │───▶│    Room     │
//! └─────────────┘              └─────────────┘    └─────────────┘
//!        ▲                            │                  │
//!        │   outbound queues          │persist           │fan-out
//!        └────────────────────────────┼──────────────────┘
//!                                     ▼
//!                              ┌─────────────┐
//!                              │MessageStore │
//!                              └─────────────┘
//! ```
//!
//! Only the hub's event loop ever touches the registry, so no lock is
//! needed on it; everything else communicates with the hub by message
//! passing.

pub mod connection;
pub mod hub;
pub mod room;
pub mod store;

pub use connection::{ConnectionHandle, ConnectionId, EnqueueResult, OUTBOUND_QUEUE_CAPACITY};
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats};
pub use room::Room;
pub use store::{MemoryStore, MessageStore, NewMessage, StoreError, StoredMessage};
