//! # banter-client
//!
//! Reconnecting WebSocket client for the banter chat hub.
//!
//! The client presents a bearer token to the server's upgrade endpoint,
//! forwards decoded chat events to the caller over a channel, and rides out
//! disconnects with a fixed-delay, bounded-attempt reconnect loop:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected
//!                     ▲  │            │ close/error
//!        retry delay  │  ▼            ▼
//!                  Reconnecting ◀─────┘
//!                     │ attempts exhausted
//!                     ▼
//!                 Disconnected (terminal)
//! ```

pub mod client;
pub mod reconnect;

pub use client::{run, ClientConfig, ClientError};
pub use reconnect::{ConnEvent, ConnState, ReconnectPolicy};
