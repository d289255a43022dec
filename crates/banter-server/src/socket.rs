//! Per-connection reader and writer pumps.
//!
//! Each authorized connection runs exactly two tasks: a reader that owns the
//! receiving half of the socket and a writer that owns the sending half.
//! Neither touches the room registry; the reader submits hub requests and
//! the writer drains the outbound queue the hub enqueues into. Closing that
//! queue is the writer's only termination signal, and socket closure is the
//! reader's.

use crate::config::HeartbeatConfig;
use crate::metrics;
use axum::extract::ws::{Message, WebSocket};
use banter_core::{ConnectionHandle, HubHandle};
use banter_protocol::{codec, WireMessage};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Identity attached to a connection once it has passed the gate.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub room_id: i64,
}

/// Run one WebSocket connection to completion.
///
/// Registers with the hub, spawns the writer, then runs the reader in place.
/// When the reader exits its sole cleanup is unregistering; the hub tears
/// the outbound queue down, which in turn stops the writer.
pub async fn serve_connection(
    socket: WebSocket,
    hub: HubHandle,
    identity: Identity,
    heartbeat: HeartbeatConfig,
    outbound_capacity: usize,
) {
    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_capacity);

    let handle = ConnectionHandle::new(
        identity.user_id,
        identity.username.clone(),
        identity.room_id,
        outbound_tx,
    );
    let connection_id = handle.id();

    if hub.register(handle).await.is_err() {
        warn!(connection = %connection_id, "Hub unavailable, dropping connection");
        return;
    }

    debug!(
        connection = %connection_id,
        user = identity.user_id,
        room = identity.room_id,
        "Connection established"
    );

    let writer = tokio::spawn(write_pump(sink, outbound_rx, heartbeat.clone()));

    read_pump(stream, &hub, &identity, heartbeat.pong_wait()).await;

    let _ = hub.unregister(connection_id, identity.room_id).await;
    let _ = writer.await;

    debug!(connection = %connection_id, "Connection closed");
}

/// Pump inbound frames from the socket to the hub.
///
/// The read deadline is re-armed only by pongs from the peer; a silent
/// connection is treated as dead once it expires.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    hub: &HubHandle,
    identity: &Identity,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                debug!(user = identity.user_id, "Read deadline expired");
                break;
            }
        };

        let content = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    // A malformed frame is dropped; the connection lives on.
                    debug!(user = identity.user_id, "Discarding malformed frame");
                    continue;
                }
            },
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + pong_wait;
                continue;
            }
            // The pong reply is produced by the underlying stream.
            Some(Ok(Message::Ping(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                debug!(user = identity.user_id, "Received close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(user = identity.user_id, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            None => {
                debug!(user = identity.user_id, "WebSocket stream ended");
                break;
            }
        };

        metrics::record_message(content.len(), "inbound");

        let message = WireMessage::chat(
            identity.room_id,
            identity.user_id,
            identity.username.clone(),
            content,
        );
        if hub.broadcast(message).await.is_err() {
            break;
        }
    }
}

/// Pump the outbound queue to the socket and keep the liveness probe going.
///
/// A write failure terminates the writer without notifying the hub; the
/// reader side observes the broken socket and triggers unregistration.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    heartbeat: HeartbeatConfig,
) {
    let write_wait = heartbeat.write_wait();
    let period = heartbeat.ping_period();
    let mut ping = interval_at(Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Queue closed by the hub: say goodbye and stop.
                    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
                    return;
                };

                // Batch whatever else is already queued into the same
                // outgoing frame before flushing.
                let mut frames = vec![frame];
                while let Ok(next) = outbound.try_recv() {
                    frames.push(next);
                }
                let payload = codec::coalesce(&frames);

                metrics::record_message(payload.len(), "outbound");

                let text = String::from_utf8_lossy(&payload).into_owned();
                match timeout(write_wait, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "Write failed");
                        return;
                    }
                    Err(_) => {
                        debug!("Write deadline expired");
                        return;
                    }
                }
            }

            _ = ping.tick() => {
                if timeout(write_wait, sink.send(Message::Ping(Vec::new())))
                    .await
                    .map_or(true, |sent| sent.is_err())
                {
                    debug!("Liveness probe failed");
                    return;
                }
            }
        }
    }
}
