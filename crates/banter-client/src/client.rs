//! WebSocket chat client.
//!
//! [`run`] owns the connection for its whole lifetime: it authenticates
//! against the upgrade endpoint, pumps decoded chat events to the caller,
//! sends the caller's outgoing text, and drives the reconnect state machine
//! across disconnects.

use crate::reconnect::{ConnEvent, ConnState, ReconnectPolicy};
use banter_protocol::{codec, WireMessage};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint or token could not be turned into an upgrade request.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Every reconnection attempt failed; the client has given up.
    #[error("Gave up after {0} reconnection attempts")]
    RetriesExhausted(u32),
}

/// Configuration for a chat client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upgrade endpoint, e.g. `ws://localhost:8080/v1/rooms/7/ws`.
    pub endpoint: String,
    /// Bearer token presented to the authorization gate.
    pub token: String,
    /// Reconnect policy.
    pub reconnect: ReconnectPolicy,
}

/// How a live session ended.
enum SessionEnd {
    /// The caller dropped its sending channel; shut down cleanly.
    CallerClosed,
    /// The server closed the connection or the transport failed.
    ConnectionLost,
}

/// Run a chat session until the caller hangs up or retries are exhausted.
///
/// Outgoing text messages are read from `outgoing`; every decoded event
/// received from the server is forwarded to `incoming`. Returns `Ok(())`
/// when the caller closes the `outgoing` channel.
///
/// # Errors
///
/// Returns an error if the endpoint is invalid or the reconnect budget is
/// spent without re-establishing a connection.
pub async fn run(
    config: ClientConfig,
    mut outgoing: mpsc::Receiver<String>,
    incoming: mpsc::Sender<WireMessage>,
) -> Result<(), ClientError> {
    // Reject a hopeless endpoint before spending the retry budget on it.
    config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))?;

    let policy = config.reconnect.clone();
    let mut state = ConnState::Disconnected.step(ConnEvent::Open, &policy);
    let mut stream: Option<WsStream> = None;

    loop {
        state = match state {
            ConnState::Disconnected => {
                return Err(ClientError::RetriesExhausted(policy.max_attempts));
            }

            ConnState::Connecting { attempt } => match connect(&config).await {
                Ok(ws) => {
                    if attempt > 0 {
                        info!(attempt, "Reconnected");
                    }
                    stream = Some(ws);
                    state.step(ConnEvent::Established, &policy)
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Connection attempt failed");
                    state.step(ConnEvent::Lost, &policy)
                }
            },

            ConnState::Connected => match stream.take() {
                Some(ws) => match session(ws, &mut outgoing, &incoming).await {
                    SessionEnd::CallerClosed => return Ok(()),
                    SessionEnd::ConnectionLost => state.step(ConnEvent::Lost, &policy),
                },
                // Connected is only ever entered with a live stream in hand.
                None => state.step(ConnEvent::Lost, &policy),
            },

            ConnState::Reconnecting { attempt } => {
                debug!(attempt, delay_ms = policy.delay.as_millis() as u64, "Waiting to reconnect");
                tokio::time::sleep(policy.delay).await;
                state.step(ConnEvent::RetryElapsed, &policy)
            }
        };
    }
}

/// Open the WebSocket with the bearer token attached.
async fn connect(config: &ClientConfig) -> Result<WsStream, WsError> {
    let mut request = config.endpoint.as_str().into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .map_err(|e| WsError::HttpFormat(e.into()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _response) = connect_async(request).await?;
    debug!(endpoint = %config.endpoint, "Connected");
    Ok(stream)
}

/// Pump one live connection until it ends.
async fn session(
    ws: WsStream,
    outgoing: &mut mpsc::Receiver<String>,
    incoming: &mpsc::Sender<WireMessage>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            out = outgoing.recv() => {
                let Some(text) = out else {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::CallerClosed;
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return SessionEnd::ConnectionLost;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(end) = forward(text.as_bytes(), incoming).await {
                        return end;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Err(end) = forward(&data, incoming).await {
                        return end;
                    }
                }
                // Keepalive pings are answered by the underlying stream.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!("Server closed the connection");
                    return SessionEnd::ConnectionLost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket error");
                    return SessionEnd::ConnectionLost;
                }
                None => return SessionEnd::ConnectionLost,
            }
        }
    }
}

/// Decode a (possibly coalesced) frame and forward each event to the caller.
///
/// A malformed frame is dropped; the session continues.
async fn forward(data: &[u8], incoming: &mpsc::Sender<WireMessage>) -> Result<(), SessionEnd> {
    match codec::decode_lines(data) {
        Ok(messages) => {
            for message in messages {
                if incoming.send(message).await.is_err() {
                    return Err(SessionEnd::CallerClosed);
                }
            }
            Ok(())
        }
        Err(e) => {
            debug!(error = %e, "Discarding malformed frame");
            Ok(())
        }
    }
}
