//! HTTP handlers and server assembly.
//!
//! The upgrade endpoint runs the full authorization gate before any
//! connection state exists; the history endpoint runs the same gate minus
//! the display-name lookup.

use crate::auth::{self, AuthError, Directory};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::socket::{self, Identity};
use anyhow::Result;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use banter_core::{HubHandle, MessageStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Chat history backend.
    pub store: Arc<dyn MessageStore>,
    /// Membership and identity lookups for the gate.
    pub directory: Arc<dyn Directory>,
    /// Server configuration.
    pub config: Config,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    // Start metrics server if enabled
    if state.config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(state.config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = state.config.bind_addr();
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;

    info!("banter server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/v1/rooms/{{room_id}}/ws", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router.
fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health_handler))
        .route("/v1/rooms/:room_id/ws", get(ws_handler))
        .route("/v1/rooms/:room_id/messages", get(history_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn internal_error(context: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": context })),
    )
        .into_response()
}

/// Authenticate the caller and verify room membership.
async fn require_member(
    state: &AppState,
    headers: &HeaderMap,
    room_id: i64,
) -> Result<i64, Response> {
    let token = auth::bearer_token(headers).map_err(IntoResponse::into_response)?;
    let user_id = auth::validate_token(token, &state.config.auth.jwt_secret)
        .map_err(IntoResponse::into_response)?;

    let is_member = state
        .directory
        .is_member(room_id, user_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to verify room membership");
            internal_error("failed to verify room membership")
        })?;

    if !is_member {
        warn!(user = user_id, room = room_id, "Rejected non-member");
        return Err(AuthError::Forbidden.into_response());
    }

    Ok(user_id)
}

/// WebSocket upgrade handler.
///
/// GET /v1/rooms/{room_id}/ws
///
/// The caller must be authenticated and a member of the room; only then is
/// the transport upgraded and the connection registered with the hub.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let user_id = match require_member(&state, &headers, room_id).await {
        Ok(user_id) => user_id,
        Err(rejection) => return rejection,
    };

    let username = match state.directory.display_name(user_id).await {
        Ok(Some(username)) => username,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "user not found" })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to retrieve user");
            return internal_error("failed to retrieve user");
        }
    };

    let identity = Identity {
        user_id,
        username,
        room_id,
    };
    info!(user = user_id, room = room_id, "WebSocket connection authorized");

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            let _guard = ConnectionMetricsGuard::new();

            socket::serve_connection(
                socket,
                state.hub.clone(),
                identity,
                state.config.heartbeat.clone(),
                state.config.limits.outbound_queue,
            )
            .await;

            if let Ok(stats) = state.hub.stats().await {
                metrics::set_active_rooms(stats.room_count);
                metrics::set_evictions(stats.evictions);
            }
        })
}

/// Message history handler.
///
/// GET /v1/rooms/{room_id}/messages
///
/// Returns the most recent records for the room in chronological order.
async fn history_handler(
    Path(room_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_member(&state, &headers, room_id).await {
        return rejection;
    }

    match state
        .store
        .recent(room_id, state.config.persistence.history_limit)
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            error!(room = room_id, error = %e, "Failed to load message history");
            internal_error("failed to load message history")
        }
    }
}
