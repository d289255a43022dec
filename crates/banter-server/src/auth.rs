//! Authorization gate for the upgrade and history endpoints.
//!
//! Two checks run before any connection state exists: the caller's bearer
//! token must verify, and the caller must be a member of the target room.
//! Token issuance lives elsewhere; this module only verifies.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use banter_core::StoreError;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authorization failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Missing, malformed, or expired credential.
    #[error("Missing or invalid credential")]
    Unauthenticated,

    /// Authenticated, but not a member of the target room.
    #[error("You must join the room first")]
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Claims carried in a bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user ID.
    pub user_id: i64,
    /// Expiry (seconds since epoch).
    pub exp: i64,
    /// Issued-at (seconds since epoch).
    pub iat: i64,
}

/// Extract the bearer token from the `Authorization` header.
///
/// # Errors
///
/// Returns `Unauthenticated` if the header is missing or malformed.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Unauthenticated)?
        .to_str()
        .map_err(|_| AuthError::Unauthenticated)?;

    match value.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::Unauthenticated),
    }
}

/// Verify a bearer token and return the authenticated user ID.
///
/// # Errors
///
/// Returns `Unauthenticated` for any signature, format, or expiry problem.
pub fn validate_token(token: &str, secret: &str) -> Result<i64, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::Unauthenticated)?;

    Ok(data.claims.user_id)
}

/// Membership and identity lookups backing the gate.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Check whether a user has joined a room.
    async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, StoreError>;

    /// Look up a user's display name.
    async fn display_name(&self, user_id: i64) -> Result<Option<String>, StoreError>;
}

/// Directory for database-less runs: every authenticated user is treated as
/// a member of every room, with a derived display name.
pub struct OpenDirectory;

#[async_trait]
impl Directory for OpenDirectory {
    async fn is_member(&self, _room_id: i64, _user_id: i64) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn display_name(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(Some(format!("user-{user_id}")))
    }
}
