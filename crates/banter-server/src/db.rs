//! Postgres-backed storage.
//!
//! One pool serves both roles the chat hub needs from the database: the
//! append-only message history and the membership/identity lookups behind
//! the authorization gate. Chat records store only ids and content; the
//! sender's display name is joined from `users` at read time.

use crate::auth::Directory;
use async_trait::async_trait;
use banter_core::{MessageStore, NewMessage, StoreError, StoredMessage};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

/// Postgres store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and build a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        debug!(max_connections, "Database pool created");
        Ok(Self { pool })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let row = sqlx::query(
            "INSERT INTO messages (room_id, user_id, content) \
             VALUES ($1, $2, $3) RETURNING id, created_at",
        )
        .bind(message.room_id)
        .bind(message.user_id)
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(StoredMessage {
            id: row.try_get("id").map_err(backend)?,
            created_at: row.try_get("created_at").map_err(backend)?,
            room_id: message.room_id,
            user_id: message.user_id,
            username: message.username,
            content: message.content,
        })
    }

    async fn recent(&self, room_id: i64, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT m.id, m.room_id, m.user_id, m.content, u.username, m.created_at \
             FROM messages m \
             INNER JOIN users u ON m.user_id = u.id \
             WHERE m.room_id = $1 \
             ORDER BY m.created_at DESC \
             LIMIT $2",
        )
        .bind(room_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut messages = rows
            .into_iter()
            .map(|row| {
                Ok(StoredMessage {
                    id: row.try_get("id")?,
                    room_id: row.try_get("room_id")?,
                    user_id: row.try_get("user_id")?,
                    content: row.try_get("content")?,
                    username: row.try_get("username")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend)?;

        // Queried newest-first to apply the limit; flip to chronological.
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM room_members WHERE room_id = $1 AND user_id = $2)",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn display_name(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }
}
