//! PostgreSQL-backed durable store for users and session histories.

use async_trait::async_trait;
use chrono::Utc;
use colloquy_conversation::{DurableStore, Message, StoreError};
use colloquy_core::{SessionId, UserId};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for history queries.
#[derive(FromRow)]
struct HistoryRow {
    messages: Option<serde_json::Value>,
}

impl HistoryRow {
    fn try_into_messages(self, session: SessionId) -> Result<Vec<Message>, StoreError> {
        let value = self.messages.ok_or(StoreError::NotFound {
            session_id: session,
        })?;
        serde_json::from_value(value).map_err(|e| StoreError::InvalidData {
            reason: format!("history of session '{session}': {e}"),
        })
    }
}

/// Row type for session listing.
#[derive(FromRow)]
struct SessionIdRow {
    id: String,
}

impl SessionIdRow {
    fn try_into_id(self) -> Result<SessionId, StoreError> {
        SessionId::from_str(&self.id).map_err(|e| StoreError::InvalidData {
            reason: format!("invalid session id '{}': {}", self.id, e),
        })
    }
}

/// Durable store over the `users` and `sessions` tables.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(e)
}

#[async_trait]
impl DurableStore for PgSessionStore {
    async fn exists(&self, session: SessionId) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sessions WHERE id = $1 AND messages IS NOT NULL
            )
            "#,
        )
        .bind(session.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(exists)
    }

    async fn load(&self, session: SessionId) -> Result<Vec<Message>, StoreError> {
        let row: Option<HistoryRow> = sqlx::query_as(
            r#"
            SELECT messages
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(session.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        match row {
            Some(r) => r.try_into_messages(session),
            None => Err(StoreError::NotFound {
                session_id: session,
            }),
        }
    }

    async fn initialize(&self, session: SessionId) -> Result<(), StoreError> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sessions (id, messages, created_at, updated_at)
            VALUES ($1, '[]'::jsonb, $2, $2)
            ON CONFLICT (id)
            DO UPDATE SET messages = COALESCE(sessions.messages, '[]'::jsonb), updated_at = $2
            "#,
        )
        .bind(session.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn save(&self, session: SessionId, messages: &[Message]) -> Result<(), StoreError> {
        let now = Utc::now();
        let history = serde_json::to_value(messages).map_err(|e| StoreError::InvalidData {
            reason: format!("history of session '{session}': {e}"),
        })?;

        // One statement: the previous history stays intact if it fails.
        sqlx::query(
            r#"
            INSERT INTO sessions (id, messages, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id)
            DO UPDATE SET messages = $2, updated_at = $3
            "#,
        )
        .bind(session.to_string())
        .bind(&history)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn create_user(&self) -> Result<UserId, StoreError> {
        let id = UserId::new();

        sqlx::query(
            r#"
            INSERT INTO users (id, created_at)
            VALUES ($1, $2)
            "#,
        )
        .bind(id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(id)
    }

    async fn user_exists(&self, user: UserId) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
                .bind(user.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(unavailable)?;

        Ok(exists)
    }

    async fn link_session(&self, user: UserId, session: SessionId) -> Result<(), StoreError> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (id)
            DO UPDATE SET user_id = $2, updated_at = $3
            "#,
        )
        .bind(session.to_string())
        .bind(user.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn list_sessions(&self, user: UserId) -> Result<Vec<SessionId>, StoreError> {
        let rows: Vec<SessionIdRow> = sqlx::query_as(
            r#"
            SELECT id
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(SessionIdRow::try_into_id).collect()
    }
}
