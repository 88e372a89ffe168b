//! Broker session repository
//!
//! At most one row per broker id, and in practice one row total: the active
//! broker. Both tokens are ciphertext; each carries its own nonce column.

use super::models::BrokerSessionRecord;
use super::DbPool;
use crate::domain::errors::Result;

pub struct SessionRepository {
    pool: DbPool,
}

/// Ciphertext fields for an upsert, produced by the vault
pub struct EncryptedSession<'a> {
    pub broker_id: &'a str,
    pub auth_token: String,
    pub auth_token_nonce: String,
    pub feed_token: Option<String>,
    pub feed_token_nonce: Option<String>,
    pub user_id: i64,
}

impl SessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, session: EncryptedSession<'_>) -> Result<()> {
        sqlx::query(
            "INSERT INTO broker_sessions
                (broker_id, auth_token, auth_token_nonce, feed_token, feed_token_nonce, user_id, authenticated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
             ON CONFLICT(broker_id) DO UPDATE SET
                auth_token = excluded.auth_token,
                auth_token_nonce = excluded.auth_token_nonce,
                feed_token = excluded.feed_token,
                feed_token_nonce = excluded.feed_token_nonce,
                user_id = excluded.user_id,
                authenticated_at = datetime('now')",
        )
        .bind(session.broker_id)
        .bind(&session.auth_token)
        .bind(&session.auth_token_nonce)
        .bind(&session.feed_token)
        .bind(&session.feed_token_nonce)
        .bind(session.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The current session row, if any. Single-active-broker model: the
    /// newest row wins and callers treat it as the only one.
    pub async fn load(&self) -> Result<Option<BrokerSessionRecord>> {
        let record = sqlx::query_as::<_, BrokerSessionRecord>(
            "SELECT * FROM broker_sessions ORDER BY authenticated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Delete every session row. Idempotent.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM broker_sessions")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
