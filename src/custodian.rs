//! Broker-Session Custodian
//!
//! Owns the single active broker session: encrypted persistence of its
//! tokens, the in-memory decrypted slot, and revocation. Also custodies
//! per-broker API credentials. Every token field is encrypted under its own
//! fresh nonce; the custodian serializes its read-modify-write cycles behind
//! one lock.

use crate::domain::errors::{CoreError, Result};
use crate::persistence::credentials::{CredentialRepository, EncryptedCredential};
use crate::persistence::sessions::{EncryptedSession, SessionRepository};
use crate::persistence::DbPool;
use crate::vault::Vault;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Decrypted active session held in memory
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub broker_id: String,
    #[serde(skip_serializing)]
    pub auth_token: String,
    #[serde(skip_serializing)]
    pub feed_token: Option<String>,
    pub user_id: i64,
    pub authenticated_at: DateTime<Utc>,
}

/// Decrypted broker credential
#[derive(Debug, Clone)]
pub struct BrokerCredential {
    pub broker_id: String,
    pub api_key: String,
    pub api_secret: Option<String>,
    pub client_id: Option<String>,
}

pub struct SessionCustodian {
    pool: DbPool,
    sessions: SessionRepository,
    credentials: CredentialRepository,
    vault: Arc<Vault>,
    /// Serializes every read-modify-write against the session row
    write_lock: tokio::sync::Mutex<()>,
    active: parking_lot::RwLock<Option<ActiveSession>>,
}

impl SessionCustodian {
    pub fn new(pool: DbPool, vault: Arc<Vault>) -> Self {
        Self {
            sessions: SessionRepository::new(pool.clone()),
            credentials: CredentialRepository::new(pool.clone()),
            pool,
            vault,
            write_lock: tokio::sync::Mutex::new(()),
            active: parking_lot::RwLock::new(None),
        }
    }

    /// Encrypt and persist a fresh broker session, making it the active one
    pub async fn save_session(
        &self,
        broker_id: &str,
        auth_token: &str,
        feed_token: Option<&str>,
        user_id: i64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let (auth_ct, auth_nonce) = self.vault.encrypt(auth_token)?;
        let (feed_ct, feed_nonce) = match feed_token {
            Some(token) => {
                let (ct, nonce) = self.vault.encrypt(token)?;
                (Some(ct), Some(nonce))
            }
            None => (None, None),
        };

        self.sessions
            .upsert(EncryptedSession {
                broker_id,
                auth_token: auth_ct,
                auth_token_nonce: auth_nonce,
                feed_token: feed_ct,
                feed_token_nonce: feed_nonce,
                user_id,
            })
            .await?;

        *self.active.write() = Some(ActiveSession {
            broker_id: broker_id.to_string(),
            auth_token: auth_token.to_string(),
            feed_token: feed_token.map(|t| t.to_string()),
            user_id,
            authenticated_at: Utc::now(),
        });

        info!("broker session saved for '{}'", broker_id);
        Ok(())
    }

    /// Load and decrypt the stored session, refreshing the in-memory slot.
    ///
    /// A tag mismatch means the row is damaged or the master key diverged;
    /// the row is cleared and `SessionCorrupted` surfaced so the operator
    /// re-authenticates. The ciphertext is never returned.
    pub async fn load_active_session(&self) -> Result<Option<ActiveSession>> {
        let _guard = self.write_lock.lock().await;

        let Some(row) = self.sessions.load().await? else {
            *self.active.write() = None;
            return Ok(None);
        };

        let decrypted = (|| -> Result<ActiveSession> {
            let auth_token = self.vault.decrypt(&row.auth_token, &row.auth_token_nonce)?;
            let feed_token = match (&row.feed_token, &row.feed_token_nonce) {
                (Some(ct), Some(nonce)) => Some(self.vault.decrypt(ct, nonce)?),
                _ => None,
            };
            Ok(ActiveSession {
                broker_id: row.broker_id.clone(),
                auth_token,
                feed_token,
                user_id: row.user_id,
                // SQLite datetime('now') has no zone suffix; it is UTC.
                authenticated_at: chrono::NaiveDateTime::parse_from_str(
                    &row.authenticated_at,
                    "%Y-%m-%d %H:%M:%S",
                )
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now()),
            })
        })();

        match decrypted {
            Ok(session) => {
                *self.active.write() = Some(session.clone());
                Ok(Some(session))
            }
            Err(CoreError::AuthTagMismatch) => {
                warn!(
                    "stored session for '{}' failed authentication, clearing row",
                    row.broker_id
                );
                self.sessions.clear().await?;
                *self.active.write() = None;
                Err(CoreError::SessionCorrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the session row and clear the slot. Idempotent; callers also
    /// ask the broker adapter to invalidate the token upstream, best-effort.
    pub async fn revoke(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.sessions.clear().await?;
        if self.active.write().take().is_some() {
            info!("broker session revoked");
        }
        Ok(())
    }

    /// The in-memory session, if one is established
    pub fn active(&self) -> Option<ActiveSession> {
        self.active.read().clone()
    }

    /// Id of the active broker
    pub fn active_broker(&self) -> Option<String> {
        self.active.read().as_ref().map(|s| s.broker_id.clone())
    }

    // ---- broker credentials ---------------------------------------------

    pub async fn save_credentials(
        &self,
        broker_id: &str,
        api_key: &str,
        api_secret: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<()> {
        let (key_ct, key_nonce) = self.vault.encrypt(api_key)?;
        let (secret_ct, secret_nonce) = match api_secret {
            Some(secret) => {
                let (ct, nonce) = self.vault.encrypt(secret)?;
                (Some(ct), Some(nonce))
            }
            None => (None, None),
        };

        self.credentials
            .upsert(EncryptedCredential {
                broker_id,
                api_key: key_ct,
                api_key_nonce: key_nonce,
                api_secret: secret_ct,
                api_secret_nonce: secret_nonce,
                client_id: client_id.map(|c| c.to_string()),
            })
            .await?;

        info!("credentials stored for broker '{}'", broker_id);
        Ok(())
    }

    pub async fn load_credentials(&self, broker_id: &str) -> Result<Option<BrokerCredential>> {
        let Some(row) = self.credentials.find(broker_id).await? else {
            return Ok(None);
        };

        let api_key = self.vault.decrypt(&row.api_key, &row.api_key_nonce)?;
        let api_secret = match (&row.api_secret, &row.api_secret_nonce) {
            (Some(ct), Some(nonce)) => Some(self.vault.decrypt(ct, nonce)?),
            _ => None,
        };

        Ok(Some(BrokerCredential {
            broker_id: row.broker_id,
            api_key,
            api_secret,
            client_id: row.client_id,
        }))
    }

    pub async fn delete_credentials(&self, broker_id: &str) -> Result<bool> {
        self.credentials.delete(broker_id).await
    }

    pub async fn configured_brokers(&self) -> Result<Vec<String>> {
        self.credentials.list_broker_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    async fn custodian_with_user() -> SessionCustodian {
        let pool = memory_store().await;
        sqlx::query("INSERT INTO users (username, password_hash) VALUES ('alice', 'h')")
            .execute(&pool)
            .await
            .unwrap();
        SessionCustodian::new(pool, Arc::new(Vault::ephemeral()))
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let custodian = custodian_with_user().await;
        custodian
            .save_session("fyers", "TOKEN_A", Some("FEED_B"), 1)
            .await
            .unwrap();

        let session = custodian.load_active_session().await.unwrap().unwrap();
        assert_eq!(session.broker_id, "fyers");
        assert_eq!(session.auth_token, "TOKEN_A");
        assert_eq!(session.feed_token.as_deref(), Some("FEED_B"));
        assert_eq!(custodian.active_broker().as_deref(), Some("fyers"));
    }

    #[tokio::test]
    async fn test_nonces_independent_in_store() {
        let custodian = custodian_with_user().await;
        custodian
            .save_session("fyers", "TOKEN_A", Some("FEED_B"), 1)
            .await
            .unwrap();

        let row: (String, Option<String>) = sqlx::query_as(
            "SELECT auth_token_nonce, feed_token_nonce FROM broker_sessions",
        )
        .fetch_one(&custodian.pool)
        .await
        .unwrap();
        assert_ne!(Some(row.0), row.1);
    }

    #[tokio::test]
    async fn test_corrupted_row_cleared() {
        let custodian = custodian_with_user().await;
        custodian
            .save_session("fyers", "TOKEN_A", None, 1)
            .await
            .unwrap();

        sqlx::query("UPDATE broker_sessions SET auth_token = 'AAAA' || substr(auth_token, 5)")
            .execute(&custodian.pool)
            .await
            .unwrap();

        assert!(matches!(
            custodian.load_active_session().await,
            Err(CoreError::SessionCorrupted)
        ));
        // Row is gone; the next load sees a clean store.
        assert!(custodian.load_active_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let custodian = custodian_with_user().await;
        custodian
            .save_session("fyers", "TOKEN_A", None, 1)
            .await
            .unwrap();

        custodian.revoke().await.unwrap();
        custodian.revoke().await.unwrap();
        assert!(custodian.active().is_none());
        assert!(custodian.load_active_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credentials_round_trip() {
        let custodian = custodian_with_user().await;
        custodian
            .save_credentials("fyers", "KEY", Some("SECRET"), Some("FY1"))
            .await
            .unwrap();

        let cred = custodian.load_credentials("fyers").await.unwrap().unwrap();
        assert_eq!(cred.api_key, "KEY");
        assert_eq!(cred.api_secret.as_deref(), Some("SECRET"));
        assert_eq!(cred.client_id.as_deref(), Some("FY1"));

        assert_eq!(custodian.configured_brokers().await.unwrap(), vec!["fyers"]);
        assert!(custodian.delete_credentials("fyers").await.unwrap());
        assert!(custodian.load_credentials("fyers").await.unwrap().is_none());
    }
}
