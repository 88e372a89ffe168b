//! Identity Manager
//!
//! State machine of the local operator identity. Exactly zero or one user
//! exists; absence means setup state. The in-memory session is deliberately
//! not persisted: a restart always lands in `Idle` even while a broker token
//! is still valid on disk.

use crate::domain::errors::{CoreError, Result};
use crate::persistence::users::UserRepository;
use crate::persistence::DbPool;
use crate::vault::Vault;
use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{info, warn};

/// Login attempts allowed per minute
const LOGIN_ATTEMPTS_PER_MINUTE: u32 = 5;

/// In-memory operator session
#[derive(Debug, Clone, Serialize)]
pub struct UserSession {
    pub user_id: i64,
    pub username: String,
    pub authenticated_at: DateTime<Utc>,
}

/// Observable identity state
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdentityState {
    NotInitialized,
    Idle,
    Authenticated(UserSession),
}

pub struct IdentityManager {
    users: UserRepository,
    vault: Arc<Vault>,
    session: parking_lot::RwLock<Option<UserSession>>,
    login_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
}

impl IdentityManager {
    pub fn new(pool: DbPool, vault: Arc<Vault>) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(LOGIN_ATTEMPTS_PER_MINUTE).expect("non-zero attempt quota"),
        );
        Self {
            users: UserRepository::new(pool),
            vault,
            session: parking_lot::RwLock::new(None),
            login_limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        }
    }

    /// Create the single local user. Fails with `AlreadyInitialized` once a
    /// user exists.
    pub async fn setup(&self, username: &str, password: &str) -> Result<UserSession> {
        if self.users.exists().await? {
            return Err(CoreError::AlreadyInitialized);
        }
        if username.trim().is_empty() || password.is_empty() {
            return Err(CoreError::PayloadInvalid(
                "username and password are required".to_string(),
            ));
        }

        let hash = self.hash_blocking(password.to_string()).await?;
        let user = self.users.create(username, &hash).await?;
        info!("local user '{}' created", user.username);

        let session = UserSession {
            user_id: user.id,
            username: user.username,
            authenticated_at: Utc::now(),
        };
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    /// Verify credentials and establish the in-memory session
    pub async fn login(&self, username: &str, password: &str) -> Result<UserSession> {
        if let Err(not_until) = self.login_limiter.check() {
            let retry_after_secs = not_until
                .wait_time_from(self.clock.now())
                .as_secs()
                .max(1);
            warn!("login rate limit hit for '{}'", username);
            return Err(CoreError::RateLimited { retry_after_secs });
        }

        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(CoreError::NotAuthenticated)?;

        let verified = self
            .verify_blocking(password.to_string(), user.password_hash.clone())
            .await?;
        if !verified {
            warn!("failed login attempt for '{}'", username);
            return Err(CoreError::NotAuthenticated);
        }

        let session = UserSession {
            user_id: user.id,
            username: user.username,
            authenticated_at: Utc::now(),
        };
        *self.session.write() = Some(session.clone());
        info!("operator '{}' logged in", session.username);
        Ok(session)
    }

    /// Drop the in-memory session. Idempotent.
    pub fn logout(&self) {
        if self.session.write().take().is_some() {
            info!("operator logged out");
        }
    }

    /// Current state without side effects
    pub async fn check_session(&self) -> Result<IdentityState> {
        if let Some(session) = self.session.read().clone() {
            return Ok(IdentityState::Authenticated(session));
        }
        if self.users.exists().await? {
            Ok(IdentityState::Idle)
        } else {
            Ok(IdentityState::NotInitialized)
        }
    }

    pub fn current(&self) -> Option<UserSession> {
        self.session.read().clone()
    }

    /// The user id behind the active session, for commands that persist it
    pub fn require_user(&self) -> Result<UserSession> {
        self.current().ok_or(CoreError::NotAuthenticated)
    }

    /// Wipe all users. Recovery path when the pepper is destroyed and no
    /// stored hash can ever verify again.
    pub async fn reset_users(&self) -> Result<()> {
        self.logout();
        self.users.delete_all().await?;
        warn!("all local users deleted; system back in setup state");
        Ok(())
    }

    async fn hash_blocking(&self, password: String) -> Result<String> {
        let vault = self.vault.clone();
        tokio::task::spawn_blocking(move || vault.hash_password(&password))
            .await
            .map_err(|e| CoreError::internal(format!("hash task failed: {}", e)))?
    }

    async fn verify_blocking(&self, password: String, phc: String) -> Result<bool> {
        let vault = self.vault.clone();
        tokio::task::spawn_blocking(move || vault.verify_password(&password, &phc))
            .await
            .map_err(|e| CoreError::internal(format!("verify task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    async fn manager() -> IdentityManager {
        IdentityManager::new(memory_store().await, Arc::new(Vault::ephemeral()))
    }

    #[tokio::test]
    async fn test_setup_then_login_flow() {
        let identity = manager().await;
        assert!(matches!(
            identity.check_session().await.unwrap(),
            IdentityState::NotInitialized
        ));

        identity.setup("alice", "pw1").await.unwrap();
        identity.logout();
        assert!(matches!(
            identity.check_session().await.unwrap(),
            IdentityState::Idle
        ));

        let session = identity.login("alice", "pw1").await.unwrap();
        assert_eq!(session.username, "alice");
        assert!(matches!(
            identity.check_session().await.unwrap(),
            IdentityState::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn test_second_setup_rejected() {
        let identity = manager().await;
        identity.setup("alice", "pw1").await.unwrap();
        assert!(matches!(
            identity.setup("bob", "pw2").await,
            Err(CoreError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_not_authenticated() {
        let identity = manager().await;
        identity.setup("alice", "pw1").await.unwrap();
        identity.logout();

        assert!(matches!(
            identity.login("alice", "wrong").await,
            Err(CoreError::NotAuthenticated)
        ));
        assert!(matches!(
            identity.login("mallory", "pw1").await,
            Err(CoreError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_login_rate_limit() {
        let identity = manager().await;
        identity.setup("alice", "pw1").await.unwrap();
        identity.logout();

        let mut rate_limited = false;
        for _ in 0..10 {
            match identity.login("alice", "wrong").await {
                Err(CoreError::RateLimited { retry_after_secs }) => {
                    assert!(retry_after_secs >= 1);
                    rate_limited = true;
                    break;
                }
                Err(CoreError::NotAuthenticated) => continue,
                other => panic!("unexpected login result: {:?}", other.map(|_| ())),
            }
        }
        assert!(rate_limited, "repeated attempts must hit the rate limit");
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let identity = manager().await;
        identity.setup("alice", "pw1").await.unwrap();
        identity.logout();
        identity.logout();
        assert!(identity.current().is_none());
    }
}
