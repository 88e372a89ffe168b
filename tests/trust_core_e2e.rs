//! End-to-end coverage of the trust core: operator setup and login, broker
//! token custody across a process restart, and corruption handling.

use algodesk::custodian::SessionCustodian;
use algodesk::domain::errors::CoreError;
use algodesk::identity::{IdentityManager, IdentityState};
use algodesk::persistence;
use algodesk::vault::{Keystore, Vault};
use std::sync::Arc;
use tempfile::tempdir;

async fn open_pool(dir: &std::path::Path) -> persistence::DbPool {
    let url = format!("sqlite://{}", dir.join("algodesk.db").display());
    persistence::open_store(&url).await.unwrap()
}

#[tokio::test]
async fn setup_then_login_then_rate_limit() {
    let dir = tempdir().unwrap();
    let vault = Arc::new(Vault::open(&Keystore::file_in(dir.path())).unwrap());
    let pool = open_pool(dir.path()).await;
    let identity = IdentityManager::new(pool, vault);

    // Fresh data dir: setup state.
    assert!(matches!(
        identity.check_session().await.unwrap(),
        IdentityState::NotInitialized
    ));

    identity.setup("alice", "pw1").await.unwrap();
    identity.logout();

    // Correct password authenticates.
    let session = identity.login("alice", "pw1").await.unwrap();
    assert_eq!(session.username, "alice");
    identity.logout();

    // Wrong password is rejected.
    assert!(matches!(
        identity.login("alice", "wrong").await,
        Err(CoreError::NotAuthenticated)
    ));

    // Hammering login trips the per-minute quota.
    let mut rate_limited = false;
    for _ in 0..8 {
        match identity.login("alice", "wrong").await {
            Err(CoreError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs >= 1);
                rate_limited = true;
                break;
            }
            Err(CoreError::NotAuthenticated) => {}
            other => panic!("unexpected login outcome: {:?}", other.map(|_| ())),
        }
    }
    assert!(rate_limited);
}

#[tokio::test]
async fn broker_token_round_trip_survives_restart() {
    let dir = tempdir().unwrap();
    let keystore = Keystore::file_in(dir.path());

    // First process lifetime: store a session.
    {
        let vault = Arc::new(Vault::open(&keystore).unwrap());
        let pool = open_pool(dir.path()).await;
        sqlx::query("INSERT INTO users (username, password_hash) VALUES ('alice', 'h')")
            .execute(&pool)
            .await
            .unwrap();

        let custodian = SessionCustodian::new(pool.clone(), vault);
        custodian
            .save_session("fyers", "TOKEN_A", Some("FEED_B"), 1)
            .await
            .unwrap();
        pool.close().await;
    }

    // Second lifetime: the vault re-opens from the same keystore and the
    // stored ciphertexts decrypt to the original tokens.
    let vault = Arc::new(Vault::open(&keystore).unwrap());
    let pool = open_pool(dir.path()).await;
    let custodian = SessionCustodian::new(pool.clone(), vault);

    let session = custodian.load_active_session().await.unwrap().unwrap();
    assert_eq!(session.broker_id, "fyers");
    assert_eq!(session.auth_token, "TOKEN_A");
    assert_eq!(session.feed_token.as_deref(), Some("FEED_B"));

    // Flip one byte of the stored auth token ciphertext: the next load
    // reports corruption and clears the row.
    sqlx::query("UPDATE broker_sessions SET auth_token = 'AAAA' || substr(auth_token, 5)")
        .execute(&pool)
        .await
        .unwrap();

    assert!(matches!(
        custodian.load_active_session().await,
        Err(CoreError::SessionCorrupted)
    ));
    assert!(custodian.load_active_session().await.unwrap().is_none());
}

#[tokio::test]
async fn migration_chain_is_idempotent_across_reopen() {
    let dir = tempdir().unwrap();
    let pool = open_pool(dir.path()).await;
    let version_first = persistence::migrations::version(&pool).await.unwrap();
    pool.close().await;

    // Re-opening replays the chain; nothing changes.
    let pool = open_pool(dir.path()).await;
    let version_second = persistence::migrations::version(&pool).await.unwrap();
    assert_eq!(version_first, version_second);
    assert_eq!(version_second, persistence::migrations::latest_version());
}

#[tokio::test]
async fn distinct_nonces_for_auth_and_feed_tokens() {
    let dir = tempdir().unwrap();
    let vault = Arc::new(Vault::open(&Keystore::file_in(dir.path())).unwrap());
    let pool = open_pool(dir.path()).await;
    sqlx::query("INSERT INTO users (username, password_hash) VALUES ('alice', 'h')")
        .execute(&pool)
        .await
        .unwrap();

    let custodian = SessionCustodian::new(pool.clone(), vault);
    custodian
        .save_session("fyers", "SAME_VALUE", Some("SAME_VALUE"), 1)
        .await
        .unwrap();

    let (auth_nonce, feed_nonce): (String, Option<String>) = sqlx::query_as(
        "SELECT auth_token_nonce, feed_token_nonce FROM broker_sessions",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_ne!(Some(auth_nonce), feed_nonce);
}
