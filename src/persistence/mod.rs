//! Persistence Layer
//!
//! Embedded relational storage for all durable state, with an independent
//! columnar store for OHLCV time series. Uses SQLite with WAL journaling via
//! sqlx; every query is parameterized. Migrations are an ordered, append-only
//! chain applied before any other component touches the store.

pub mod analyzer;
pub mod api_keys;
pub mod credentials;
pub mod history;
pub mod latency;
pub mod migrations;
pub mod models;
pub mod sandbox;
pub mod sessions;
pub mod settings;
pub mod strategies;
pub mod symbols;
pub mod traffic;
pub mod users;

use crate::domain::errors::{CoreError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Primary store connection pool
pub type DbPool = SqlitePool;

/// Open the primary store and bring the schema fully up to date.
///
/// The pool is not handed out before the migration chain completes, which
/// gives migrations the exclusive access they require.
pub async fn open_store(database_url: &str) -> Result<DbPool> {
    info!("opening primary store: {}", database_url);

    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(CoreError::Database)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    // An in-memory database exists per connection; more than one connection
    // would see different databases.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrations::apply(&pool).await?;

    info!("primary store ready at schema version {}", migrations::version(&pool).await?);
    Ok(pool)
}

/// Guard used by command dispatch: every non-setup command is rejected while
/// migrations are pending.
pub async fn ensure_schema_current(pool: &DbPool) -> Result<()> {
    let current = migrations::version(pool).await?;
    let required = migrations::latest_version();
    if current < required {
        return Err(CoreError::SchemaOutOfDate { current, required });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_store() -> DbPool {
    open_store("sqlite::memory:").await.expect("in-memory store")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_in_memory() {
        let pool = memory_store().await;
        ensure_schema_current(&pool).await.unwrap();
    }
}
