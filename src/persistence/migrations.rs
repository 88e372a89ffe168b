//! Primary-store migration chain
//!
//! Ordered and append-only. Each migration runs inside its own transaction;
//! re-executing the chain is a no-op for versions already recorded in
//! `schema_migrations`. Downgrades are unsupported.

use crate::domain::errors::Result;
use crate::persistence::DbPool;
use tracing::info;

/// One schema step. The SQL may contain multiple statements.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// The highest version this build knows about
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Highest applied version on disk, 0 for a fresh store
pub async fn version(pool: &DbPool) -> Result<i64> {
    let row: (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Apply every pending migration, oldest first
pub async fn apply(pool: &DbPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let applied: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        )
        .bind(migration.version)
        .fetch_one(pool)
        .await?;

        if applied.0 > 0 {
            continue;
        }

        info!("applying migration {:03} {}", migration.version, migration.name);

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users",
        sql: r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    },
    Migration {
        version: 2,
        name: "broker_sessions",
        // Historical shape: one nonce shared by both tokens. Split by
        // migration 13; kept here so old stores replay identically.
        sql: r#"
CREATE TABLE broker_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker_id TEXT NOT NULL UNIQUE,
    auth_token TEXT NOT NULL,
    feed_token TEXT,
    nonce TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    authenticated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    },
    Migration {
        version: 3,
        name: "broker_credentials",
        sql: r#"
CREATE TABLE broker_credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broker_id TEXT NOT NULL UNIQUE,
    api_key TEXT NOT NULL,
    api_key_nonce TEXT NOT NULL,
    api_secret TEXT,
    api_secret_nonce TEXT,
    client_id TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    },
    Migration {
        version: 4,
        name: "api_keys",
        sql: r#"
CREATE TABLE api_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    key_hash TEXT NOT NULL,
    encrypted_key TEXT NOT NULL,
    nonce TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_used_at TEXT
);
"#,
    },
    Migration {
        version: 5,
        name: "symbols",
        sql: r#"
CREATE TABLE symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    token TEXT NOT NULL,
    exchange TEXT NOT NULL,
    name TEXT NOT NULL,
    lot_size INTEGER NOT NULL DEFAULT 1,
    tick_size REAL NOT NULL DEFAULT 0.05,
    instrument_type TEXT NOT NULL DEFAULT 'EQ',
    expiry TEXT,
    strike REAL,
    option_type TEXT,
    UNIQUE(exchange, symbol)
);
CREATE INDEX idx_symbols_exchange ON symbols(exchange);
CREATE INDEX idx_symbols_token ON symbols(token);
CREATE INDEX idx_symbols_symbol ON symbols(symbol);
"#,
    },
    Migration {
        version: 6,
        name: "strategies",
        sql: r#"
CREATE TABLE strategies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    webhook_id TEXT NOT NULL UNIQUE,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    product TEXT NOT NULL DEFAULT 'MIS',
    quantity INTEGER NOT NULL DEFAULT 1,
    enabled INTEGER NOT NULL DEFAULT 1,
    platform TEXT NOT NULL DEFAULT 'tradingview',
    window_start TEXT,
    window_end TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    },
    Migration {
        version: 7,
        name: "strategy_symbol_mappings",
        sql: r#"
CREATE TABLE strategy_symbol_mappings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id INTEGER NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
    exchange TEXT NOT NULL,
    symbol TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 1,
    product TEXT NOT NULL DEFAULT 'MIS',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(strategy_id, symbol)
);
"#,
    },
    Migration {
        version: 8,
        name: "settings",
        sql: r#"
CREATE TABLE settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    theme TEXT NOT NULL DEFAULT 'system',
    default_broker TEXT,
    default_exchange TEXT NOT NULL DEFAULT 'NSE',
    default_product TEXT NOT NULL DEFAULT 'MIS',
    order_confirm INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT OR IGNORE INTO settings (id) VALUES (1);
"#,
    },
    Migration {
        version: 9,
        name: "traffic_logs",
        sql: r#"
CREATE TABLE traffic_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    client_ip TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    duration_ms REAL NOT NULL,
    error TEXT
);
CREATE INDEX idx_traffic_timestamp ON traffic_logs(timestamp);
"#,
    },
    Migration {
        version: 10,
        name: "latency_logs",
        sql: r#"
CREATE TABLE latency_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    operation TEXT NOT NULL,
    broker_id TEXT,
    rtt_ms REAL NOT NULL,
    success INTEGER NOT NULL
);
CREATE INDEX idx_latency_timestamp ON latency_logs(timestamp);
CREATE INDEX idx_latency_operation ON latency_logs(operation);
"#,
    },
    Migration {
        version: 11,
        name: "ip_bans_and_strikes",
        sql: r#"
CREATE TABLE ip_bans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL CHECK(kind IN ('temporary', 'permanent')),
    reason TEXT,
    strike_count INTEGER NOT NULL DEFAULT 1,
    banned_at TEXT NOT NULL DEFAULT (datetime('now')),
    expires_at TEXT
);
CREATE TABLE admission_strikes (
    ip_address TEXT PRIMARY KEY,
    strike_count INTEGER NOT NULL DEFAULT 0,
    first_strike_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_strike_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_reason TEXT
);
"#,
    },
    Migration {
        version: 12,
        name: "analyzer_logs",
        sql: r#"
CREATE TABLE analyzer_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy_id INTEGER,
    operation TEXT NOT NULL,
    request_json TEXT NOT NULL,
    decision TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    },
    Migration {
        version: 13,
        name: "sessions_separate_nonces",
        // One nonce for two ciphertexts under the same GCM key is
        // catastrophic. Legacy rows cannot be re-encrypted (the shared nonce
        // is unattributable), so they are cleared and operators re-login.
        sql: r#"
DELETE FROM broker_sessions;
ALTER TABLE broker_sessions RENAME COLUMN nonce TO auth_token_nonce;
ALTER TABLE broker_sessions ADD COLUMN feed_token_nonce TEXT;
"#,
    },
    Migration {
        version: 14,
        name: "sandbox",
        sql: r#"
CREATE TABLE sandbox_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id TEXT NOT NULL UNIQUE,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price REAL NOT NULL,
    order_type TEXT NOT NULL,
    product TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'complete',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE sandbox_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id TEXT NOT NULL UNIQUE,
    order_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price REAL NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE TABLE sandbox_positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    product TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0,
    average_price REAL NOT NULL DEFAULT 0,
    ltp REAL NOT NULL DEFAULT 0,
    UNIQUE(exchange, symbol, product)
);
CREATE TABLE sandbox_holdings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    average_price REAL NOT NULL,
    ltp REAL NOT NULL DEFAULT 0,
    UNIQUE(exchange, symbol)
);
CREATE TABLE sandbox_funds (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    available_cash REAL NOT NULL DEFAULT 1000000,
    used_margin REAL NOT NULL DEFAULT 0,
    starting_capital REAL NOT NULL DEFAULT 1000000,
    last_reset_at TEXT NOT NULL DEFAULT (datetime('now'))
);
INSERT OR IGNORE INTO sandbox_funds (id) VALUES (1);
CREATE TABLE sandbox_daily_pnl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL UNIQUE,
    realized_pnl REAL NOT NULL DEFAULT 0,
    unrealized_pnl REAL NOT NULL DEFAULT 0
);
"#,
    },
    Migration {
        version: 15,
        name: "server_config",
        sql: r#"
ALTER TABLE settings ADD COLUMN auto_logout_hour INTEGER NOT NULL DEFAULT 3;
ALTER TABLE settings ADD COLUMN auto_logout_minute INTEGER NOT NULL DEFAULT 0;
ALTER TABLE settings ADD COLUMN auto_logout_enabled INTEGER NOT NULL DEFAULT 1;
ALTER TABLE settings ADD COLUMN auto_logout_warnings TEXT NOT NULL DEFAULT '[30, 15, 5, 1]';
ALTER TABLE settings ADD COLUMN webhook_enabled INTEGER NOT NULL DEFAULT 0;
ALTER TABLE settings ADD COLUMN webhook_host TEXT NOT NULL DEFAULT '127.0.0.1';
ALTER TABLE settings ADD COLUMN webhook_port INTEGER NOT NULL DEFAULT 5000;
ALTER TABLE settings ADD COLUMN webhook_public_url TEXT;
ALTER TABLE settings ADD COLUMN webhook_secret TEXT;
"#,
    },
];
