//! Persistent record types
//!
//! Row shapes for the primary store. Encrypted fields hold base64
//! ciphertext+tag with the 96-bit nonce in the sibling `*_nonce` column;
//! plaintext never appears in these types except where the column is
//! explicitly unencrypted.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The single local operator
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

/// Encrypted broker session row
#[derive(Debug, Clone, FromRow)]
pub struct BrokerSessionRecord {
    pub id: i64,
    pub broker_id: String,
    pub auth_token: String,
    pub auth_token_nonce: String,
    pub feed_token: Option<String>,
    pub feed_token_nonce: Option<String>,
    pub user_id: i64,
    pub authenticated_at: String,
}

/// Encrypted broker credential row
#[derive(Debug, Clone, FromRow)]
pub struct BrokerCredentialRecord {
    pub id: i64,
    pub broker_id: String,
    pub api_key: String,
    pub api_key_nonce: String,
    pub api_secret: Option<String>,
    pub api_secret_nonce: Option<String>,
    pub client_id: Option<String>,
}

/// Inbound API key row: Argon2 hash for validation plus an encrypted copy
/// so the operator can re-display the key
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRecord {
    pub id: i64,
    pub name: String,
    pub key_hash: String,
    pub encrypted_key: String,
    pub nonce: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StrategyRecord {
    pub id: i64,
    pub name: String,
    pub webhook_id: String,
    pub exchange: String,
    pub symbol: String,
    pub product: String,
    pub quantity: i64,
    pub enabled: i64,
    pub platform: String,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub deleted: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SymbolMappingRecord {
    pub id: i64,
    pub strategy_id: i64,
    pub exchange: String,
    pub symbol: String,
    pub quantity: i64,
    pub product: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SymbolRecord {
    pub symbol: String,
    pub token: String,
    pub exchange: String,
    pub name: String,
    pub lot_size: i64,
    pub tick_size: f64,
    pub instrument_type: String,
    pub expiry: Option<String>,
    pub strike: Option<f64>,
    pub option_type: Option<String>,
}

/// One row per admitted request
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TrafficRecord {
    pub id: i64,
    pub timestamp: String,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub status_code: i64,
    pub duration_ms: f64,
    pub error: Option<String>,
}

/// Per-operation timing sample
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LatencyRecord {
    pub id: i64,
    pub timestamp: String,
    pub operation: String,
    pub broker_id: Option<String>,
    pub rtt_ms: f64,
    pub success: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct IpBanRecord {
    pub id: i64,
    pub ip_address: String,
    pub kind: String,
    pub reason: Option<String>,
    pub strike_count: i64,
    pub banned_at: String,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AnalyzerLogRecord {
    pub id: i64,
    pub strategy_id: Option<i64>,
    pub operation: String,
    pub request_json: String,
    pub decision: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SandboxOrderRecord {
    pub id: i64,
    pub order_id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: String,
    pub quantity: i64,
    pub price: f64,
    pub order_type: String,
    pub product: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SandboxPositionRecord {
    pub symbol: String,
    pub exchange: String,
    pub product: String,
    pub quantity: i64,
    pub average_price: f64,
    pub ltp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SandboxHoldingRecord {
    pub symbol: String,
    pub exchange: String,
    pub quantity: i64,
    pub average_price: f64,
    pub ltp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SandboxFundsRecord {
    pub available_cash: f64,
    pub used_margin: f64,
    pub starting_capital: f64,
    pub last_reset_at: String,
}
