//! Core error taxonomy
//!
//! A single error type flows through every component. Each variant carries a
//! stable code so the UI and the admission surface can map it to a toast,
//! banner, or HTTP status without parsing the message text.

use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// OS keychain (or the file fallback) refused access. The operator must
    /// unlock their session; no retry.
    #[error("secret store unavailable: {0}")]
    Vault(String),

    #[error("encryption failure: {0}")]
    Crypto(String),

    /// Ciphertext failed GCM tag verification. The plaintext is never
    /// returned.
    #[error("ciphertext authentication failed")]
    AuthTagMismatch,

    /// A stored broker session failed decryption; the row has been cleared
    /// and the operator must log in to the broker again.
    #[error("stored broker session is corrupted")]
    SessionCorrupted,

    #[error("schema out of date: version {current} on disk, {required} required")]
    SchemaOutOfDate { current: i64, required: i64 },

    #[error("local user already exists")]
    AlreadyInitialized,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("no active broker session")]
    NoActiveBroker,

    /// Broker API returned an error; code and message are carried verbatim.
    #[error("broker error {code}: {message}")]
    Upstream { code: String, message: String },

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("client address is banned")]
    Banned,

    #[error("invalid payload: {0}")]
    PayloadInvalid(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("history store error: {0}")]
    History(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error [{correlation_id}]: {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },
}

impl CoreError {
    /// Wrap an unexpected failure with a correlation id for log lookup.
    pub fn internal(message: impl Into<String>) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let message = message.into();
        tracing::error!(correlation_id = %correlation_id, "internal error: {}", message);
        CoreError::Internal {
            correlation_id,
            message,
        }
    }

    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Vault(_) => "VAULT_UNAVAILABLE",
            CoreError::Crypto(_) => "CRYPTO_FAILURE",
            CoreError::AuthTagMismatch => "AUTH_TAG_MISMATCH",
            CoreError::SessionCorrupted => "SESSION_CORRUPTED",
            CoreError::SchemaOutOfDate { .. } => "SCHEMA_OUT_OF_DATE",
            CoreError::AlreadyInitialized => "ALREADY_INITIALIZED",
            CoreError::NotAuthenticated => "NOT_AUTHENTICATED",
            CoreError::NoActiveBroker => "NO_ACTIVE_BROKER",
            CoreError::Upstream { .. } => "UPSTREAM",
            CoreError::RateLimited { .. } => "RATE_LIMITED",
            CoreError::Banned => "BANNED",
            CoreError::PayloadInvalid(_) => "PAYLOAD_INVALID",
            CoreError::Timeout(_) => "TIMEOUT",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::History(_) => "HISTORY_ERROR",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Http(_) => "HTTP_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether a single retry with jitter is permitted for an idempotent read
    pub fn retryable_read(&self) -> bool {
        matches!(self, CoreError::Timeout(_))
    }
}

/// Serializable error shape pushed over the IPC surface
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        ErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
