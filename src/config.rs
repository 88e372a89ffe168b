//! Application configuration
//!
//! Paths and policy knobs resolved once at startup, with environment
//! overrides. Runtime-tunable settings (auto-logout, webhook listener) live
//! in the settings table instead; this covers what must be known before the
//! store is open.

use crate::persistence::traffic::AdmissionPolicy;
use std::path::PathBuf;

/// Configuration fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Per-user application data directory
    pub data_dir: PathBuf,
    /// Primary store URL
    pub database_url: String,
    /// Analytical store file
    pub history_path: PathBuf,
    /// Use the file keystore instead of the OS keychain
    pub headless: bool,
    /// Strike and ban policy for the admission gateway
    pub admission: AdmissionPolicy,
}

impl AppConfig {
    /// Resolve configuration from the environment with sensible defaults
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ALGODESK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}", data_dir.join("algodesk.db").display())
        });

        let headless = std::env::var("ALGODESK_HEADLESS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        let admission = AdmissionPolicy {
            strike_threshold: env_number("ALGODESK_STRIKE_THRESHOLD", 5),
            strike_window_hours: env_number("ALGODESK_STRIKE_WINDOW_HOURS", 24),
            temp_ban_hours: env_number("ALGODESK_TEMP_BAN_HOURS", 24),
        };

        Self {
            history_path: data_dir.join("history.duckdb"),
            data_dir,
            database_url,
            headless,
            admission,
        }
    }
}

fn env_number(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".local/share/algodesk"))
        .unwrap_or_else(|_| PathBuf::from("data"))
}
