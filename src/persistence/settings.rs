//! Settings repository
//!
//! One row holds UI preferences plus the two compound server configurations:
//! auto-logout and the webhook/REST listener.

use super::DbPool;
use crate::domain::errors::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Daily session-expiry configuration, in the regulatory time zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoLogoutConfig {
    pub hour: u32,
    pub minute: u32,
    pub enabled: bool,
    /// Warning lead times in minutes, descending
    pub warnings: Vec<i64>,
}

impl Default for AutoLogoutConfig {
    fn default() -> Self {
        Self {
            hour: 3,
            minute: 0,
            enabled: true,
            warnings: vec![30, 15, 5, 1],
        }
    }
}

/// Inbound webhook/REST listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub public_url: Option<String>,
    pub secret: Option<String>,
}

impl Default for WebhookServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 5000,
            public_url: None,
            secret: None,
        }
    }
}

/// The full settings row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub theme: String,
    pub default_broker: Option<String>,
    pub default_exchange: String,
    pub default_product: String,
    pub order_confirm: bool,
    pub auto_logout: AutoLogoutConfig,
    pub webhook: WebhookServerConfig,
}

#[derive(FromRow)]
struct SettingsRow {
    theme: String,
    default_broker: Option<String>,
    default_exchange: String,
    default_product: String,
    order_confirm: i64,
    auto_logout_hour: i64,
    auto_logout_minute: i64,
    auto_logout_enabled: i64,
    auto_logout_warnings: String,
    webhook_enabled: i64,
    webhook_host: String,
    webhook_port: i64,
    webhook_public_url: Option<String>,
    webhook_secret: Option<String>,
}

pub struct SettingsRepository {
    pool: DbPool,
}

impl SettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<Settings> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT theme, default_broker, default_exchange, default_product, order_confirm,
                    auto_logout_hour, auto_logout_minute, auto_logout_enabled, auto_logout_warnings,
                    webhook_enabled, webhook_host, webhook_port, webhook_public_url, webhook_secret
             FROM settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        let warnings: Vec<i64> =
            serde_json::from_str(&row.auto_logout_warnings).unwrap_or_else(|_| vec![30, 15, 5, 1]);

        Ok(Settings {
            theme: row.theme,
            default_broker: row.default_broker,
            default_exchange: row.default_exchange,
            default_product: row.default_product,
            order_confirm: row.order_confirm != 0,
            auto_logout: AutoLogoutConfig {
                hour: row.auto_logout_hour as u32,
                minute: row.auto_logout_minute as u32,
                enabled: row.auto_logout_enabled != 0,
                warnings,
            },
            webhook: WebhookServerConfig {
                enabled: row.webhook_enabled != 0,
                host: row.webhook_host,
                port: row.webhook_port as u16,
                public_url: row.webhook_public_url,
                secret: row.webhook_secret,
            },
        })
    }

    pub async fn set_auto_logout(&self, config: &AutoLogoutConfig) -> Result<()> {
        let warnings = serde_json::to_string(&config.warnings)?;
        sqlx::query(
            "UPDATE settings SET auto_logout_hour = ?1, auto_logout_minute = ?2,
                    auto_logout_enabled = ?3, auto_logout_warnings = ?4,
                    updated_at = datetime('now')
             WHERE id = 1",
        )
        .bind(config.hour)
        .bind(config.minute)
        .bind(config.enabled as i32)
        .bind(&warnings)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_webhook(&self, config: &WebhookServerConfig) -> Result<()> {
        sqlx::query(
            "UPDATE settings SET webhook_enabled = ?1, webhook_host = ?2, webhook_port = ?3,
                    webhook_public_url = ?4, webhook_secret = ?5, updated_at = datetime('now')
             WHERE id = 1",
        )
        .bind(config.enabled as i32)
        .bind(&config.host)
        .bind(config.port as i64)
        .bind(&config.public_url)
        .bind(&config.secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_preferences(
        &self,
        theme: Option<&str>,
        default_broker: Option<&str>,
        default_exchange: Option<&str>,
        default_product: Option<&str>,
        order_confirm: Option<bool>,
    ) -> Result<Settings> {
        if let Some(theme) = theme {
            sqlx::query("UPDATE settings SET theme = ?1, updated_at = datetime('now') WHERE id = 1")
                .bind(theme)
                .execute(&self.pool)
                .await?;
        }
        if let Some(broker) = default_broker {
            sqlx::query(
                "UPDATE settings SET default_broker = ?1, updated_at = datetime('now') WHERE id = 1",
            )
            .bind(broker)
            .execute(&self.pool)
            .await?;
        }
        if let Some(exchange) = default_exchange {
            sqlx::query(
                "UPDATE settings SET default_exchange = ?1, updated_at = datetime('now') WHERE id = 1",
            )
            .bind(exchange)
            .execute(&self.pool)
            .await?;
        }
        if let Some(product) = default_product {
            sqlx::query(
                "UPDATE settings SET default_product = ?1, updated_at = datetime('now') WHERE id = 1",
            )
            .bind(product)
            .execute(&self.pool)
            .await?;
        }
        if let Some(confirm) = order_confirm {
            sqlx::query(
                "UPDATE settings SET order_confirm = ?1, updated_at = datetime('now') WHERE id = 1",
            )
            .bind(confirm as i32)
            .execute(&self.pool)
            .await?;
        }
        self.get().await
    }
}
