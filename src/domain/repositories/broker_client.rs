//! Broker Client Trait
//!
//! This module defines the `BrokerClient` trait, the closed capability set
//! every broker adapter implements. The services layer operates exclusively
//! against this interface, so admission handlers and IPC commands never see
//! broker-specific request shaping.
//!
//! All calls are asynchronous and cancellable by dropping the future; an
//! adapter must not acquire resources that survive cancellation.

use crate::domain::entities::market::{
    Funds, Holding, MarketDepth, MarketTick, Position, Quote,
};
use crate::domain::entities::order::{ModifyOrderRequest, Order, OrderReceipt, OrderRequest};
use crate::domain::entities::symbol::SymbolInfo;
use crate::domain::errors::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

/// Credentials presented to a broker for authentication
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerCredentials {
    pub api_key: String,
    pub api_secret: Option<String>,
    pub client_id: Option<String>,
    pub password: Option<String>,
    pub totp: Option<String>,
    /// Authorization code from a browser-redirect OAuth flow
    pub auth_code: Option<String>,
}

/// Tokens and identity returned by a successful broker authentication
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub auth_token: String,
    pub feed_token: Option<String>,
    pub user_id: String,
}

/// Closed capability set consumed by the services layer
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Stable broker id ("fyers", "sandbox", ...)
    fn id(&self) -> &'static str;

    /// Display name
    fn name(&self) -> &'static str;

    /// Whether the broker login flow is browser-redirect OAuth
    fn uses_oauth(&self) -> bool {
        false
    }

    async fn authenticate(&self, credentials: BrokerCredentials) -> Result<AuthResponse>;

    async fn place_order(&self, auth_token: &str, order: &OrderRequest) -> Result<OrderReceipt>;

    async fn modify_order(
        &self,
        auth_token: &str,
        order_id: &str,
        changes: &ModifyOrderRequest,
    ) -> Result<OrderReceipt>;

    async fn cancel_order(&self, auth_token: &str, order_id: &str) -> Result<()>;

    async fn get_order_book(&self, auth_token: &str) -> Result<Vec<Order>>;

    async fn get_trade_book(&self, auth_token: &str) -> Result<Vec<Order>>;

    async fn get_positions(&self, auth_token: &str) -> Result<Vec<Position>>;

    async fn get_holdings(&self, auth_token: &str) -> Result<Vec<Holding>>;

    async fn get_funds(&self, auth_token: &str) -> Result<Funds>;

    /// Batch quotes for (exchange, symbol) pairs
    async fn get_quotes(
        &self,
        auth_token: &str,
        symbols: &[(String, String)],
    ) -> Result<Vec<Quote>>;

    async fn get_market_depth(
        &self,
        auth_token: &str,
        exchange: &str,
        symbol: &str,
    ) -> Result<MarketDepth>;

    /// Download the full instrument master
    async fn download_master_contract(&self, auth_token: &str) -> Result<Vec<SymbolInfo>>;

    /// Invalidate the session upstream. Best-effort; callers bound the
    /// deadline and do not retry.
    async fn logout(&self, auth_token: &str) -> Result<()>;

    /// Open the market-data stream using the feed token. The consumer side
    /// of the channel closes when the stream drops.
    async fn open_market_stream(&self, feed_token: &str) -> Result<mpsc::Receiver<MarketTick>>;
}
