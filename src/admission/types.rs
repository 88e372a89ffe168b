//! Wire types for the admission surface
//!
//! Request bodies carry `apikey` as their first field; responses are the
//! `{status: "success" | "error", ...}` envelope.

use serde::{Deserialize, Serialize};

/// Uniform response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            code: None,
            message: None,
            data: Some(data),
            orderid: None,
            mode: None,
        }
    }

    pub fn success_message(message: &str) -> Self {
        Self {
            status: "success".to_string(),
            code: None,
            message: Some(message.to_string()),
            data: None,
            orderid: None,
            mode: None,
        }
    }

    pub fn success_order(order_id: &str, mode: &str) -> Self {
        Self {
            status: "success".to_string(),
            code: None,
            message: None,
            data: None,
            orderid: Some(order_id.to_string()),
            mode: Some(mode.to_string()),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: Some(code.to_string()),
            message: Some(message.to_string()),
            data: None,
            orderid: None,
            mode: None,
        }
    }
}

/// Webhook body: TradingView and Chartink shapes both parse into this
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub symbol: Option<String>,
    /// Chartink sends a comma-separated list
    pub stocks: Option<String>,
    pub quantity: Option<i32>,
    /// Present for smart orders: target absolute position
    pub position_size: Option<i32>,
    pub price: Option<f64>,
    pub pricetype: Option<String>,
}

impl WebhookPayload {
    /// Symbols the alert addresses; empty means "use the strategy default"
    pub fn symbols(&self) -> Vec<String> {
        if let Some(stocks) = &self.stocks {
            return stocks
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        self.symbol.iter().map(|s| s.to_uppercase()).collect()
    }
}

// ---- REST request bodies ----------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApiKeyRequest {
    pub apikey: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
    pub action: String,
    pub quantity: i32,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_pricetype")]
    pub pricetype: String,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default)]
    pub trigger_price: f64,
    #[serde(default)]
    pub disclosed_quantity: i32,
}

fn default_pricetype() -> String {
    "MARKET".to_string()
}

fn default_product() -> String {
    "MIS".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PlaceSmartOrderRequest {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
    pub action: String,
    pub position_size: i32,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_pricetype")]
    pub pricetype: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct ModifyOrderBody {
    pub apikey: String,
    pub orderid: String,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub pricetype: String,
    #[serde(default)]
    pub trigger_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub apikey: String,
    pub orderid: String,
}

#[derive(Debug, Deserialize)]
pub struct QuotesRequest {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    #[serde(default)]
    pub from: i64,
    #[serde(default = "default_to")]
    pub to: i64,
}

fn default_to() -> i64 {
    i64::MAX
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub apikey: String,
    pub query: String,
    pub exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExpiryRequest {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
    pub instrumenttype: String,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentsRequest {
    pub apikey: String,
    pub exchange: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyntheticFutureRequest {
    pub apikey: String,
    pub underlying: String,
    pub exchange: String,
    pub expiry: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionChainRequest {
    pub apikey: String,
    pub underlying: String,
    pub exchange: String,
    pub expiry: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionGreeksRequest {
    pub apikey: String,
    pub spot: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    pub volatility: f64,
    #[serde(default = "default_rate")]
    pub risk_free_rate: f64,
    pub option_type: String,
}

fn default_rate() -> f64 {
    0.07
}

#[derive(Debug, Deserialize)]
pub struct OptionSymbolRequest {
    pub apikey: String,
    pub underlying: String,
    pub exchange: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionsOrderRequest {
    pub apikey: String,
    pub underlying: String,
    pub exchange: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: String,
    pub action: String,
    pub quantity: i32,
    #[serde(default = "default_product")]
    pub product: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionsMultiOrderRequest {
    pub apikey: String,
    pub legs: Vec<OptionLeg>,
}

#[derive(Debug, Deserialize)]
pub struct OptionLeg {
    pub underlying: String,
    pub exchange: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: String,
    pub action: String,
    pub quantity: i32,
    #[serde(default = "default_product")]
    pub product: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzerToggleRequest {
    pub apikey: String,
    pub mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarginRequest {
    pub apikey: String,
    pub positions: Vec<MarginPosition>,
}

#[derive(Debug, Deserialize)]
pub struct MarginPosition {
    pub symbol: String,
    pub exchange: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct BasketOrderRequest {
    pub apikey: String,
    pub orders: Vec<BasketLeg>,
}

#[derive(Debug, Deserialize)]
pub struct BasketLeg {
    pub symbol: String,
    pub exchange: String,
    pub action: String,
    pub quantity: i32,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_pricetype")]
    pub pricetype: String,
    #[serde(default = "default_product")]
    pub product: String,
}

#[derive(Debug, Deserialize)]
pub struct SplitOrderBody {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
    pub action: String,
    pub quantity: i32,
    pub splitsize: i32,
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default = "default_pricetype")]
    pub pricetype: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusRequest {
    pub apikey: String,
    pub orderid: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenPositionRequest {
    pub apikey: String,
    pub symbol: String,
    pub exchange: String,
    #[serde(default = "default_product")]
    pub product: String,
}

#[derive(Debug, Deserialize)]
pub struct OauthQuery {
    pub code: String,
    pub state: Option<String>,
}
