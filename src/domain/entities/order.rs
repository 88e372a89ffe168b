//! Order entities of the uniform model
//!
//! Every broker adapter normalizes into these shapes; the services layer and
//! both command surfaces only ever see this model.

use crate::domain::errors::CoreError;
use serde::{Deserialize, Serialize};

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Parse the wire form used by webhook payloads and the REST surface
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(CoreError::PayloadInvalid(format!(
                "unknown action '{}', expected BUY or SELL",
                other
            ))),
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Request to place a new order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub side: OrderSide,
    pub quantity: i32,
    pub price: f64,
    /// MARKET, LIMIT, SL, SL-M
    pub order_type: String,
    /// CNC, MIS, NRML
    pub product: String,
    /// DAY, IOC
    pub validity: String,
    pub trigger_price: Option<f64>,
    pub disclosed_quantity: Option<i32>,
}

impl OrderRequest {
    /// Market order with the common defaults
    pub fn market(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        side: OrderSide,
        quantity: i32,
        product: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            side,
            quantity,
            price: 0.0,
            order_type: "MARKET".to_string(),
            product: product.into(),
            validity: "DAY".to_string(),
            trigger_price: None,
            disclosed_quantity: None,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.quantity <= 0 {
            return Err(CoreError::PayloadInvalid(
                "quantity must be positive".to_string(),
            ));
        }
        if self.order_type == "LIMIT" && self.price <= 0.0 {
            return Err(CoreError::PayloadInvalid(
                "limit orders require a price".to_string(),
            ));
        }
        Ok(())
    }
}

/// Requested changes to a working order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifyOrderRequest {
    pub quantity: Option<i32>,
    pub price: Option<f64>,
    pub order_type: Option<String>,
    pub trigger_price: Option<f64>,
    pub validity: Option<String>,
}

/// Acknowledgement returned by a broker for a write operation
#[derive(Debug, Clone, Serialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub message: Option<String>,
}

/// Entry in the order book or trade book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub exchange: String,
    pub side: String,
    pub quantity: i32,
    pub filled_quantity: i32,
    pub pending_quantity: i32,
    pub price: f64,
    pub trigger_price: f64,
    pub average_price: f64,
    pub order_type: String,
    pub product: String,
    pub status: String,
    pub validity: String,
    pub order_timestamp: String,
    pub rejection_reason: Option<String>,
}
