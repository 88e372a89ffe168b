//! Market data entities of the uniform model

use serde::{Deserialize, Serialize};

/// Open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub exchange: String,
    pub product: String,
    pub quantity: i32,
    pub average_price: f64,
    pub ltp: f64,
    pub pnl: f64,
}

/// Demat holding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub exchange: String,
    pub quantity: i32,
    pub average_price: f64,
    pub ltp: f64,
    pub pnl: f64,
    pub pnl_percentage: f64,
}

/// Account funds and margin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funds {
    pub available_cash: f64,
    pub used_margin: f64,
    pub total_margin: f64,
    pub collateral: f64,
}

/// Full quote snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub exchange: String,
    pub ltp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub bid: f64,
    pub ask: f64,
    pub oi: i64,
}

/// One side level of the order book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: i32,
    pub orders: i32,
}

/// Five-level market depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDepth {
    pub symbol: String,
    pub exchange: String,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

/// One OHLCV bar from the analytical store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Tick pushed by a broker market stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub exchange: String,
    pub ltp: f64,
    pub volume: i64,
    pub timestamp: i64,
}
