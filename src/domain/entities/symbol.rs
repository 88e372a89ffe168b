//! Tradable instrument records from the symbol master

use serde::{Deserialize, Serialize};

/// One instrument from the broker master contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub token: String,
    pub exchange: String,
    pub name: String,
    pub lot_size: i32,
    pub tick_size: f64,
    /// EQ, FUT, CE, PE, ...
    pub instrument_type: String,
    pub expiry: Option<String>,
    pub strike: Option<f64>,
    pub option_type: Option<String>,
}

impl SymbolInfo {
    pub fn equity(symbol: &str, exchange: &str, token: &str, name: &str, lot_size: i32) -> Self {
        Self {
            symbol: symbol.to_string(),
            token: token.to_string(),
            exchange: exchange.to_string(),
            name: name.to_string(),
            lot_size,
            tick_size: 0.05,
            instrument_type: "EQ".to_string(),
            expiry: None,
            strike: None,
            option_type: None,
        }
    }
}
