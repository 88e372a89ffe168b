//! Strategy entities
//!
//! A strategy is the persistent target of an inbound webhook. Its webhook id
//! is the only externally visible token; the rest of the record decides how
//! an alert becomes an order.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Platform the alerts originate from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPlatform {
    Tradingview,
    Chartink,
    Custom,
}

impl AlertPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPlatform::Tradingview => "tradingview",
            AlertPlatform::Chartink => "chartink",
            AlertPlatform::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "tradingview" => AlertPlatform::Tradingview,
            "chartink" => AlertPlatform::Chartink,
            _ => AlertPlatform::Custom,
        }
    }
}

/// Persistent alerting target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    /// UUID-shaped token embedded in the shareable webhook URL
    pub webhook_id: String,
    pub exchange: String,
    pub symbol: String,
    pub product: String,
    pub quantity: i32,
    pub enabled: bool,
    pub platform: AlertPlatform,
    /// "HH:MM" bounds in the regulatory time zone, both or neither
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

impl Strategy {
    /// Whether the given local time falls inside the trading window.
    /// A strategy without a window trades the whole day.
    pub fn within_window(&self, now: NaiveTime) -> bool {
        match (&self.window_start, &self.window_end) {
            (Some(start), Some(end)) => {
                let parse = |s: &str| NaiveTime::parse_from_str(s, "%H:%M").ok();
                match (parse(start), parse(end)) {
                    (Some(s), Some(e)) => now >= s && now <= e,
                    _ => true,
                }
            }
            _ => true,
        }
    }
}

/// Per-symbol override for multi-symbol strategies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMapping {
    pub id: i64,
    pub strategy_id: i64,
    pub exchange: String,
    pub symbol: String,
    pub quantity: i32,
    pub product: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy_with_window(start: Option<&str>, end: Option<&str>) -> Strategy {
        Strategy {
            id: 1,
            name: "test".to_string(),
            webhook_id: "w".to_string(),
            exchange: "NSE".to_string(),
            symbol: "RELIANCE".to_string(),
            product: "MIS".to_string(),
            quantity: 1,
            enabled: true,
            platform: AlertPlatform::Tradingview,
            window_start: start.map(|s| s.to_string()),
            window_end: end.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_no_window_always_trades() {
        let s = strategy_with_window(None, None);
        assert!(s.within_window(NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
    }

    #[test]
    fn test_window_bounds() {
        let s = strategy_with_window(Some("09:15"), Some("15:30"));
        assert!(!s.within_window(NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert!(s.within_window(NaiveTime::from_hms_opt(9, 15, 0).unwrap()));
        assert!(s.within_window(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!s.within_window(NaiveTime::from_hms_opt(15, 31, 0).unwrap()));
    }

    #[test]
    fn test_platform_round_trip() {
        assert_eq!(
            AlertPlatform::parse(AlertPlatform::Chartink.as_str()),
            AlertPlatform::Chartink
        );
        assert_eq!(AlertPlatform::parse("unknown"), AlertPlatform::Custom);
    }
}
