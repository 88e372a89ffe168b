//! Analyzer mode
//!
//! The switch that turns outbound order commands into logged simulations,
//! plus the margin estimate served locally.

use super::Services;
use crate::domain::errors::{CoreError, Result};
use crate::persistence::analyzer::AnalyzerRepository;
use crate::persistence::models::AnalyzerLogRecord;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerStatus {
    pub analyze_mode: bool,
    /// "analyze" or "live"
    pub mode: String,
    pub total_logs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarginEstimate {
    pub total_margin_required: f64,
    /// Always true: computed locally from quotes and lot sizes, not from a
    /// broker margin API.
    pub estimated: bool,
}

impl Services {
    pub async fn analyzer_status(&self) -> Result<AnalyzerStatus> {
        let total_logs = AnalyzerRepository::new(self.pool.clone()).count().await?;
        let analyze_mode = self.analyzer_on();
        Ok(AnalyzerStatus {
            analyze_mode,
            mode: if analyze_mode { "analyze" } else { "live" }.to_string(),
            total_logs,
        })
    }

    pub async fn toggle_analyzer(&self, on: bool) -> Result<AnalyzerStatus> {
        self.set_analyzer(on);
        info!("analyzer mode {}", if on { "enabled" } else { "disabled" });
        self.analyzer_status().await
    }

    pub async fn analyzer_logs(&self, limit: i64) -> Result<Vec<AnalyzerLogRecord>> {
        AnalyzerRepository::new(self.pool.clone()).recent(limit).await
    }

    pub async fn clear_analyzer_logs(&self) -> Result<u64> {
        AnalyzerRepository::new(self.pool.clone()).clear().await
    }

    /// Rough margin for a set of intended positions: quote value times lot
    /// size, summed. The closed adapter capability set has no margin call,
    /// so this is explicitly an estimate.
    pub async fn margin_estimate(
        &self,
        positions: &[(String, String, i32)],
    ) -> Result<MarginEstimate> {
        if positions.is_empty() {
            return Err(CoreError::PayloadInvalid(
                "positions must not be empty".to_string(),
            ));
        }
        if positions.len() > 50 {
            return Err(CoreError::PayloadInvalid(
                "at most 50 positions per margin request".to_string(),
            ));
        }

        let pairs: Vec<(String, String)> = positions
            .iter()
            .map(|(exchange, symbol, _)| (exchange.clone(), symbol.clone()))
            .collect();
        let quotes = self.quotes(pairs).await?;

        let mut total = 0.0;
        for (exchange, symbol, quantity) in positions {
            let ltp = quotes
                .iter()
                .find(|q| &q.exchange == exchange && &q.symbol == symbol)
                .map(|q| q.ltp)
                .unwrap_or(0.0);
            let lot_size = self
                .symbols
                .lookup(exchange, symbol)
                .map(|s| s.lot_size)
                .unwrap_or(1);
            total += ltp * (*quantity as f64) * lot_size as f64;
        }

        Ok(MarginEstimate {
            total_margin_required: total,
            estimated: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{OrderRequest, OrderSide};
    use crate::services::test_support::sandbox_services;

    #[tokio::test]
    async fn test_toggle_and_status() {
        let services = sandbox_services().await;

        let status = services.analyzer_status().await.unwrap();
        assert!(!status.analyze_mode);
        assert_eq!(status.mode, "live");
        assert_eq!(status.total_logs, 0);

        let status = services.toggle_analyzer(true).await.unwrap();
        assert!(status.analyze_mode);
        assert_eq!(status.mode, "analyze");
    }

    #[tokio::test]
    async fn test_intercepted_orders_logged() {
        let services = sandbox_services().await;
        services.toggle_analyzer(true).await.unwrap();

        let order = OrderRequest::market("TCS", "NSE", OrderSide::Buy, 10, "MIS");
        services.place_order(order).await.unwrap();

        let status = services.analyzer_status().await.unwrap();
        assert_eq!(status.total_logs, 1);

        let logs = services.analyzer_logs(10).await.unwrap();
        assert_eq!(logs[0].operation, "placeorder");
        assert_eq!(logs[0].decision, "simulated");

        services.clear_analyzer_logs().await.unwrap();
        assert_eq!(services.analyzer_status().await.unwrap().total_logs, 0);
    }

    #[tokio::test]
    async fn test_margin_estimate_bounds() {
        let services = sandbox_services().await;
        assert!(services.margin_estimate(&[]).await.is_err());

        let estimate = services
            .margin_estimate(&[("NSE".to_string(), "TCS".to_string(), 10)])
            .await
            .unwrap();
        assert!(estimate.estimated);
        assert!(estimate.total_margin_required > 0.0);
    }
}
