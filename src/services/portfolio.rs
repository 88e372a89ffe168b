//! Portfolio reads
//!
//! Order book, trade book, positions, holdings, and funds. All idempotent
//! reads, so a single timed-out attempt earns one retry with jitter.

use super::Services;
use crate::domain::entities::market::{Funds, Holding, Position};
use crate::domain::entities::order::Order;
use crate::domain::errors::Result;

impl Services {
    pub async fn order_book(&self) -> Result<Vec<Order>> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_order_book(&session.auth_token))
            .await
    }

    pub async fn trade_book(&self) -> Result<Vec<Order>> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_trade_book(&session.auth_token))
            .await
    }

    pub async fn positions(&self) -> Result<Vec<Position>> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_positions(&session.auth_token))
            .await
    }

    pub async fn holdings(&self) -> Result<Vec<Holding>> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_holdings(&session.auth_token))
            .await
    }

    pub async fn funds(&self) -> Result<Funds> {
        let (broker, session) = self.resolve_active()?;
        self.read_with_retry(|| broker.get_funds(&session.auth_token))
            .await
    }

    /// Position for one (exchange, symbol, product), if open
    pub async fn open_position(
        &self,
        exchange: &str,
        symbol: &str,
        product: &str,
    ) -> Result<Option<Position>> {
        let positions = self.positions().await?;
        Ok(positions.into_iter().find(|p| {
            p.exchange == exchange && p.symbol == symbol && p.product == product
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{OrderRequest, OrderSide};
    use crate::services::test_support::sandbox_services;

    #[tokio::test]
    async fn test_portfolio_reads_after_fill() {
        let services = sandbox_services().await;
        let mut order = OrderRequest::market("TCS", "NSE", OrderSide::Buy, 10, "MIS");
        order.price = 100.0;
        services.place_order(order).await.unwrap();

        assert_eq!(services.order_book().await.unwrap().len(), 1);
        assert_eq!(services.trade_book().await.unwrap().len(), 1);
        assert_eq!(services.positions().await.unwrap().len(), 1);

        let funds = services.funds().await.unwrap();
        assert!(funds.available_cash < 1_000_000.0);

        let open = services
            .open_position("NSE", "TCS", "MIS")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.quantity, 10);

        assert!(services
            .open_position("NSE", "INFY", "MIS")
            .await
            .unwrap()
            .is_none());
    }
}
