//! Sandbox broker adapter
//!
//! A complete `BrokerClient` implementation backed by the local sandbox
//! tables. Orders fill immediately at the requested price (or the last known
//! position price for market orders); no network is involved, which also
//! makes it the adapter of choice for end-to-end tests.

use crate::domain::entities::market::{
    DepthLevel, Funds, Holding, MarketDepth, MarketTick, Position, Quote,
};
use crate::domain::entities::order::{
    ModifyOrderRequest, Order, OrderReceipt, OrderRequest,
};
use crate::domain::entities::symbol::SymbolInfo;
use crate::domain::errors::{CoreError, Result};
use crate::domain::repositories::broker_client::{AuthResponse, BrokerClient, BrokerCredentials};
use crate::persistence::sandbox::SandboxRepository;
use crate::persistence::DbPool;
use async_trait::async_trait;
use tokio::sync::mpsc;

const DEFAULT_FILL_PRICE: f64 = 100.0;

pub struct SandboxBroker {
    sandbox: SandboxRepository,
}

impl SandboxBroker {
    pub fn new(pool: DbPool) -> Self {
        Self {
            sandbox: SandboxRepository::new(pool),
        }
    }

    fn fill_price(&self, order: &OrderRequest) -> f64 {
        if order.price > 0.0 {
            order.price
        } else {
            DEFAULT_FILL_PRICE
        }
    }
}

#[async_trait]
impl BrokerClient for SandboxBroker {
    fn id(&self) -> &'static str {
        "sandbox"
    }

    fn name(&self) -> &'static str {
        "Sandbox"
    }

    async fn authenticate(&self, _credentials: BrokerCredentials) -> Result<AuthResponse> {
        Ok(AuthResponse {
            auth_token: format!("sandbox-{}", uuid::Uuid::new_v4()),
            feed_token: None,
            user_id: "SANDBOX".to_string(),
        })
    }

    async fn place_order(&self, _auth_token: &str, order: &OrderRequest) -> Result<OrderReceipt> {
        order.validate()?;

        let order_id = uuid::Uuid::new_v4().to_string();
        let price = self.fill_price(order);

        self.sandbox
            .record_fill(
                &order_id,
                &order.symbol,
                &order.exchange,
                &order.side.to_string(),
                order.quantity as i64,
                price,
                &order.order_type,
                &order.product,
            )
            .await?;

        Ok(OrderReceipt {
            order_id,
            message: Some("filled in sandbox".to_string()),
        })
    }

    async fn modify_order(
        &self,
        _auth_token: &str,
        order_id: &str,
        _changes: &ModifyOrderRequest,
    ) -> Result<OrderReceipt> {
        // Sandbox fills are immediate, so there is never a working order to
        // amend.
        Err(CoreError::Upstream {
            code: "SANDBOX".to_string(),
            message: format!("order {} already complete", order_id),
        })
    }

    async fn cancel_order(&self, _auth_token: &str, order_id: &str) -> Result<()> {
        if self.sandbox.cancel_order(order_id).await? {
            Ok(())
        } else {
            Err(CoreError::Upstream {
                code: "SANDBOX".to_string(),
                message: format!("order {} not open", order_id),
            })
        }
    }

    async fn get_order_book(&self, _auth_token: &str) -> Result<Vec<Order>> {
        let orders = self.sandbox.orders().await?;
        Ok(orders
            .into_iter()
            .map(|o| Order {
                order_id: o.order_id,
                exchange_order_id: None,
                symbol: o.symbol,
                exchange: o.exchange,
                side: o.side,
                quantity: o.quantity as i32,
                filled_quantity: o.quantity as i32,
                pending_quantity: 0,
                price: o.price,
                trigger_price: 0.0,
                average_price: o.price,
                order_type: o.order_type,
                product: o.product,
                status: o.status,
                validity: "DAY".to_string(),
                order_timestamp: o.created_at,
                rejection_reason: None,
            })
            .collect())
    }

    async fn get_trade_book(&self, auth_token: &str) -> Result<Vec<Order>> {
        // Every sandbox order fills in one trade.
        self.get_order_book(auth_token).await
    }

    async fn get_positions(&self, _auth_token: &str) -> Result<Vec<Position>> {
        let positions = self.sandbox.positions().await?;
        Ok(positions
            .into_iter()
            .map(|p| Position {
                symbol: p.symbol,
                exchange: p.exchange,
                product: p.product,
                quantity: p.quantity as i32,
                average_price: p.average_price,
                ltp: p.ltp,
                pnl: (p.ltp - p.average_price) * p.quantity as f64,
            })
            .collect())
    }

    async fn get_holdings(&self, _auth_token: &str) -> Result<Vec<Holding>> {
        let holdings = self.sandbox.holdings().await?;
        Ok(holdings
            .into_iter()
            .map(|h| {
                let pnl = (h.ltp - h.average_price) * h.quantity as f64;
                let pnl_percentage = if h.average_price > 0.0 {
                    (h.ltp - h.average_price) / h.average_price * 100.0
                } else {
                    0.0
                };
                Holding {
                    symbol: h.symbol,
                    exchange: h.exchange,
                    quantity: h.quantity as i32,
                    average_price: h.average_price,
                    ltp: h.ltp,
                    pnl,
                    pnl_percentage,
                }
            })
            .collect())
    }

    async fn get_funds(&self, _auth_token: &str) -> Result<Funds> {
        let funds = self.sandbox.funds().await?;
        Ok(Funds {
            available_cash: funds.available_cash,
            used_margin: funds.used_margin,
            total_margin: funds.available_cash + funds.used_margin,
            collateral: 0.0,
        })
    }

    async fn get_quotes(
        &self,
        _auth_token: &str,
        symbols: &[(String, String)],
    ) -> Result<Vec<Quote>> {
        // The sandbox has no market feed; quotes reflect the last fill for
        // the symbol, or the default fill price.
        let mut quotes = Vec::with_capacity(symbols.len());
        for (exchange, symbol) in symbols {
            let ltp = self
                .sandbox
                .position(exchange, symbol, "MIS")
                .await?
                .map(|p| p.ltp)
                .unwrap_or(DEFAULT_FILL_PRICE);
            quotes.push(Quote {
                symbol: symbol.clone(),
                exchange: exchange.clone(),
                ltp,
                open: ltp,
                high: ltp,
                low: ltp,
                close: ltp,
                volume: 0,
                bid: ltp - 0.05,
                ask: ltp + 0.05,
                oi: 0,
            });
        }
        Ok(quotes)
    }

    async fn get_market_depth(
        &self,
        auth_token: &str,
        exchange: &str,
        symbol: &str,
    ) -> Result<MarketDepth> {
        let quotes = self
            .get_quotes(
                auth_token,
                &[(exchange.to_string(), symbol.to_string())],
            )
            .await?;
        let ltp = quotes.first().map(|q| q.ltp).unwrap_or(DEFAULT_FILL_PRICE);

        let level = |price: f64| DepthLevel {
            price,
            quantity: 100,
            orders: 1,
        };
        Ok(MarketDepth {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            bids: (1..=5).map(|i| level(ltp - 0.05 * i as f64)).collect(),
            asks: (1..=5).map(|i| level(ltp + 0.05 * i as f64)).collect(),
        })
    }

    async fn download_master_contract(&self, _auth_token: &str) -> Result<Vec<SymbolInfo>> {
        // A small fixed universe keeps the sandbox usable offline.
        Ok(vec![
            SymbolInfo::equity("RELIANCE", "NSE", "2885", "Reliance Industries", 1),
            SymbolInfo::equity("TCS", "NSE", "11536", "Tata Consultancy Services", 1),
            SymbolInfo::equity("INFY", "NSE", "1594", "Infosys", 1),
            SymbolInfo::equity("HDFCBANK", "NSE", "1333", "HDFC Bank", 1),
            SymbolInfo::equity("SBIN", "NSE", "3045", "State Bank of India", 1),
        ])
    }

    async fn logout(&self, _auth_token: &str) -> Result<()> {
        Ok(())
    }

    async fn open_market_stream(&self, _feed_token: &str) -> Result<mpsc::Receiver<MarketTick>> {
        // No feed; the channel closes immediately after creation.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderSide;
    use crate::persistence::memory_store;

    async fn broker() -> SandboxBroker {
        SandboxBroker::new(memory_store().await)
    }

    #[tokio::test]
    async fn test_order_fills_and_appears_in_books() {
        let broker = broker().await;
        let mut order = OrderRequest::market("TCS", "NSE", OrderSide::Buy, 10, "MIS");
        order.price = 3500.0;

        let receipt = broker.place_order("t", &order).await.unwrap();
        assert!(!receipt.order_id.is_empty());

        let book = broker.get_order_book("t").await.unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(book[0].status, "complete");

        let positions = broker.get_positions("t").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 10);

        let funds = broker.get_funds("t").await.unwrap();
        assert_eq!(funds.available_cash, 1_000_000.0 - 35_000.0);
    }

    #[tokio::test]
    async fn test_authenticate_issues_token() {
        let broker = broker().await;
        let auth = broker
            .authenticate(BrokerCredentials::default())
            .await
            .unwrap();
        assert!(auth.auth_token.starts_with("sandbox-"));
    }

    #[tokio::test]
    async fn test_master_contract_nonempty() {
        let broker = broker().await;
        let master = broker.download_master_contract("t").await.unwrap();
        assert!(master.len() >= 5);
    }
}
