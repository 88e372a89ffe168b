//! Order operations
//!
//! Placement, amendment, cancellation, and the composed order kinds: smart
//! (target absolute position), basket, and split. When analyzer mode is on,
//! every write is intercepted, logged, and answered with a synthetic receipt
//! without touching the broker adapter.

use super::Services;
use crate::domain::entities::order::{
    ModifyOrderRequest, Order, OrderReceipt, OrderRequest, OrderSide,
};
use crate::domain::errors::Result;
use crate::ipc::events::Event;
use crate::persistence::analyzer::AnalyzerRepository;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Target-position order: `position_size` is the desired absolute signed
/// position for (symbol, product), not a delta.
#[derive(Debug, Clone, Deserialize)]
pub struct SmartOrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub action: OrderSide,
    pub position_size: i32,
    pub product: String,
    pub pricetype: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmartOrderResult {
    pub order_id: Option<String>,
    /// "BUY", "SELL", or "NONE"
    pub action_taken: String,
    pub quantity: i32,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitOrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub action: OrderSide,
    pub quantity: i32,
    pub split_size: i32,
    pub product: String,
    pub pricetype: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitOrderResult {
    pub total_quantity: i32,
    pub split_size: i32,
    pub num_orders: i32,
    pub order_ids: Vec<String>,
    pub failed_orders: Vec<String>,
}

/// Compensating action to move `current` to the target implied by
/// (`target_size`, `side`). BUY targets a long of `target_size`; SELL
/// targets a short of the same magnitude.
pub(crate) fn smart_delta(current: i32, target_size: i32, side: OrderSide) -> (Option<OrderSide>, i32) {
    let target = match side {
        OrderSide::Buy => target_size,
        OrderSide::Sell => -target_size,
    };
    match target.cmp(&current) {
        std::cmp::Ordering::Greater => (Some(OrderSide::Buy), target - current),
        std::cmp::Ordering::Less => (Some(OrderSide::Sell), current - target),
        std::cmp::Ordering::Equal => (None, 0),
    }
}

impl Services {
    /// Place an order through the active broker (or the analyzer when on)
    pub async fn place_order(&self, order: OrderRequest) -> Result<OrderReceipt> {
        self.place_order_tagged(order, None).await
    }

    /// Same as [`Services::place_order`], with batch tagging on the emitted
    /// order event
    async fn place_order_tagged(
        &self,
        order: OrderRequest,
        batch: Option<(bool, bool)>,
    ) -> Result<OrderReceipt> {
        order.validate()?;

        if self.analyzer_on() {
            return self.analyzer_intercept("placeorder", &order).await;
        }

        let (broker, session) = self.resolve_active()?;
        let receipt = self
            .with_deadline(broker.place_order(&session.auth_token, &order))
            .await?;

        info!(
            "order {} placed: {} {} x{}",
            receipt.order_id, order.side, order.symbol, order.quantity
        );
        self.bus.emit(Event::OrderEvent {
            symbol: order.symbol.clone(),
            action: order.side.to_string(),
            order_id: receipt.order_id.clone(),
            batch_order: batch.map(|(b, _)| b),
            is_last_order: batch.map(|(_, last)| last),
        });
        Ok(receipt)
    }

    pub async fn modify_order(
        &self,
        order_id: &str,
        changes: ModifyOrderRequest,
    ) -> Result<OrderReceipt> {
        if self.analyzer_on() {
            let request = serde_json::json!({ "orderid": order_id, "changes": changes });
            return self.analyzer_receipt("modifyorder", request).await;
        }

        let (broker, session) = self.resolve_active()?;
        self.with_deadline(broker.modify_order(&session.auth_token, order_id, &changes))
            .await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if self.analyzer_on() {
            let request = serde_json::json!({ "orderid": order_id });
            self.analyzer_receipt("cancelorder", request).await?;
            return Ok(());
        }

        let (broker, session) = self.resolve_active()?;
        self.with_deadline(broker.cancel_order(&session.auth_token, order_id))
            .await
    }

    /// Cancel every open order. Partial failure is reported per order, not
    /// collapsed into one error.
    pub async fn cancel_all_orders(&self) -> Result<Vec<(String, Option<String>)>> {
        if self.analyzer_on() {
            self.analyzer_receipt("cancelallorder", serde_json::json!({}))
                .await?;
            return Ok(Vec::new());
        }

        let (broker, session) = self.resolve_active()?;
        let book = self
            .read_with_retry(|| broker.get_order_book(&session.auth_token))
            .await?;

        let open: Vec<Order> = book
            .into_iter()
            .filter(|o| matches!(o.status.as_str(), "open" | "pending" | "trigger pending"))
            .collect();

        let mut results = Vec::with_capacity(open.len());
        for order in open {
            let outcome = self
                .with_deadline(broker.cancel_order(&session.auth_token, &order.order_id))
                .await;
            results.push((order.order_id, outcome.err().map(|e| e.to_string())));
        }
        Ok(results)
    }

    /// Close every open position with compensating market orders
    pub async fn close_all_positions(&self) -> Result<Vec<OrderReceipt>> {
        if self.analyzer_on() {
            self.analyzer_receipt("closeposition", serde_json::json!({}))
                .await?;
            return Ok(Vec::new());
        }

        let (broker, session) = self.resolve_active()?;
        let positions = self
            .read_with_retry(|| broker.get_positions(&session.auth_token))
            .await?;

        let mut receipts = Vec::new();
        for position in positions.into_iter().filter(|p| p.quantity != 0) {
            let side = if position.quantity > 0 {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let order = OrderRequest::market(
                position.symbol,
                position.exchange,
                side,
                position.quantity.abs(),
                position.product,
            );
            let receipt = self
                .with_deadline(broker.place_order(&session.auth_token, &order))
                .await?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }

    /// Smart order: compute the delta between the current per-product
    /// position and the target absolute position, and issue the
    /// compensating order.
    pub async fn place_smart_order(&self, req: SmartOrderRequest) -> Result<SmartOrderResult> {
        info!(
            "smart order: {} {} target={}",
            req.symbol, req.action, req.position_size
        );

        if self.analyzer_on() {
            let receipt = self
                .analyzer_receipt("placesmartorder", serde_json::to_value(&SmartOrderEcho::from(&req))?)
                .await?;
            return Ok(SmartOrderResult {
                order_id: Some(receipt.order_id),
                action_taken: req.action.to_string(),
                quantity: req.position_size.abs(),
                message: "simulated".to_string(),
            });
        }

        let current = self
            .open_position(&req.exchange, &req.symbol, &req.product)
            .await?
            .map(|p| p.quantity)
            .unwrap_or(0);

        let (action, quantity) = smart_delta(current, req.position_size, req.action);

        let Some(action) = action else {
            return Ok(SmartOrderResult {
                order_id: None,
                action_taken: "NONE".to_string(),
                quantity: 0,
                message: format!("already at target, current position {}", current),
            });
        };

        let mut order = OrderRequest::market(
            req.symbol.clone(),
            req.exchange.clone(),
            action,
            quantity,
            req.product.clone(),
        );
        if let Some(pricetype) = req.pricetype {
            order.order_type = pricetype;
        }
        if let Some(price) = req.price {
            order.price = price;
        }

        let receipt = self.place_order(order).await?;
        Ok(SmartOrderResult {
            order_id: Some(receipt.order_id),
            action_taken: action.to_string(),
            quantity,
            message: format!("moved position {} -> target", current),
        })
    }

    /// Place several orders in sequence, tagging the order events as a batch
    pub async fn place_basket_order(
        &self,
        orders: Vec<OrderRequest>,
    ) -> Result<Vec<std::result::Result<OrderReceipt, String>>> {
        let total = orders.len();
        let mut results = Vec::with_capacity(total);

        for (index, order) in orders.into_iter().enumerate() {
            let outcome = self
                .place_order_tagged(order, Some((true, index + 1 == total)))
                .await;
            results.push(outcome.map_err(|e| e.to_string()));
        }
        Ok(results)
    }

    /// Break one large order into chunks of `split_size`. Each chunk is
    /// at-most-once; a failed chunk is reported and the rest continue.
    pub async fn place_split_order(&self, req: SplitOrderRequest) -> Result<SplitOrderResult> {
        let split_size = if req.split_size > 0 { req.split_size } else { 100 };
        let num_orders = (req.quantity + split_size - 1) / split_size;

        let mut order_ids = Vec::new();
        let mut failed_orders = Vec::new();
        let mut remaining = req.quantity;

        for index in 0..num_orders {
            let quantity = remaining.min(split_size);
            remaining -= quantity;

            let mut order = OrderRequest::market(
                req.symbol.clone(),
                req.exchange.clone(),
                req.action,
                quantity,
                req.product.clone(),
            );
            if let Some(pricetype) = &req.pricetype {
                order.order_type = pricetype.clone();
            }
            if let Some(price) = req.price {
                order.price = price;
            }

            match self.place_order(order).await {
                Ok(receipt) => order_ids.push(receipt.order_id),
                Err(e) => failed_orders.push(format!("chunk {}: {}", index + 1, e)),
            }
        }

        Ok(SplitOrderResult {
            total_quantity: req.quantity,
            split_size,
            num_orders,
            order_ids,
            failed_orders,
        })
    }

    /// Status of one order, looked up in the order book
    pub async fn order_status(&self, order_id: &str) -> Result<Option<Order>> {
        let (broker, session) = self.resolve_active()?;
        let book = self
            .read_with_retry(|| broker.get_order_book(&session.auth_token))
            .await?;
        Ok(book.into_iter().find(|o| o.order_id == order_id))
    }

    // ---- analyzer interception ------------------------------------------

    async fn analyzer_intercept(&self, operation: &str, order: &OrderRequest) -> Result<OrderReceipt> {
        let request = serde_json::to_value(order)?;
        self.analyzer_receipt(operation, request).await
    }

    pub(crate) async fn analyzer_receipt(
        &self,
        operation: &str,
        request: serde_json::Value,
    ) -> Result<OrderReceipt> {
        let analyzer = AnalyzerRepository::new(self.pool.clone());
        analyzer.log(None, operation, &request, "simulated").await?;

        let order_id = format!("AN-{}", uuid::Uuid::new_v4().simple());
        info!("analyzer intercepted {} -> {}", operation, order_id);
        Ok(OrderReceipt {
            order_id,
            message: Some("analyzer mode: order simulated".to_string()),
        })
    }
}

/// Serializable echo of a smart order for the analyzer log
#[derive(Serialize)]
struct SmartOrderEcho {
    symbol: String,
    exchange: String,
    action: String,
    position_size: i32,
    product: String,
}

impl From<&SmartOrderRequest> for SmartOrderEcho {
    fn from(req: &SmartOrderRequest) -> Self {
        Self {
            symbol: req.symbol.clone(),
            exchange: req.exchange.clone(),
            action: req.action.to_string(),
            position_size: req.position_size,
            product: req.product.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::sandbox_services;

    #[test]
    fn test_smart_delta_matrix() {
        // BUY: target long 10
        assert_eq!(smart_delta(0, 10, OrderSide::Buy), (Some(OrderSide::Buy), 10));
        assert_eq!(smart_delta(4, 10, OrderSide::Buy), (Some(OrderSide::Buy), 6));
        assert_eq!(smart_delta(15, 10, OrderSide::Buy), (Some(OrderSide::Sell), 5));
        assert_eq!(smart_delta(10, 10, OrderSide::Buy), (None, 0));

        // SELL: target short 10 (position -10)
        assert_eq!(smart_delta(0, 10, OrderSide::Sell), (Some(OrderSide::Sell), 10));
        assert_eq!(smart_delta(-4, 10, OrderSide::Sell), (Some(OrderSide::Sell), 6));
        assert_eq!(smart_delta(-15, 10, OrderSide::Sell), (Some(OrderSide::Buy), 5));
        assert_eq!(smart_delta(-10, 10, OrderSide::Sell), (None, 0));

        // Crossing zero goes through in one compensating order.
        assert_eq!(smart_delta(-5, 10, OrderSide::Buy), (Some(OrderSide::Buy), 15));
    }

    #[tokio::test]
    async fn test_place_order_via_sandbox() {
        let services = sandbox_services().await;
        let mut order = OrderRequest::market("TCS", "NSE", OrderSide::Buy, 10, "MIS");
        order.price = 100.0;

        let receipt = services.place_order(order).await.unwrap();
        assert!(!receipt.order_id.is_empty());

        let status = services.order_status(&receipt.order_id).await.unwrap();
        assert!(status.is_some());
    }

    #[tokio::test]
    async fn test_smart_order_moves_to_target() {
        let services = sandbox_services().await;

        let result = services
            .place_smart_order(SmartOrderRequest {
                symbol: "TCS".to_string(),
                exchange: "NSE".to_string(),
                action: OrderSide::Buy,
                position_size: 10,
                product: "MIS".to_string(),
                pricetype: None,
                price: Some(100.0),
            })
            .await
            .unwrap();
        assert_eq!(result.action_taken, "BUY");
        assert_eq!(result.quantity, 10);

        // Same target again: no action.
        let repeat = services
            .place_smart_order(SmartOrderRequest {
                symbol: "TCS".to_string(),
                exchange: "NSE".to_string(),
                action: OrderSide::Buy,
                position_size: 10,
                product: "MIS".to_string(),
                pricetype: None,
                price: Some(100.0),
            })
            .await
            .unwrap();
        assert_eq!(repeat.action_taken, "NONE");
        assert!(repeat.order_id.is_none());
    }

    #[tokio::test]
    async fn test_split_order_chunks() {
        let services = sandbox_services().await;
        let result = services
            .place_split_order(SplitOrderRequest {
                symbol: "TCS".to_string(),
                exchange: "NSE".to_string(),
                action: OrderSide::Buy,
                quantity: 250,
                split_size: 100,
                product: "MIS".to_string(),
                pricetype: None,
                price: Some(10.0),
            })
            .await
            .unwrap();

        assert_eq!(result.num_orders, 3);
        assert_eq!(result.order_ids.len(), 3);
        assert!(result.failed_orders.is_empty());
    }

    #[tokio::test]
    async fn test_analyzer_intercepts_orders() {
        let services = sandbox_services().await;
        services.set_analyzer(true);

        let order = OrderRequest::market("TCS", "NSE", OrderSide::Buy, 10, "MIS");
        let receipt = services.place_order(order).await.unwrap();
        assert!(receipt.order_id.starts_with("AN-"));

        // The sandbox book stays empty: the adapter was never called.
        services.set_analyzer(false);
        let (broker, session) = services.resolve_active().unwrap();
        assert!(broker.get_order_book(&session.auth_token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_active_broker_error() {
        let services = sandbox_services().await;
        services.custodian.revoke().await.unwrap();

        let order = OrderRequest::market("TCS", "NSE", OrderSide::Buy, 1, "MIS");
        assert!(matches!(
            services.place_order(order).await,
            Err(crate::domain::errors::CoreError::NoActiveBroker)
        ));
    }
}
