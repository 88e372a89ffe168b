//! Sandbox account repository
//!
//! A self-contained simulated account: orders, trades, positions, holdings,
//! funds, and daily PnL, with configurable starting capital and a reset that
//! returns everything to that capital.

use super::models::{
    SandboxFundsRecord, SandboxHoldingRecord, SandboxOrderRecord, SandboxPositionRecord,
};
use super::DbPool;
use crate::domain::errors::Result;

pub struct SandboxRepository {
    pool: DbPool,
}

impl SandboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a filled order and its trade, and fold the fill into the
    /// position for (exchange, symbol, product). Quantity is signed on the
    /// position: buys add, sells subtract.
    pub async fn record_fill(
        &self,
        order_id: &str,
        symbol: &str,
        exchange: &str,
        side: &str,
        quantity: i64,
        price: f64,
        order_type: &str,
        product: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sandbox_orders (order_id, symbol, exchange, side, quantity, price, order_type, product, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'complete')",
        )
        .bind(order_id)
        .bind(symbol)
        .bind(exchange)
        .bind(side)
        .bind(quantity)
        .bind(price)
        .bind(order_type)
        .bind(product)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO sandbox_trades (trade_id, order_id, symbol, exchange, side, quantity, price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(order_id)
        .bind(symbol)
        .bind(exchange)
        .bind(side)
        .bind(quantity)
        .bind(price)
        .execute(&mut *tx)
        .await?;

        let signed = if side == "BUY" { quantity } else { -quantity };
        sqlx::query(
            "INSERT INTO sandbox_positions (symbol, exchange, product, quantity, average_price, ltp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(exchange, symbol, product) DO UPDATE SET
                average_price = CASE
                    WHEN (sandbox_positions.quantity + ?4) = 0 THEN 0
                    WHEN sandbox_positions.quantity = 0 THEN ?5
                    ELSE (sandbox_positions.average_price * sandbox_positions.quantity + ?5 * ?4)
                         / (sandbox_positions.quantity + ?4)
                    END,
                quantity = sandbox_positions.quantity + ?4,
                ltp = ?5",
        )
        .bind(symbol)
        .bind(exchange)
        .bind(product)
        .bind(signed)
        .bind(price)
        .execute(&mut *tx)
        .await?;

        let cash_delta = if side == "BUY" {
            -(quantity as f64 * price)
        } else {
            quantity as f64 * price
        };
        sqlx::query("UPDATE sandbox_funds SET available_cash = available_cash + ?1 WHERE id = 1")
            .bind(cash_delta)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn orders(&self) -> Result<Vec<SandboxOrderRecord>> {
        let records = sqlx::query_as::<_, SandboxOrderRecord>(
            "SELECT * FROM sandbox_orders ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Option<SandboxOrderRecord>> {
        let record = sqlx::query_as::<_, SandboxOrderRecord>(
            "SELECT * FROM sandbox_orders WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sandbox_orders SET status = 'cancelled'
             WHERE order_id = ?1 AND status NOT IN ('complete', 'cancelled')",
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn positions(&self) -> Result<Vec<SandboxPositionRecord>> {
        let records = sqlx::query_as::<_, SandboxPositionRecord>(
            "SELECT symbol, exchange, product, quantity, average_price, ltp
             FROM sandbox_positions WHERE quantity != 0",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn position(
        &self,
        exchange: &str,
        symbol: &str,
        product: &str,
    ) -> Result<Option<SandboxPositionRecord>> {
        let record = sqlx::query_as::<_, SandboxPositionRecord>(
            "SELECT symbol, exchange, product, quantity, average_price, ltp
             FROM sandbox_positions WHERE exchange = ?1 AND symbol = ?2 AND product = ?3",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(product)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn holdings(&self) -> Result<Vec<SandboxHoldingRecord>> {
        let records = sqlx::query_as::<_, SandboxHoldingRecord>(
            "SELECT symbol, exchange, quantity, average_price, ltp FROM sandbox_holdings",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn funds(&self) -> Result<SandboxFundsRecord> {
        let record = sqlx::query_as::<_, SandboxFundsRecord>(
            "SELECT available_cash, used_margin, starting_capital, last_reset_at
             FROM sandbox_funds WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn set_starting_capital(&self, capital: f64) -> Result<()> {
        sqlx::query("UPDATE sandbox_funds SET starting_capital = ?1 WHERE id = 1")
            .bind(capital)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Wipe the simulated account back to its starting capital
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sandbox_orders").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sandbox_trades").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sandbox_positions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sandbox_holdings").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sandbox_daily_pnl").execute(&mut *tx).await?;
        sqlx::query(
            "UPDATE sandbox_funds SET available_cash = starting_capital, used_margin = 0,
                    last_reset_at = datetime('now')
             WHERE id = 1",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("sandbox account reset");
        Ok(())
    }

    pub async fn record_daily_pnl(&self, date: &str, realized: f64, unrealized: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO sandbox_daily_pnl (date, realized_pnl, unrealized_pnl)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(date) DO UPDATE SET
                realized_pnl = excluded.realized_pnl,
                unrealized_pnl = excluded.unrealized_pnl",
        )
        .bind(date)
        .bind(realized)
        .bind(unrealized)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
