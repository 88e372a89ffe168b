//! Strategy repository
//!
//! Strategies are soft-deleted: a deleted row stops matching webhook lookups
//! but keeps its history attributable.

use super::models::{StrategyRecord, SymbolMappingRecord};
use super::DbPool;
use crate::domain::entities::strategy::{AlertPlatform, Strategy, SymbolMapping};
use crate::domain::errors::{CoreError, Result};

pub struct StrategyRepository {
    pool: DbPool,
}

/// Fields for a new strategy
pub struct NewStrategy {
    pub name: String,
    pub exchange: String,
    pub symbol: String,
    pub product: String,
    pub quantity: i32,
    pub platform: AlertPlatform,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

fn to_entity(r: StrategyRecord) -> Strategy {
    Strategy {
        id: r.id,
        name: r.name,
        webhook_id: r.webhook_id,
        exchange: r.exchange,
        symbol: r.symbol,
        product: r.product,
        quantity: r.quantity as i32,
        enabled: r.enabled != 0,
        platform: AlertPlatform::parse(&r.platform),
        window_start: r.window_start,
        window_end: r.window_end,
    }
}

impl StrategyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a strategy with a freshly minted webhook id
    pub async fn create(&self, new: NewStrategy) -> Result<Strategy> {
        let webhook_id = uuid::Uuid::new_v4().to_string();
        let record = sqlx::query_as::<_, StrategyRecord>(
            "INSERT INTO strategies
                (name, webhook_id, exchange, symbol, product, quantity, platform, window_start, window_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING id, name, webhook_id, exchange, symbol, product, quantity, enabled,
                       platform, window_start, window_end, deleted",
        )
        .bind(&new.name)
        .bind(&webhook_id)
        .bind(&new.exchange)
        .bind(&new.symbol)
        .bind(&new.product)
        .bind(new.quantity)
        .bind(new.platform.as_str())
        .bind(&new.window_start)
        .bind(&new.window_end)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("created strategy '{}' webhook_id={}", record.name, record.webhook_id);
        Ok(to_entity(record))
    }

    pub async fn find_by_webhook_id(&self, webhook_id: &str) -> Result<Option<Strategy>> {
        let record = sqlx::query_as::<_, StrategyRecord>(
            "SELECT id, name, webhook_id, exchange, symbol, product, quantity, enabled,
                    platform, window_start, window_end, deleted
             FROM strategies WHERE webhook_id = ?1 AND deleted = 0",
        )
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(to_entity))
    }

    pub async fn get(&self, id: i64) -> Result<Strategy> {
        let record = sqlx::query_as::<_, StrategyRecord>(
            "SELECT id, name, webhook_id, exchange, symbol, product, quantity, enabled,
                    platform, window_start, window_end, deleted
             FROM strategies WHERE id = ?1 AND deleted = 0",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("strategy {}", id)))?;
        Ok(to_entity(record))
    }

    pub async fn list(&self) -> Result<Vec<Strategy>> {
        let records = sqlx::query_as::<_, StrategyRecord>(
            "SELECT id, name, webhook_id, exchange, symbol, product, quantity, enabled,
                    platform, window_start, window_end, deleted
             FROM strategies WHERE deleted = 0 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(to_entity).collect())
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE strategies SET enabled = ?1, updated_at = datetime('now')
             WHERE id = ?2 AND deleted = 0",
        )
        .bind(enabled as i32)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("strategy {}", id)));
        }
        Ok(())
    }

    pub async fn soft_delete(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE strategies SET deleted = 1, enabled = 0, updated_at = datetime('now')
             WHERE id = ?1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- symbol mappings -------------------------------------------------

    pub async fn add_mapping(
        &self,
        strategy_id: i64,
        exchange: &str,
        symbol: &str,
        quantity: i32,
        product: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO strategy_symbol_mappings (strategy_id, exchange, symbol, quantity, product)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(strategy_id, symbol) DO UPDATE SET
                exchange = excluded.exchange,
                quantity = excluded.quantity,
                product = excluded.product",
        )
        .bind(strategy_id)
        .bind(exchange)
        .bind(symbol)
        .bind(quantity)
        .bind(product)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_mapping(
        &self,
        strategy_id: i64,
        symbol: &str,
    ) -> Result<Option<SymbolMapping>> {
        let record = sqlx::query_as::<_, SymbolMappingRecord>(
            "SELECT id, strategy_id, exchange, symbol, quantity, product
             FROM strategy_symbol_mappings WHERE strategy_id = ?1 AND symbol = ?2",
        )
        .bind(strategy_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(|r| SymbolMapping {
            id: r.id,
            strategy_id: r.strategy_id,
            exchange: r.exchange,
            symbol: r.symbol,
            quantity: r.quantity as i32,
            product: r.product,
        }))
    }

    pub async fn list_mappings(&self, strategy_id: i64) -> Result<Vec<SymbolMapping>> {
        let records = sqlx::query_as::<_, SymbolMappingRecord>(
            "SELECT id, strategy_id, exchange, symbol, quantity, product
             FROM strategy_symbol_mappings WHERE strategy_id = ?1 ORDER BY symbol",
        )
        .bind(strategy_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records
            .into_iter()
            .map(|r| SymbolMapping {
                id: r.id,
                strategy_id: r.strategy_id,
                exchange: r.exchange,
                symbol: r.symbol,
                quantity: r.quantity as i32,
                product: r.product,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    fn sample() -> NewStrategy {
        NewStrategy {
            name: "breakout".to_string(),
            exchange: "NSE".to_string(),
            symbol: "RELIANCE".to_string(),
            product: "MIS".to_string(),
            quantity: 1,
            platform: AlertPlatform::Tradingview,
            window_start: None,
            window_end: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_webhook_id() {
        let repo = StrategyRepository::new(memory_store().await);
        let created = repo.create(sample()).await.unwrap();

        assert!(uuid::Uuid::parse_str(&created.webhook_id).is_ok());
        assert!(created.enabled);

        let found = repo
            .find_by_webhook_id(&created.webhook_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert!(repo.find_by_webhook_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_lookup() {
        let repo = StrategyRepository::new(memory_store().await);
        let created = repo.create(sample()).await.unwrap();

        repo.soft_delete(created.id).await.unwrap();
        assert!(repo
            .find_by_webhook_id(&created.webhook_id)
            .await
            .unwrap()
            .is_none());
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mappings() {
        let repo = StrategyRepository::new(memory_store().await);
        let created = repo.create(sample()).await.unwrap();

        repo.add_mapping(created.id, "NSE", "TCS", 5, "CNC")
            .await
            .unwrap();
        repo.add_mapping(created.id, "NSE", "TCS", 10, "CNC")
            .await
            .unwrap();

        let mapping = repo.find_mapping(created.id, "TCS").await.unwrap().unwrap();
        assert_eq!(mapping.quantity, 10);
        assert_eq!(repo.list_mappings(created.id).await.unwrap().len(), 1);
        assert!(repo.find_mapping(created.id, "INFY").await.unwrap().is_none());
    }
}
