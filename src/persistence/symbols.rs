//! Symbol master repository
//!
//! Bulk refresh replaces the whole master inside one transaction; reads are
//! served from the in-memory index, so the table is only queried for rebuilds
//! and ad-hoc searches.

use super::models::SymbolRecord;
use super::DbPool;
use crate::domain::entities::symbol::SymbolInfo;
use crate::domain::errors::Result;

pub struct SymbolRepository {
    pool: DbPool,
}

fn to_entity(r: SymbolRecord) -> SymbolInfo {
    SymbolInfo {
        symbol: r.symbol,
        token: r.token,
        exchange: r.exchange,
        name: r.name,
        lot_size: r.lot_size as i32,
        tick_size: r.tick_size,
        instrument_type: r.instrument_type,
        expiry: r.expiry,
        strike: r.strike,
        option_type: r.option_type,
    }
}

const SELECT: &str = "SELECT symbol, token, exchange, name, lot_size, tick_size,
                             instrument_type, expiry, strike, option_type FROM symbols";

impl SymbolRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Replace the entire master with a freshly downloaded contract
    pub async fn replace_all(&self, symbols: &[SymbolInfo]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM symbols").execute(&mut *tx).await?;

        for s in symbols {
            sqlx::query(
                "INSERT INTO symbols
                    (symbol, token, exchange, name, lot_size, tick_size, instrument_type, expiry, strike, option_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(exchange, symbol) DO UPDATE SET
                    token = excluded.token,
                    name = excluded.name,
                    lot_size = excluded.lot_size,
                    tick_size = excluded.tick_size,
                    instrument_type = excluded.instrument_type,
                    expiry = excluded.expiry,
                    strike = excluded.strike,
                    option_type = excluded.option_type",
            )
            .bind(&s.symbol)
            .bind(&s.token)
            .bind(&s.exchange)
            .bind(&s.name)
            .bind(s.lot_size)
            .bind(s.tick_size)
            .bind(&s.instrument_type)
            .bind(&s.expiry)
            .bind(s.strike)
            .bind(&s.option_type)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!("symbol master refreshed with {} instruments", symbols.len());
        Ok(symbols.len())
    }

    pub async fn all(&self) -> Result<Vec<SymbolInfo>> {
        let records = sqlx::query_as::<_, SymbolRecord>(SELECT)
            .fetch_all(&self.pool)
            .await?;
        Ok(records.into_iter().map(to_entity).collect())
    }

    /// Substring search over symbol and name, optionally scoped to one
    /// exchange
    pub async fn search(
        &self,
        query: &str,
        exchange: Option<&str>,
        limit: i64,
    ) -> Result<Vec<SymbolInfo>> {
        let pattern = format!("%{}%", query.to_uppercase());
        let records = match exchange {
            Some(exchange) => {
                sqlx::query_as::<_, SymbolRecord>(&format!(
                    "{} WHERE (UPPER(symbol) LIKE ?1 OR UPPER(name) LIKE ?1) AND exchange = ?2
                     ORDER BY symbol LIMIT ?3",
                    SELECT
                ))
                .bind(&pattern)
                .bind(exchange)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SymbolRecord>(&format!(
                    "{} WHERE UPPER(symbol) LIKE ?1 OR UPPER(name) LIKE ?1
                     ORDER BY symbol LIMIT ?2",
                    SELECT
                ))
                .bind(&pattern)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(records.into_iter().map(to_entity).collect())
    }

    /// Distinct expiry dates for a derivative underlying
    pub async fn expiry_dates(
        &self,
        symbol: &str,
        exchange: &str,
        instrument_type: &str,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT expiry FROM symbols
             WHERE name = ?1 AND exchange = ?2 AND instrument_type = ?3 AND expiry IS NOT NULL
             ORDER BY expiry",
        )
        .bind(symbol)
        .bind(exchange)
        .bind(instrument_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM symbols")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    fn master() -> Vec<SymbolInfo> {
        vec![
            SymbolInfo::equity("RELIANCE", "NSE", "2885", "Reliance Industries", 1),
            SymbolInfo::equity("TCS", "NSE", "11536", "Tata Consultancy Services", 1),
            SymbolInfo::equity("RELIANCE", "BSE", "500325", "Reliance Industries", 1),
        ]
    }

    #[tokio::test]
    async fn test_replace_all_and_search() {
        let repo = SymbolRepository::new(memory_store().await);
        assert_eq!(repo.replace_all(&master()).await.unwrap(), 3);
        assert_eq!(repo.count().await.unwrap(), 3);

        let hits = repo.search("reli", None, 10).await.unwrap();
        assert_eq!(hits.len(), 2);

        let nse_only = repo.search("reli", Some("NSE"), 10).await.unwrap();
        assert_eq!(nse_only.len(), 1);
        assert_eq!(nse_only[0].token, "2885");
    }

    #[tokio::test]
    async fn test_refresh_replaces_previous_master() {
        let repo = SymbolRepository::new(memory_store().await);
        repo.replace_all(&master()).await.unwrap();

        let smaller = vec![SymbolInfo::equity("INFY", "NSE", "1594", "Infosys", 1)];
        repo.replace_all(&smaller).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.search("RELIANCE", None, 10).await.unwrap().is_empty());
    }
}
