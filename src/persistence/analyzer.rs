//! Analyzer log repository
//!
//! Write-only audit of simulated executions while analyzer mode is on.

use super::models::AnalyzerLogRecord;
use super::DbPool;
use crate::domain::errors::Result;

pub struct AnalyzerRepository {
    pool: DbPool,
}

impl AnalyzerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn log(
        &self,
        strategy_id: Option<i64>,
        operation: &str,
        request: &serde_json::Value,
        decision: &str,
    ) -> Result<i64> {
        let request_json = serde_json::to_string(request)?;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO analyzer_logs (strategy_id, operation, request_json, decision)
             VALUES (?1, ?2, ?3, ?4) RETURNING id",
        )
        .bind(strategy_id)
        .bind(operation)
        .bind(&request_json)
        .bind(decision)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AnalyzerLogRecord>> {
        let records = sqlx::query_as::<_, AnalyzerLogRecord>(
            "SELECT * FROM analyzer_logs ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analyzer_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM analyzer_logs")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
