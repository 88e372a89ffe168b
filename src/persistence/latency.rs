//! Latency repository
//!
//! Per-operation round-trip samples, aggregated into percentiles and the
//! three-tier SLA classification (under 100 / 150 / 200 ms).

use super::models::LatencyRecord;
use super::DbPool;
use crate::domain::errors::Result;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub total: i64,
    pub failed: i64,
    pub success_rate: f64,
    pub avg_rtt: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    /// Percent of samples under 100 ms
    pub sla_100ms: f64,
    pub sla_150ms: f64,
    pub sla_200ms: f64,
    pub by_operation: HashMap<String, OperationStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub total: i64,
    pub failed: i64,
    pub avg_rtt: f64,
    pub p99: f64,
}

pub struct LatencyRepository {
    pool: DbPool,
}

impl LatencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn log(
        &self,
        operation: &str,
        broker_id: Option<&str>,
        rtt_ms: f64,
        success: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO latency_logs (operation, broker_id, rtt_ms, success)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(operation)
        .bind(broker_id)
        .bind(rtt_ms)
        .bind(success as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<LatencyRecord>> {
        let records = sqlx::query_as::<_, LatencyRecord>(
            "SELECT * FROM latency_logs ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn stats(&self) -> Result<LatencyStats> {
        let (total, failed): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0)
             FROM latency_logs",
        )
        .fetch_one(&self.pool)
        .await?;

        let avg_rtt: (f64,) =
            sqlx::query_as("SELECT COALESCE(AVG(rtt_ms), 0) FROM latency_logs")
                .fetch_one(&self.pool)
                .await?;

        let sorted: Vec<(f64,)> =
            sqlx::query_as("SELECT rtt_ms FROM latency_logs ORDER BY rtt_ms")
                .fetch_all(&self.pool)
                .await?;
        let sorted: Vec<f64> = sorted.into_iter().map(|r| r.0).collect();
        let (p50, p90, p95, p99) = percentiles(&sorted);

        let pct_under = |bound: f64| {
            if total == 0 {
                0.0
            } else {
                let under = sorted.iter().filter(|&&v| v < bound).count();
                under as f64 / total as f64 * 100.0
            }
        };

        let mut by_operation = HashMap::new();
        let per_op: Vec<(String, i64, i64, f64)> = sqlx::query_as(
            "SELECT operation, COUNT(*),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(rtt_ms), 0)
             FROM latency_logs GROUP BY operation",
        )
        .fetch_all(&self.pool)
        .await?;

        for (operation, op_total, op_failed, op_avg) in per_op {
            let op_sorted: Vec<(f64,)> = sqlx::query_as(
                "SELECT rtt_ms FROM latency_logs WHERE operation = ?1 ORDER BY rtt_ms",
            )
            .bind(&operation)
            .fetch_all(&self.pool)
            .await?;
            let op_sorted: Vec<f64> = op_sorted.into_iter().map(|r| r.0).collect();
            let (_, _, _, op_p99) = percentiles(&op_sorted);

            by_operation.insert(
                operation,
                OperationStats {
                    total: op_total,
                    failed: op_failed,
                    avg_rtt: op_avg,
                    p99: op_p99,
                },
            );
        }

        Ok(LatencyStats {
            total,
            failed,
            success_rate: if total > 0 {
                (total - failed) as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_rtt: avg_rtt.0,
            p50,
            p90,
            p95,
            p99,
            sla_100ms: pct_under(100.0),
            sla_150ms: pct_under(150.0),
            sla_200ms: pct_under(200.0),
            by_operation,
        })
    }

    pub async fn prune(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM latency_logs WHERE timestamp < datetime('now', '-' || ?1 || ' days')",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Percentiles over a pre-sorted slice, index = p * (len - 1)
fn percentiles(sorted: &[f64]) -> (f64, f64, f64, f64) {
    if sorted.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let max_idx = (sorted.len() - 1) as f64;
    let at = |p: f64| sorted[(max_idx * p) as usize];
    (at(0.50), at(0.90), at(0.95), at(0.99))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    #[test]
    fn test_percentiles_edge_cases() {
        assert_eq!(percentiles(&[]), (0.0, 0.0, 0.0, 0.0));
        assert_eq!(percentiles(&[42.0]), (42.0, 42.0, 42.0, 42.0));

        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let (p50, p90, p95, p99) = percentiles(&values);
        assert_eq!(p50, 50.0);
        assert_eq!(p90, 90.0);
        assert_eq!(p95, 95.0);
        assert_eq!(p99, 99.0);
    }

    #[tokio::test]
    async fn test_stats_and_sla() {
        let repo = LatencyRepository::new(memory_store().await);

        repo.log("placeorder", Some("sandbox"), 50.0, true).await.unwrap();
        repo.log("placeorder", Some("sandbox"), 120.0, true).await.unwrap();
        repo.log("quotes", Some("sandbox"), 180.0, true).await.unwrap();
        repo.log("placeorder", Some("sandbox"), 400.0, false).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.sla_100ms, 25.0);
        assert_eq!(stats.sla_150ms, 50.0);
        assert_eq!(stats.sla_200ms, 75.0);
        assert_eq!(stats.by_operation.len(), 2);
        assert_eq!(stats.by_operation["placeorder"].total, 3);
        assert_eq!(stats.by_operation["placeorder"].failed, 1);
    }
}
