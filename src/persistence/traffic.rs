//! Traffic, ban, and strike repository
//!
//! One traffic row per admitted request, retained for a bounded window.
//! Strike accounting is an UPSERT keyed by IP so concurrent offences cannot
//! double-count, and escalation to a permanent ban happens at most once.

use super::models::{IpBanRecord, TrafficRecord};
use super::DbPool;
use crate::domain::errors::Result;
use tracing::warn;

/// Why an admission strike was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeReason {
    InvalidApiKey,
    UnknownWebhook,
    MalformedPayload,
}

impl StrikeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrikeReason::InvalidApiKey => "invalid api key",
            StrikeReason::UnknownWebhook => "unknown webhook id",
            StrikeReason::MalformedPayload => "malformed payload",
        }
    }
}

/// Escalation policy with documented defaults. The exact numbers are not
/// externally mandated; these mirror the historical behavior.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Strikes inside the window that earn a permanent ban
    pub strike_threshold: i64,
    /// Sliding strike window
    pub strike_window_hours: i64,
    /// Lifetime of a temporary ban
    pub temp_ban_hours: i64,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            strike_threshold: 5,
            strike_window_hours: 24,
            temp_ban_hours: 24,
        }
    }
}

pub struct TrafficRepository {
    pool: DbPool,
}

impl TrafficRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn log_request(
        &self,
        client_ip: &str,
        method: &str,
        path: &str,
        status_code: i32,
        duration_ms: f64,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO traffic_logs (client_ip, method, path, status_code, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(client_ip)
        .bind(method)
        .bind(path)
        .bind(status_code)
        .bind(duration_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<TrafficRecord>> {
        let records = sqlx::query_as::<_, TrafficRecord>(
            "SELECT * FROM traffic_logs ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Drop traffic rows older than the retention window
    pub async fn prune(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM traffic_logs WHERE timestamp < datetime('now', '-' || ?1 || ' days')",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---- bans ------------------------------------------------------------

    /// Whether the IP is currently banned. Expired temporary bans are
    /// dropped on observation; the strike count survives in the tracker.
    pub async fn is_banned(&self, ip: &str) -> Result<bool> {
        let ban: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT kind, expires_at FROM ip_bans WHERE ip_address = ?1",
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        let Some((kind, expires_at)) = ban else {
            return Ok(false);
        };

        if kind == "permanent" {
            return Ok(true);
        }

        if expires_at.is_some() {
            // Compare inside SQLite so wall-clock handling matches the
            // datetime() defaults used at insert time.
            let active: Option<(i64,)> = sqlx::query_as(
                "SELECT 1 FROM ip_bans WHERE ip_address = ?1 AND expires_at > datetime('now')",
            )
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;

            if active.is_some() {
                return Ok(true);
            }
        }

        sqlx::query("DELETE FROM ip_bans WHERE ip_address = ?1")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(false)
    }

    /// Record one strike and apply the escalation policy. Returns the ban
    /// kind now in force, if any.
    pub async fn record_strike(
        &self,
        ip: &str,
        reason: StrikeReason,
        policy: &AdmissionPolicy,
    ) -> Result<Option<String>> {
        // The loopback operator can mistype keys forever.
        if ip == "127.0.0.1" || ip == "::1" || ip == "localhost" {
            return Ok(None);
        }

        // Expire the window before counting: a tracker older than the window
        // restarts from zero.
        sqlx::query(
            "DELETE FROM admission_strikes
             WHERE ip_address = ?1 AND first_strike_at < datetime('now', '-' || ?2 || ' hours')",
        )
        .bind(ip)
        .bind(policy.strike_window_hours)
        .execute(&self.pool)
        .await?;

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO admission_strikes (ip_address, strike_count, last_reason)
             VALUES (?1, 1, ?2)
             ON CONFLICT(ip_address) DO UPDATE SET
                strike_count = strike_count + 1,
                last_strike_at = datetime('now'),
                last_reason = excluded.last_reason
             RETURNING strike_count",
        )
        .bind(ip)
        .bind(reason.as_str())
        .fetch_one(&self.pool)
        .await?;

        let strikes = row.0;
        warn!(ip = %ip, strikes, reason = reason.as_str(), "admission strike recorded");

        if strikes >= policy.strike_threshold {
            self.ban(ip, reason.as_str(), strikes, None, policy).await?;
            Ok(Some("permanent".to_string()))
        } else {
            Ok(None)
        }
    }

    /// Insert or escalate a ban. `expires_in_hours = None` means permanent.
    /// The UPSERT makes concurrent escalation produce a single row.
    pub async fn ban(
        &self,
        ip: &str,
        reason: &str,
        strike_count: i64,
        expires_in_hours: Option<i64>,
        _policy: &AdmissionPolicy,
    ) -> Result<()> {
        let kind = if expires_in_hours.is_none() {
            "permanent"
        } else {
            "temporary"
        };

        sqlx::query(
            "INSERT INTO ip_bans (ip_address, kind, reason, strike_count, expires_at)
             VALUES (?1, ?2, ?3, ?4,
                     CASE WHEN ?5 IS NULL THEN NULL
                          ELSE datetime('now', '+' || ?5 || ' hours') END)
             ON CONFLICT(ip_address) DO UPDATE SET
                kind = CASE WHEN ip_bans.kind = 'permanent' THEN 'permanent' ELSE excluded.kind END,
                reason = excluded.reason,
                strike_count = MAX(ip_bans.strike_count, excluded.strike_count),
                banned_at = datetime('now'),
                expires_at = CASE WHEN ip_bans.kind = 'permanent' OR excluded.kind = 'permanent'
                                  THEN NULL ELSE excluded.expires_at END",
        )
        .bind(ip)
        .bind(kind)
        .bind(reason)
        .bind(strike_count)
        .bind(expires_in_hours)
        .execute(&self.pool)
        .await?;

        warn!(ip = %ip, kind, "ip ban in force");
        Ok(())
    }

    pub async fn unban(&self, ip: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ip_bans WHERE ip_address = ?1")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        // Forgiveness clears the slate.
        sqlx::query("DELETE FROM admission_strikes WHERE ip_address = ?1")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_bans(&self) -> Result<Vec<IpBanRecord>> {
        let records = sqlx::query_as::<_, IpBanRecord>(
            "SELECT * FROM ip_bans ORDER BY banned_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn strike_count(&self, ip: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT strike_count FROM admission_strikes WHERE ip_address = ?1",
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory_store;

    #[tokio::test]
    async fn test_traffic_log_round_trip() {
        let repo = TrafficRepository::new(memory_store().await);
        repo.log_request("10.0.0.9", "POST", "/api/v1/placeorder", 200, 12.5, None)
            .await
            .unwrap();

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].client_ip, "10.0.0.9");
        assert_eq!(recent[0].status_code, 200);
    }

    #[tokio::test]
    async fn test_fifth_strike_escalates_to_permanent() {
        let repo = TrafficRepository::new(memory_store().await);
        let policy = AdmissionPolicy::default();

        for i in 1..=4 {
            let banned = repo
                .record_strike("10.0.0.5", StrikeReason::InvalidApiKey, &policy)
                .await
                .unwrap();
            assert!(banned.is_none(), "strike {} must not ban yet", i);
        }

        let banned = repo
            .record_strike("10.0.0.5", StrikeReason::InvalidApiKey, &policy)
            .await
            .unwrap();
        assert_eq!(banned.as_deref(), Some("permanent"));
        assert!(repo.is_banned("10.0.0.5").await.unwrap());

        // Exactly one ban row regardless of further offences.
        repo.record_strike("10.0.0.5", StrikeReason::UnknownWebhook, &policy)
            .await
            .unwrap();
        assert_eq!(repo.list_bans().await.unwrap().len(), 1);
        assert_eq!(repo.list_bans().await.unwrap()[0].kind, "permanent");
    }

    #[tokio::test]
    async fn test_localhost_never_strikes() {
        let repo = TrafficRepository::new(memory_store().await);
        let policy = AdmissionPolicy::default();
        for _ in 0..10 {
            repo.record_strike("127.0.0.1", StrikeReason::InvalidApiKey, &policy)
                .await
                .unwrap();
        }
        assert!(!repo.is_banned("127.0.0.1").await.unwrap());
        assert_eq!(repo.strike_count("127.0.0.1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_temporary_ban_lifts_but_strikes_persist() {
        let repo = TrafficRepository::new(memory_store().await);
        let policy = AdmissionPolicy::default();

        repo.record_strike("10.0.0.7", StrikeReason::MalformedPayload, &policy)
            .await
            .unwrap();
        repo.ban("10.0.0.7", "manual", 1, Some(1), &policy).await.unwrap();
        assert!(repo.is_banned("10.0.0.7").await.unwrap());

        // Force the expiry into the past.
        sqlx::query(
            "UPDATE ip_bans SET expires_at = datetime('now', '-1 hour') WHERE ip_address = '10.0.0.7'",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        assert!(!repo.is_banned("10.0.0.7").await.unwrap());
        assert_eq!(repo.strike_count("10.0.0.7").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_permanent_ban_never_downgrades() {
        let repo = TrafficRepository::new(memory_store().await);
        let policy = AdmissionPolicy::default();

        repo.ban("10.0.0.8", "abuse", 5, None, &policy).await.unwrap();
        repo.ban("10.0.0.8", "later", 1, Some(1), &policy).await.unwrap();

        let bans = repo.list_bans().await.unwrap();
        assert_eq!(bans[0].kind, "permanent");
        assert!(bans[0].expires_at.is_none());
    }

    #[tokio::test]
    async fn test_unban_clears_strikes() {
        let repo = TrafficRepository::new(memory_store().await);
        let policy = AdmissionPolicy::default();

        for _ in 0..5 {
            repo.record_strike("10.0.0.9", StrikeReason::InvalidApiKey, &policy)
                .await
                .unwrap();
        }
        assert!(repo.is_banned("10.0.0.9").await.unwrap());

        assert!(repo.unban("10.0.0.9").await.unwrap());
        assert!(!repo.is_banned("10.0.0.9").await.unwrap());
        assert_eq!(repo.strike_count("10.0.0.9").await.unwrap(), 0);
    }
}
