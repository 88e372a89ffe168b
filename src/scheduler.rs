//! Auto-Logout Scheduler
//!
//! Broker auth tokens must not straddle the daily regulatory boundary, so a
//! wall-clock daemon revokes the active session at a configured instant
//! (default 03:00 IST, well outside market hours) after a ladder of warning
//! events that gives an operator holding open positions time to react.
//!
//! The next target is always recomputed against the current wall clock in
//! the fixed regulatory zone. Never "last fire + 24h": a DST shift or a
//! manual clock change re-derives the target and the scheduler cannot fire
//! twice for the same date.

use crate::custodian::SessionCustodian;
use crate::domain::errors::Result;
use crate::infrastructure::registry::BrokerRegistry;
use crate::ipc::events::{Event, EventBus};
use crate::persistence::settings::{AutoLogoutConfig, SettingsRepository};
use crate::persistence::DbPool;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cap on the upstream revocation attempt
const UPSTREAM_LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single sleep; bounds how late a config change is observed
const RECHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Next instant in the regulatory zone matching (hour, minute), strictly
/// after `now`
pub fn next_target(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let local_now = now.with_timezone(&Kolkata);
    let today = local_now.date_naive();

    for day_offset in 0..2 {
        let date = today + ChronoDuration::days(day_offset);
        // An out-of-range configured time falls back to the default 03:00.
        let naive = date
            .and_hms_opt(hour, minute, 0)
            .unwrap_or_else(|| date.and_hms_opt(3, 0, 0).expect("fixed wall time"));
        // Ambiguous or skipped wall times resolve to the earliest valid
        // instant; IST has no DST but the zone handling stays general.
        if let Some(candidate) = Kolkata.from_local_datetime(&naive).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }
    }

    // Unreachable for valid (hour, minute), kept total for safety.
    now + ChronoDuration::days(1)
}

/// Warning lead-times (minutes) that have just been crossed, given the
/// remaining seconds until the target. Each fires once per cycle.
pub fn warnings_due(remaining_secs: i64, ladder: &[i64], emitted: &HashSet<i64>) -> Vec<i64> {
    ladder
        .iter()
        .copied()
        .filter(|minutes| *minutes > 0)
        .filter(|minutes| remaining_secs <= minutes * 60 && !emitted.contains(minutes))
        .collect()
}

pub struct AutoLogoutScheduler {
    settings: SettingsRepository,
    custodian: Arc<SessionCustodian>,
    brokers: Arc<BrokerRegistry>,
    bus: EventBus,
    reschedule_tx: watch::Sender<u64>,
    reschedule_rx: watch::Receiver<u64>,
}

impl AutoLogoutScheduler {
    pub fn new(
        pool: DbPool,
        custodian: Arc<SessionCustodian>,
        brokers: Arc<BrokerRegistry>,
        bus: EventBus,
    ) -> Self {
        let (reschedule_tx, reschedule_rx) = watch::channel(0);
        Self {
            settings: SettingsRepository::new(pool),
            custodian,
            brokers,
            bus,
            reschedule_tx,
            reschedule_rx,
        }
    }

    /// Force the next iteration to re-read configuration immediately
    pub fn reschedule(&self) {
        self.reschedule_tx.send_modify(|n| *n += 1);
    }

    /// Run until the token is cancelled. Spawn on the runtime.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("auto-logout scheduler started");

        loop {
            let config = match self.settings.get().await {
                Ok(settings) => settings.auto_logout,
                Err(e) => {
                    warn!("failed to load auto-logout config: {}", e);
                    AutoLogoutConfig::default()
                }
            };

            if !config.enabled {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.reschedule_rx.changed() => continue,
                    _ = tokio::time::sleep(RECHECK_INTERVAL) => continue,
                }
            }

            let target = next_target(Utc::now(), config.hour, config.minute);
            info!(
                "next auto-logout at {} ({:02}:{:02} IST)",
                target, config.hour, config.minute
            );

            if self.wait_for(target, &config, &cancel).await {
                break;
            }
        }

        info!("auto-logout scheduler stopped");
    }

    /// Sleep toward `target`, emitting ladder warnings. Returns true when
    /// cancelled; any other exit loops back to recompute the target.
    async fn wait_for(
        &mut self,
        target: DateTime<Utc>,
        config: &AutoLogoutConfig,
        cancel: &CancellationToken,
    ) -> bool {
        let mut emitted: HashSet<i64> = HashSet::new();

        loop {
            let remaining_secs = (target - Utc::now()).num_seconds();
            if remaining_secs <= 0 {
                self.fire(config).await;
                return false;
            }

            for minutes in warnings_due(remaining_secs, &config.warnings, &emitted) {
                emitted.insert(minutes);
                let message = format!("Auto-logout in {} minutes", minutes);
                info!("{}", message);
                self.bus.emit(Event::AutoLogoutWarning {
                    minutes_remaining: minutes,
                    message,
                });
            }

            // Sleep to the next warning boundary, the target, or the
            // re-check tick, whichever comes first.
            let next_boundary = config
                .warnings
                .iter()
                .filter(|minutes| !emitted.contains(*minutes))
                .map(|minutes| remaining_secs - minutes * 60)
                .filter(|secs| *secs > 0)
                .min()
                .unwrap_or(remaining_secs);
            let sleep_secs = next_boundary
                .min(remaining_secs)
                .clamp(1, RECHECK_INTERVAL.as_secs() as i64);

            tokio::select! {
                _ = cancel.cancelled() => return true,
                _ = self.reschedule_rx.changed() => return false,
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs as u64)) => {}
            }
        }
    }

    /// The terminal sequence: event first, then local revocation, then the
    /// bounded best-effort upstream logout.
    async fn fire(&self, config: &AutoLogoutConfig) {
        info!(
            "executing auto-logout at {:02}:{:02} IST",
            config.hour, config.minute
        );

        self.bus.emit(Event::AutoLogout {
            reason: "scheduled daily session expiry".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        });

        let active = self.custodian.active();

        if let Err(e) = self.custodian.revoke().await {
            warn!("failed to revoke session during auto-logout: {}", e);
        }

        if let Some(session) = active {
            if let Some(broker) = self.brokers.get(&session.broker_id) {
                let upstream = tokio::time::timeout(
                    UPSTREAM_LOGOUT_TIMEOUT,
                    broker.logout(&session.auth_token),
                )
                .await;
                match upstream {
                    Ok(Ok(())) => info!("upstream logout for '{}' done", session.broker_id),
                    Ok(Err(e)) => warn!("upstream logout failed: {}", e),
                    Err(_) => warn!("upstream logout timed out"),
                }
            }
        }
    }
}

/// Seconds until the next fire, for status displays
pub async fn seconds_until_next(pool: &DbPool) -> Result<Option<i64>> {
    let settings = SettingsRepository::new(pool.clone()).get().await?;
    if !settings.auto_logout.enabled {
        return Ok(None);
    }
    let target = next_target(
        Utc::now(),
        settings.auto_logout.hour,
        settings.auto_logout.minute,
    );
    Ok(Some((target - Utc::now()).num_seconds()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_target_later_today() {
        // 02:28 IST == 20:58 UTC previous day; target 03:00 IST same morning.
        let now = utc(2024, 6, 10, 20, 58);
        let target = next_target(now, 3, 0);
        let local = target.with_timezone(&Kolkata);
        assert_eq!((local.hour(), local.minute()), (3, 0));
        assert_eq!((target - now).num_minutes(), 32);
    }

    #[test]
    fn test_target_rolls_to_tomorrow() {
        // 03:00:00 IST exactly: strictly-after means tomorrow.
        let now = utc(2024, 6, 10, 21, 30); // 03:00 IST June 11
        let target = next_target(now, 3, 0);
        assert!((target - now).num_hours() >= 23);
        let local = target.with_timezone(&Kolkata);
        assert_eq!((local.hour(), local.minute()), (3, 0));
    }

    #[test]
    fn test_target_always_in_future() {
        for hour in [0, 3, 12, 23] {
            let target = next_target(Utc::now(), hour, 0);
            assert!(target > Utc::now());
            assert!((target - Utc::now()).num_seconds() <= 24 * 3600);
        }
    }

    #[test]
    fn test_backward_clock_jump_rederives() {
        let now = utc(2024, 6, 10, 20, 0);
        let target = next_target(now, 3, 0);
        // The clock jumps back two hours; recomputation lands on the same
        // target instant, not a duplicate fire.
        let jumped = now - ChronoDuration::hours(2);
        assert_eq!(next_target(jumped, 3, 0), target);
    }

    #[test]
    fn test_warning_ladder_crossings() {
        let ladder = vec![30, 15, 5, 1];
        let mut emitted = HashSet::new();

        // 32 minutes out: nothing due yet.
        assert!(warnings_due(32 * 60, &ladder, &emitted).is_empty());

        // 30 minutes out: the 30-minute warning fires once.
        let due = warnings_due(30 * 60, &ladder, &emitted);
        assert_eq!(due, vec![30]);
        emitted.extend(due);
        assert!(warnings_due(29 * 60, &ladder, &emitted).is_empty());

        // 14 minutes out: only 15 and not 30 again.
        let due = warnings_due(14 * 60, &ladder, &emitted);
        assert_eq!(due, vec![15]);
        emitted.extend(due);

        // 30 seconds out: 5 and 1 both overdue, each once.
        let due = warnings_due(30, &ladder, &emitted);
        assert_eq!(due, vec![5, 1]);
    }

    #[test]
    fn test_warning_ladder_ignores_nonpositive() {
        let emitted = HashSet::new();
        assert!(warnings_due(600, &[0, -5], &emitted).is_empty());
    }
}
