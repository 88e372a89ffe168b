//! Services Layer
//!
//! The uniform business-logic facade over broker adapters. Both command
//! surfaces (local IPC and the admission gateway) call these operations
//! identically; nothing above this layer ever talks to a broker adapter
//! directly.
//!
//! Every operation resolves the active broker through the custodian, applies
//! a bounded deadline to the outbound call, and normalizes results into the
//! uniform model. Failures are surfaced, never swapped for successes; the
//! single automatic retry is reserved for timed-out idempotent reads.

mod analyzer;
mod market;
mod orders;
mod portfolio;

pub use analyzer::{AnalyzerStatus, MarginEstimate};
pub use market::{OptionChainRow, OptionGreeks, SymbolIndex, SyntheticFuture};
pub use orders::{SmartOrderRequest, SmartOrderResult, SplitOrderRequest, SplitOrderResult};

use crate::custodian::{ActiveSession, SessionCustodian};
use crate::domain::errors::{CoreError, Result};
use crate::domain::repositories::broker_client::BrokerClient;
use crate::infrastructure::registry::BrokerRegistry;
use crate::ipc::events::EventBus;
use crate::persistence::history::HistoryStore;
use crate::persistence::DbPool;
use crate::vault::Vault;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outbound deadlines
#[derive(Debug, Clone)]
pub struct Deadlines {
    /// RPC-style broker calls
    pub rpc: Duration,
    /// Master-contract downloads
    pub master_download: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(15),
            master_download: Duration::from_secs(30),
        }
    }
}

pub struct Services {
    pub(crate) pool: DbPool,
    pub vault: Arc<Vault>,
    pub custodian: Arc<SessionCustodian>,
    pub brokers: Arc<BrokerRegistry>,
    pub symbols: SymbolIndex,
    pub history: Arc<HistoryStore>,
    pub bus: EventBus,
    pub deadlines: Deadlines,
    analyzer_mode: AtomicBool,
}

impl Services {
    pub fn new(
        pool: DbPool,
        vault: Arc<Vault>,
        custodian: Arc<SessionCustodian>,
        brokers: Arc<BrokerRegistry>,
        history: Arc<HistoryStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            pool,
            vault,
            custodian,
            brokers,
            symbols: SymbolIndex::new(),
            history,
            bus,
            deadlines: Deadlines::default(),
            analyzer_mode: AtomicBool::new(false),
        }
    }

    /// Resolve the active broker adapter and its decrypted session
    pub fn resolve_active(&self) -> Result<(Arc<dyn BrokerClient>, ActiveSession)> {
        let session = self.custodian.active().ok_or(CoreError::NoActiveBroker)?;
        let broker = self
            .brokers
            .get(&session.broker_id)
            .ok_or(CoreError::NoActiveBroker)?;
        Ok((broker, session))
    }

    pub fn analyzer_on(&self) -> bool {
        self.analyzer_mode.load(Ordering::Relaxed)
    }

    /// Pool handle for the gateway's bookkeeping repositories
    pub(crate) fn custodian_pool(&self) -> DbPool {
        self.pool.clone()
    }

    pub(crate) fn set_analyzer(&self, on: bool) {
        self.analyzer_mode.store(on, Ordering::Relaxed);
    }

    /// Apply the RPC deadline to an outbound broker call
    pub(crate) async fn with_deadline<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.with_deadline_of(self.deadlines.rpc, fut).await
    }

    pub(crate) async fn with_deadline_of<T, F>(&self, deadline: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout(deadline.as_millis() as u64)),
        }
    }

    /// Run an idempotent read, retrying exactly once with jitter when the
    /// first attempt times out. Writes never come through here.
    pub(crate) async fn read_with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.with_deadline(op()).await {
            Err(e) if e.retryable_read() => {
                let jitter_ms = rand::thread_rng().gen_range(100..400);
                tracing::warn!("read timed out, retrying once after {}ms", jitter_ms);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                self.with_deadline(op()).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::infrastructure::sandbox_broker::SandboxBroker;
    use crate::persistence::memory_store;

    /// Services wired to the sandbox broker over an in-memory store, with an
    /// active session already established.
    pub async fn sandbox_services() -> Services {
        let pool = memory_store().await;
        sqlx::query("INSERT INTO users (username, password_hash) VALUES ('alice', 'h')")
            .execute(&pool)
            .await
            .unwrap();

        let vault = Arc::new(Vault::ephemeral());
        let custodian = Arc::new(SessionCustodian::new(pool.clone(), vault.clone()));
        custodian
            .save_session("sandbox", "sandbox-token", None, 1)
            .await
            .unwrap();

        let mut registry = BrokerRegistry::new();
        registry.register(Arc::new(SandboxBroker::new(pool.clone())));

        let history = Arc::new(HistoryStore::new(
            std::env::temp_dir().join(format!("algodesk-test-{}.duckdb", uuid::Uuid::new_v4())),
        ));

        Services::new(
            pool,
            vault,
            custodian,
            Arc::new(registry),
            history,
            EventBus::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::sandbox_services;

    #[tokio::test]
    async fn test_resolve_active_requires_session() {
        let services = sandbox_services().await;
        assert!(services.resolve_active().is_ok());

        services.custodian.revoke().await.unwrap();
        assert!(matches!(
            services.resolve_active(),
            Err(CoreError::NoActiveBroker)
        ));
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let services = sandbox_services().await;
        let result: Result<()> = services
            .with_deadline_of(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CoreError::Timeout(10))));
    }
}
