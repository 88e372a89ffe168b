//! Local IPC Surface
//!
//! The typed command channel the UI talks to: one request/response command
//! per capability, plus the server-pushed event stream in [`events`].
//! Commands arrive over an mpsc channel and are answered on per-request
//! oneshot channels; the dispatcher owns no state of its own and delegates
//! to the identity manager, the custodian, and the services layer.

pub mod events;

use crate::custodian::SessionCustodian;
use crate::domain::entities::market::HistoricalBar;
use crate::domain::entities::order::{ModifyOrderRequest, OrderRequest};
use crate::domain::errors::{CoreError, Result};
use crate::domain::repositories::broker_client::BrokerCredentials;
use crate::identity::IdentityManager;
use crate::infrastructure::registry::BrokerRegistry;
use crate::persistence::api_keys::ApiKeyRepository;
use crate::persistence::latency::LatencyRepository;
use crate::persistence::sandbox::SandboxRepository;
use crate::persistence::settings::{AutoLogoutConfig, SettingsRepository, WebhookServerConfig};
use crate::persistence::strategies::{NewStrategy, StrategyRepository};
use crate::persistence::traffic::TrafficRepository;
use crate::persistence::{self, DbPool};
use crate::services::{Services, SmartOrderRequest, SplitOrderRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Commands exposed to the UI
#[derive(Debug, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum Command {
    // identity
    CheckSession,
    Setup { username: String, password: String },
    Login { username: String, password: String },
    Logout,

    // broker credentials and sessions
    SaveBrokerCredentials {
        broker_id: String,
        api_key: String,
        api_secret: Option<String>,
        client_id: Option<String>,
    },
    DeleteBrokerCredentials { broker_id: String },
    ListConfiguredBrokers,
    BrokerLogin {
        broker_id: String,
        password: Option<String>,
        totp: Option<String>,
        auth_code: Option<String>,
    },
    BrokerLogout,
    ActiveBroker,

    // inbound api keys
    CreateApiKey { name: String },
    ListApiKeys,
    DeleteApiKey { name: String },

    // strategies
    CreateStrategy {
        name: String,
        exchange: String,
        symbol: String,
        product: String,
        quantity: i32,
        platform: Option<String>,
        window_start: Option<String>,
        window_end: Option<String>,
    },
    ListStrategies,
    SetStrategyEnabled { id: i64, enabled: bool },
    DeleteStrategy { id: i64 },
    AddStrategyMapping {
        strategy_id: i64,
        exchange: String,
        symbol: String,
        quantity: i32,
        product: String,
    },
    ListStrategyMappings { strategy_id: i64 },

    // orders
    PlaceOrder { order: OrderRequest },
    PlaceSmartOrder { order: SmartOrderRequest },
    ModifyOrder { order_id: String, changes: ModifyOrderRequest },
    CancelOrder { order_id: String },
    CancelAllOrders,
    CloseAllPositions,
    PlaceBasketOrder { orders: Vec<OrderRequest> },
    PlaceSplitOrder { order: SplitOrderRequest },
    OrderStatus { order_id: String },

    // portfolio
    OrderBook,
    TradeBook,
    PositionBook,
    Holdings,
    Funds,
    OpenPosition { exchange: String, symbol: String, product: String },

    // market data
    Quotes { symbols: Vec<(String, String)> },
    Depth { exchange: String, symbol: String },
    History {
        symbol: String,
        exchange: String,
        interval: String,
        from: i64,
        to: i64,
    },
    IngestHistory {
        symbol: String,
        exchange: String,
        interval: String,
        bars: Vec<HistoricalBar>,
    },
    SearchSymbols { query: String, exchange: Option<String> },
    GetSymbol { exchange: String, symbol: String },
    RefreshSymbolMaster,
    Intervals,
    ExpiryDates { symbol: String, exchange: String, instrument_type: String },

    // analyzer and sandbox
    AnalyzerStatus,
    ToggleAnalyzer { on: bool },
    AnalyzerLogs { limit: i64 },
    SandboxReset,
    SandboxSetCapital { capital: f64 },

    // settings
    GetSettings,
    SetAutoLogout { config: AutoLogoutConfig },
    SetWebhookConfig { config: WebhookServerConfig },

    // observability
    TrafficLogs { limit: i64 },
    LatencyStats,
    ListBans,
    UnbanIp { ip: String },
}

impl Command {
    /// Setup-state commands stay usable while migrations are pending
    fn allowed_before_schema_current(&self) -> bool {
        matches!(self, Command::CheckSession)
    }
}

struct IpcRequest {
    command: Command,
    reply: oneshot::Sender<Result<Value>>,
}

/// Client handle to the IPC surface
#[derive(Clone)]
pub struct IpcHandle {
    tx: mpsc::Sender<IpcRequest>,
}

impl IpcHandle {
    pub async fn call(&self, command: Command) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IpcRequest { command, reply })
            .await
            .map_err(|_| CoreError::internal("ipc surface is gone"))?;
        rx.await
            .map_err(|_| CoreError::internal("ipc reply dropped"))?
    }
}

/// Command dispatcher
pub struct IpcSurface {
    pool: DbPool,
    identity: Arc<IdentityManager>,
    custodian: Arc<SessionCustodian>,
    brokers: Arc<BrokerRegistry>,
    services: Arc<Services>,
}

impl IpcSurface {
    pub fn new(
        pool: DbPool,
        identity: Arc<IdentityManager>,
        custodian: Arc<SessionCustodian>,
        brokers: Arc<BrokerRegistry>,
        services: Arc<Services>,
    ) -> Self {
        Self {
            pool,
            identity,
            custodian,
            brokers,
            services,
        }
    }

    /// Spawn the dispatch loop and return the client handle
    pub fn spawn(self) -> IpcHandle {
        let (tx, mut rx) = mpsc::channel::<IpcRequest>(64);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let result = self.dispatch(request.command).await;
                if request.reply.send(result).is_err() {
                    warn!("ipc caller went away before the reply");
                }
            }
            info!("ipc surface closed");
        });
        IpcHandle { tx }
    }

    pub async fn dispatch(&self, command: Command) -> Result<Value> {
        if !command.allowed_before_schema_current() {
            persistence::ensure_schema_current(&self.pool).await?;
        }

        match command {
            // ---- identity ------------------------------------------------
            Command::CheckSession => to_value(self.identity.check_session().await?),
            Command::Setup { username, password } => {
                to_value(self.identity.setup(&username, &password).await?)
            }
            Command::Login { username, password } => {
                to_value(self.identity.login(&username, &password).await?)
            }
            Command::Logout => {
                self.identity.logout();
                Ok(json!({"ok": true}))
            }

            // ---- broker credentials and sessions -------------------------
            Command::SaveBrokerCredentials {
                broker_id,
                api_key,
                api_secret,
                client_id,
            } => {
                self.identity.require_user()?;
                self.custodian
                    .save_credentials(
                        &broker_id,
                        &api_key,
                        api_secret.as_deref(),
                        client_id.as_deref(),
                    )
                    .await?;
                Ok(json!({"ok": true}))
            }
            Command::DeleteBrokerCredentials { broker_id } => {
                self.identity.require_user()?;
                to_value(self.custodian.delete_credentials(&broker_id).await?)
            }
            Command::ListConfiguredBrokers => {
                to_value(self.custodian.configured_brokers().await?)
            }
            Command::BrokerLogin {
                broker_id,
                password,
                totp,
                auth_code,
            } => {
                let user = self.identity.require_user()?;
                let broker = self
                    .brokers
                    .get(&broker_id)
                    .ok_or_else(|| CoreError::NotFound(format!("broker {}", broker_id)))?;
                let stored = self
                    .custodian
                    .load_credentials(&broker_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::NotFound(format!("credentials for {}", broker_id))
                    })?;

                let auth = tokio::time::timeout(
                    std::time::Duration::from_secs(15),
                    broker.authenticate(BrokerCredentials {
                        api_key: stored.api_key,
                        api_secret: stored.api_secret,
                        client_id: stored.client_id,
                        password,
                        totp,
                        auth_code,
                    }),
                )
                .await
                .map_err(|_| CoreError::Timeout(15_000))??;

                self.custodian
                    .save_session(
                        &broker_id,
                        &auth.auth_token,
                        auth.feed_token.as_deref(),
                        user.user_id,
                    )
                    .await?;
                Ok(json!({"broker_id": broker_id, "broker_user": auth.user_id}))
            }
            Command::BrokerLogout => {
                let active = self.custodian.active();
                self.custodian.revoke().await?;
                if let Some(session) = active {
                    if let Some(broker) = self.brokers.get(&session.broker_id) {
                        // Best-effort upstream invalidation, bounded and not
                        // retried.
                        let upstream = tokio::time::timeout(
                            std::time::Duration::from_secs(5),
                            broker.logout(&session.auth_token),
                        )
                        .await;
                        if !matches!(upstream, Ok(Ok(()))) {
                            warn!("upstream logout for '{}' failed", session.broker_id);
                        }
                    }
                }
                Ok(json!({"ok": true}))
            }
            Command::ActiveBroker => to_value(self.custodian.active_broker()),

            // ---- inbound api keys ---------------------------------------
            Command::CreateApiKey { name } => {
                self.identity.require_user()?;
                let repo = ApiKeyRepository::new(self.pool.clone());
                let (id, key) = repo.create(&name, &self.services.vault).await?;
                Ok(json!({"id": id, "key": key}))
            }
            Command::ListApiKeys => {
                let repo = ApiKeyRepository::new(self.pool.clone());
                to_value(repo.list_masked(&self.services.vault).await?)
            }
            Command::DeleteApiKey { name } => {
                self.identity.require_user()?;
                let repo = ApiKeyRepository::new(self.pool.clone());
                to_value(repo.delete(&name).await?)
            }

            // ---- strategies ---------------------------------------------
            Command::CreateStrategy {
                name,
                exchange,
                symbol,
                product,
                quantity,
                platform,
                window_start,
                window_end,
            } => {
                self.identity.require_user()?;
                let repo = StrategyRepository::new(self.pool.clone());
                to_value(
                    repo.create(NewStrategy {
                        name,
                        exchange,
                        symbol,
                        product,
                        quantity,
                        platform: crate::domain::entities::strategy::AlertPlatform::parse(
                            platform.as_deref().unwrap_or("tradingview"),
                        ),
                        window_start,
                        window_end,
                    })
                    .await?,
                )
            }
            Command::ListStrategies => {
                to_value(StrategyRepository::new(self.pool.clone()).list().await?)
            }
            Command::SetStrategyEnabled { id, enabled } => {
                self.identity.require_user()?;
                StrategyRepository::new(self.pool.clone())
                    .set_enabled(id, enabled)
                    .await?;
                Ok(json!({"ok": true}))
            }
            Command::DeleteStrategy { id } => {
                self.identity.require_user()?;
                StrategyRepository::new(self.pool.clone()).soft_delete(id).await?;
                Ok(json!({"ok": true}))
            }
            Command::AddStrategyMapping {
                strategy_id,
                exchange,
                symbol,
                quantity,
                product,
            } => {
                self.identity.require_user()?;
                StrategyRepository::new(self.pool.clone())
                    .add_mapping(strategy_id, &exchange, &symbol, quantity, &product)
                    .await?;
                Ok(json!({"ok": true}))
            }
            Command::ListStrategyMappings { strategy_id } => to_value(
                StrategyRepository::new(self.pool.clone())
                    .list_mappings(strategy_id)
                    .await?,
            ),

            // ---- orders --------------------------------------------------
            Command::PlaceOrder { order } => to_value(self.services.place_order(order).await?),
            Command::PlaceSmartOrder { order } => {
                to_value(self.services.place_smart_order(order).await?)
            }
            Command::ModifyOrder { order_id, changes } => {
                to_value(self.services.modify_order(&order_id, changes).await?)
            }
            Command::CancelOrder { order_id } => {
                self.services.cancel_order(&order_id).await?;
                Ok(json!({"ok": true}))
            }
            Command::CancelAllOrders => to_value(self.services.cancel_all_orders().await?),
            Command::CloseAllPositions => to_value(self.services.close_all_positions().await?),
            Command::PlaceBasketOrder { orders } => {
                let results = self.services.place_basket_order(orders).await?;
                let rows: Vec<Value> = results
                    .into_iter()
                    .map(|r| match r {
                        Ok(receipt) => json!({"status": "success", "orderid": receipt.order_id}),
                        Err(message) => json!({"status": "error", "message": message}),
                    })
                    .collect();
                Ok(Value::Array(rows))
            }
            Command::PlaceSplitOrder { order } => {
                to_value(self.services.place_split_order(order).await?)
            }
            Command::OrderStatus { order_id } => {
                to_value(self.services.order_status(&order_id).await?)
            }

            // ---- portfolio ----------------------------------------------
            Command::OrderBook => to_value(self.services.order_book().await?),
            Command::TradeBook => to_value(self.services.trade_book().await?),
            Command::PositionBook => to_value(self.services.positions().await?),
            Command::Holdings => to_value(self.services.holdings().await?),
            Command::Funds => to_value(self.services.funds().await?),
            Command::OpenPosition {
                exchange,
                symbol,
                product,
            } => to_value(
                self.services
                    .open_position(&exchange, &symbol, &product)
                    .await?,
            ),

            // ---- market data --------------------------------------------
            Command::Quotes { symbols } => to_value(self.services.quotes(symbols).await?),
            Command::Depth { exchange, symbol } => {
                to_value(self.services.market_depth(&exchange, &symbol).await?)
            }
            Command::History {
                symbol,
                exchange,
                interval,
                from,
                to,
            } => to_value(
                self.services
                    .history(&symbol, &exchange, &interval, from, to)
                    .await?,
            ),
            Command::IngestHistory {
                symbol,
                exchange,
                interval,
                bars,
            } => to_value(
                self.services
                    .ingest_history(&symbol, &exchange, &interval, bars)
                    .await?,
            ),
            Command::SearchSymbols { query, exchange } => to_value(
                self.services
                    .search_symbols(&query, exchange.as_deref(), 50)
                    .await?,
            ),
            Command::GetSymbol { exchange, symbol } => {
                to_value(self.services.symbol(&exchange, &symbol)?)
            }
            Command::RefreshSymbolMaster => {
                to_value(self.services.refresh_symbol_master().await?)
            }
            Command::Intervals => to_value(self.services.intervals()),
            Command::ExpiryDates {
                symbol,
                exchange,
                instrument_type,
            } => to_value(
                self.services
                    .expiry_dates(&symbol, &exchange, &instrument_type)
                    .await?,
            ),

            // ---- analyzer and sandbox -----------------------------------
            Command::AnalyzerStatus => to_value(self.services.analyzer_status().await?),
            Command::ToggleAnalyzer { on } => to_value(self.services.toggle_analyzer(on).await?),
            Command::AnalyzerLogs { limit } => {
                to_value(self.services.analyzer_logs(limit).await?)
            }
            Command::SandboxReset => {
                self.identity.require_user()?;
                SandboxRepository::new(self.pool.clone()).reset().await?;
                Ok(json!({"ok": true}))
            }
            Command::SandboxSetCapital { capital } => {
                self.identity.require_user()?;
                SandboxRepository::new(self.pool.clone())
                    .set_starting_capital(capital)
                    .await?;
                Ok(json!({"ok": true}))
            }

            // ---- settings -----------------------------------------------
            Command::GetSettings => {
                to_value(SettingsRepository::new(self.pool.clone()).get().await?)
            }
            Command::SetAutoLogout { config } => {
                self.identity.require_user()?;
                SettingsRepository::new(self.pool.clone())
                    .set_auto_logout(&config)
                    .await?;
                Ok(json!({"ok": true}))
            }
            Command::SetWebhookConfig { config } => {
                self.identity.require_user()?;
                SettingsRepository::new(self.pool.clone())
                    .set_webhook(&config)
                    .await?;
                Ok(json!({"ok": true}))
            }

            // ---- observability ------------------------------------------
            Command::TrafficLogs { limit } => {
                to_value(TrafficRepository::new(self.pool.clone()).recent(limit).await?)
            }
            Command::LatencyStats => {
                to_value(LatencyRepository::new(self.pool.clone()).stats().await?)
            }
            Command::ListBans => {
                to_value(TrafficRepository::new(self.pool.clone()).list_bans().await?)
            }
            Command::UnbanIp { ip } => {
                self.identity.require_user()?;
                to_value(TrafficRepository::new(self.pool.clone()).unban(&ip).await?)
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sandbox_broker::SandboxBroker;
    use crate::ipc::events::EventBus;
    use crate::persistence::history::HistoryStore;
    use crate::persistence::memory_store;
    use crate::vault::Vault;

    async fn surface() -> IpcSurface {
        let pool = memory_store().await;
        let vault = Arc::new(Vault::ephemeral());
        let identity = Arc::new(IdentityManager::new(pool.clone(), vault.clone()));
        let custodian = Arc::new(SessionCustodian::new(pool.clone(), vault.clone()));
        let mut registry = BrokerRegistry::new();
        registry.register(Arc::new(SandboxBroker::new(pool.clone())));
        let brokers = Arc::new(registry);
        let history = Arc::new(HistoryStore::new(
            std::env::temp_dir().join(format!("algodesk-ipc-{}.duckdb", uuid::Uuid::new_v4())),
        ));
        let services = Arc::new(Services::new(
            pool.clone(),
            vault,
            custodian.clone(),
            brokers.clone(),
            history,
            EventBus::new(),
        ));
        IpcSurface::new(pool, identity, custodian, brokers, services)
    }

    #[tokio::test]
    async fn test_setup_login_broker_flow() {
        let surface = surface().await;

        let state = surface.dispatch(Command::CheckSession).await.unwrap();
        assert_eq!(state["state"], "not_initialized");

        surface
            .dispatch(Command::Setup {
                username: "alice".to_string(),
                password: "pw1".to_string(),
            })
            .await
            .unwrap();

        surface
            .dispatch(Command::SaveBrokerCredentials {
                broker_id: "sandbox".to_string(),
                api_key: "key".to_string(),
                api_secret: None,
                client_id: None,
            })
            .await
            .unwrap();

        let login = surface
            .dispatch(Command::BrokerLogin {
                broker_id: "sandbox".to_string(),
                password: None,
                totp: None,
                auth_code: None,
            })
            .await
            .unwrap();
        assert_eq!(login["broker_id"], "sandbox");

        let active = surface.dispatch(Command::ActiveBroker).await.unwrap();
        assert_eq!(active, Value::String("sandbox".to_string()));

        surface.dispatch(Command::BrokerLogout).await.unwrap();
        let active = surface.dispatch(Command::ActiveBroker).await.unwrap();
        assert!(active.is_null());
    }

    #[tokio::test]
    async fn test_commands_require_user_where_stated() {
        let surface = surface().await;
        let result = surface
            .dispatch(Command::CreateApiKey {
                name: "desk".to_string(),
            })
            .await;
        assert!(matches!(result, Err(CoreError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let surface = surface().await;
        let handle = surface.spawn();

        let state = handle.call(Command::CheckSession).await.unwrap();
        assert_eq!(state["state"], "not_initialized");
    }

    #[tokio::test]
    async fn test_order_requires_broker_session() {
        let surface = surface().await;
        let result = surface.dispatch(Command::OrderBook).await;
        assert!(matches!(result, Err(CoreError::NoActiveBroker)));
    }
}
