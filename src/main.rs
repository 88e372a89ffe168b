use algodesk::admission::{AdmissionServer, GatewayState};
use algodesk::config::AppConfig;
use algodesk::custodian::SessionCustodian;
use algodesk::identity::IdentityManager;
use algodesk::infrastructure::registry::BrokerRegistry;
use algodesk::infrastructure::sandbox_broker::SandboxBroker;
use algodesk::ipc::events::EventBus;
use algodesk::ipc::IpcSurface;
use algodesk::persistence::history::HistoryStore;
use algodesk::persistence;
use algodesk::persistence::settings::SettingsRepository;
use algodesk::scheduler::AutoLogoutScheduler;
use algodesk::services::Services;
use algodesk::vault::{Keystore, Vault};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "algodesk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    info!("data directory: {:?}", config.data_dir);

    // One keystore unlock opens both vault capabilities for the process
    // lifetime.
    let keystore = if config.headless {
        Keystore::file_in(&config.data_dir)
    } else {
        Keystore::Keychain
    };
    let vault = Arc::new(Vault::open(&keystore)?);

    // Migrations run to completion before any other component sees the pool.
    let pool = persistence::open_store(&config.database_url).await?;

    let custodian = Arc::new(SessionCustodian::new(pool.clone(), vault.clone()));
    let identity = Arc::new(IdentityManager::new(pool.clone(), vault.clone()));

    let mut registry = BrokerRegistry::new();
    registry.register(Arc::new(SandboxBroker::new(pool.clone())));
    let brokers = Arc::new(registry);

    let history = Arc::new(HistoryStore::new(config.history_path.clone()));
    let bus = EventBus::new();

    let services = Arc::new(Services::new(
        pool.clone(),
        vault.clone(),
        custodian.clone(),
        brokers.clone(),
        history,
        bus.clone(),
    ));

    // Restore whatever survived the last run: the symbol index always, the
    // broker session only if it decrypts cleanly.
    match services.load_symbol_index().await {
        Ok(count) if count > 0 => info!("symbol index restored with {} instruments", count),
        Ok(_) => {}
        Err(e) => warn!("failed to restore symbol index: {}", e),
    }
    match custodian.load_active_session().await {
        Ok(Some(session)) => info!("restored broker session for '{}'", session.broker_id),
        Ok(None) => {}
        Err(e) => warn!("stored broker session unusable: {}", e),
    }

    // IPC surface for the UI.
    let ipc = IpcSurface::new(
        pool.clone(),
        identity.clone(),
        custodian.clone(),
        brokers.clone(),
        services.clone(),
    );
    let _ipc_handle = ipc.spawn();

    // Auto-logout daemon.
    let cancel = CancellationToken::new();
    let scheduler = AutoLogoutScheduler::new(
        pool.clone(),
        custodian.clone(),
        brokers.clone(),
        bus.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    // Hourly bookkeeping: traffic and latency logs are retained for a
    // bounded window only.
    let maintenance_pool = pool.clone();
    let maintenance_cancel = cancel.clone();
    tokio::spawn(async move {
        maintenance_task(maintenance_pool, maintenance_cancel).await;
    });

    // Admission gateway, when enabled in settings.
    let settings = SettingsRepository::new(pool.clone()).get().await?;
    let gateway = Arc::new(GatewayState::new(services.clone(), config.admission.clone()));
    let mut admission = AdmissionServer::new();
    if let Err(e) = admission.start(&settings.webhook, gateway).await {
        error!("admission server failed to start: {}", e);
    }

    info!("algodesk core started");

    // Wait for ctrl-c or SIGTERM.
    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c"),
                Err(e) => error!("failed to install ctrl-c handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("received SIGTERM");
                }
                Err(e) => error!("failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };
    shutdown_signal.await;

    info!("shutting down");
    admission.stop();
    cancel.cancel();
    let _ = scheduler_task.await;

    info!("shutdown complete");
    Ok(())
}

/// Prune aged traffic and latency rows once an hour
async fn maintenance_task(
    pool: algodesk::persistence::DbPool,
    cancel: CancellationToken,
) {
    const RETENTION_DAYS: i64 = 30;
    let traffic = algodesk::persistence::traffic::TrafficRepository::new(pool.clone());
    let latency = algodesk::persistence::latency::LatencyRepository::new(pool);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match traffic.prune(RETENTION_DAYS).await {
            Ok(n) if n > 0 => info!("pruned {} traffic rows", n),
            Ok(_) => {}
            Err(e) => warn!("traffic prune failed: {}", e),
        }
        match latency.prune(RETENTION_DAYS).await {
            Ok(n) if n > 0 => info!("pruned {} latency rows", n),
            Ok(_) => {}
            Err(e) => warn!("latency prune failed: {}", e),
        }
    }
}
