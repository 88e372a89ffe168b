//! Admission server lifecycle
//!
//! Binds the configured host/port when the webhook facility is enabled,
//! serves until told to stop, and drains in-flight requests on shutdown.

use crate::admission::handlers;
use crate::admission::pipeline::{self, GatewayState};
use crate::domain::errors::{CoreError, Result};
use crate::persistence::settings::WebhookServerConfig;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the full admission router. Shared with tests.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::health))
        .route("/health", get(handlers::health))
        // Dynamic strategy webhooks; the legacy prefix stays routable.
        .route("/webhook/:webhook_id", post(handlers::webhook))
        .route("/strategy/webhook/:webhook_id", post(handlers::webhook))
        // Broker OAuth redirect capture.
        .route("/:broker_id/callback", get(handlers::oauth_callback))
        // REST command set.
        .route("/api/v1/placeorder", post(handlers::place_order))
        .route("/api/v1/placesmartorder", post(handlers::place_smart_order))
        .route("/api/v1/modifyorder", post(handlers::modify_order))
        .route("/api/v1/cancelorder", post(handlers::cancel_order))
        .route("/api/v1/cancelallorder", post(handlers::cancel_all_orders))
        .route("/api/v1/closeposition", post(handlers::close_position))
        .route("/api/v1/orderbook", post(handlers::order_book))
        .route("/api/v1/tradebook", post(handlers::trade_book))
        .route("/api/v1/positionbook", post(handlers::position_book))
        .route("/api/v1/holdings", post(handlers::holdings))
        .route("/api/v1/funds", post(handlers::funds))
        .route("/api/v1/quotes", post(handlers::quotes))
        .route("/api/v1/depth", post(handlers::depth))
        .route("/api/v1/history", post(handlers::history))
        .route("/api/v1/search", post(handlers::search))
        .route("/api/v1/symbol", post(handlers::symbol))
        .route("/api/v1/intervals", post(handlers::intervals))
        .route("/api/v1/expiry", post(handlers::expiry))
        .route("/api/v1/instruments", post(handlers::instruments))
        .route("/api/v1/syntheticfuture", post(handlers::synthetic_future))
        .route("/api/v1/optionchain", post(handlers::option_chain))
        .route("/api/v1/optiongreeks", post(handlers::option_greeks))
        .route("/api/v1/optionsymbol", post(handlers::option_symbol))
        .route("/api/v1/optionsorder", post(handlers::options_order))
        .route("/api/v1/optionsmultiorder", post(handlers::options_multi_order))
        .route("/api/v1/analyzer", post(handlers::analyzer_status))
        .route("/api/v1/analyzer/toggle", post(handlers::analyzer_toggle))
        .route("/api/v1/margin", post(handlers::margin))
        .route("/api/v1/basketorder", post(handlers::basket_order))
        .route("/api/v1/splitorder", post(handlers::split_order))
        .route("/api/v1/orderstatus", post(handlers::order_status))
        .route("/api/v1/openposition", post(handlers::open_position))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            pipeline::admission_pipeline,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct AdmissionServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AdmissionServer {
    pub fn new() -> Self {
        Self { shutdown_tx: None }
    }

    /// Start serving. A disabled config is a successful no-op.
    pub async fn start(
        &mut self,
        config: &WebhookServerConfig,
        state: Arc<GatewayState>,
    ) -> Result<()> {
        if !config.enabled {
            info!("admission server disabled by configuration");
            return Ok(());
        }
        if self.is_running() {
            return Ok(());
        }

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| CoreError::PayloadInvalid(format!("invalid bind address: {}", e)))?;

        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("admission server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("admission server draining");
            });

            if let Err(e) = server.await {
                error!("admission server error: {}", e);
            }
        });

        if let Some(public_url) = &config.public_url {
            info!("webhook base url: {}/webhook/{{webhook_id}}", public_url);
        }
        Ok(())
    }

    /// Signal the listener to drain and stop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            info!("admission server stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}

impl Default for AdmissionServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AdmissionServer {
    fn drop(&mut self) {
        self.stop();
    }
}
