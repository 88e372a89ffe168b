//! End-to-end coverage of the admission gateway: webhook dispatch, API-key
//! enforcement with strike escalation, ban behavior, traffic and latency
//! accounting, and analyzer interception over REST.

use algodesk::admission::{build_router, GatewayState};
use algodesk::custodian::SessionCustodian;
use algodesk::infrastructure::registry::BrokerRegistry;
use algodesk::infrastructure::sandbox_broker::SandboxBroker;
use algodesk::ipc::events::EventBus;
use algodesk::persistence::api_keys::ApiKeyRepository;
use algodesk::persistence::history::HistoryStore;
use algodesk::persistence::strategies::{NewStrategy, StrategyRepository};
use algodesk::persistence::traffic::AdmissionPolicy;
use algodesk::persistence::{self, DbPool};
use algodesk::services::Services;
use algodesk::vault::Vault;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    router: Router,
    pool: DbPool,
    services: Arc<Services>,
    api_key: String,
    webhook_id: String,
}

/// Full gateway over an in-memory store, sandbox broker active, one API key
/// and one enabled strategy provisioned. All requests appear to come from
/// 10.0.0.5.
async fn harness() -> Harness {
    let pool = persistence::open_store("sqlite::memory:").await.unwrap();
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
        std::env::temp_dir().join(format!("algodesk-adm-{}.duckdb", uuid::Uuid::new_v4())),
    ));

    let services = Arc::new(Services::new(
        pool.clone(),
        vault.clone(),
        custodian,
        Arc::new(registry),
        history,
        EventBus::new(),
    ));

    let (_, api_key) = ApiKeyRepository::new(pool.clone())
        .create("desk", &vault)
        .await
        .unwrap();

    let strategy = StrategyRepository::new(pool.clone())
        .create(NewStrategy {
            name: "breakout".to_string(),
            exchange: "NSE".to_string(),
            symbol: "RELIANCE".to_string(),
            product: "MIS".to_string(),
            quantity: 1,
            platform: algodesk::domain::entities::strategy::AlertPlatform::Tradingview,
            window_start: None,
            window_end: None,
        })
        .await
        .unwrap();

    let state = Arc::new(GatewayState::new(
        services.clone(),
        AdmissionPolicy::default(),
    ));
    let router = build_router(state)
        .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 5], 40000))));

    Harness {
        router,
        pool,
        services,
        api_key,
        webhook_id: strategy.webhook_id,
    }
}

async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn webhook_dispatch_places_order() {
    let h = harness().await;

    let (status, body) = post_json(
        &h.router,
        &format!("/webhook/{}", h.webhook_id),
        serde_json::json!({"action": "BUY"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["orders_placed"], 1);

    // The order really went through the services layer to the sandbox.
    let book = h.services.order_book().await.unwrap();
    assert_eq!(book.len(), 1);
    assert_eq!(book[0].symbol, "RELIANCE");
    assert_eq!(book[0].side, "BUY");
}

#[tokio::test]
async fn unknown_webhook_is_404_and_counts_a_strike() {
    let h = harness().await;

    let (status, _) = post_json(
        &h.router,
        "/webhook/00000000-0000-0000-0000-000000000000",
        serde_json::json!({"action": "BUY"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let strikes: (i64,) = sqlx::query_as(
        "SELECT strike_count FROM admission_strikes WHERE ip_address = '10.0.0.5'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(strikes.0, 1);
}

#[tokio::test]
async fn invalid_key_strikes_escalate_to_permanent_ban() {
    let h = harness().await;

    // Five bad keys: the fifth escalates to a permanent ban.
    for _ in 0..5 {
        let (status, _) = post_json(
            &h.router,
            "/api/v1/orderbook",
            serde_json::json!({"apikey": "not-the-key"}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    let bans: Vec<(String, String)> =
        sqlx::query_as("SELECT ip_address, kind FROM ip_bans")
            .fetch_all(&h.pool)
            .await
            .unwrap();
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0], ("10.0.0.5".to_string(), "permanent".to_string()));

    // Even a valid request is now refused before business logic.
    let (status, body) = post_json(
        &h.router,
        "/api/v1/orderbook",
        serde_json::json!({"apikey": h.api_key}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "BANNED");
}

#[tokio::test]
async fn valid_key_reaches_business_logic() {
    let h = harness().await;

    let (status, body) = post_json(
        &h.router,
        "/api/v1/placeorder",
        serde_json::json!({
            "apikey": h.api_key,
            "symbol": "TCS",
            "exchange": "NSE",
            "action": "BUY",
            "quantity": 10,
            "price": 100.0,
            "pricetype": "LIMIT",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["orderid"].as_str().is_some());
}

#[tokio::test]
async fn traffic_and_latency_records_written_once_per_request() {
    let h = harness().await;

    post_json(
        &h.router,
        "/api/v1/funds",
        serde_json::json!({"apikey": h.api_key}),
    )
    .await;

    let traffic: Vec<(String, String, i64)> =
        sqlx::query_as("SELECT client_ip, path, status_code FROM traffic_logs")
            .fetch_all(&h.pool)
            .await
            .unwrap();
    assert_eq!(traffic.len(), 1);
    assert_eq!(traffic[0].0, "10.0.0.5");
    assert_eq!(traffic[0].1, "/api/v1/funds");
    assert_eq!(traffic[0].2, 200);

    let latency: Vec<(String, i64)> =
        sqlx::query_as("SELECT operation, success FROM latency_logs")
            .fetch_all(&h.pool)
            .await
            .unwrap();
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0], ("funds".to_string(), 1));
}

#[tokio::test]
async fn malformed_body_is_400_and_counts_a_strike() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/orderbook")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let strikes: (i64,) = sqlx::query_as(
        "SELECT strike_count FROM admission_strikes WHERE ip_address = '10.0.0.5'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(strikes.0, 1);
}

#[tokio::test]
async fn analyzer_mode_intercepts_rest_orders() {
    let h = harness().await;

    let (status, body) = post_json(
        &h.router,
        "/api/v1/analyzer/toggle",
        serde_json::json!({"apikey": h.api_key, "mode": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["analyze_mode"], true);

    let (status, body) = post_json(
        &h.router,
        "/api/v1/placeorder",
        serde_json::json!({
            "apikey": h.api_key,
            "symbol": "TCS",
            "exchange": "NSE",
            "action": "BUY",
            "quantity": 10,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "analyze");
    assert!(body["orderid"].as_str().unwrap().starts_with("AN-"));

    // Simulated order: the sandbox book is untouched, the analyzer log has
    // the request, and the session slot is intact.
    assert!(h.services.analyzer_on());
    let logs: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analyzer_logs")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(logs.0, 1);
    let orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sandbox_orders")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(orders.0, 0);
    assert!(h.services.custodian.active().is_some());
}

#[tokio::test]
async fn health_needs_no_key() {
    let h = harness().await;
    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn oauth_callback_accepted_for_registered_broker() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/sandbox/callback?code=abc123&state=xyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/nonexistent/callback?code=abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
