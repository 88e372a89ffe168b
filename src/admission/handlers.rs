//! Admission endpoint handlers
//!
//! The dynamic webhook, the OAuth callback capture, and the REST command
//! set. Bodies are parsed by hand from bytes so that malformed payloads can
//! be counted as admission strikes before they are rejected.

use crate::admission::pipeline::{error_response, ClientIp, GatewayState};
use crate::admission::types::*;
use crate::domain::entities::order::{ModifyOrderRequest, OrderRequest, OrderSide};
use crate::domain::errors::{CoreError, Result};
use crate::ipc::events::Event;
use crate::persistence::api_keys::ApiKeyRepository;
use crate::persistence::strategies::StrategyRepository;
use crate::persistence::traffic::StrikeReason;
use crate::services::{SmartOrderRequest, SplitOrderRequest};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono_tz::Asia::Kolkata;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

// ---- shared plumbing ---------------------------------------------------

/// Parse a JSON body; a failure is a malformed-payload strike
async fn parse<T: DeserializeOwned>(
    state: &GatewayState,
    ip: &ClientIp,
    bytes: &Bytes,
) -> std::result::Result<T, Response> {
    match serde_json::from_slice::<T>(bytes) {
        Ok(value) => Ok(value),
        Err(e) => {
            state.strike(&ip.0, StrikeReason::MalformedPayload).await;
            Err(error_response(&CoreError::PayloadInvalid(e.to_string())))
        }
    }
}

/// Validate the body API key; a failure is an invalid-key strike
async fn require_key(
    state: &GatewayState,
    ip: &ClientIp,
    apikey: &str,
) -> std::result::Result<(), Response> {
    let repo = ApiKeyRepository::new(state.services.custodian_pool());
    match repo.validate(apikey, &state.services.vault).await {
        Ok(_) => Ok(()),
        Err(_) => {
            warn!(ip = %ip.0, "invalid api key presented");
            state.strike(&ip.0, StrikeReason::InvalidApiKey).await;
            Err(error_response(&CoreError::NotAuthenticated))
        }
    }
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => error_response(&e),
    }
}

// ---- health ------------------------------------------------------------

pub async fn health() -> Response {
    (
        StatusCode::OK,
        Json(ApiResponse::<()>::success_message("algodesk api is running")),
    )
        .into_response()
}

// ---- dynamic webhook ---------------------------------------------------

pub async fn webhook(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    Path(webhook_id): Path<String>,
    bytes: Bytes,
) -> Response {
    info!("webhook received for {}", webhook_id);

    let strategies = StrategyRepository::new(state.services.custodian_pool());
    let strategy = match strategies.find_by_webhook_id(&webhook_id).await {
        Ok(Some(strategy)) => strategy,
        Ok(None) => {
            // Unknown ids are probes; count them.
            warn!(ip = %ip.0, webhook_id = %webhook_id, "webhook id not found");
            state.strike(&ip.0, StrikeReason::UnknownWebhook).await;
            return error_response(&CoreError::NotFound("strategy".to_string()));
        }
        Err(e) => return error_response(&e),
    };

    let payload: WebhookPayload = match parse(&state, &ip, &bytes).await {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    if !strategy.enabled {
        return error_response(&CoreError::PayloadInvalid(format!(
            "strategy '{}' is disabled",
            strategy.name
        )));
    }

    let now_ist = chrono::Utc::now().with_timezone(&Kolkata).time();
    if !strategy.within_window(now_ist) {
        return error_response(&CoreError::PayloadInvalid(format!(
            "strategy '{}' is outside its trading window",
            strategy.name
        )));
    }

    let action = match &payload.action {
        Some(action) => match OrderSide::parse(action) {
            Ok(side) => side,
            Err(e) => {
                state.strike(&ip.0, StrikeReason::MalformedPayload).await;
                return error_response(&e);
            }
        },
        None => {
            state.strike(&ip.0, StrikeReason::MalformedPayload).await;
            return error_response(&CoreError::PayloadInvalid(
                "missing action in webhook payload".to_string(),
            ));
        }
    };

    // Alerts without a symbol use the strategy's default leg.
    let mut symbols = payload.symbols();
    if symbols.is_empty() {
        symbols.push(strategy.symbol.clone());
    }

    let mut alerts_processed = 0;
    let mut orders_placed = 0;
    let mut errors: Vec<String> = Vec::new();

    for symbol in symbols {
        // A non-default symbol must be mapped for this strategy.
        let (exchange, quantity, product) = if symbol == strategy.symbol {
            (
                strategy.exchange.clone(),
                strategy.quantity,
                strategy.product.clone(),
            )
        } else {
            match strategies.find_mapping(strategy.id, &symbol).await {
                Ok(Some(mapping)) => (mapping.exchange, mapping.quantity, mapping.product),
                Ok(None) => {
                    errors.push(format!("symbol {} not mapped in strategy", symbol));
                    continue;
                }
                Err(e) => {
                    errors.push(e.to_string());
                    continue;
                }
            }
        };

        let quantity = payload.quantity.unwrap_or(quantity);
        state.services.bus.emit(Event::WebhookAlert {
            strategy_id: strategy.id,
            strategy_name: strategy.name.clone(),
            symbol: symbol.clone(),
            exchange: exchange.clone(),
            action: action.to_string(),
            quantity,
        });
        alerts_processed += 1;

        let outcome = match payload.position_size {
            Some(position_size) => state
                .services
                .place_smart_order(SmartOrderRequest {
                    symbol: symbol.clone(),
                    exchange,
                    action,
                    position_size,
                    product,
                    pricetype: payload.pricetype.clone(),
                    price: payload.price,
                })
                .await
                .map(|_| ()),
            None => {
                let mut order =
                    OrderRequest::market(symbol.clone(), exchange, action, quantity, product);
                if let Some(pricetype) = &payload.pricetype {
                    order.order_type = pricetype.clone();
                }
                if let Some(price) = payload.price {
                    order.price = price;
                }
                state.services.place_order(order).await.map(|_| ())
            }
        };

        match outcome {
            Ok(()) => orders_placed += 1,
            Err(e) => errors.push(format!("{}: {}", symbol, e)),
        }
    }

    let summary = serde_json::json!({
        "alerts_processed": alerts_processed,
        "orders_placed": orders_placed,
        "errors": errors,
    });

    if errors.is_empty() {
        (StatusCode::OK, Json(ApiResponse::success(summary))).into_response()
    } else if orders_placed > 0 {
        (StatusCode::PARTIAL_CONTENT, Json(ApiResponse::success(summary))).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<serde_json::Value> {
                status: "error".to_string(),
                code: Some("WEBHOOK_FAILED".to_string()),
                message: Some(errors.join(", ")),
                data: Some(summary),
                orderid: None,
                mode: None,
            }),
        )
            .into_response()
    }
}

// ---- oauth callback ----------------------------------------------------

/// GET /{broker_id}/callback, capture of the browser-redirect auth code.
/// The UI completes login with the normal broker-login command.
pub async fn oauth_callback(
    State(state): State<Arc<GatewayState>>,
    Path(broker_id): Path<String>,
    Query(query): Query<OauthQuery>,
) -> Response {
    if !state.services.brokers.contains(&broker_id) {
        return error_response(&CoreError::NotFound(format!("broker {}", broker_id)));
    }

    info!("oauth callback received for '{}'", broker_id);
    state.services.bus.emit(Event::OauthCallback {
        broker_id,
        code: query.code,
        state: query.state,
    });

    (
        StatusCode::OK,
        Json(ApiResponse::<()>::success_message(
            "authorization received, return to the application",
        )),
    )
        .into_response()
}

// ---- REST command set --------------------------------------------------

macro_rules! parse_and_guard {
    ($state:expr, $ip:expr, $bytes:expr, $ty:ty) => {{
        let req: $ty = match parse(&$state, &$ip, &$bytes).await {
            Ok(req) => req,
            Err(response) => return response,
        };
        if let Err(response) = require_key(&$state, &$ip, &req.apikey).await {
            return response;
        }
        req
    }};
}

pub async fn place_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, PlaceOrderRequest);

    let side = match OrderSide::parse(&req.action) {
        Ok(side) => side,
        Err(e) => return error_response(&e),
    };
    let order = OrderRequest {
        symbol: req.symbol,
        exchange: req.exchange,
        side,
        quantity: req.quantity,
        price: req.price,
        order_type: req.pricetype,
        product: req.product,
        validity: "DAY".to_string(),
        trigger_price: (req.trigger_price > 0.0).then_some(req.trigger_price),
        disclosed_quantity: (req.disclosed_quantity > 0).then_some(req.disclosed_quantity),
    };

    match state.services.place_order(order).await {
        Ok(receipt) => {
            let mode = if state.services.analyzer_on() { "analyze" } else { "live" };
            (
                StatusCode::OK,
                Json(ApiResponse::<()>::success_order(&receipt.order_id, mode)),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

pub async fn place_smart_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, PlaceSmartOrderRequest);

    let action = match OrderSide::parse(&req.action) {
        Ok(side) => side,
        Err(e) => return error_response(&e),
    };

    respond(
        state
            .services
            .place_smart_order(SmartOrderRequest {
                symbol: req.symbol,
                exchange: req.exchange,
                action,
                position_size: req.position_size,
                product: req.product,
                pricetype: Some(req.pricetype),
                price: (req.price > 0.0).then_some(req.price),
            })
            .await,
    )
}

pub async fn modify_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, ModifyOrderBody);

    let changes = ModifyOrderRequest {
        quantity: (req.quantity > 0).then_some(req.quantity),
        price: (req.price > 0.0).then_some(req.price),
        order_type: (!req.pricetype.is_empty()).then_some(req.pricetype.clone()),
        trigger_price: (req.trigger_price > 0.0).then_some(req.trigger_price),
        validity: None,
    };
    respond(state.services.modify_order(&req.orderid, changes).await)
}

pub async fn cancel_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, CancelOrderRequest);
    match state.services.cancel_order(&req.orderid).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::<()>::success_order(&req.orderid, "live")),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn cancel_all_orders(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.cancel_all_orders().await)
}

pub async fn close_position(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    match state.services.close_all_positions().await {
        Ok(receipts) => (
            StatusCode::OK,
            Json(ApiResponse::<()>::success_message(&format!(
                "{} positions closed",
                receipts.len()
            ))),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn order_book(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.order_book().await)
}

pub async fn trade_book(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.trade_book().await)
}

pub async fn position_book(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.positions().await)
}

pub async fn holdings(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.holdings().await)
}

pub async fn funds(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.funds().await)
}

pub async fn quotes(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, QuotesRequest);
    respond(state.services.quote(&req.exchange, &req.symbol).await)
}

pub async fn depth(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, QuotesRequest);
    respond(state.services.market_depth(&req.exchange, &req.symbol).await)
}

pub async fn history(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, HistoryRequest);
    respond(
        state
            .services
            .history(&req.symbol, &req.exchange, &req.interval, req.from, req.to)
            .await,
    )
}

pub async fn search(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, SearchRequest);
    respond(
        state
            .services
            .search_symbols(&req.query, req.exchange.as_deref(), 50)
            .await,
    )
}

pub async fn symbol(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, QuotesRequest);
    respond(state.services.symbol(&req.exchange, &req.symbol))
}

pub async fn intervals(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(Ok(state.services.intervals()))
}

pub async fn expiry(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, ExpiryRequest);
    respond(
        state
            .services
            .expiry_dates(&req.symbol, &req.exchange, &req.instrumenttype)
            .await,
    )
}

pub async fn instruments(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, InstrumentsRequest);
    respond(state.services.instruments(req.exchange.as_deref()).await)
}

pub async fn synthetic_future(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, SyntheticFutureRequest);
    respond(
        state
            .services
            .synthetic_future(&req.underlying, &req.exchange, &req.expiry)
            .await,
    )
}

pub async fn option_chain(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OptionChainRequest);
    respond(
        state
            .services
            .option_chain(&req.underlying, &req.exchange, &req.expiry)
            .await,
    )
}

pub async fn option_greeks(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OptionGreeksRequest);
    respond(state.services.option_greeks(
        req.spot,
        req.strike,
        req.days_to_expiry,
        req.volatility,
        req.risk_free_rate,
        req.option_type.eq_ignore_ascii_case("CE"),
    ))
}

pub async fn option_symbol(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OptionSymbolRequest);
    respond(
        state
            .services
            .option_symbol(
                &req.underlying,
                &req.exchange,
                &req.expiry,
                req.strike,
                &req.option_type,
            )
            .await,
    )
}

pub async fn options_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OptionsOrderRequest);
    respond(place_option_leg(&state, req).await)
}

async fn place_option_leg(
    state: &GatewayState,
    req: OptionsOrderRequest,
) -> Result<crate::domain::entities::order::OrderReceipt> {
    let side = OrderSide::parse(&req.action)?;
    let contract = state
        .services
        .option_symbol(
            &req.underlying,
            &req.exchange,
            &req.expiry,
            req.strike,
            &req.option_type,
        )
        .await?;
    let order = OrderRequest::market(
        contract.symbol,
        contract.exchange,
        side,
        req.quantity * contract.lot_size,
        req.product,
    );
    state.services.place_order(order).await
}

pub async fn options_multi_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OptionsMultiOrderRequest);

    let mut results = Vec::with_capacity(req.legs.len());
    for leg in req.legs {
        let outcome = place_option_leg(
            &state,
            OptionsOrderRequest {
                apikey: req.apikey.clone(),
                underlying: leg.underlying,
                exchange: leg.exchange,
                expiry: leg.expiry,
                strike: leg.strike,
                option_type: leg.option_type,
                action: leg.action,
                quantity: leg.quantity,
                product: leg.product,
            },
        )
        .await;
        results.push(match outcome {
            Ok(receipt) => serde_json::json!({"status": "success", "orderid": receipt.order_id}),
            Err(e) => serde_json::json!({"status": "error", "message": e.to_string()}),
        });
    }
    respond(Ok(results))
}

pub async fn analyzer_status(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let _req = parse_and_guard!(state, ip, bytes, ApiKeyRequest);
    respond(state.services.analyzer_status().await)
}

pub async fn analyzer_toggle(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, AnalyzerToggleRequest);
    respond(state.services.toggle_analyzer(req.mode).await)
}

pub async fn margin(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, MarginRequest);
    let positions: Vec<(String, String, i32)> = req
        .positions
        .into_iter()
        .map(|p| (p.exchange, p.symbol, p.quantity))
        .collect();
    respond(state.services.margin_estimate(&positions).await)
}

pub async fn basket_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, BasketOrderRequest);

    let mut orders = Vec::with_capacity(req.orders.len());
    for leg in req.orders {
        let side = match OrderSide::parse(&leg.action) {
            Ok(side) => side,
            Err(e) => return error_response(&e),
        };
        let mut order =
            OrderRequest::market(leg.symbol, leg.exchange, side, leg.quantity, leg.product);
        order.order_type = leg.pricetype;
        order.price = leg.price;
        orders.push(order);
    }

    match state.services.place_basket_order(orders).await {
        Ok(results) => {
            let rows: Vec<serde_json::Value> = results
                .into_iter()
                .map(|r| match r {
                    Ok(receipt) => {
                        serde_json::json!({"status": "success", "orderid": receipt.order_id})
                    }
                    Err(message) => serde_json::json!({"status": "error", "message": message}),
                })
                .collect();
            respond(Ok(rows))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn split_order(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, SplitOrderBody);

    let action = match OrderSide::parse(&req.action) {
        Ok(side) => side,
        Err(e) => return error_response(&e),
    };
    respond(
        state
            .services
            .place_split_order(SplitOrderRequest {
                symbol: req.symbol,
                exchange: req.exchange,
                action,
                quantity: req.quantity,
                split_size: req.splitsize,
                product: req.product,
                pricetype: Some(req.pricetype),
                price: (req.price > 0.0).then_some(req.price),
            })
            .await,
    )
}

pub async fn order_status(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OrderStatusRequest);
    match state.services.order_status(&req.orderid).await {
        Ok(Some(order)) => respond(Ok(order)),
        Ok(None) => error_response(&CoreError::NotFound(format!("order {}", req.orderid))),
        Err(e) => error_response(&e),
    }
}

pub async fn open_position(
    State(state): State<Arc<GatewayState>>,
    Extension(ip): Extension<ClientIp>,
    bytes: Bytes,
) -> Response {
    let req = parse_and_guard!(state, ip, bytes, OpenPositionRequest);
    match state
        .services
        .open_position(&req.exchange, &req.symbol, &req.product)
        .await
    {
        // No position reads back as a flat zero-quantity row.
        Ok(position) => respond(Ok(position.unwrap_or(
            crate::domain::entities::market::Position {
                symbol: req.symbol,
                exchange: req.exchange,
                product: req.product,
                quantity: 0,
                average_price: 0.0,
                ltp: 0.0,
                pnl: 0.0,
            },
        ))),
        Err(e) => error_response(&e),
    }
}
