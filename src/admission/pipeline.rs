//! Admission pipeline
//!
//! The ordered gate every inbound request passes: client-IP extraction, the
//! ban check (strictly before any business work), then traffic and latency
//! accounting around the handler. API-key validation happens in the handlers
//! because the key travels in the JSON body.

use crate::admission::types::ApiResponse;
use crate::domain::errors::{CoreError, ErrorBody};
use crate::persistence::latency::LatencyRepository;
use crate::persistence::traffic::{AdmissionPolicy, StrikeReason, TrafficRepository};
use crate::services::Services;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Shared state of the admission surface
pub struct GatewayState {
    pub services: Arc<Services>,
    pub traffic: TrafficRepository,
    pub latency: LatencyRepository,
    pub policy: AdmissionPolicy,
}

impl GatewayState {
    pub fn new(services: Arc<Services>, policy: AdmissionPolicy) -> Self {
        let pool = services.custodian_pool();
        Self {
            services,
            traffic: TrafficRepository::new(pool.clone()),
            latency: LatencyRepository::new(pool),
            policy,
        }
    }

    /// Record an offence against the caller
    pub async fn strike(&self, ip: &str, reason: StrikeReason) {
        if let Err(e) = self.traffic.record_strike(ip, reason, &self.policy).await {
            warn!("failed to record strike for {}: {}", ip, e);
        }
    }
}

/// Client address, inserted into request extensions by the pipeline
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Map a core error to the admission surface
pub fn error_response(err: &CoreError) -> Response {
    let status = match err {
        CoreError::Banned | CoreError::NotAuthenticated => StatusCode::FORBIDDEN,
        CoreError::PayloadInvalid(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::NoActiveBroker => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody::from(err);
    (
        status,
        Json(ApiResponse::<()>::error(&body.code, &body.message)),
    )
        .into_response()
}

/// Logical operation name for latency accounting
pub fn operation_of(path: &str) -> String {
    if path.starts_with("/webhook/") || path.starts_with("/strategy/webhook/") {
        return "webhook".to_string();
    }
    if let Some(op) = path.strip_prefix("/api/v1/") {
        return op.trim_end_matches('/').replace('/', "_");
    }
    if path.ends_with("/callback") {
        return "oauth_callback".to_string();
    }
    "other".to_string()
}

/// The pipeline middleware. Stages run in declared order; the ban check
/// strictly precedes the handler.
pub async fn admission_pipeline(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let ip = addr.ip().to_string();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let banned = state.traffic.is_banned(&ip).await.unwrap_or_else(|e| {
        warn!("ban lookup failed for {}: {}", ip, e);
        false
    });

    let response = if banned {
        warn!(ip = %ip, path = %path, "request rejected: banned");
        error_response(&CoreError::Banned)
    } else {
        request.extensions_mut().insert(ClientIp(ip.clone()));
        next.run(request).await
    };

    let status = response.status().as_u16() as i32;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Err(e) = state
        .traffic
        .log_request(&ip, &method, &path, status, duration_ms, None)
        .await
    {
        warn!("traffic log write failed: {}", e);
    }

    let operation = operation_of(&path);
    let broker = state.services.custodian.active_broker();
    if let Err(e) = state
        .latency
        .log(&operation, broker.as_deref(), duration_ms, status < 400)
        .await
    {
        warn!("latency log write failed: {}", e);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_mapping() {
        assert_eq!(operation_of("/webhook/abc-123"), "webhook");
        assert_eq!(operation_of("/strategy/webhook/abc"), "webhook");
        assert_eq!(operation_of("/api/v1/placeorder"), "placeorder");
        assert_eq!(operation_of("/api/v1/analyzer/toggle"), "analyzer_toggle");
        assert_eq!(operation_of("/fyers/callback"), "oauth_callback");
        assert_eq!(operation_of("/health"), "other");
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            error_response(&CoreError::Banned).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            error_response(&CoreError::NoActiveBroker).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(&CoreError::PayloadInvalid("x".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&CoreError::Timeout(15000)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
