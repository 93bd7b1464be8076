//! HTTP routes: liveness, per-network forwarding and a read-only ranking view.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderName, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chainproxy_core::{
    ChainManager, FailureKind, ForwarderPool, NetworkId, PoolStats, ProxyError, RefreshScheduler,
    UpstreamResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Shared handles for every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChainManager>,
    pub pool: Arc<ForwarderPool>,
    pub scheduler: Arc<RefreshScheduler>,
    /// Largest `/rpc/:id` body accepted; bigger ones get 413.
    pub max_request_bytes: usize,
}

/// Fills in `x-request-id` with a UUID v4 when the caller sent none.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

pub fn router(state: AppState) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        let request_id = req
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id,
        )
    });

    let body_limit = DefaultBodyLimit::max(state.max_request_bytes);

    Router::new()
        .route("/health-check", get(health_check))
        .route("/rpc/:id", post(forward_rpc))
        .route("/status", get(status))
        .layer(body_limit)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestId))
                .layer(trace)
                .layer(PropagateRequestIdLayer::new(X_REQUEST_ID.clone())),
        )
}

/// Liveness only; never consults upstream health.
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

async fn forward_rpc(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let network_id: NetworkId = raw_id.parse()?;
    let upstream = state.pool.forward(network_id, body).await?;
    Ok(relay(upstream))
}

/// Pass the upstream answer through byte for byte.
fn relay(upstream: UpstreamResponse) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let content_type = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    (status, [(CONTENT_TYPE, content_type)], upstream.body).into_response()
}

#[derive(Serialize)]
struct StatusView {
    scheduler: String,
    rounds_completed: u64,
    pool: PoolStats,
    networks: Vec<NetworkView>,
}

#[derive(Serialize)]
struct NetworkView {
    network_id: NetworkId,
    round: u64,
    refreshed_at: Option<DateTime<Utc>>,
    healthy: usize,
    endpoints: Vec<EndpointView>,
}

#[derive(Serialize)]
struct EndpointView {
    url: String,
    healthy: bool,
    latency_ms: Option<u64>,
    last_probed_at: Option<DateTime<Utc>>,
    last_failure: Option<FailureKind>,
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    let networks = state
        .manager
        .rankings()
        .iter()
        .map(|ranking| NetworkView {
            network_id: ranking.network_id(),
            round: ranking.round(),
            refreshed_at: ranking.refreshed_at(),
            healthy: ranking.healthy_count(),
            endpoints: ranking
                .records()
                .iter()
                .map(|r| EndpointView {
                    url: r.endpoint.url.clone(),
                    healthy: r.healthy,
                    latency_ms: r.latency.map(|d| d.as_millis() as u64),
                    last_probed_at: r.last_probed_at,
                    last_failure: r.last_failure,
                })
                .collect(),
        })
        .collect();

    Json(StatusView {
        scheduler: state.scheduler.state().to_string(),
        rounds_completed: state.scheduler.rounds_completed(),
        pool: state.pool.stats(),
        networks,
    })
}

/// Maps [`ProxyError`] onto HTTP.
pub struct ApiError(pub ProxyError);

impl From<ProxyError> for ApiError {
    fn from(e: ProxyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        if self.0.is_client_error() {
            tracing::debug!(error = %message, "request rejected");
        } else {
            tracing::warn!(error = %message, "request failed");
        }
        let (status, body) = match self.0 {
            ProxyError::MalformedNetworkId { .. } => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ProxyError::UnknownNetwork { network_id } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": message, "network_id": network_id }),
            ),
            ProxyError::AllEndpointsExhausted {
                network_id,
                failures,
            } => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": message, "network_id": network_id, "failures": failures }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
