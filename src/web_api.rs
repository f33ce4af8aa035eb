//! HTTP surface for the gateway.
//!
//! One routing endpoint plus the usual operational endpoints:
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/api/v1/route` | POST | Run the admission pipeline |
//! | `/api/v1/models` | GET | Fleet snapshot |
//! | `/health` | GET | Liveness and uptime |
//! | `/metrics` | GET | Prometheus text exposition |
//!
//! Every pipeline error maps to a stable HTTP status and a JSON body with a
//! machine-readable `error_kind`. Retryable rejections (429) carry a
//! `Retry-After` header.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::metrics::gather_metrics;
use crate::routing::TaskComplexity;
use crate::selector::Selector;
use crate::{GatewayError, RouteRequest};

/// Shared handler state.
struct AppState {
    selector: Arc<Selector>,
    started: Instant,
}

/// Successful routing response.
#[derive(Debug, Serialize)]
pub struct RouteResponse {
    /// Model output text.
    pub content: String,
    /// The model that served the request.
    pub model: String,
    /// Winning composite score (0.0 when pinned by request or affinity).
    pub score: f64,
    /// Whether the failover model served it.
    pub failover: bool,
    /// Backend dispatch latency in milliseconds.
    pub latency_ms: u64,
    /// Prompt tokens.
    pub tokens_in: u64,
    /// Completion tokens.
    pub tokens_out: u64,
    /// Settled cost in micro-dollars.
    pub cost_micro: i64,
    /// Detected prompt complexity, when auto mode classified it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<TaskComplexity>,
    /// Daily quota remaining, when limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<i64>,
    /// Budget headroom in micro-dollars, when limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_remaining_micro: Option<i64>,
}

/// Error body returned for every rejected request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable error kind.
    pub error_kind: String,
    /// Human-readable message.
    pub message: String,
    /// Milliseconds until retry is worthwhile (rate limiting only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Remaining units of the exhausted resource, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
}

/// Map a pipeline error onto its HTTP status.
fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidKey
        | GatewayError::RevokedKey
        | GatewayError::InactiveSubscription => StatusCode::UNAUTHORIZED,
        GatewayError::RateLimited { .. }
        | GatewayError::QuotaExceeded { .. }
        | GatewayError::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::NoEligibleModel | GatewayError::DispatchFailed(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        GatewayError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::Store(_) | GatewayError::Config(_) | GatewayError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: &GatewayError) -> Response {
    let (retry_after_ms, remaining) = match err {
        GatewayError::RateLimited { retry_after } => (
            Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX)),
            None,
        ),
        GatewayError::QuotaExceeded { remaining } => (None, Some(*remaining)),
        GatewayError::BudgetExceeded { remaining_micro } => (None, Some(*remaining_micro)),
        _ => (None, None),
    };

    let status = status_for(err);
    let body = ErrorBody {
        error_kind: err.kind().to_string(),
        message: err.to_string(),
        retry_after_ms,
        remaining,
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(ms) = retry_after_ms {
        let secs = ms.div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
    }
    response
}

/// Build the gateway router over a selector.
pub fn build_router(selector: Arc<Selector>) -> Router {
    let state = Arc::new(AppState {
        selector,
        started: Instant::now(),
    });

    Router::new()
        .route("/api/v1/route", post(route_handler))
        .route("/api/v1/models", get(models_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn start_server(
    config: ServerConfig,
    selector: Arc<Selector>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(selector);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway API ready on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Middleware ─────────────────────────────────────────────────────────────

/// Adds a unique `X-Request-ID` header to every response.
///
/// If the client sends an `X-Request-ID` header, it is preserved; otherwise
/// a new UUID v4 is generated.
async fn request_id_middleware(req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

// ── Handlers ───────────────────────────────────────────────────────────────

async fn route_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RouteRequest>,
) -> Response {
    match state.selector.route(&request).await {
        Ok(outcome) => Json(RouteResponse {
            content: outcome.content,
            model: outcome.selected_model.as_str().to_string(),
            score: outcome.score,
            failover: outcome.failover,
            latency_ms: outcome.dispatch_latency_ms,
            tokens_in: outcome.tokens_in,
            tokens_out: outcome.tokens_out,
            cost_micro: outcome.cost_micro,
            complexity: outcome.complexity,
            quota_remaining: outcome.quota_remaining,
            budget_remaining_micro: outcome.budget_remaining_micro,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn models_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .selector
        .registry()
        .snapshot_all()
        .into_iter()
        .map(|s| {
            json!({
                "id": s.profile.id.as_str(),
                "provider": s.profile.provider,
                "health": s.profile.health,
                "in_flight": s.in_flight,
                "max_concurrent": s.profile.max_concurrent,
                "avg_latency_ms": s.profile.avg_latency_ms,
                "success_rate": s.profile.success_rate,
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started.elapsed().as_secs(),
        "models": state.selector.registry().len(),
    }))
}

async fn metrics_handler() -> String {
    gather_metrics()
}
