//! flowgate-api — HTTP surfaces for the coordinator and the agent.
//!
//! # Coordinator routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/quota/check` | Request/refresh leases |
//! | POST | `/api/v1/status` | Report node status |
//! | GET | `/api/v1/quota/status` | Budget and registry snapshot |
//! | GET | `/health` | Coordinator liveness probe |
//!
//! # Agent routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/request` | Admit a work request |
//! | GET | `/api/v1/status` | Local lease snapshot |
//! | GET | `/health` | Lease pipeline health (503 when stale) |
//!
//! Validation and internal failures answer `{"error": "<message>"}`;
//! a panicking handler is converted into a 500 by the recovery layer.

pub mod agent_handlers;
pub mod handlers;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info};

use flowgate_agent::NodeAgent;
use flowgate_coordinator::QuotaCoordinator;

/// Shared state for coordinator handlers.
#[derive(Clone)]
pub struct CoordinatorApiState {
    pub coordinator: Arc<QuotaCoordinator>,
}

/// Shared state for agent handlers.
#[derive(Clone)]
pub struct AgentApiState {
    pub agent: Arc<NodeAgent>,
}

/// Build the coordinator's router.
pub fn coordinator_router(coordinator: Arc<QuotaCoordinator>) -> Router {
    let state = CoordinatorApiState { coordinator };

    Router::new()
        .route("/api/v1/quota/check", post(handlers::check_quota))
        .route("/api/v1/quota/status", get(handlers::quota_status))
        .route("/api/v1/status", post(handlers::node_status))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(CatchPanicLayer::custom(panic_response))
}

/// Build the agent's router.
pub fn agent_router(agent: Arc<NodeAgent>) -> Router {
    let state = AgentApiState { agent };

    Router::new()
        .route("/api/v1/request", post(agent_handlers::admit))
        .route("/api/v1/status", get(agent_handlers::status))
        .route("/health", get(agent_handlers::health))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(CatchPanicLayer::custom(panic_response))
}

/// Log method, path, status, and latency for every request.
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request handled"
    );
    response
}

/// Convert a handler panic into a JSON 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(%detail, "handler panicked");

    let mut response = Response::new(Body::from(r#"{"error":"internal server error"}"#));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
