//! Coordinator REST handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use flowgate_types::{NodeStatus, QuotaRequest};

use crate::CoordinatorApiState;

pub(crate) fn error_response(message: &str, status: StatusCode) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// POST /api/v1/quota/check
pub async fn check_quota(
    State(state): State<CoordinatorApiState>,
    payload: Result<Json<QuotaRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(_) => return error_response("invalid request format", StatusCode::BAD_REQUEST),
    };

    if let Err(message) = validate_quota_request(&req) {
        return error_response(&message, StatusCode::BAD_REQUEST);
    }

    let resp = state.coordinator.check_quota(&req);
    Json(resp).into_response()
}

/// POST /api/v1/status
pub async fn node_status(
    State(state): State<CoordinatorApiState>,
    payload: Result<Json<NodeStatus>, JsonRejection>,
) -> Response {
    let Json(status) = match payload {
        Ok(body) => body,
        Err(_) => return error_response("invalid status format", StatusCode::BAD_REQUEST),
    };

    if status.node_id.is_empty() {
        return error_response("node_id is required", StatusCode::BAD_REQUEST);
    }

    state.coordinator.update_node_status(&status);
    StatusCode::OK.into_response()
}

/// GET /api/v1/quota/status
pub async fn quota_status(State(state): State<CoordinatorApiState>) -> Response {
    Json(state.coordinator.status_snapshot()).into_response()
}

/// GET /health
pub async fn health() -> Response {
    Json(serde_json::json!({
        "status": "UP",
        "timestamp": Utc::now(),
    }))
    .into_response()
}

fn validate_quota_request(req: &QuotaRequest) -> Result<(), String> {
    if req.node_id.is_empty() {
        return Err("node_id is required".to_string());
    }
    if req.quotas.is_empty() {
        return Err("quotas cannot be empty".to_string());
    }
    if req.quotas.iter().any(|q| q.required < 0) {
        return Err("required quota must be non-negative".to_string());
    }
    Ok(())
}
