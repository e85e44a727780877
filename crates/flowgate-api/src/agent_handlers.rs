//! Node-agent REST handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use flowgate_types::WorkRequest;

use crate::handlers::error_response;
use crate::AgentApiState;

/// POST /api/v1/request
///
/// Admission outcome is carried in the response body; the HTTP status
/// is 200 for any well-formed request.
pub async fn admit(
    State(state): State<AgentApiState>,
    payload: Result<Json<WorkRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(_) => return error_response("invalid request format", StatusCode::BAD_REQUEST),
    };

    if req.quotas.values().any(|required| *required < 0) {
        return error_response("required quota must be non-negative", StatusCode::BAD_REQUEST);
    }

    let resp = state.agent.handle_request(&req);
    Json(resp).into_response()
}

/// GET /api/v1/status
pub async fn status(State(state): State<AgentApiState>) -> Response {
    Json(state.agent.get_status()).into_response()
}

/// GET /health
pub async fn health(State(state): State<AgentApiState>) -> Response {
    match state.agent.health_check() {
        Ok(()) => Json(serde_json::json!({ "status": "UP" })).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
    }
}
