//! Liveness and readiness endpoints for both services.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{CaptureState, QueryState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            message: None,
        }
    }
}

/// GET /health - Process liveness check
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
    ),
))]
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::status("ok")))
}

/// GET /ready - Broker producer reachability (capture service)
pub async fn capture_readiness(State(state): State<CaptureState>) -> impl IntoResponse {
    if state.publisher.ready().await {
        (StatusCode::OK, Json(HealthResponse::status("ready")))
    } else {
        warn!("Readiness check failed: broker unreachable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable".to_string(),
                message: Some("Event broker unreachable".to_string()),
            }),
        )
    }
}

/// GET /ready - Event store reachability (query service)
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Dependencies reachable", body = HealthResponse),
        (status = 503, description = "A dependency is unreachable", body = HealthResponse),
    ),
))]
pub async fn query_readiness(State(state): State<QueryState>) -> impl IntoResponse {
    match state.queries.engine().store().ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::status("ready"))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed: event store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    message: Some(e.to_string()),
                }),
            )
        }
    }
}
