//! Event Capture Endpoint
//!
//! `POST /capture` accepts one event object or a `{"batch": [...]}` envelope,
//! validates it, applies the admission limit and hands the normalized events
//! to the broker. Processing order:
//!
//! 1. Body size
//! 2. API key
//! 3. Validation
//! 4. Admission limit
//! 5. Publish

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use beacon_core::IngestContext;
use beacon_pipeline::PublishError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::api_key_from_headers;
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::extract_client_ip;
use crate::state::CaptureState;
use crate::telemetry::metrics;

/// Body of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AcceptedResponse {
    pub status: String,
}

impl AcceptedResponse {
    pub fn accepted() -> Self {
        Self {
            status: "accepted".to_string(),
        }
    }
}

/// POST /capture - Ingest one event or a batch
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/capture",
    tag = "Capture",
    request_body(content = Object, description = "Single event or {\"batch\": [...]} envelope"),
    params(
        ("x-api-key" = Option<String>, Header, description = "Project API key"),
    ),
    responses(
        (status = 202, description = "Events accepted for delivery", body = AcceptedResponse),
        (status = 400, description = "Oversized or invalid submission", body = ApiError),
        (status = 401, description = "Missing or invalid API key", body = ApiError),
        (status = 429, description = "Admission limit exceeded", body = ApiError),
        (status = 503, description = "Broker unavailable or not acknowledging", body = ApiError),
    ),
))]
pub async fn capture(
    State(state): State<CaptureState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    let limit = state.config.max_body_bytes;

    // Reject on the declared length before reading anything.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::body_too_large(limit));
    }
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::body_too_large(limit))?;

    let api_key = api_key_from_headers(&headers);
    let project = resolve_project(&state, api_key.as_deref()).await;
    if state.config.require_api_key && project.is_none() {
        return Err(ApiError::unauthorized(if api_key.is_some() {
            "Invalid API key"
        } else {
            "Missing API key"
        }));
    }

    let ctx = IngestContext::new(Utc::now()).with_project(project);
    let events = state.validator.normalize_bytes(&bytes, &ctx)?;

    let limiter_key = match &api_key {
        Some(key) => key.clone(),
        None => extract_client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr))
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    };
    let admission = state
        .limiter
        .admit(&limiter_key, state.config.rate_limit_per_minute)
        .await;
    if !admission.allowed {
        debug!(retry_after = admission.retry_after, "Capture rejected by admission limit");
        return Err(ApiError::too_many_requests(admission.retry_after));
    }

    let start = Instant::now();
    let published = state.publisher.publish_events(&events).await;
    let elapsed = start.elapsed().as_secs_f64();

    if let Some(m) = metrics() {
        let kind = published.as_ref().err().map(publish_error_kind);
        m.record_produce(events.len(), kind, elapsed);
    }

    match published {
        Ok(()) => {
            debug!(events = events.len(), "Capture accepted");
            Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::accepted())))
        }
        Err(e) => {
            warn!(error = %e, events = events.len(), "Failed to publish captured events");
            Err(e.into())
        }
    }
}

/// Project bound to `api_key`, or `None` when absent, unknown or unverifiable.
async fn resolve_project(state: &CaptureState, api_key: Option<&str>) -> Option<String> {
    let (key, validator) = (api_key?, state.key_validator.as_ref()?);
    match validator.validate(key).await {
        Ok(project) => project,
        Err(e) => {
            warn!(error = %e, "API key validation failed; treating key as invalid");
            None
        }
    }
}

fn publish_error_kind(error: &PublishError) -> &'static str {
    match error {
        PublishError::Backpressure { .. } => "backpressure",
        PublishError::Broker(_) => "broker",
        PublishError::Encode { .. } => "encode",
    }
}
