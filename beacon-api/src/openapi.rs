//! OpenAPI Specification for the Beacon HTTP Services
//!
//! Generated with utoipa from the route annotations and the request and
//! response types. Served at `/openapi.json` by both services.

use axum::{response::IntoResponse, Json};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

use beacon_core::{FunnelMode, FunnelResult, FunnelStep, Interval, StoredEvent, TrendResult};

use crate::auth::API_KEY_HEADER;
use crate::error::{ApiError, ErrorCode};
use crate::jobs::{JobStatus, JobView};
use crate::routes::async_query::{self, AsyncQueryRequest};
use crate::routes::capture::{self, AcceptedResponse};
use crate::routes::health::{self, HealthResponse};
use crate::routes::insights::{self, FunnelRequest, RecentEventsResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Beacon API",
        version = "0.1.0",
        description = "Product analytics event capture and insight queries"
    ),
    servers(
        (url = "http://localhost:8000", description = "Local capture service"),
        (url = "http://localhost:8002", description = "Local query service")
    ),
    tags(
        (name = "Capture", description = "Event ingestion"),
        (name = "Insights", description = "Trend, funnel and recent-event queries"),
        (name = "Async Queries", description = "Background aggregation jobs"),
        (name = "Health", description = "Liveness and readiness probes")
    ),
    paths(
        capture::capture,
        insights::trends,
        insights::funnels,
        insights::recent_events,
        async_query::submit,
        async_query::poll,
        health::liveness,
        health::query_readiness,
    ),
    components(
        schemas(
            ApiError,
            ErrorCode,
            AcceptedResponse,
            HealthResponse,
            TrendResult,
            Interval,
            FunnelRequest,
            FunnelResult,
            FunnelStep,
            FunnelMode,
            StoredEvent,
            RecentEventsResponse,
            AsyncQueryRequest,
            JobView,
            JobStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

/// Handler for /openapi.json endpoint.
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
