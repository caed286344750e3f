//! HTTP Routers
//!
//! Two services are assembled here:
//! - Capture: `POST /capture` plus health, readiness and metrics
//! - Query: trends, funnels, recent events and async jobs under `/api`
//!
//! Both carry the observability middleware and a CORS layer, and serve
//! `/openapi.json` when the `openapi` feature is enabled.

pub mod async_query;
pub mod capture;
pub mod health;
pub mod insights;

use std::future::Future;
use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use beacon_core::StoreResult;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::API_KEY_HEADER;
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::state::{CaptureState, QueryState};
use crate::telemetry::{metrics_handler, observability_middleware};

// ============================================================================
// DEADLINES
// ============================================================================

/// Run a store call under `timeout`; an expired deadline becomes a 504.
pub(crate) async fn with_deadline<T>(
    timeout: Duration,
    call: impl Future<Output = StoreResult<T>>,
) -> ApiResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Query deadline exceeded");
            Err(ApiError::new(
                ErrorCode::Timeout,
                format!("Query did not complete within {}ms", timeout.as_millis()),
            ))
        }
    }
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([header::RETRY_AFTER])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any).expose_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

// ============================================================================
// ROUTERS
// ============================================================================

/// Routes shared by both services.
fn common_routes<S: Clone + Send + Sync + 'static>() -> Router<S> {
    let router = Router::new()
        .route("/health", get(health::liveness))
        .route("/metrics", get(metrics_handler));

    #[cfg(feature = "openapi")]
    let router = router.route("/openapi.json", get(crate::openapi::openapi_json));

    router
}

fn finish(router: Router, config: &ApiConfig) -> Router {
    // Execution order: CORS -> Observability -> Handler
    router.layer(
        ServiceBuilder::new()
            .layer(build_cors_layer(config))
            .layer(from_fn(observability_middleware)),
    )
}

/// Create the capture service router.
pub fn capture_router(state: CaptureState, config: &ApiConfig) -> Router {
    let router = common_routes()
        .route("/capture", post(capture::capture))
        .route("/ready", get(health::capture_readiness))
        .with_state(state);
    finish(router, config)
}

/// Create the query service router.
pub fn query_router(state: QueryState, config: &ApiConfig) -> Router {
    let api = insights::create_router().nest("/query/async", async_query::create_router());
    let router = common_routes()
        .nest("/api", api)
        .route("/ready", get(health::query_readiness))
        .with_state(state);
    finish(router, config)
}
