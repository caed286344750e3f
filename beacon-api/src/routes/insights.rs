//! Trend, funnel and recent-events endpoints.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use beacon_core::query::{MAX_FUNNEL_STEPS, MIN_FUNNEL_STEPS};
use beacon_core::{
    clamp_conversion_window, DateRange, FunnelMode, FunnelQuery, FunnelResult, Interval,
    RecentEventsQuery, StoredEvent, TrendQuery, TrendResult, DEFAULT_PROJECT_ID,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::with_deadline;
use crate::error::{ApiError, ApiResult};
use crate::state::QueryState;

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Query string of `GET /api/trends`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct TrendParams {
    /// Defaults to `default`
    pub project_id: Option<String>,
    pub event: Option<String>,
    /// `YYYY-MM-DD`, inclusive
    pub date_from: Option<String>,
    /// `YYYY-MM-DD`, inclusive
    pub date_to: Option<String>,
    /// `day`, `week` or `month`; anything else is treated as `day`
    pub interval: Option<String>,
}

impl TrendParams {
    pub fn into_query(self) -> ApiResult<TrendQuery> {
        let event = self
            .event
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| missing("event"))?;
        let range = parse_range(self.date_from.as_deref(), self.date_to.as_deref())?;

        Ok(TrendQuery {
            project_id: project_or_default(self.project_id),
            event,
            range,
            interval: self
                .interval
                .as_deref()
                .map(Interval::parse_lenient)
                .unwrap_or_default(),
        })
    }
}

/// Body of `POST /api/funnels`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FunnelRequest {
    pub project_id: Option<String>,
    /// Between 2 and 20 event names, in order
    #[serde(default)]
    pub steps: Vec<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    /// Ordered, time-windowed matching (default: true)
    pub strict: Option<bool>,
    /// Strict-mode window, clamped to 1..=365 (default: 30)
    pub conversion_window_days: Option<i64>,
}

impl FunnelRequest {
    pub fn into_query(self) -> ApiResult<FunnelQuery> {
        let count = self.steps.len();
        if !(MIN_FUNNEL_STEPS..=MAX_FUNNEL_STEPS).contains(&count) {
            return Err(ApiError::invalid_input(format!(
                "A funnel needs between {} and {} steps, got {}",
                MIN_FUNNEL_STEPS, MAX_FUNNEL_STEPS, count
            ))
            .with_details(json!({ "field": "steps" })));
        }
        let range = parse_range(self.date_from.as_deref(), self.date_to.as_deref())?;

        Ok(FunnelQuery {
            project_id: project_or_default(self.project_id),
            steps: self.steps,
            range,
            mode: FunnelMode::from_strict(self.strict.unwrap_or(true)),
            conversion_window_days: clamp_conversion_window(self.conversion_window_days),
        })
    }
}

/// Query string of `GET /api/events/recent`.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
pub struct RecentParams {
    pub project_id: Option<String>,
    /// At most 500 (default: 100)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RecentEventsResponse {
    pub events: Vec<StoredEvent>,
}

fn project_or_default(project_id: Option<String>) -> String {
    project_id
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string())
}

fn missing(field: &str) -> ApiError {
    ApiError::invalid_input(format!("Missing required parameter '{}'", field))
        .with_details(json!({ "field": field }))
}

fn parse_range(from: Option<&str>, to: Option<&str>) -> ApiResult<DateRange> {
    let from = from.ok_or_else(|| missing("date_from"))?;
    let to = to.ok_or_else(|| missing("date_to"))?;
    Ok(DateRange::parse(from, to)?)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/trends - Event counts per time bucket
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/trends",
    tag = "Insights",
    params(TrendParams),
    responses(
        (status = 200, description = "Non-empty buckets in ascending order", body = TrendResult),
        (status = 400, description = "Missing or invalid parameters", body = ApiError),
        (status = 503, description = "Event store unavailable", body = ApiError),
        (status = 504, description = "Query timed out", body = ApiError),
    ),
))]
pub async fn trends(
    State(state): State<QueryState>,
    params: Result<Query<TrendParams>, QueryRejection>,
) -> ApiResult<Json<TrendResult>> {
    let Query(params) = params.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let query = params.into_query()?;
    let result = with_deadline(state.request_timeout, state.queries.trend(query)).await?;
    Ok(Json(result))
}

/// POST /api/funnels - Step-by-step conversion counts
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/funnels",
    tag = "Insights",
    request_body = FunnelRequest,
    responses(
        (status = 200, description = "One entry per step", body = FunnelResult),
        (status = 400, description = "Invalid steps or dates", body = ApiError),
        (status = 503, description = "Event store unavailable", body = ApiError),
        (status = 504, description = "Query timed out", body = ApiError),
    ),
))]
pub async fn funnels(
    State(state): State<QueryState>,
    body: Bytes,
) -> ApiResult<Json<FunnelResult>> {
    let request: FunnelRequest = serde_json::from_slice(&body)?;
    let query = request.into_query()?;
    let result = with_deadline(state.request_timeout, state.queries.funnel(query)).await?;
    Ok(Json(result))
}

/// GET /api/events/recent - Latest events of a project
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/events/recent",
    tag = "Insights",
    params(RecentParams),
    responses(
        (status = 200, description = "Newest first", body = RecentEventsResponse),
        (status = 503, description = "Event store unavailable", body = ApiError),
    ),
))]
pub async fn recent_events(
    State(state): State<QueryState>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> ApiResult<Json<RecentEventsResponse>> {
    let Query(params) = params.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let query = RecentEventsQuery::new(project_or_default(params.project_id), params.limit);
    let events = with_deadline(state.request_timeout, state.queries.recent(&query)).await?;
    Ok(Json(RecentEventsResponse { events }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<QueryState> {
    Router::new()
        .route("/trends", get(trends))
        .route("/funnels", post(funnels))
        .route("/events/recent", get(recent_events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn trend_params() -> TrendParams {
        TrendParams {
            project_id: None,
            event: Some("signup".to_string()),
            date_from: Some("2026-10-01".to_string()),
            date_to: Some("2026-10-31".to_string()),
            interval: Some("fortnight".to_string()),
        }
    }

    #[test]
    fn test_trend_defaults() {
        let query = trend_params().into_query().unwrap();
        assert_eq!(query.project_id, "default");
        assert_eq!(query.interval, Interval::Day);
    }

    #[test]
    fn test_trend_requires_event() {
        let params = TrendParams {
            event: Some("  ".to_string()),
            ..trend_params()
        };
        let err = params.into_query().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert_eq!(err.details, Some(json!({"field": "event"})));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let params = TrendParams {
            date_from: Some("2026-10-31".to_string()),
            date_to: Some("2026-10-01".to_string()),
            ..trend_params()
        };
        assert_eq!(
            params.into_query().unwrap_err().status_code(),
            axum::http::StatusCode::BAD_REQUEST
        );
    }

    fn funnel_request(steps: &[&str]) -> FunnelRequest {
        FunnelRequest {
            steps: steps.iter().map(|s| s.to_string()).collect(),
            date_from: Some("2026-10-01".to_string()),
            date_to: Some("2026-10-31".to_string()),
            ..FunnelRequest::default()
        }
    }

    #[test]
    fn test_funnel_defaults_to_strict_thirty_days() {
        let query = funnel_request(&["visit", "signup"]).into_query().unwrap();
        assert_eq!(query.mode, FunnelMode::Strict);
        assert_eq!(query.conversion_window_days, 30);
    }

    #[test]
    fn test_funnel_step_bounds() {
        assert!(funnel_request(&["visit"]).into_query().is_err());
        let many: Vec<String> = (0..21).map(|i| format!("e{}", i)).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(funnel_request(&refs).into_query().is_err());
        assert!(funnel_request(&refs[..20]).into_query().is_ok());
    }

    #[test]
    fn test_funnel_window_clamped() {
        let request = FunnelRequest {
            conversion_window_days: Some(9000),
            strict: Some(false),
            ..funnel_request(&["visit", "signup"])
        };
        let query = request.into_query().unwrap();
        assert_eq!(query.conversion_window_days, 365);
        assert_eq!(query.mode, FunnelMode::Simple);
    }
}
