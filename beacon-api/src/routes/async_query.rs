//! Async Query Endpoints
//!
//! `POST /api/query/async` records a pending job and returns its id at once;
//! the aggregation runs in a background task. `GET /api/query/async/:id`
//! reports the job until it expires.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use beacon_core::AggregationQuery;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::insights::{FunnelRequest, TrendParams};
use crate::error::{ApiError, ApiResult};
use crate::jobs::{JobStatus, JobView};
use crate::state::QueryState;

/// Body of `POST /api/query/async`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AsyncQueryRequest {
    /// Overrides any `project_id` inside `params`
    pub project_id: Option<String>,
    /// `trend` or `funnel` (default: trend)
    #[serde(rename = "type")]
    pub query_type: Option<String>,
    /// Parameters of the chosen query type; dates default to today
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub params: Option<Value>,
}

impl AsyncQueryRequest {
    pub fn into_query(self) -> ApiResult<AggregationQuery> {
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        let params = match self.params {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(Value::Object(map)) => Value::Object(map),
            Some(_) => return Err(ApiError::invalid_input("'params' must be an object")),
        };

        match self.query_type.as_deref().unwrap_or("trend") {
            "trend" => {
                let mut params: TrendParams = serde_json::from_value(params)?;
                if self.project_id.is_some() {
                    params.project_id = self.project_id;
                }
                params.date_from.get_or_insert_with(|| today.clone());
                params.date_to.get_or_insert(today);
                Ok(AggregationQuery::Trend(params.into_query()?))
            }
            "funnel" => {
                let mut params: FunnelRequest = serde_json::from_value(params)?;
                if self.project_id.is_some() {
                    params.project_id = self.project_id;
                }
                params.date_from.get_or_insert_with(|| today.clone());
                params.date_to.get_or_insert(today);
                Ok(AggregationQuery::Funnel(params.into_query()?))
            }
            other => Err(ApiError::invalid_input(format!(
                "Unknown query type '{}'; expected 'trend' or 'funnel'",
                other
            ))),
        }
    }
}

/// POST /api/query/async - Submit an aggregation to run in the background
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/query/async",
    tag = "Async Queries",
    request_body = AsyncQueryRequest,
    responses(
        (status = 202, description = "Job recorded as pending", body = JobView),
        (status = 400, description = "Unknown type or invalid parameters", body = ApiError),
    ),
))]
pub async fn submit(
    State(state): State<QueryState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let request: AsyncQueryRequest = if body.is_empty() {
        AsyncQueryRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };
    let query = request.into_query()?;
    let job_id = state.jobs.submit(query).await;

    // Report pending regardless of how quickly the task finishes.
    Ok((
        StatusCode::ACCEPTED,
        Json(JobView {
            job_id,
            status: JobStatus::Pending,
            result: None,
        }),
    ))
}

/// GET /api/query/async/:id - Poll a job
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/query/async/{id}",
    tag = "Async Queries",
    params(
        ("id" = String, Path, description = "Job id returned on submission"),
    ),
    responses(
        (status = 200, description = "Job finished", body = JobView),
        (status = 202, description = "Job still pending", body = JobView),
        (status = 404, description = "Unknown or expired job", body = ApiError),
    ),
))]
pub async fn poll(
    State(state): State<QueryState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let job_id = Uuid::parse_str(&id).map_err(|_| ApiError::job_not_found(&id))?;
    let view = state
        .jobs
        .poll(job_id)
        .await
        .ok_or_else(|| ApiError::job_not_found(job_id))?;

    let status = if view.status.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(view)))
}

pub fn create_router() -> Router<QueryState> {
    Router::new()
        .route("/", post(submit))
        .route("/:id", get(poll))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::FunnelMode;
    use serde_json::json;

    fn request(body: Value) -> AsyncQueryRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_type_defaults_to_trend_over_today() {
        let query = request(json!({"params": {"event": "signup"}}))
            .into_query()
            .unwrap();
        let AggregationQuery::Trend(trend) = query else {
            panic!("expected a trend query");
        };
        let today = Utc::now().date_naive();
        assert_eq!(trend.range.from, today);
        assert_eq!(trend.range.to, today);
        assert_eq!(trend.project_id, "default");
    }

    #[test]
    fn test_top_level_project_overrides_params() {
        let query = request(json!({
            "project_id": "acme",
            "type": "funnel",
            "params": {"project_id": "other", "steps": ["visit", "signup"], "strict": false}
        }))
        .into_query()
        .unwrap();
        let AggregationQuery::Funnel(funnel) = query else {
            panic!("expected a funnel query");
        };
        assert_eq!(funnel.project_id, "acme");
        assert_eq!(funnel.mode, FunnelMode::Simple);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = request(json!({"type": "retention", "params": {}}))
            .into_query()
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_non_object_params_rejected() {
        assert!(request(json!({"params": [1, 2]})).into_query().is_err());
    }
}
