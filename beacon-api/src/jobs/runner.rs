//! Async job submission and polling.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::AggregationQuery;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::{AsyncJob, JobStatus, JobStore};
use crate::query_service::QueryService;
use crate::telemetry::metrics;

/// What a poller sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub result: Option<Value>,
}

impl From<AsyncJob> for JobView {
    fn from(job: AsyncJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result,
        }
    }
}

/// Runs aggregations in background tasks and records their outcome.
#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    queries: QueryService,
    ttl: Duration,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, queries: QueryService, ttl: Duration) -> Self {
        Self {
            store,
            queries,
            ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Record a pending job and start the query without waiting for it.
    pub async fn submit(&self, query: AggregationQuery) -> Uuid {
        let id = Uuid::now_v7();
        self.store.insert(AsyncJob::pending(id, self.ttl)).await;
        record_job("submitted");
        debug!(
            job_id = %id,
            query_type = query.query_type(),
            project_id = %query.project_id(),
            "Async job submitted"
        );

        let store = Arc::clone(&self.store);
        let queries = self.queries.clone();
        tokio::spawn(async move {
            let (status, result) = match queries.run(&query).await {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(value) => (JobStatus::Completed, value),
                    Err(e) => (JobStatus::Failed, json!({ "error": e.to_string() })),
                },
                Err(e) => (JobStatus::Failed, json!({ "error": e.to_string() })),
            };

            if status == JobStatus::Failed {
                warn!(job_id = %id, result = %result, "Async job failed");
            }
            if store.complete(id, status, result).await {
                record_job(status.as_str());
            } else {
                debug!(job_id = %id, "Async job expired before completion");
            }
        });

        id
    }

    /// Current view of a job, or `None` when unknown or expired.
    pub async fn poll(&self, id: Uuid) -> Option<JobView> {
        self.store.get(id).await.map(JobView::from)
    }
}

fn record_job(status: &str) {
    if let Some(m) = metrics() {
        m.record_job(status);
    }
}
