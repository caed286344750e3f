//! Job records and storage.

use std::time::Duration;

use ::async_trait::async_trait;
use beacon_core::Timestamp;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One async aggregation and its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncJob {
    pub id: Uuid,
    pub status: JobStatus,
    /// The aggregation result, or `{"error": ...}` for a failed job.
    pub result: Option<Value>,
    pub created_at: Timestamp,
    pub expires_at: Instant,
}

impl AsyncJob {
    /// A new pending job living for `ttl`.
    pub fn pending(id: Uuid, ttl: Duration) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            result: None,
            created_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Job storage with a single permitted terminal transition per job.
///
/// Implementations evict expired jobs lazily on access; [`JobStore::sweep_expired`]
/// bounds memory for jobs nobody polls again.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: AsyncJob);

    /// The job, or `None` when unknown or expired.
    async fn get(&self, id: Uuid) -> Option<AsyncJob>;

    /// Move a pending, unexpired job to `status` with `result`.
    ///
    /// Returns `false` (and changes nothing) when the job is unknown,
    /// expired or already terminal, or when `status` is not terminal.
    async fn complete(&self, id: Uuid, status: JobStatus, result: Value) -> bool;

    /// Remove every expired job, returning how many were removed.
    async fn sweep_expired(&self) -> usize;
}

/// Process-local job table.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, AsyncJob>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: AsyncJob) {
        self.jobs.insert(job.id, job);
    }

    async fn get(&self, id: Uuid) -> Option<AsyncJob> {
        let now = Instant::now();
        let job = self.jobs.get(&id).map(|entry| entry.value().clone())?;
        if job.is_expired(now) {
            self.jobs.remove_if(&id, |_, j| j.is_expired(now));
            return None;
        }
        Some(job)
    }

    async fn complete(&self, id: Uuid, status: JobStatus, result: Value) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let now = Instant::now();
        let expired = match self.jobs.get_mut(&id) {
            None => return false,
            Some(mut job) => {
                if job.is_expired(now) {
                    true
                } else if job.status.is_terminal() {
                    return false;
                } else {
                    job.status = status;
                    job.result = Some(result);
                    return true;
                }
            }
        };
        if expired {
            self.jobs.remove_if(&id, |_, j| j.is_expired(now));
        }
        false
    }

    async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.is_expired(now));
        before.saturating_sub(self.jobs.len())
    }
}
