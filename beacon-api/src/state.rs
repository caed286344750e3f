//! Shared state for the capture and query routers.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::IngressValidator;
use beacon_pipeline::EventPublisher;

use crate::auth::KeyValidator;
use crate::config::{CaptureConfig, DEFAULT_QUERY_TIMEOUT_SECS};
use crate::jobs::JobRunner;
use crate::query_service::QueryService;
use crate::rate_limit::AdmissionLimiter;

/// State behind `POST /capture`.
#[derive(Clone)]
pub struct CaptureState {
    pub validator: IngressValidator,
    pub publisher: EventPublisher,
    pub limiter: AdmissionLimiter,
    /// `None` disables key lookups entirely.
    pub key_validator: Option<Arc<dyn KeyValidator>>,
    pub config: CaptureConfig,
}

impl CaptureState {
    pub fn new(config: CaptureConfig, publisher: EventPublisher) -> Self {
        Self {
            validator: IngressValidator::new(config.ingest_limits()),
            publisher,
            limiter: AdmissionLimiter::default(),
            key_validator: None,
            config,
        }
    }

    pub fn with_key_validator(mut self, validator: Arc<dyn KeyValidator>) -> Self {
        self.key_validator = Some(validator);
        self
    }

    pub fn with_limiter(mut self, limiter: AdmissionLimiter) -> Self {
        self.limiter = limiter;
        self
    }
}

/// State behind the `/api/*` query routes.
#[derive(Clone)]
pub struct QueryState {
    pub queries: QueryService,
    pub jobs: JobRunner,
    /// Deadline for one synchronous query.
    pub request_timeout: Duration,
}

impl QueryState {
    pub fn new(queries: QueryService, jobs: JobRunner) -> Self {
        Self {
            queries,
            jobs,
            request_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}
