//! Beacon API - Capture and Query HTTP Services
//!
//! This crate hosts the two HTTP front doors of the analytics pipeline:
//!
//! - The capture service validates submitted events, applies the admission
//!   limit and publishes them to the broker.
//! - The query service answers trend, funnel and recent-event queries from
//!   the columnar store, with a result cache and an async job runner for
//!   long aggregations.
//!
//! The `beacon-loader` binary that drains the broker into the store also
//! lives here so that all three processes share one telemetry setup.

pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod query_service;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{HttpKeyValidator, KeyValidator, StaticKeyValidator};
pub use config::{ApiConfig, CaptureConfig, ConfigError, QueryConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{InMemoryJobStore, JobRunner, JobStatus, JobStore, JobView};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use query_service::QueryService;
pub use rate_limit::{AdmissionLimiter, InMemoryRateLimitStore, RateLimitStore};
pub use routes::{capture_router, query_router};
pub use state::{CaptureState, QueryState};
