//! Beacon Telemetry - Observability Infrastructure
//!
//! Structured JSON logging via `tracing-subscriber` and Prometheus metrics
//! for the HTTP services. Works standalone without external collectors.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics, metrics_handler, BeaconMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracing, TelemetryConfig, DEFAULT_FILTER};
