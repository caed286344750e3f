//! Prometheus Metrics Definitions
//!
//! All beacon HTTP metrics live in the process-wide default registry and are
//! exposed at `GET /metrics` for scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, CounterVec, Encoder, Histogram, HistogramVec, IntCounter,
    IntCounterVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Broker produce latency buckets (seconds)
const PRODUCE_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<BeaconMetrics>> = Lazy::new(BeaconMetrics::new);

/// The registered metrics, or `None` if registration failed.
pub fn metrics() -> Option<&'static BeaconMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all beacon service metrics.
#[derive(Clone)]
pub struct BeaconMetrics {
    /// HTTP request counter - labels: method, path, status_class
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Events acknowledged by the broker
    pub produce_events_total: IntCounter,

    /// Failed publish calls - labels: kind (backpressure, broker, encode)
    pub produce_errors_total: IntCounterVec,

    /// Duration of one publish call
    pub produce_duration_seconds: Histogram,

    /// Result cache lookups - labels: result (hit, miss, error)
    pub query_cache_lookups_total: IntCounterVec,

    /// Async jobs - labels: status (submitted, completed, failed)
    pub async_jobs_total: IntCounterVec,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl BeaconMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "beacon_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status_class"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "beacon_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            produce_events_total: register_int_counter!(
                "beacon_produce_events_total",
                "Total events acknowledged by the broker"
            )
            .map_err(|e| registration_error("produce_events_total", e))?,

            produce_errors_total: register_int_counter_vec!(
                "beacon_produce_errors_total",
                "Failed publish calls",
                &["kind"]
            )
            .map_err(|e| registration_error("produce_errors_total", e))?,

            produce_duration_seconds: register_histogram!(
                "beacon_produce_duration_seconds",
                "Publish call duration in seconds",
                PRODUCE_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("produce_duration_seconds", e))?,

            query_cache_lookups_total: register_int_counter_vec!(
                "beacon_query_cache_lookups_total",
                "Result cache lookups",
                &["result"]
            )
            .map_err(|e| registration_error("query_cache_lookups_total", e))?,

            async_jobs_total: register_int_counter_vec!(
                "beacon_async_jobs_total",
                "Async query jobs by status",
                &["status"]
            )
            .map_err(|e| registration_error("async_jobs_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[method, path, status_class(status)])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record one publish call and its outcome.
    pub fn record_produce(&self, events: usize, error_kind: Option<&str>, duration_secs: f64) {
        self.produce_duration_seconds.observe(duration_secs);
        match error_kind {
            None => self.produce_events_total.inc_by(events as u64),
            Some(kind) => self.produce_errors_total.with_label_values(&[kind]).inc(),
        }
    }

    pub fn record_cache_lookup(&self, result: &str) {
        self.query_cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_job(&self, status: &str) {
        self.async_jobs_total.with_label_values(&[status]).inc();
    }
}

/// `2xx`, `4xx` or `5xx`; informational and redirect statuses count as `2xx`.
pub fn status_class(status: u16) -> &'static str {
    if status < 400 {
        "2xx"
    } else if status < 500 {
        "4xx"
    } else {
        "5xx"
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        metrics.record_http_request("GET", "/health", 200, 0.001);
        let count = metrics
            .http_requests_total
            .with_label_values(&["GET", "/health", "2xx"])
            .get();
        assert!(count >= 1.0);
        Ok(())
    }

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(202), "2xx");
        assert_eq!(status_class(429), "4xx");
        assert_eq!(status_class(503), "5xx");
    }

    #[test]
    fn test_record_produce_counts_events_on_success() -> Result<(), String> {
        let metrics = metrics().ok_or("Metrics init failed")?;
        let before = metrics.produce_events_total.get();
        metrics.record_produce(3, None, 0.01);
        assert!(metrics.produce_events_total.get() >= before + 3);
        Ok(())
    }
}
