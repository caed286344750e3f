//! Service Configuration
//!
//! Environment-driven settings for the capture and query services. Every
//! value has a default suitable for local development; malformed numeric
//! values fall back to the default, while a bind address that cannot be
//! parsed is reported as a [`ConfigError`].

use std::net::SocketAddr;
use std::time::Duration;

use beacon_core::IngestLimits;
use beacon_storage::ClickHouseConfig;
use thiserror::Error;

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_AUTH_URL: &str = "http://localhost:8001/api";
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_QUERY_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_ASYNC_JOB_TTL_SECS: u64 = 3600;
pub const DEFAULT_JOB_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CAPTURE_PORT: u16 = 8000;
pub const DEFAULT_QUERY_PORT: u16 = 8002;

/// Configuration problems that make startup impossible.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address {addr}: {reason}")]
    InvalidBindAddress { addr: String, reason: String },

    #[error("invalid configuration value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ============================================================================
// HTTP SURFACE
// ============================================================================

/// Settings shared by both HTTP services.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    pub bind_host: String,
    pub capture_port: u16,
    pub query_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
            bind_host: "0.0.0.0".to_string(),
            capture_port: DEFAULT_CAPTURE_PORT,
            query_port: DEFAULT_QUERY_PORT,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `BEACON_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `BEACON_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `BEACON_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `BEACON_BIND_HOST`: Listen host for both services (default: 0.0.0.0)
    /// - `BEACON_CAPTURE_PORT`: Capture service port (default: 8000)
    /// - `BEACON_QUERY_PORT`: Query service port (default: 8002)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("BEACON_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            cors_origins,
            cors_allow_credentials: env_flag("BEACON_CORS_ALLOW_CREDENTIALS", false),
            cors_max_age_secs: env_or("BEACON_CORS_MAX_AGE_SECS", 86400),
            bind_host: env_string("BEACON_BIND_HOST", "0.0.0.0"),
            capture_port: env_or("BEACON_CAPTURE_PORT", DEFAULT_CAPTURE_PORT),
            query_port: env_or("BEACON_QUERY_PORT", DEFAULT_QUERY_PORT),
        }
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    pub fn capture_addr(&self) -> Result<SocketAddr, ConfigError> {
        bind_addr(&self.bind_host, self.capture_port)
    }

    pub fn query_addr(&self) -> Result<SocketAddr, ConfigError> {
        bind_addr(&self.bind_host, self.query_port)
    }
}

fn bind_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidBindAddress {
            addr,
            reason: e.to_string(),
        })
}

// ============================================================================
// CAPTURE
// ============================================================================

/// Settings for the capture service.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Largest accepted request body (default: 1 MiB)
    pub max_body_bytes: usize,

    /// Reject submissions without a valid API key (default: false)
    pub require_api_key: bool,

    /// Base URL of the auth service that validates API keys
    pub auth_url: String,

    pub auth_timeout: Duration,

    /// Requests per minute per key or client address; 0 disables (default: 0)
    pub rate_limit_per_minute: i64,

    /// Deadline for one publish call (default: 5 seconds)
    pub send_timeout: Duration,

    /// Topic receiving canonical events (default: events)
    pub events_topic: String,

    /// Comma-separated broker list (default: localhost:9092)
    pub brokers: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            require_api_key: false,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            rate_limit_per_minute: 0,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            events_topic: beacon_pipeline::loader::config::DEFAULT_EVENTS_TOPIC.to_string(),
            brokers: beacon_pipeline::loader::config::DEFAULT_KAFKA_BROKERS.to_string(),
        }
    }
}

impl CaptureConfig {
    /// Create CaptureConfig from environment variables.
    ///
    /// Environment variables:
    /// - `BEACON_MAX_BODY_BYTES` (default: 1048576)
    /// - `BEACON_REQUIRE_API_KEY` (default: false)
    /// - `BEACON_AUTH_URL` (default: http://localhost:8001/api)
    /// - `BEACON_RATE_LIMIT_PER_MINUTE` (default: 0, disabled)
    /// - `BEACON_SEND_TIMEOUT_MS` (default: 5000)
    /// - `BEACON_EVENTS_TOPIC` (default: events)
    /// - `BEACON_BROKERS` (default: localhost:9092)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_body_bytes: env_or("BEACON_MAX_BODY_BYTES", defaults.max_body_bytes),
            require_api_key: env_flag("BEACON_REQUIRE_API_KEY", defaults.require_api_key),
            auth_url: env_string("BEACON_AUTH_URL", &defaults.auth_url),
            auth_timeout: defaults.auth_timeout,
            rate_limit_per_minute: env_or(
                "BEACON_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            send_timeout: Duration::from_millis(env_or(
                "BEACON_SEND_TIMEOUT_MS",
                DEFAULT_SEND_TIMEOUT_MS,
            )),
            events_topic: env_string("BEACON_EVENTS_TOPIC", &defaults.events_topic),
            brokers: env_string("BEACON_BROKERS", &defaults.brokers),
        }
    }

    /// Validator limits derived from this configuration.
    pub fn ingest_limits(&self) -> IngestLimits {
        IngestLimits::default().with_max_body_bytes(self.max_body_bytes)
    }
}

// ============================================================================
// QUERY
// ============================================================================

/// Settings for the query service.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub clickhouse: ClickHouseConfig,

    /// Result cache entry lifetime (default: 60 seconds)
    pub cache_ttl: Duration,

    /// Async job lifetime (default: 1 hour)
    pub job_ttl: Duration,

    /// How often expired jobs are swept (default: 60 seconds)
    pub job_sweep_interval: Duration,

    /// Deadline for one synchronous query request (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            clickhouse: ClickHouseConfig::default(),
            cache_ttl: Duration::from_secs(DEFAULT_QUERY_CACHE_TTL_SECS),
            job_ttl: Duration::from_secs(DEFAULT_ASYNC_JOB_TTL_SECS),
            job_sweep_interval: Duration::from_secs(DEFAULT_JOB_SWEEP_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

impl QueryConfig {
    /// Create QueryConfig from environment variables.
    ///
    /// Environment variables:
    /// - `BEACON_CLICKHOUSE_URL` (default: http://localhost:8123)
    /// - `BEACON_CLICKHOUSE_DATABASE` (default: analytics)
    /// - `BEACON_CLICKHOUSE_TABLE` (default: events)
    /// - `BEACON_CLICKHOUSE_USER` / `BEACON_CLICKHOUSE_PASSWORD` (optional)
    /// - `BEACON_QUERY_CACHE_TTL_SECS` (default: 60)
    /// - `BEACON_ASYNC_JOB_TTL_SECS` (default: 3600)
    /// - `BEACON_JOB_SWEEP_INTERVAL_SECS` (default: 60)
    /// - `BEACON_QUERY_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        let defaults = ClickHouseConfig::default();
        let clickhouse = ClickHouseConfig {
            url: env_string("BEACON_CLICKHOUSE_URL", &defaults.url),
            database: env_string("BEACON_CLICKHOUSE_DATABASE", &defaults.database),
            table: env_string("BEACON_CLICKHOUSE_TABLE", &defaults.table),
            user: std::env::var("BEACON_CLICKHOUSE_USER").ok(),
            password: std::env::var("BEACON_CLICKHOUSE_PASSWORD").ok(),
            request_timeout: defaults.request_timeout,
        };

        Self {
            clickhouse,
            cache_ttl: Duration::from_secs(env_or(
                "BEACON_QUERY_CACHE_TTL_SECS",
                DEFAULT_QUERY_CACHE_TTL_SECS,
            )),
            job_ttl: Duration::from_secs(env_or(
                "BEACON_ASYNC_JOB_TTL_SECS",
                DEFAULT_ASYNC_JOB_TTL_SECS,
            )),
            job_sweep_interval: Duration::from_secs(
                env_or("BEACON_JOB_SWEEP_INTERVAL_SECS", DEFAULT_JOB_SWEEP_INTERVAL_SECS).max(1),
            ),
            request_timeout: Duration::from_secs(
                env_or("BEACON_QUERY_TIMEOUT_SECS", DEFAULT_QUERY_TIMEOUT_SECS).max(1),
            ),
        }
    }
}
