//! Admission Limiter
//!
//! Fixed-window-per-minute counters keyed by API key or client address.
//! The window is wall-clock time floored to the minute, and a key's counter
//! resets when its window advances. Counter storage sits behind
//! [`RateLimitStore`] so the atomic increment is the contract, not the map.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ::async_trait::async_trait;
use axum::http::HeaderMap;
use dashmap::DashMap;

/// Window length in seconds.
pub const WINDOW_SECS: u64 = 60;

/// Counter storage with an atomic increment per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the counter for `key` in `window` and return the new count.
    ///
    /// A counter belonging to an earlier window restarts at zero before the
    /// increment. Read and increment happen as one unit.
    async fn incr(&self, key: &str, window: u64) -> u64;
}

/// Process-local counters.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    // key -> (window, count)
    counters: DashMap<String, (u64, u64)>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop counters whose window is older than `current_window`.
    pub fn evict_stale(&self, current_window: u64) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, (window, _)| *window >= current_window);
        before - self.counters.len()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn incr(&self, key: &str, window: u64) -> u64 {
        // The entry guard holds the shard lock for the whole update.
        let mut entry = self.counters.entry(key.to_string()).or_insert((window, 0));
        let (current_window, count) = entry.value_mut();
        if window > *current_window {
            *current_window = window;
            *count = 0;
        }
        *count += 1;
        *count
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Seconds until the next window; 0 when allowed.
    pub retry_after: u64,
}

impl Admission {
    const ALLOWED: Admission = Admission {
        allowed: true,
        retry_after: 0,
    };
}

/// Fixed-window admission control over a shared [`RateLimitStore`].
#[derive(Clone)]
pub struct AdmissionLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for AdmissionLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionLimiter").finish_non_exhaustive()
    }
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()))
    }
}

impl AdmissionLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    /// Check `key` against `limit` requests per minute at the current time.
    pub async fn admit(&self, key: &str, limit: i64) -> Admission {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.admit_at(key, limit, now).await
    }

    /// Check `key` against `limit` at `now_secs` (seconds since the epoch).
    ///
    /// `limit <= 0` always admits without touching the counters.
    pub async fn admit_at(&self, key: &str, limit: i64, now_secs: f64) -> Admission {
        if limit <= 0 {
            return Admission::ALLOWED;
        }
        let now_secs = now_secs.max(0.0);
        let window = (now_secs / WINDOW_SECS as f64).floor() as u64;
        let count = self.store.incr(key, window).await;
        if count <= limit as u64 {
            return Admission::ALLOWED;
        }
        Admission {
            allowed: false,
            retry_after: retry_after_secs(now_secs),
        }
    }
}

/// Seconds until the next minute boundary, in `[1, 60]`.
pub fn retry_after_secs(now_secs: f64) -> u64 {
    let into_window = now_secs.rem_euclid(WINDOW_SECS as f64);
    let remaining = (WINDOW_SECS as f64 - into_window).floor() as u64 + 1;
    remaining.clamp(1, WINDOW_SECS)
}

/// Extract client IP, considering proxy headers.
///
/// Order: first `X-Forwarded-For` entry, then `X-Real-IP`, then the socket
/// address.
pub fn extract_client_ip(headers: &HeaderMap, fallback: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(forwarded_for) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse() {
                return Some(ip);
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return Some(ip);
        }
    }

    fallback.map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    // 2026-10-15T12:00:00Z
    const MINUTE_START: f64 = 1_792_065_600.0;

    #[tokio::test]
    async fn test_limit_zero_always_admits() {
        let limiter = AdmissionLimiter::default();
        for _ in 0..1000 {
            assert!(limiter.admit_at("k", 0, MINUTE_START).await.allowed);
        }
        assert!(limiter.admit_at("k", -5, MINUTE_START).await.allowed);
    }

    #[tokio::test]
    async fn test_rejects_after_limit_within_window() {
        let limiter = AdmissionLimiter::default();
        for _ in 0..3 {
            assert_eq!(
                limiter.admit_at("k", 3, MINUTE_START + 10.0).await,
                Admission::ALLOWED
            );
        }
        let rejected = limiter.admit_at("k", 3, MINUTE_START + 10.0).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after, 51);
    }

    #[tokio::test]
    async fn test_next_window_admits_again() {
        let limiter = AdmissionLimiter::default();
        assert!(limiter.admit_at("k", 1, MINUTE_START + 59.0).await.allowed);
        assert!(!limiter.admit_at("k", 1, MINUTE_START + 59.5).await.allowed);
        assert!(limiter.admit_at("k", 1, MINUTE_START + 60.0).await.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = AdmissionLimiter::default();
        assert!(limiter.admit_at("a", 1, MINUTE_START).await.allowed);
        assert!(limiter.admit_at("b", 1, MINUTE_START).await.allowed);
        assert!(!limiter.admit_at("a", 1, MINUTE_START).await.allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let limiter = AdmissionLimiter::default();
        let mut handles = Vec::new();
        for _ in 0..200 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.admit_at("shared", 50, MINUTE_START).await.allowed
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_retry_after_bounds() {
        assert_eq!(retry_after_secs(MINUTE_START), 60);
        assert_eq!(retry_after_secs(MINUTE_START + 0.5), 60);
        assert_eq!(retry_after_secs(MINUTE_START + 59.9), 1);
        assert_eq!(retry_after_secs(MINUTE_START + 30.0), 31);
    }

    #[tokio::test]
    async fn test_evict_stale_windows() {
        let store = InMemoryRateLimitStore::new();
        store.incr("old", 10).await;
        store.incr("new", 11).await;
        assert_eq!(store.evict_stale(11), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_extract_client_ip_order() {
        let socket: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_client_ip(&headers, Some(socket)),
            Some("10.0.0.9".parse().unwrap())
        );

        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.1"));
        assert_eq!(
            extract_client_ip(&headers, Some(socket)),
            Some("192.168.1.1".parse().unwrap())
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(
            extract_client_ip(&headers, Some(socket)),
            Some("203.0.113.5".parse().unwrap())
        );

        assert_eq!(extract_client_ip(&HeaderMap::new(), None), None);
    }
}
