//! In-process result cache with per-entry expiry.

use std::collections::HashMap;
use std::time::Duration;

use ::async_trait::async_trait;
use beacon_core::AggregationResult;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{CacheError, CacheKey, ResultCache};

#[derive(Debug)]
struct Entry {
    /// Serialized result.
    payload: String,
    expires_at: Instant,
}

/// [`ResultCache`] held in a process-local map.
///
/// Expired entries read as absent and are removed on the next access or
/// [`MemoryResultCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryResultCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<AggregationResult>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => {
                    return serde_json::from_str(&entry.payload)
                        .map(Some)
                        .map_err(|e| CacheError::Serialization {
                            reason: e.to_string(),
                        });
                }
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &CacheKey,
        result: &AggregationResult,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(result).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        self.entries.write().await.insert(
            key.clone(),
            Entry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
