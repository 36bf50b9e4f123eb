//! TTL-based read-through cache
//!
//! Caches opaque JSON payloads under caller-supplied keys so screens keep
//! rendering while the device is offline. Entries live as a value/timestamp
//! pair of storage keys; an entry is fresh while `now - stored_at <= ttl`.
//! Stale entries are evicted lazily on the read that discovers them — there is
//! no background sweep.
//!
//! Cache persistence is best-effort: a storage failure is logged and reported
//! to telemetry, never propagated, so a cache hiccup cannot fail the caller's
//! primary operation.

use crate::config::CachePolicy;
use crate::error::Error;
use crate::store::KeyValueStore;
use crate::telemetry::TelemetrySink;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Storage key prefix for cached values
///
/// Fixed for backward-compatible upgrades; entries written by earlier app
/// versions must stay readable.
pub const CACHE_PREFIX: &str = "cache:";

/// Storage key prefix for cache timestamps, parallel to [`CACHE_PREFIX`]
pub const CACHE_TIMESTAMP_PREFIX: &str = "cache-timestamp:";

/// Read-through cache over the persistent store
pub struct OfflineCache {
    store: KeyValueStore,
    policy: CachePolicy,
    telemetry: Arc<dyn TelemetrySink>,
}

impl OfflineCache {
    /// Create a cache over `store` with the given freshness policy
    pub fn new(store: KeyValueStore, policy: CachePolicy, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            store,
            policy,
            telemetry,
        }
    }

    /// Cache `value` under `key`
    ///
    /// Writes the value and the current timestamp. Best-effort: failures are
    /// logged and reported, never returned.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.put_at(key, value, chrono::Utc::now().timestamp_millis())
            .await;
    }

    async fn put_at<T: Serialize + ?Sized>(&self, key: &str, value: &T, now_ms: i64) {
        let value_key = format!("{CACHE_PREFIX}{key}");
        let timestamp_key = format!("{CACHE_TIMESTAMP_PREFIX}{key}");

        let result = async {
            self.store.set(&value_key, value).await?;
            self.store.set(&timestamp_key, &now_ms).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "cache write failed");
            self.telemetry.report_error(&Error::Storage(e), "cache.put");
        }
    }

    /// Fetch the cached value under `key`, if still fresh
    ///
    /// Returns `None` for absent, expired, or unreadable entries; an expired
    /// entry is removed before returning. An entry with a value but no
    /// timestamp is treated as fresh — entries written before timestamps were
    /// tracked must not expire spuriously.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_at(key, chrono::Utc::now().timestamp_millis())
            .await
    }

    async fn get_at<T: DeserializeOwned>(&self, key: &str, now_ms: i64) -> Option<T> {
        let value_key = format!("{CACHE_PREFIX}{key}");
        let timestamp_key = format!("{CACHE_TIMESTAMP_PREFIX}{key}");

        let value: T = match self.store.get(&value_key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed");
                self.telemetry.report_error(&Error::Storage(e), "cache.get");
                return None;
            }
        };

        let stored_at: Option<i64> = match self.store.get(&timestamp_key).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache timestamp read failed");
                self.telemetry.report_error(&Error::Storage(e), "cache.get");
                return None;
            }
        };

        if let Some(stored_at) = stored_at {
            let ttl_ms = i64::try_from(self.policy.ttl.as_millis()).unwrap_or(i64::MAX);
            if now_ms.saturating_sub(stored_at) > ttl_ms {
                tracing::debug!(key = %key, "cache entry expired, evicting");
                self.evict(key).await;
                return None;
            }
        }

        tracing::debug!(key = %key, "cache hit");
        Some(value)
    }

    /// Remove the cached entry under `key`
    ///
    /// Best-effort, like all cache mutations.
    pub async fn remove(&self, key: &str) {
        self.evict(key).await;
    }

    /// Remove every entry in the cache namespace
    ///
    /// Scans all stored keys and batch-removes the ones under the cache
    /// prefixes. Entries outside the namespace (e.g. the upload queue) are
    /// untouched.
    pub async fn clear_all(&self) {
        let result = async {
            let keys = self.store.keys().await?;
            let cache_keys: Vec<String> = keys
                .into_iter()
                .filter(|k| k.starts_with(CACHE_PREFIX) || k.starts_with(CACHE_TIMESTAMP_PREFIX))
                .collect();
            self.store.remove_many(&cache_keys).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "cache clear failed");
            self.telemetry
                .report_error(&Error::Storage(e), "cache.clear");
        }
    }

    // Removal failures are swallowed; a stale pair left behind is re-evicted
    // on the next read.
    async fn evict(&self, key: &str) {
        let value_key = format!("{CACHE_PREFIX}{key}");
        let timestamp_key = format!("{CACHE_TIMESTAMP_PREFIX}{key}");

        if let Err(e) = self.store.remove_many(&[value_key, timestamp_key]).await {
            tracing::warn!(key = %key, error = %e, "cache eviction failed");
            self.telemetry
                .report_error(&Error::Storage(e), "cache.evict");
        }
    }
}
