//! Configuration types for courtsync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Retry behavior for transient network failures
///
/// Controls how many times an operation is re-attempted and how the delay
/// between attempts grows. Immutable for the duration of a single
/// [`retry::execute`](crate::retry::execute) call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt (default: 3)
    ///
    /// The operation is invoked at most `max_retries + 1` times in total.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    ///
    /// Must be at least `initial_delay`.
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0, must be > 1)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Response status codes classified as retryable
    /// (default: 408, 429, 500, 502, 503, 504)
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: HashSet<u16>,

    /// Add random jitter to delays (default: false)
    ///
    /// When enabled, each computed delay is extended by a uniformly random
    /// amount between 0% and 100%, spreading out simultaneous retriers.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_status_codes: default_retryable_status_codes(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Validate the policy
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the initial delay is zero, the maximum
    /// delay is shorter than the initial delay, or the multiplier is not
    /// greater than one.
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::Config {
                message: "initial_delay must be positive".to_string(),
                key: Some("initial_delay".to_string()),
            });
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::Config {
                message: format!(
                    "max_delay ({:?}) must be at least initial_delay ({:?})",
                    self.max_delay, self.initial_delay
                ),
                key: Some("max_delay".to_string()),
            });
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(Error::Config {
                message: format!(
                    "backoff_multiplier must be greater than 1, got {}",
                    self.backoff_multiplier
                ),
                key: Some("backoff_multiplier".to_string()),
            });
        }
        Ok(())
    }
}

/// Cache freshness configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Maximum age before a cached entry is considered stale (default: 24 hours)
    #[serde(default = "default_cache_ttl", with = "duration_millis")]
    pub ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
        }
    }
}

/// Top-level configuration for the offline coordinator
///
/// Groups the per-concern policies. All fields have sensible defaults, so
/// `OfflineConfig::default()` works out of the box.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Retry behavior for network operations and queue replay
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Cache freshness settings
    #[serde(default)]
    pub cache: CachePolicy,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_status_codes() -> HashSet<u16> {
    [408, 429, 500, 502, 503, 504].into_iter().collect()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

// Duration serialization helper — persisted configs carry delays in milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
