//! Offline coordinator
//!
//! Composes the store, cache, upload queue, and connectivity monitor behind
//! one interface. This is the sole surface the UI and API-client layers
//! depend on for offline behavior: cache reads/writes, queueing mutations
//! while offline, and replaying them when connectivity returns.
//!
//! # Example
//!
//! ```no_run
//! use courtsync::coordinator::OfflineCoordinator;
//! use courtsync::config::OfflineConfig;
//! use courtsync::store::MemoryBackend;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Arc::new(OfflineCoordinator::with_http_sender(
//!     Arc::new(MemoryBackend::new()),
//!     Url::parse("https://api.example.com")?,
//!     OfflineConfig::default(),
//! )?);
//!
//! // Feed platform reachability notifications into the watcher
//! let (samples_tx, samples_rx) = mpsc::unbounded_channel();
//! let handle = coordinator.clone().start(samples_rx);
//!
//! // ... hand samples_tx to the platform observer ...
//! # let _ = (samples_tx, handle);
//! # Ok(())
//! # }
//! ```

use crate::cache::OfflineCache;
use crate::config::{OfflineConfig, RetryPolicy};
use crate::connectivity::{ConnectivityMonitor, ConnectivitySample, ConnectivityState};
use crate::error::{Error, Result};
use crate::queue::{DrainReport, Method, QueueItem, UploadDraft, UploadQueue};
use crate::retry;
use crate::store::{KeyValueStore, StorageBackend};
use crate::telemetry::{NoOpTelemetry, TelemetrySink};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Delivers one queued mutation to the backend
///
/// Expected to perform exactly one delivery round-trip per call (internal
/// retries are allowed) and fail on any non-success outcome.
#[async_trait]
pub trait UploadSender: Send + Sync {
    /// Deliver `item` to its endpoint
    async fn send(&self, item: &QueueItem) -> Result<()>;
}

/// HTTP delivery over reqwest
///
/// Replays each queued item as a JSON request against `base_url`, with the
/// retry executor applied per item: transport failures and retryable status
/// codes are re-attempted under the policy, other statuses fail the item
/// immediately.
pub struct HttpUploadSender {
    client: reqwest::Client,
    base_url: Url,
    policy: RetryPolicy,
}

impl HttpUploadSender {
    /// Create a sender targeting `base_url`
    ///
    /// # Errors
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(base_url: Url, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            policy,
        })
    }
}

#[async_trait]
impl UploadSender for HttpUploadSender {
    async fn send(&self, item: &QueueItem) -> Result<()> {
        let url = self
            .base_url
            .join(&item.endpoint)
            .map_err(|e| Error::Config {
                message: format!("invalid endpoint '{}': {e}", item.endpoint),
                key: None,
            })?;

        retry::execute(&self.policy, || {
            let url = url.clone();
            async move {
                let request = match item.method {
                    Method::Post => self.client.post(url),
                    Method::Put => self.client.put(url),
                    Method::Delete => self.client.delete(url),
                };

                let response = request.json(&item.payload).send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    let message = response.text().await.unwrap_or_default();
                    Err(Error::Http {
                        status: status.as_u16(),
                        message,
                    })
                }
            }
        })
        .await
    }
}

/// Facade over the offline subsystems
///
/// Owned by the application's composition root; everything else takes it by
/// `Arc` reference.
pub struct OfflineCoordinator {
    cache: OfflineCache,
    queue: UploadQueue,
    monitor: Arc<ConnectivityMonitor>,
    sender: Arc<dyn UploadSender>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl OfflineCoordinator {
    /// Create a coordinator with the default (discarding) telemetry sink
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        sender: Arc<dyn UploadSender>,
        config: OfflineConfig,
    ) -> Self {
        Self::with_telemetry(backend, sender, config, Arc::new(NoOpTelemetry))
    }

    /// Create a coordinator that reports best-effort failures to `telemetry`
    pub fn with_telemetry(
        backend: Arc<dyn StorageBackend>,
        sender: Arc<dyn UploadSender>,
        config: OfflineConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let store = KeyValueStore::new(backend);
        let cache = OfflineCache::new(store.clone(), config.cache, telemetry.clone());
        let queue = UploadQueue::new(store, telemetry);

        Self {
            cache,
            queue,
            monitor: Arc::new(ConnectivityMonitor::new()),
            sender,
            retry: config.retry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a coordinator delivering uploads over HTTP to `base_url`
    ///
    /// The configured retry policy is applied inside the sender.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn with_http_sender(
        backend: Arc<dyn StorageBackend>,
        base_url: Url,
        config: OfflineConfig,
    ) -> Result<Self> {
        let sender = Arc::new(HttpUploadSender::new(base_url, config.retry.clone())?);
        Ok(Self::new(backend, sender, config))
    }

    /// The connectivity monitor, for callers that subscribe to state changes
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Current connectivity state
    pub fn connectivity(&self) -> ConnectivityState {
        self.monitor.state()
    }

    /// Whether the device is currently considered online
    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// The retry policy shared with callers wrapping their own fetches
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Park a mutation for delivery when connectivity allows
    pub async fn queue_upload(&self, draft: UploadDraft) -> QueueItem {
        self.queue.enqueue(draft).await
    }

    /// Number of mutations waiting for delivery
    pub async fn pending_uploads(&self) -> usize {
        self.queue.len().await
    }

    /// Attempt delivery of every queued mutation
    ///
    /// A no-op while offline: returns zero counts without touching the
    /// sender, leaving the queue for the next online transition.
    pub async fn process_queue(&self) -> DrainReport {
        if !self.monitor.is_online() {
            tracing::debug!("skipping upload queue drain while offline");
            return DrainReport::default();
        }

        let sender = Arc::clone(&self.sender);
        self.queue
            .drain(move |item| {
                let sender = Arc::clone(&sender);
                async move { sender.send(&item).await }
            })
            .await
    }

    /// Cache `value` under `key` (best-effort)
    pub async fn cache_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.cache.put(key, value).await;
    }

    /// Fetch fresh cached data under `key`
    pub async fn get_cached_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.get(key).await
    }

    /// Clear one cached entry, or the whole cache namespace when `key` is `None`
    pub async fn clear_cache(&self, key: Option<&str>) {
        match key {
            Some(key) => self.cache.remove(key).await,
            None => self.cache.clear_all().await,
        }
    }

    /// Spawn the connectivity watcher
    ///
    /// Consumes reachability samples from `samples`, updates the monitor, and
    /// triggers exactly one queue drain per not-online to online transition.
    /// The task runs until [`shutdown`](Self::shutdown) is called or the
    /// sample channel closes.
    pub fn start(
        self: Arc<Self>,
        mut samples: mpsc::UnboundedReceiver<ConnectivitySample>,
    ) -> tokio::task::JoinHandle<()> {
        let this = self;

        tokio::spawn(async move {
            tracing::info!("connectivity watcher started");

            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    sample = samples.recv() => {
                        let Some(sample) = sample else { break };

                        if this.monitor.update(&sample) {
                            tracing::info!(kind = %sample.kind, "connectivity restored, draining upload queue");
                            let report = this.process_queue().await;
                            tracing::info!(
                                succeeded = report.succeeded,
                                failed = report.failed,
                                "post-reconnect drain finished"
                            );
                        }
                    }
                }
            }

            tracing::info!("connectivity watcher stopped");
        })
    }

    /// Stop the connectivity watcher
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
