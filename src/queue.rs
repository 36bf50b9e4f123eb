//! Durable upload queue for offline mutations
//!
//! Mutating requests that cannot reach the server are parked here and replayed
//! when connectivity returns. The whole queue is one JSON list under a single
//! fixed storage key, oldest item first.
//!
//! Every read-modify-write of the persisted list runs under one async mutex,
//! so two concurrent `enqueue` calls cannot lose each other's update and a
//! drain pass performs exactly one persisted write at its end.

use crate::store::KeyValueStore;
use crate::telemetry::TelemetrySink;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage key holding the pending-upload list
///
/// Fixed for backward-compatible upgrades.
pub const PENDING_UPLOADS_KEY: &str = "pending-uploads";

/// HTTP method of a queued mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Create a resource
    Post,
    /// Replace a resource
    Put,
    /// Remove a resource
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A mutation waiting for delivery
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique id, `{epoch_millis}_{random suffix}`
    pub id: String,
    /// Target resource path, relative to the API base
    pub endpoint: String,
    /// HTTP method to replay with
    pub method: Method,
    /// Opaque request body
    pub payload: serde_json::Value,
    /// When the item entered the queue (epoch millis)
    pub enqueued_at: i64,
}

/// A mutation to enqueue; the queue assigns id and timestamp
#[derive(Clone, Debug)]
pub struct UploadDraft {
    /// Target resource path, relative to the API base
    pub endpoint: String,
    /// HTTP method to replay with
    pub method: Method,
    /// Opaque request body
    pub payload: serde_json::Value,
}

/// Counts from one drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items delivered and dropped from the queue
    pub succeeded: usize,
    /// Items that failed and remain queued
    pub failed: usize,
}

/// Durable FIFO queue of pending mutations
pub struct UploadQueue {
    store: KeyValueStore,
    telemetry: Arc<dyn TelemetrySink>,
    // Serializes every read-modify-write of the persisted list
    lock: Mutex<()>,
}

impl UploadQueue {
    /// Create a queue over `store`
    pub fn new(store: KeyValueStore, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            store,
            telemetry,
            lock: Mutex::new(()),
        }
    }

    /// Append a mutation to the queue
    ///
    /// Returns the persisted item. Persistence is best-effort: a storage
    /// failure is logged and reported, and the returned item reflects what
    /// was attempted.
    pub async fn enqueue(&self, draft: UploadDraft) -> QueueItem {
        let _guard = self.lock.lock().await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let item = QueueItem {
            id: generate_id(now_ms),
            endpoint: draft.endpoint,
            method: draft.method,
            payload: draft.payload,
            enqueued_at: now_ms,
        };

        let mut items = self.read_items().await;
        items.push(item.clone());

        if let Err(e) = self.store.set(PENDING_UPLOADS_KEY, &items).await {
            tracing::warn!(id = %item.id, error = %e, "failed to persist upload queue");
            self.telemetry
                .report_error(&crate::error::Error::Storage(e), "queue.enqueue");
        } else {
            tracing::debug!(
                id = %item.id,
                endpoint = %item.endpoint,
                method = %item.method,
                queued = items.len(),
                "upload queued"
            );
        }

        item
    }

    /// Attempt delivery of every currently queued item, oldest first
    ///
    /// Each item that existed at drain start gets exactly one `sender` call in
    /// this pass; the sender may retry internally. Failed items stay queued in
    /// their original order. Items enqueued while the pass runs wait for the
    /// next trigger. The persisted list is written exactly once, at the end of
    /// the pass — or removed entirely when nothing remains.
    pub async fn drain<S, Fut, E>(&self, mut sender: S) -> DrainReport
    where
        S: FnMut(QueueItem) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let _guard = self.lock.lock().await;

        let items = self.read_items().await;
        if items.is_empty() {
            return DrainReport::default();
        }

        tracing::info!(count = items.len(), "draining upload queue");

        let mut succeeded = 0;
        let mut pending = Vec::new();

        for item in items {
            match sender(item.clone()).await {
                Ok(()) => {
                    tracing::debug!(id = %item.id, endpoint = %item.endpoint, "upload delivered");
                    succeeded += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        id = %item.id,
                        endpoint = %item.endpoint,
                        error = %e,
                        "upload failed, keeping queued"
                    );
                    pending.push(item);
                }
            }
        }

        let failed = pending.len();

        let result = if pending.is_empty() {
            // Remove the key outright rather than persisting an empty list
            self.store.remove(PENDING_UPLOADS_KEY).await
        } else {
            self.store.set(PENDING_UPLOADS_KEY, &pending).await
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist upload queue after drain");
            self.telemetry
                .report_error(&crate::error::Error::Storage(e), "queue.drain");
        }

        tracing::info!(succeeded, failed, "upload queue drain finished");
        DrainReport { succeeded, failed }
    }

    /// Number of items currently queued
    pub async fn len(&self) -> usize {
        self.read_items().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // A list that cannot be read cannot be preserved; start over from empty
    // and let telemetry know.
    async fn read_items(&self) -> Vec<QueueItem> {
        match self.store.get(PENDING_UPLOADS_KEY).await {
            Ok(Some(items)) => items,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read upload queue");
                self.telemetry
                    .report_error(&crate::error::Error::Storage(e), "queue.read");
                Vec::new()
            }
        }
    }
}

/// Queue item ids are `{epoch_millis}_{6-char alphanumeric suffix}`
fn generate_id(now_ms: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{now_ms}_{suffix}")
}
