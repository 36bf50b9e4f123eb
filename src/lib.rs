//! # courtsync
//!
//! Offline-resilience engine for team-management mobile backends.
//!
//! ## Design Philosophy
//!
//! courtsync is designed to be:
//! - **Offline-first** - Reads keep working from cache, writes queue for replay
//! - **Best-effort persistence** - A storage hiccup never fails the primary path
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Injected, not global** - Connectivity, storage, and telemetry are all
//!   explicit dependencies owned by the composition root
//!
//! ## Quick Start
//!
//! ```no_run
//! use courtsync::{OfflineConfig, OfflineCoordinator};
//! use courtsync::store::SqliteBackend;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = SqliteBackend::new(std::path::Path::new("offline.db")).await?;
//!
//!     let coordinator = Arc::new(OfflineCoordinator::with_http_sender(
//!         Arc::new(backend),
//!         Url::parse("https://api.example.com")?,
//!         OfflineConfig::default(),
//!     )?);
//!
//!     // Wire the platform's reachability observer into the watcher
//!     let (samples_tx, samples_rx) = mpsc::unbounded_channel();
//!     let watcher = coordinator.clone().start(samples_rx);
//!
//!     // ... push ConnectivitySample values into samples_tx ...
//!     # let _ = (samples_tx, watcher);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// TTL-based read-through cache
pub mod cache;
/// Configuration types
pub mod config;
/// Connectivity monitoring
pub mod connectivity;
/// Offline coordinator facade and upload delivery
pub mod coordinator;
/// Error types
pub mod error;
/// Durable upload queue
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Persistent key-value storage
pub mod store;
/// Error-reporting seam for best-effort failures
pub mod telemetry;

// Re-export commonly used types
pub use cache::OfflineCache;
pub use config::{CachePolicy, OfflineConfig, RetryPolicy};
pub use connectivity::{ConnectivityMonitor, ConnectivitySample, ConnectivityState};
pub use coordinator::{HttpUploadSender, OfflineCoordinator, UploadSender};
pub use error::{Error, Result, StorageError};
pub use queue::{DrainReport, Method, QueueItem, UploadDraft, UploadQueue};
pub use retry::{IsRetryable, RetryError};
pub use store::{KeyValueStore, MemoryBackend, SqliteBackend, StorageBackend};
pub use telemetry::{NoOpTelemetry, TelemetrySink};
