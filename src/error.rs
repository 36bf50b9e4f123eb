//! Error types for courtsync
//!
//! This module provides error handling for the library, including:
//! - The main [`Error`] type surfaced by network operations
//! - The [`StorageError`] sub-type surfaced by the persistence layer
//! - Helpers for retry classification (does the error carry a response status?)

use thiserror::Error;

/// Result type alias for courtsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for courtsync
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "initial_delay")
        key: Option<String>,
    },

    /// Persistent storage operation failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Server replied with a non-success status code
    #[error("HTTP {status}: {message}")]
    Http {
        /// The response status code
        status: u16,
        /// Response body or status text, for diagnostics
        message: String,
    },

    /// Transport-level failure before any server reply was received
    /// (connection refused, DNS failure, timeout before response headers)
    #[error("transport error: {0}")]
    Transport(String),

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The response status code carried by this error, if a server reply was received.
    ///
    /// Returns `None` for failures where no response arrived, which the default
    /// retry classifier treats as transient.
    pub fn response_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this is a transport-level failure: the request never produced
    /// a server reply.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Network(e) => e.status().is_none(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Persistent-storage errors
///
/// Surfaced by [`StorageBackend`](crate::store::StorageBackend) implementations and
/// the [`KeyValueStore`](crate::store::KeyValueStore). The store never swallows these;
/// the cache and queue layers built on top decide whether a failure is best-effort.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open or connect to the backing store
    #[error("failed to connect to storage: {0}")]
    ConnectionFailed(String),

    /// Failed to initialize the storage schema
    #[error("failed to run storage migrations: {0}")]
    MigrationFailed(String),

    /// Read operation failed
    #[error("read failed for key '{key}': {reason}")]
    ReadFailed {
        /// The key being read
        key: String,
        /// The underlying failure
        reason: String,
    },

    /// Write operation failed
    #[error("write failed for key '{key}': {reason}")]
    WriteFailed {
        /// The key being written
        key: String,
        /// The underlying failure
        reason: String,
    },

    /// Delete operation failed
    #[error("delete failed for key '{key}': {reason}")]
    DeleteFailed {
        /// The key being deleted
        key: String,
        /// The underlying failure
        reason: String,
    },

    /// Value could not be serialized for storage
    #[error("failed to serialize value for key '{key}': {reason}")]
    Serialize {
        /// The key whose value failed to serialize
        key: String,
        /// The underlying failure
        reason: String,
    },
}
