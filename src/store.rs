//! Persistent key-value storage
//!
//! Handles durable, namespaced, JSON-serializing storage for the cache and the
//! upload queue. The actual device storage sits behind the [`StorageBackend`]
//! trait so embedders can plug in whatever the platform provides:
//! - [`SqliteBackend`] — on-device SQLite file, the production backend
//! - [`MemoryBackend`] — in-process map for tests and ephemeral sessions
//!
//! [`KeyValueStore`] wraps a backend and handles serialization transparently.
//! Storage failures are always surfaced here; the layers above decide whether
//! a failure is best-effort.

use crate::error::StorageError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Raw string-keyed storage primitive
///
/// Implementations must surface every failure; silently dropping a write here
/// would corrupt the guarantees of the queue built on top.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the raw value stored under `key`, if any
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write `value` under `key`, replacing any previous value
    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value under `key`; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete several keys
    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// All keys currently stored
    async fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Remove every stored entry
    async fn clear(&self) -> Result<(), StorageError>;

    /// Whether a value exists under `key`
    async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.read(key).await?.is_some())
    }
}

/// In-memory storage backend
///
/// Used by tests and by embedders that want offline behavior without
/// durability (e.g. preview builds).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// SQLite-backed storage
///
/// A single `kv_store` table holds all entries. WAL mode keeps concurrent
/// reads cheap while a write is in flight.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and initialize the schema
    ///
    /// # Errors
    /// Returns [`StorageError::ConnectionFailed`] when the file cannot be
    /// opened and [`StorageError::MigrationFailed`] when the schema cannot be
    /// created.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::ConnectionFailed(format!("failed to create storage directory: {e}"))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                StorageError::ConnectionFailed(format!("failed to parse storage path: {e}"))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to open storage database: {e}"))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| {
            StorageError::MigrationFailed(format!("failed to create kv_store table: {e}"))
        })?;

        Ok(Self { pool })
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar(
            r#"
            SELECT value FROM kv_store WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::ReadFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            DELETE FROM kv_store WHERE key = ?
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DeleteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar(
            r#"
            SELECT key FROM kv_store
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::ReadFailed {
            key: "*".to_string(),
            reason: e.to_string(),
        })
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            DELETE FROM kv_store
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::DeleteFailed {
            key: "*".to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}

/// JSON-serializing facade over a [`StorageBackend`]
///
/// Values are stored as JSON text. A value that fails to deserialize (corrupt
/// or written by an incompatible version) reads as absent with a logged
/// warning; corrupt data must never crash a read.
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn StorageBackend>,
}

impl KeyValueStore {
    /// Create a store over the given backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Serialize `value` and store it under `key`
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let json = serde_json::to_string(value).map_err(|e| StorageError::Serialize {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.backend.write(key, &json).await
    }

    /// Read and deserialize the value under `key`
    ///
    /// Returns `Ok(None)` when the key is absent or holds a value that no
    /// longer deserializes.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.backend.read(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "stored value failed to deserialize, treating as absent"
                );
                Ok(None)
            }
        }
    }

    /// Remove the value under `key`
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(key).await
    }

    /// Remove several keys
    pub async fn remove_many(&self, keys: &[String]) -> Result<(), StorageError> {
        self.backend.delete_many(keys).await
    }

    /// Remove every stored entry
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.backend.clear().await
    }

    /// Whether a value exists under `key`
    pub async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.contains(key).await
    }

    /// All keys currently stored
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.backend.keys().await
    }
}
