//! Pluggable key/value persistence trait.
//!
//! The store holds durable process-wide settings and cached blobs as JSON
//! values. Backends are synchronous: every write has landed by the time the
//! call returns.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Durable key/value storage.
///
/// Implementations must be thread-safe.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key was never set.
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Check whether a key is present.
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Delete a key. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Read a typed value, falling back to `default` when absent or unreadable.
pub fn get_or<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str, default: T) -> T {
    match store.get(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored value for '{}' has unexpected shape: {}", key, e);
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            tracing::warn!("Failed to read '{}' from store: {}", key, e);
            default
        }
    }
}

/// Serialize and write a typed value.
pub fn set_typed<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, &value)
}
