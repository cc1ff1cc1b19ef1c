//! In-memory key/value store for tests and ephemeral sessions.
//!
//! State is not persisted across restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use super::backend::{KeyValueStore, StoreError, StoreResult};

/// Lock-based in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io("store is read-only".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        self.check_writable()?;
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_then_get() {
        let store = InMemoryStore::new();
        store.set("volume", &json!(0.5)).unwrap();

        assert_eq!(store.get("volume").unwrap(), Some(json!(0.5)));
        assert!(store.has("volume").unwrap());
        assert!(!store.has("missing").unwrap());
    }

    #[test]
    fn test_remove() {
        let store = InMemoryStore::new();
        store.set("a", &json!(1)).unwrap();
        store.remove("a").unwrap();
        store.remove("never-set").unwrap();

        assert!(store.is_empty());
    }

    #[test]
    fn test_fail_writes_keeps_previous_value() {
        let store = InMemoryStore::new();
        store.set("a", &json!(1)).unwrap();
        store.set_fail_writes(true);

        assert!(store.set("a", &json!(2)).is_err());
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
    }
}
