//! SQLite-backed key/value store.
//!
//! Values are stored as JSON text in a single table so the store can hold
//! any serde-serializable blob.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::backend::{KeyValueStore, StoreResult};

/// Persistent store in a local SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Get the database path.
    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        let text = serde_json::to_string(value)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, text, now],
        )?;
        Ok(())
    }

    fn has(&self, key: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_in_memory() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set("history", &json!({"entries": {"21": {"history": {}}}}))
            .unwrap();

        let loaded = store.get("history").unwrap().unwrap();
        assert_eq!(loaded["entries"]["21"]["history"], json!({}));
    }

    #[test]
    fn test_overwrite_and_remove() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("dubbed", &json!(false)).unwrap();
        store.set("dubbed", &json!(true)).unwrap();
        assert_eq!(store.get("dubbed").unwrap(), Some(json!(true)));

        store.remove("dubbed").unwrap();
        assert!(!store.has("dubbed").unwrap());
        assert_eq!(store.get("dubbed").unwrap(), None);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("anidesk.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("volume", &json!(0.75)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("volume").unwrap(), Some(json!(0.75)));
        assert_eq!(store.database_path(), path.as_path());
    }
}
