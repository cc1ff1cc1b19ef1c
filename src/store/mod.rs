//! Durable key/value storage.
//!
//! All process-wide settings and cached blobs go through [`KeyValueStore`]:
//! - `memory`: lock-based map, nothing persisted
//! - `sqlite`: JSON values in a local SQLite database

mod backend;
mod memory;
pub mod preferences;
mod sqlite;

pub use backend::{get_or, set_typed, KeyValueStore, StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use preferences::{
    apply_default_preferences, get_provider_match, set_provider_match, ProviderMatch,
};
pub use sqlite::SqliteStore;
