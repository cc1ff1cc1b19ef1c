//! Request orchestration and watch-history core for an anime tracking client.
//!
//! Outgoing calls go through [`requests::RequestService`]: metadata API
//! queries are serialized by a priority queue that paces itself against the
//! server's rate-limit headers and caches responses, while calls to other
//! endpoints take a direct path with bounded retries. [`history::HistoryStore`]
//! keeps per-title, per-episode playback state in a [`store::KeyValueStore`].

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod http_client;
pub mod metadata;
pub mod rate_limit;
pub mod request_queue;
pub mod requests;
pub mod store;

pub use error::{RequestError, RequestResult};
