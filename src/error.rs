//! Error types surfaced by the request pipeline.

use thiserror::Error;

use crate::http_client::TransportError;

/// Result type for dispatcher operations.
pub type RequestResult<T> = Result<T, RequestError>;

/// Errors returned to callers of `make_request`.
///
/// Rate limiting (429) on the queued path never shows up here unless a
/// retry cap was configured; it is turned into a wait-and-retry cycle.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Rate limited {attempts} times in a row, giving up")]
    RateLimitExhausted { attempts: u32 },
    #[error("Request was dropped before it could be settled")]
    Dropped,
}

impl RequestError {
    /// HTTP status of the underlying failure, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Transport(e) => e.status(),
            RequestError::RateLimitExhausted { .. } => Some(429),
            RequestError::Dropped => None,
        }
    }
}
