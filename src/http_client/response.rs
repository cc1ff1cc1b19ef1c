//! Transport responses and errors.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::rate_limit::parse_retry_after;

/// A successful (2xx) response with a decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    /// JSON body, or a JSON string when the body was not valid JSON.
    pub body: Value,
}

impl TransportResponse {
    /// Create a 200 response with no headers.
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body,
        }
    }

    /// Add a header (name is lowercased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Get a header by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

/// Failure of a single transport call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        headers: HashMap<String, String>,
        body: Value,
    },
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Build a status error without headers or body.
    pub fn status_code(status: u16) -> Self {
        TransportError::Status {
            status,
            headers: HashMap::new(),
            body: Value::Null,
        }
    }

    /// Build a 429 carrying a `retry-after` header.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), retry_after_secs.to_string());
        TransportError::Status {
            status: 429,
            headers,
            body: Value::Null,
        }
    }

    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if the server signaled throttling (429).
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Check for a 4xx that is not 429. These are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(code) if (400..500).contains(&code) && code != 429)
    }

    /// Get a response header by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            TransportError::Status { headers, .. } => headers.get(name).map(|s| s.as_str()),
            _ => None,
        }
    }

    /// Parsed `retry-after` header, if present and numeric.
    pub fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.header("retry-after"))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}
