//! HTTP transport.
//!
//! The request pipeline talks to the network only through [`Transport`], so
//! tests can substitute a scripted transport. [`ReqwestTransport`] is the
//! real implementation.

mod response;

pub use response::{TransportError, TransportResponse};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde_json::Value;

/// Default User-Agent for outgoing requests.
pub const USER_AGENT: &str = concat!("anidesk/", env!("CARGO_PKG_VERSION"));

/// A fully described outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    /// Per-request timeout; the client default applies when `None`.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Issues one HTTP call. Non-2xx responses are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<TransportResponse, TransportError>;
}

fn extract_response_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Transport backed by a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with the given default timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header("accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = extract_response_headers(&response);
        let bytes = response.bytes().await?;
        let body = decode_body(&bytes);

        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        if (200..300).contains(&status) {
            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        } else {
            Err(TransportError::Status {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_body_falls_back_to_text() {
        assert_eq!(decode_body(br#"{"data":1}"#), json!({"data": 1}));
        assert_eq!(decode_body(b"<html>"), json!("<html>"));
        assert_eq!(decode_body(b""), Value::Null);
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::new(Method::POST, "https://example.com")
            .header("authorization", "Bearer t")
            .json(json!({"query": "{}"}))
            .timeout(Duration::from_secs(5));
        assert_eq!(req.headers.get("authorization").map(String::as_str), Some("Bearer t"));
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
        assert!(req.body.is_some());
    }
}
