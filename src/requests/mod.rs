//! Request dispatcher.
//!
//! [`RequestService::make_request`] is the single entry point for outgoing
//! API calls:
//! - the response cache is consulted first, whatever the route
//! - calls to the metadata endpoint go through the priority queue
//! - everything else is sent directly with a local retry loop

mod operation;

pub use operation::OperationKind;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::cache::{CacheConfig, CacheTier, ResponseCache};
use crate::clock::Clock;
use crate::error::{RequestError, RequestResult};
use crate::http_client::{HttpRequest, Transport};
use crate::rate_limit::{backoff_delay, RateLimitConfig, RateLimiter};
use crate::request_queue::{QueueConfig, QueueJob, RequestQueue};
use crate::store::preferences::ENABLE_CACHING_KEY;
use crate::store::{get_or, KeyValueStore};

/// Default metadata API endpoint.
pub const DEFAULT_METADATA_ENDPOINT: &str = "https://graphql.anilist.co";

/// Base delay for direct-path retries; doubles each attempt.
const RETRY_BASE_MS: u64 = 1000;

/// Collaborators injected into the service.
#[derive(Clone)]
pub struct ServiceDeps {
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Tunables for the dispatcher and everything it owns.
#[derive(Debug, Clone)]
pub struct RequestSettings {
    /// Requests to exactly this URL are queued and rate limited.
    pub metadata_endpoint: String,
    pub default_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            default_timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub timeout: Option<Duration>,
    /// Cache the response even off the metadata endpoint. Direct-path
    /// responses cached this way use the long TTL.
    pub cache: bool,
    /// Explicit cache fingerprint; derived from the request otherwise.
    pub cache_key: Option<String>,
    /// Extra attempts on the direct path.
    pub retries: u32,
    /// Semantic tag for metadata requests; inferred from the body if absent.
    pub operation: Option<OperationKind>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn operation(mut self, operation: OperationKind) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// Build the `{query, variables}` payload for a metadata request.
pub fn get_options(query: &str, variables: Value) -> Value {
    json!({
        "query": query,
        "variables": variables,
    })
}

/// Cache fingerprint: `method:url:body`.
pub fn default_cache_key(method: &Method, url: &str, body: &Value) -> String {
    format!("{}:{}:{}", method, url, body)
}

/// Owns the response cache, the rate limiter and the metadata queue.
pub struct RequestService {
    settings: RequestSettings,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    queue: RequestQueue,
}

impl RequestService {
    pub fn new(deps: ServiceDeps, settings: RequestSettings) -> Self {
        let cache = Arc::new(ResponseCache::new(
            settings.cache.clone(),
            deps.clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            settings.rate_limit.clone(),
            deps.clock.clone(),
        ));
        let queue = RequestQueue::new(
            deps.transport.clone(),
            limiter.clone(),
            cache.clone(),
            deps.clock.clone(),
            settings.queue.clone(),
        );

        Self {
            settings,
            transport: deps.transport,
            clock: deps.clock,
            store: deps.store,
            cache,
            limiter,
            queue,
        }
    }

    pub fn settings(&self) -> &RequestSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn is_metadata_endpoint(&self, url: &str) -> bool {
        url == self.settings.metadata_endpoint
    }

    /// The caching flag in the store; missing means enabled.
    fn caching_enabled(&self) -> bool {
        get_or(self.store.as_ref(), ENABLE_CACHING_KEY, true)
    }

    /// Send a request, from cache when possible.
    ///
    /// Errors are returned as-is; callers decide how to degrade.
    pub async fn make_request(
        &self,
        method: Method,
        url: &str,
        headers: HashMap<String, String>,
        body: Value,
        config: RequestConfig,
    ) -> RequestResult<Value> {
        let is_metadata = self.is_metadata_endpoint(url);
        let use_cache = self.caching_enabled() && (is_metadata || config.cache);
        let cache_key = match config.cache_key.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => default_cache_key(&method, url, &body),
        };

        if use_cache {
            if let Some(cached) = self.cache.get(&cache_key).await {
                debug!("Cache hit for {}", cache_key);
                return Ok(cached);
            }
        }

        let mut request = HttpRequest::new(method, url);
        request.headers = headers;
        request.timeout = Some(config.timeout.unwrap_or(self.settings.default_timeout));
        if !body.is_null() {
            request.body = Some(body);
        }

        if is_metadata {
            let operation = config.operation.unwrap_or_else(|| {
                request
                    .body
                    .as_ref()
                    .map(OperationKind::classify)
                    .unwrap_or(OperationKind::Other)
            });
            debug!(
                "Queueing {} request (priority {})",
                operation,
                operation.priority()
            );
            let job = QueueJob {
                request,
                priority: operation.priority(),
                critical: operation.is_critical(),
                cache_key: use_cache.then_some(cache_key),
            };
            return self.queue.enqueue(job).await;
        }

        let tier = if config.cache {
            CacheTier::Priority
        } else {
            CacheTier::Standard
        };
        let cache_key = use_cache.then_some((cache_key, tier));
        self.send_with_retries(&request, config.retries, cache_key)
            .await
    }

    async fn send_with_retries(
        &self,
        request: &HttpRequest,
        retries: u32,
        cache: Option<(String, CacheTier)>,
    ) -> RequestResult<Value> {
        let mut attempt = 0u32;
        loop {
            match self.transport.send(request).await {
                Ok(response) => {
                    if let Some((key, tier)) = &cache {
                        self.cache.set_tier(key, response.body.clone(), *tier).await;
                    }
                    return Ok(response.body);
                }
                Err(e) => {
                    if e.is_client_error() {
                        return Err(RequestError::Transport(e));
                    }
                    attempt += 1;
                    if attempt > retries {
                        return Err(RequestError::Transport(e));
                    }
                    let delay = backoff_delay(attempt - 1, RETRY_BASE_MS);
                    debug!(
                        "Request to {} failed ({}), retry {}/{} in {:?}",
                        request.url, e, attempt, retries, delay
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_options_shape() {
        let payload = get_options("query { Viewer { id } }", json!({ "page": 1 }));
        assert_eq!(payload["query"], json!("query { Viewer { id } }"));
        assert_eq!(payload["variables"]["page"], json!(1));
    }

    #[test]
    fn test_default_cache_key() {
        let key = default_cache_key(&Method::POST, "https://a.test", &json!({ "q": 1 }));
        assert_eq!(key, r#"POST:https://a.test:{"q":1}"#);
    }

    #[test]
    fn test_request_config_builder() {
        let config = RequestConfig::new()
            .cache(true)
            .cache_key("k")
            .retries(2)
            .operation(OperationKind::Trending)
            .timeout(Duration::from_secs(5));
        assert!(config.cache);
        assert_eq!(config.cache_key.as_deref(), Some("k"));
        assert_eq!(config.retries, 2);
        assert_eq!(config.operation, Some(OperationKind::Trending));
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }
}
