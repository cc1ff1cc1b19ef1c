//! Priority request queue for the metadata endpoint.
//!
//! Every metadata call is serialized through a single worker task so that no
//! two live calls are in flight at once. On each iteration the worker sorts
//! pending requests by ascending priority, takes the head, serves it from
//! cache or dispatches it after the rate limiter's wait, then paces itself
//! with a small fixed delay.
//!
//! A request that gets a 429 is pinned and put back at the front, so it is
//! the next one served once the lockout clears even if higher-priority work
//! arrived meanwhile.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::cache::{CacheTier, ResponseCache};
use crate::clock::Clock;
use crate::error::{RequestError, RequestResult};
use crate::http_client::{HttpRequest, Transport};
use crate::rate_limit::RateLimiter;

/// Worker pacing and retry policy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delay after every dequeued item, whatever its outcome.
    pub inter_request_delay: Duration,
    /// Give up after this many consecutive 429s for one request.
    /// `None` retries until the server lets the request through.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inter_request_delay: Duration::from_millis(100),
            max_rate_limit_retries: None,
        }
    }
}

/// A request waiting for the worker.
pub struct QueueJob {
    pub request: HttpRequest,
    /// Lower is served first.
    pub priority: u8,
    pub critical: bool,
    /// Cache fingerprint, when the response should be memoized.
    pub cache_key: Option<String>,
}

struct QueuedRequest {
    job: QueueJob,
    responder: oneshot::Sender<RequestResult<Value>>,
    pinned: bool,
    rate_limited: u32,
}

impl QueuedRequest {
    fn settle(self, result: RequestResult<Value>) {
        if self.responder.send(result).is_err() {
            debug!("Caller for {} went away before settling", self.job.request.url);
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: Vec<QueuedRequest>,
    processing: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

/// Handle to the queue. Cloning shares the same queue and worker.
#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState::default()),
                transport,
                limiter,
                cache,
                clock,
                config,
            }),
        }
    }

    /// Queue a request and wait for it to settle.
    ///
    /// Starts the worker if it is not already draining the queue.
    pub async fn enqueue(&self, job: QueueJob) -> RequestResult<Value> {
        let (tx, rx) = oneshot::channel();
        let start_worker = {
            let mut state = self.lock_state();
            state.pending.push(QueuedRequest {
                job,
                responder: tx,
                pinned: false,
                rate_limited: 0,
            });
            !std::mem::replace(&mut state.processing, true)
        };

        if start_worker {
            QueueShared::spawn_worker(Arc::clone(&self.shared));
        }

        rx.await.map_err(|_| RequestError::Dropped)?
    }

    /// Number of requests waiting (not counting one in flight).
    pub fn pending_len(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// Whether a worker is currently draining the queue.
    pub fn is_processing(&self) -> bool {
        self.lock_state().processing
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.shared.lock_state()
    }
}

/// Clears the processing flag however the worker exits, panics included,
/// and hands any work still pending to a fresh worker.
struct WorkerGuard {
    shared: Arc<QueueShared>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let restart = {
            let mut state = self.shared.lock_state();
            state.processing = !state.pending.is_empty();
            state.processing
        };
        if restart {
            debug!("Request queue worker exited with work pending, restarting");
            QueueShared::spawn_worker(Arc::clone(&self.shared));
        }
    }
}

impl QueueShared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(shared: Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.drain().await });
            }
            Err(e) => {
                error!("Cannot start request queue worker: {}", e);
                shared.lock_state().processing = false;
            }
        }
    }

    async fn drain(self: Arc<Self>) {
        let _guard = WorkerGuard {
            shared: Arc::clone(&self),
        };
        loop {
            let next = {
                let mut state = self.lock_state();
                if state.pending.is_empty() {
                    break;
                }
                // Stable sort keeps arrival order within a priority.
                state.pending.sort_by_key(|r| (!r.pinned, r.job.priority));
                state.pending.remove(0)
            };

            self.process(next).await;
            self.clock.sleep(self.config.inter_request_delay).await;
        }
        debug!("Request queue drained");
    }

    async fn process(&self, mut item: QueuedRequest) {
        if let Some(key) = item.job.cache_key.as_deref() {
            if let Some(cached) = self.cache.get(key).await {
                debug!("Cache hit for queued request {}", key);
                item.settle(Ok(cached));
                return;
            }
        }

        self.limiter.wait_if_necessary(item.job.critical).await;

        match self.transport.send(&item.job.request).await {
            Ok(response) => {
                self.limiter.observe_headers(&response.headers);
                if let Some(key) = item.job.cache_key.as_deref() {
                    let tier = CacheTier::for_priority(item.job.priority);
                    self.cache.set_tier(key, response.body.clone(), tier).await;
                }
                item.settle(Ok(response.body));
            }
            Err(e) if e.is_rate_limited() => {
                item.rate_limited += 1;
                if let Some(max) = self.config.max_rate_limit_retries {
                    if item.rate_limited > max {
                        warn!(
                            "Giving up on {} after {} rate-limited attempts",
                            item.job.request.url, item.rate_limited
                        );
                        let attempts = item.rate_limited;
                        item.settle(Err(RequestError::RateLimitExhausted { attempts }));
                        return;
                    }
                }

                let wait = self.limiter.lock_for(e.retry_after());
                warn!(
                    "Requeueing rate-limited request (priority {}), retrying in {:?}",
                    item.job.priority, wait
                );
                item.pinned = true;
                self.lock_state().pending.insert(0, item);
                self.clock.sleep(wait).await;
            }
            Err(e) => {
                debug!("Queued request to {} failed: {}", item.job.request.url, e);
                item.settle(Err(e.into()));
            }
        }
    }
}
