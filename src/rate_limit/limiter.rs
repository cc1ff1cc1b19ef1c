//! Budget tracking and wait policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::config::{RateLimitConfig, MIN_WINDOW_WAIT};
use crate::clock::Clock;

/// Snapshot of the limiter's counters.
///
/// `remaining` is best-effort and may be stale between responses. The
/// lockout window is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: i64,
    /// Unix millis at which the budget resets, as reported by the server.
    pub reset_at_ms: i64,
    /// Unix millis before which no request may be sent.
    pub lock_until_ms: i64,
}

impl RateLimitState {
    pub fn new(max_requests: i64) -> Self {
        Self {
            remaining: max_requests,
            reset_at_ms: 0,
            lock_until_ms: 0,
        }
    }

    /// Decide how long to wait before the next dispatch.
    ///
    /// Rolls the budget over when the reset time has passed. Within an open
    /// window critical requests pay `critical_delay` on top of any budget wait.
    pub fn plan_wait(&mut self, now_ms: i64, critical: bool, config: &RateLimitConfig) -> Duration {
        if now_ms < self.lock_until_ms {
            return millis(self.lock_until_ms - now_ms);
        }

        if now_ms >= self.reset_at_ms {
            self.remaining = config.max_requests;
            return Duration::ZERO;
        }

        let mut wait = if critical {
            config.critical_delay
        } else {
            Duration::ZERO
        };

        // Exhausted budgets land in the proportional branch too. The
        // full-window wait is reached only with a negative low-water mark.
        let until_reset = millis(self.reset_at_ms - now_ms).max(MIN_WINDOW_WAIT);
        if self.remaining <= config.low_water_mark {
            wait += (until_reset / 6).min(config.max_proportional_delay);
        } else if self.remaining <= 0 {
            wait += until_reset;
        }

        wait
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

/// Process-wide limiter for the metadata endpoint.
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(RateLimitState::new(config.max_requests)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Current counters.
    pub fn snapshot(&self) -> RateLimitState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sleep as long as the policy requires. Returns the time waited.
    pub async fn wait_if_necessary(&self, critical: bool) -> Duration {
        let now = self.clock.now_millis();
        let wait = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.plan_wait(now, critical, &self.config)
        };

        if wait > Duration::ZERO {
            debug!("Rate limiting metadata request: waiting {:?}", wait);
            self.clock.sleep(wait).await;
        }
        wait
    }

    /// Update budget counters from `x-ratelimit-*` response headers.
    pub fn observe_headers(&self, headers: &HashMap<String, String>) {
        let remaining = headers
            .get("x-ratelimit-remaining")
            .and_then(|v| parse_int(v));
        let reset = headers.get("x-ratelimit-reset").and_then(|v| parse_int(v));
        if remaining.is_none() && reset.is_none() {
            return;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remaining) = remaining {
            state.remaining = remaining;
        }
        if let Some(reset_secs) = reset {
            state.reset_at_ms = reset_secs.saturating_mul(1000);
        }
        debug!(
            "Rate limit budget: {} remaining, resets at {}",
            state.remaining, state.reset_at_ms
        );
    }

    /// Open a lockout window after a 429. Returns the lockout length.
    pub fn lock_for(&self, retry_after: Option<Duration>) -> Duration {
        let duration = retry_after.unwrap_or(self.config.default_retry_after);
        let until = self.clock.now_millis() + duration.as_millis() as i64;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.lock_until_ms = state.lock_until_ms.max(until);
        warn!("Metadata API rate limited, locked out for {:?}", duration);
        duration
    }
}

/// Integer header value; fractional values are truncated.
fn parse_int(value: &str) -> Option<i64> {
    let value = value.trim();
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: i64 = 1_700_000_000_000;

    fn state(remaining: i64, reset_in_ms: i64) -> RateLimitState {
        RateLimitState {
            remaining,
            reset_at_ms: NOW + reset_in_ms,
            lock_until_ms: 0,
        }
    }

    #[test]
    fn test_lockout_wins_over_budget() {
        let config = RateLimitConfig::default();
        let mut s = state(80, 30_000);
        s.lock_until_ms = NOW + 7_000;
        assert_eq!(s.plan_wait(NOW, true, &config), Duration::from_secs(7));
        assert_eq!(s.remaining, 80);
    }

    #[test]
    fn test_window_rollover_restores_budget() {
        let config = RateLimitConfig::default();
        let mut s = state(0, -1);
        assert_eq!(s.plan_wait(NOW, true, &config), Duration::ZERO);
        assert_eq!(s.remaining, 90);
    }

    #[test]
    fn test_healthy_budget() {
        let config = RateLimitConfig::default();
        let mut s = state(50, 30_000);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::ZERO);
        assert_eq!(s.plan_wait(NOW, true, &config), Duration::from_millis(500));
    }

    #[test]
    fn test_low_water_spreads_requests() {
        let config = RateLimitConfig::default();
        // 12s left / 6 = 2s
        let mut s = state(5, 12_000);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(2));
        // 60s left / 6 = 10s, capped at 3s
        let mut s = state(3, 60_000);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(3));
        assert_eq!(s.plan_wait(NOW, true, &config), Duration::from_millis(3_500));
    }

    #[test]
    fn test_exhausted_budget_is_spread_not_blocked() {
        let config = RateLimitConfig::default();
        // 60s left / 6 = 10s, capped at 3s rather than the whole window
        let mut s = state(0, 60_000);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(3));
        // 12s left / 6 = 2s
        let mut s = state(-3, 12_000);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(2));
        // Window floor of one second: 1s / 6
        let mut s = state(0, 200);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(1) / 6);
    }

    #[test]
    fn test_negative_low_water_mark_waits_for_reset() {
        let config = RateLimitConfig {
            low_water_mark: -1,
            ..RateLimitConfig::default()
        };
        let mut s = state(0, 20_000);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(20));
        let mut s = state(0, 200);
        assert_eq!(s.plan_wait(NOW, false, &config), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_limiter_headers_and_lockout() {
        let clock = Arc::new(ManualClock::new(NOW));
        let limiter = RateLimiter::new(RateLimitConfig::default(), clock.clone());

        // First request: reset time 0 has passed, budget restored, no wait.
        assert_eq!(limiter.wait_if_necessary(false).await, Duration::ZERO);

        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-remaining".to_string(), "0".to_string());
        headers.insert(
            "x-ratelimit-reset".to_string(),
            ((NOW + 10_000) / 1000).to_string(),
        );
        limiter.observe_headers(&headers);
        assert_eq!(limiter.snapshot().remaining, 0);

        let spread = Duration::from_secs(10) / 6;
        assert_eq!(limiter.wait_if_necessary(false).await, spread);
        assert_eq!(clock.sleeps(), vec![spread]);
    }

    #[tokio::test]
    async fn test_lock_defaults_to_sixty_seconds() {
        let clock = Arc::new(ManualClock::new(NOW));
        let limiter = RateLimiter::new(RateLimitConfig::default(), clock.clone());

        assert_eq!(limiter.lock_for(None), Duration::from_secs(60));
        assert_eq!(limiter.snapshot().lock_until_ms, NOW + 60_000);

        clock.advance(Duration::from_secs(45));
        assert_eq!(limiter.wait_if_necessary(false).await, Duration::from_secs(15));
    }

    #[test]
    fn test_observe_ignores_missing_headers() {
        let clock = Arc::new(ManualClock::new(NOW));
        let limiter = RateLimiter::new(RateLimitConfig::default(), clock);
        limiter.observe_headers(&HashMap::new());
        assert_eq!(limiter.snapshot(), RateLimitState::new(90));
    }
}
