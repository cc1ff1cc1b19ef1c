//! Rate limiter configuration.

use std::time::Duration;

/// Floor for any wait derived from the reset window.
pub const MIN_WINDOW_WAIT: Duration = Duration::from_secs(1);

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Request budget per window, restored when the window resets.
    pub max_requests: i64,
    /// At or below this many remaining requests, waits are spread out.
    pub low_water_mark: i64,
    /// Extra delay before every critical request.
    pub critical_delay: Duration,
    /// Ceiling for the proportional low-budget delay.
    pub max_proportional_delay: Duration,
    /// Lockout length when a 429 carries no usable `retry-after`.
    pub default_retry_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 90,
            low_water_mark: 5,
            critical_delay: Duration::from_millis(500),
            max_proportional_delay: Duration::from_secs(3),
            default_retry_after: Duration::from_secs(60),
        }
    }
}
