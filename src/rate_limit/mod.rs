//! Rate limiting for the metadata API.
//!
//! The remote API grants a fixed rolling budget of requests and reports it
//! back in response headers. [`RateLimiter`] tracks that budget plus a
//! lockout window opened by 429 responses, and decides how long to wait
//! before each live dispatch.

mod config;
mod limiter;

pub use config::RateLimitConfig;
pub use limiter::{RateLimitState, RateLimiter};

use std::time::Duration;

/// Parse a `retry-after` header value (whole seconds).
/// Returns `None` if the header is missing or not numeric.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Exponential backoff: `base_ms * 2^attempt`, capped at one minute.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay_ms.min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("30")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(Some(" 120 ")), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(0, 1000), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, 1000), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 1000), Duration::from_secs(4));
        assert_eq!(backoff_delay(10, 1000), Duration::from_secs(60));
        assert_eq!(backoff_delay(80, 1000), Duration::from_secs(60));
    }
}
