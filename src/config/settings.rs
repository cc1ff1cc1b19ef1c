//! Application settings.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::rate_limit::RateLimitConfig;
use crate::request_queue::QueueConfig;
use crate::requests::{RequestSettings, DEFAULT_METADATA_ENDPOINT};

use super::DEFAULT_DATABASE_FILENAME;

/// Effective settings after defaults, config file and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Metadata API URL; requests to it are queued and rate limited.
    pub metadata_endpoint: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Request budget per rate-limit window.
    pub max_requests: i64,
    /// Remaining budget at which requests start being spread out.
    pub low_water_mark: i64,
    /// Extra delay for critical metadata requests, milliseconds.
    pub critical_delay_ms: u64,
    /// Ceiling for the low-budget proportional delay, milliseconds.
    pub max_proportional_delay_ms: u64,
    /// Lockout after a 429 without `retry-after`, seconds.
    pub default_retry_after_secs: u64,
    /// Pause between queued requests, milliseconds.
    pub inter_request_delay_ms: u64,
    /// Short cache TTL, seconds.
    pub cache_ttl_secs: u64,
    /// Long cache TTL for identity and list data, seconds.
    pub priority_cache_ttl_secs: u64,
    /// Cap on consecutive 429 retries for one queued request (None = unbounded).
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        // Platform data dir, falling back to home, then CWD
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anidesk");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            request_timeout: 30,
            max_requests: 90,
            low_water_mark: 5,
            critical_delay_ms: 500,
            max_proportional_delay_ms: 3000,
            default_retry_after_secs: 60,
            inter_request_delay_ms: 100,
            cache_ttl_secs: 600,
            priority_cache_ttl_secs: 1800,
            max_rate_limit_retries: None,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Full path to the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }

    /// Tunables for the request service.
    pub fn request_settings(&self) -> RequestSettings {
        RequestSettings {
            metadata_endpoint: self.metadata_endpoint.clone(),
            default_timeout: Duration::from_secs(self.request_timeout),
            rate_limit: RateLimitConfig {
                max_requests: self.max_requests,
                low_water_mark: self.low_water_mark,
                critical_delay: Duration::from_millis(self.critical_delay_ms),
                max_proportional_delay: Duration::from_millis(self.max_proportional_delay_ms),
                default_retry_after: Duration::from_secs(self.default_retry_after_secs),
            },
            cache: CacheConfig {
                standard_ttl: Duration::from_secs(self.cache_ttl_secs),
                priority_ttl: Duration::from_secs(self.priority_cache_ttl_secs),
            },
            queue: QueueConfig {
                inter_request_delay: Duration::from_millis(self.inter_request_delay_ms),
                max_rate_limit_retries: self.max_rate_limit_retries,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_settings_match_api_budget() {
        let settings = Settings::with_data_dir(PathBuf::from("/tmp/anidesk"));
        let request = settings.request_settings();

        assert_eq!(request.metadata_endpoint, "https://graphql.anilist.co");
        assert_eq!(request.default_timeout, Duration::from_secs(30));
        assert_eq!(request.rate_limit.max_requests, 90);
        assert_eq!(request.rate_limit.critical_delay, Duration::from_millis(500));
        assert_eq!(request.cache.standard_ttl, Duration::from_secs(600));
        assert_eq!(request.cache.priority_ttl, Duration::from_secs(1800));
        assert_eq!(request.queue.inter_request_delay, Duration::from_millis(100));
        assert_eq!(request.queue.max_rate_limit_retries, None);
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/tmp/anidesk/anidesk.db")
        );
    }
}
