//! In-memory response cache with two TTL tiers.
//!
//! Entries past their expiry are never returned; they are evicted on the
//! lookup that finds them stale. There is no background sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::clock::Clock;

/// Which time-to-live applies to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Short TTL for ordinary data.
    Standard,
    /// Long TTL for identity, profile and current-list data.
    Priority,
}

impl CacheTier {
    /// Tier for a queued request of the given priority score.
    pub fn for_priority(priority: u8) -> Self {
        if priority <= 2 {
            CacheTier::Priority
        } else {
            CacheTier::Standard
        }
    }
}

/// TTLs for each tier.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub standard_ttl: Duration,
    pub priority_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            standard_ttl: Duration::from_secs(10 * 60),
            priority_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Standard => self.standard_ttl,
            CacheTier::Priority => self.priority_ttl,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    /// Unix millis after which the entry is treated as absent.
    expires_at_ms: i64,
}

/// Fingerprint-keyed response cache.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry, evicting it if it has expired.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if now < entry.expires_at_ms => return Some(entry.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        // Another task may have refreshed the entry in between.
        if let Some(entry) = entries.get(key) {
            if now < entry.expires_at_ms {
                return Some(entry.data.clone());
            }
            entries.remove(key);
            tracing::debug!("Evicted expired cache entry {}", key);
        }
        None
    }

    /// Store a payload with an explicit TTL.
    pub async fn set(&self, key: &str, data: Value, ttl: Duration) {
        let expires_at_ms = self.clock.now_millis() + ttl.as_millis() as i64;
        self.entries.write().await.insert(
            key.to_string(),
            CacheEntry {
                data,
                expires_at_ms,
            },
        );
    }

    /// Store a payload using the TTL of the given tier.
    pub async fn set_tier(&self, key: &str, data: Value, tier: CacheTier) {
        self.set(key, data, self.config.ttl(tier)).await;
    }

    /// Expiry of an entry, whether or not it is still live.
    pub async fn expires_at(&self, key: &str) -> Option<i64> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|entry| entry.expires_at_ms)
    }

    /// Remaining lifetime of a live entry.
    pub async fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        self.expires_at(key)
            .await
            .filter(|expires| *expires > now)
            .map(|expires| Duration::from_millis((expires - now) as u64))
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache() -> (Arc<ManualClock>, ResponseCache) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ResponseCache::new(CacheConfig::default(), clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn test_get_before_ttl() {
        let (clock, cache) = cache();
        cache.set("k", json!({"a": 1}), Duration::from_secs(10)).await;

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_expired_entry_evicted_on_lookup() {
        let (clock, cache) = cache();
        cache.set("k", json!("v"), Duration::from_secs(10)).await;

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.expires_at("k").await, None);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_tiers() {
        let (_clock, cache) = cache();
        cache.set_tier("viewer", json!(1), CacheTier::Priority).await;
        cache.set_tier("search", json!(2), CacheTier::Standard).await;

        assert_eq!(
            cache.ttl_remaining("viewer").await,
            Some(Duration::from_secs(1800))
        );
        assert_eq!(
            cache.ttl_remaining("search").await,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_tier_for_priority() {
        assert_eq!(CacheTier::for_priority(1), CacheTier::Priority);
        assert_eq!(CacheTier::for_priority(2), CacheTier::Priority);
        assert_eq!(CacheTier::for_priority(3), CacheTier::Standard);
        assert_eq!(CacheTier::for_priority(4), CacheTier::Standard);
    }
}
