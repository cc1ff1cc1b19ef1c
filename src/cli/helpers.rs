//! Shared helper functions for CLI commands.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use anidesk::clock::{Clock, SystemClock};
use anidesk::config::Settings;
use anidesk::history::HistoryStore;
use anidesk::http_client::ReqwestTransport;
use anidesk::metadata::MetadataClient;
use anidesk::requests::{RequestService, ServiceDeps};
use anidesk::store::{KeyValueStore, SqliteStore};

/// Everything a command needs, wired against the on-disk store.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn KeyValueStore>,
    pub service: Arc<RequestService>,
    pub history: HistoryStore,
}

impl AppContext {
    pub fn open(settings: Settings) -> anyhow::Result<Self> {
        settings
            .ensure_directories()
            .with_context(|| format!("Failed to create {}", settings.data_dir.display()))?;

        let db_path = settings.database_path();
        let store: Arc<dyn KeyValueStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open {}", db_path.display()))?,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let request_settings = settings.request_settings();
        let transport = Arc::new(
            ReqwestTransport::new(request_settings.default_timeout)
                .context("Failed to build HTTP client")?,
        );

        let service = Arc::new(RequestService::new(
            ServiceDeps {
                transport,
                clock: clock.clone(),
                store: store.clone(),
            },
            request_settings,
        ));
        let history = HistoryStore::load(store.clone(), clock);

        Ok(Self {
            settings,
            store,
            service,
            history,
        })
    }

    pub fn metadata(&self) -> MetadataClient {
        MetadataClient::new(self.service.clone(), self.store.clone())
    }
}

/// Parse repeated `Name: value` header arguments.
pub fn parse_headers(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    raw.iter()
        .map(|h| {
            let (name, value) = h
                .split_once(':')
                .with_context(|| format!("Invalid header '{}', expected 'Name: value'", h))?;
            Ok((name.trim().to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

/// Format Unix millis as a UTC date and time. Zero means never.
pub fn format_millis(ms: i64) -> String {
    if ms <= 0 {
        return "Never".to_string();
    }
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "Never".to_string())
}

/// Format seconds as `m:ss` or `h:mm:ss`.
pub fn format_position(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&["Authorization: Bearer abc".to_string()]).unwrap();
        assert_eq!(headers.get("authorization").map(String::as_str), Some("Bearer abc"));
        assert!(parse_headers(&["nocolon".to_string()]).is_err());
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(65.4), "1:05");
        assert_eq!(format_position(3_725.0), "1:02:05");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title", 10), "a very ...");
    }
}
