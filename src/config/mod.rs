//! Configuration management using the prefer crate.

mod loader;
mod settings;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use loader::{load_settings_with_options, LoadOptions};
pub use settings::Settings;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "anidesk.db";

/// Configuration file structure. Every field is optional; unset fields keep
/// the defaults from [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename inside the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Metadata API URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_endpoint: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_water_mark: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_proportional_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retry_after_secs: Option<u64>,
    /// Pause between queued metadata requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inter_request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_cache_ttl_secs: Option<u64>,
    /// Give up on a queued request after this many consecutive 429s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_limit_retries: Option<u64>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    #[prefer(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers anidesk config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("anidesk").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, if loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths (typically config file dir or CWD).
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref endpoint) = self.metadata_endpoint {
            match validate_endpoint(endpoint) {
                Ok(()) => settings.metadata_endpoint = endpoint.clone(),
                Err(e) => tracing::error!("Invalid metadata endpoint in config: {}", e),
            }
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(max) = self.max_requests {
            settings.max_requests = i64::try_from(max).unwrap_or(i64::MAX);
        }
        if let Some(mark) = self.low_water_mark {
            settings.low_water_mark = i64::try_from(mark).unwrap_or(i64::MAX);
        }
        if let Some(delay) = self.critical_delay_ms {
            settings.critical_delay_ms = delay;
        }
        if let Some(delay) = self.max_proportional_delay_ms {
            settings.max_proportional_delay_ms = delay;
        }
        if let Some(secs) = self.default_retry_after_secs {
            settings.default_retry_after_secs = secs;
        }
        if let Some(delay) = self.inter_request_delay_ms {
            settings.inter_request_delay_ms = delay;
        }
        if let Some(ttl) = self.cache_ttl_secs {
            settings.cache_ttl_secs = ttl;
        }
        if let Some(ttl) = self.priority_cache_ttl_secs {
            settings.priority_cache_ttl_secs = ttl;
        }
        if let Some(max) = self.max_rate_limit_retries {
            settings.max_rate_limit_retries = Some(u32::try_from(max).unwrap_or(u32::MAX));
        }
    }
}

/// Check that an endpoint is an absolute http(s) URL.
pub fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let url = url::Url::parse(endpoint).map_err(|e| format!("'{}': {}", endpoint, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("'{}': unsupported scheme '{}'", endpoint, other)),
    }
}
