//! Configuration loading and merging logic.

use std::path::{Path, PathBuf};

use super::{validate_endpoint, Config, Settings};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ANIDESK_DATA_DIR";
/// Environment variable overriding the metadata endpoint.
pub const METADATA_ENDPOINT_ENV: &str = "ANIDESK_METADATA_ENDPOINT";

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (--data-dir flag).
    pub data_dir: Option<PathBuf>,
}

/// Look for a config file inside the data directory.
fn find_config_in_data_dir(data_dir: &Path) -> Option<PathBuf> {
    ["json", "yaml", "yml", "toml"]
        .iter()
        .map(|ext| data_dir.join(format!("anidesk.{}", ext)))
        .find(|path| path.exists())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

async fn load_file_config(options: &LoadOptions) -> Config {
    // Priority 1: Explicit --config flag
    if let Some(ref config_path) = options.config_path {
        return match Config::load_from_path(config_path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}", e);
                Config::default()
            }
        };
    }

    // Priority 2: Config inside the data dir
    if let Some(ref data_dir) = options.data_dir {
        if let Some(config_path) = find_config_in_data_dir(data_dir) {
            tracing::debug!("Found config in data dir: {}", config_path.display());
            if let Ok(config) = Config::load_from_path(&config_path).await {
                return config;
            }
        }
    }

    // Priority 3: Auto-discover via prefer
    Config::load().await
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = load_file_config(&options).await;
    let mut settings = Settings::default();

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);

    // Environment takes precedence over the config file
    if let Some(data_dir) = non_empty_env(DATA_DIR_ENV) {
        tracing::debug!("Using {} from environment: {}", DATA_DIR_ENV, data_dir);
        settings.data_dir = config.resolve_path(&data_dir, &base_dir);
    }
    if let Some(endpoint) = non_empty_env(METADATA_ENDPOINT_ENV) {
        match validate_endpoint(&endpoint) {
            Ok(()) => settings.metadata_endpoint = endpoint,
            Err(e) => tracing::error!("Ignoring {}: {}", METADATA_ENDPOINT_ENV, e),
        }
    }

    // --data-dir takes highest precedence
    if let Some(data_dir) = options.data_dir {
        settings.data_dir = data_dir;
    }

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_config_path_and_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.toml");
        std::fs::write(&config_path, "data_dir = \"store\"\nmax_requests = 45\n").unwrap();

        let (settings, config) = load_settings_with_options(LoadOptions {
            config_path: Some(config_path.clone()),
            data_dir: None,
        })
        .await;
        assert_eq!(config.source_path, Some(config_path));
        assert_eq!(settings.max_requests, 45);
        assert_eq!(settings.data_dir, dir.path().join("store"));
    }

    #[tokio::test]
    async fn config_found_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("anidesk.json"), r#"{"cache_ttl_secs": 30}"#).unwrap();

        let (settings, _) = load_settings_with_options(LoadOptions {
            config_path: None,
            data_dir: Some(dir.path().to_path_buf()),
        })
        .await;
        assert_eq!(settings.cache_ttl_secs, 30);
        assert_eq!(settings.data_dir, dir.path().to_path_buf());
    }
}
