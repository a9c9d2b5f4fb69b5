//! CLI configuration: JSON file with environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use goalpost_gateway::GatewayConfig;
use goalpost_sync::SyncConfig;

/// Overrides `backend_base_url` from the file.
pub const BACKEND_URL_ENV: &str = "GOALPOST_BACKEND_URL";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend root, e.g. `http://localhost:3000`. Empty disables sync.
    pub backend_base_url: String,
    /// Per-request timeout for backend calls.
    #[serde(with = "goalpost_common::duration_secs")]
    pub request_timeout: Duration,
    /// SQLite database; relative paths resolve against the config file's directory.
    pub database_path: Option<PathBuf>,
    /// Sync engine tuning.
    pub sync: SyncConfig,
    /// File this configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_base_url: String::new(),
            request_timeout: GatewayConfig::default().request_timeout,
            database_path: None,
            sync: SyncConfig::default(),
            source: None,
        }
    }
}

impl AppConfig {
    /// Load with priority: environment > config file > defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let config = Self::from_file(&path)?;
        Ok(config.with_backend_override(std::env::var(BACKEND_URL_ENV).ok()))
    }

    /// Read a config file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(db_path) = config.database_path.take() {
            let resolved = if db_path.is_relative() {
                path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
            } else {
                db_path
            };
            config.database_path = Some(resolved);
        }
        config
            .sync
            .validate()
            .with_context(|| format!("Invalid sync settings in {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Replace the backend URL when an override is set and non-empty.
    pub fn with_backend_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.backend_base_url = url;
        }
        self
    }

    /// Database location, falling back to the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("goalpost.db"))
    }

    /// Transport settings for the REST gateway.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.backend_base_url.clone(),
            request_timeout: self.request_timeout,
            ..GatewayConfig::default()
        }
    }
}

/// Per-user data directory for Goalpost.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("goalpost")
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use goalpost_sync::ConflictStrategy;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::from_file(&dir.path().join("absent.json")).unwrap();
        assert!(config.backend_base_url.is_empty());
        assert!(config.source.is_none());
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_file_values_and_relative_database_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "backend_base_url": "http://localhost:3000",
                "database_path": "data/goalpost.db",
                "sync": { "sync_interval": 60, "conflict_strategy": "prefer_local" }
            }"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.backend_base_url, "http://localhost:3000");
        assert_eq!(config.database_path(), dir.path().join("data/goalpost.db"));
        assert_eq!(config.sync.sync_interval, Duration::from_secs(60));
        assert_eq!(config.sync.conflict_strategy, ConflictStrategy::PreferLocal);
        assert_eq!(config.sync.pass_timeout, Duration::from_secs(10));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_zero_sync_interval_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "sync": { "sync_interval": 0 } }"#).unwrap();

        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("sync_interval"));
    }

    #[test]
    fn test_backend_override() {
        let config = AppConfig::default()
            .with_backend_override(Some("https://api.example.com".to_string()));
        assert_eq!(config.backend_base_url, "https://api.example.com");

        let config = config.with_backend_override(Some("  ".to_string()));
        assert_eq!(config.backend_base_url, "https://api.example.com");

        let gateway = config.gateway_config();
        assert_eq!(gateway.base_url, "https://api.example.com");
        assert_eq!(gateway.request_timeout, Duration::from_secs(10));
    }
}
