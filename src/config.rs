use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Cloud mirror endpoints. Without them the mirror lives in memory only.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub documents_url: String,
    pub blobs_url: String,
    pub api_token: Option<String>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gym-sync");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("gym.db").to_string_lossy().to_string()
}

fn default_poll_interval() -> u64 {
    15
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            remote: None,
            poll_interval_seconds: default_poll_interval(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gym-sync")
            .join("config.toml")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/gym.db"

            [remote]
            documents_url = "https://docs.example.com/v1/"
            blobs_url = "https://blobs.example.com/"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, "/tmp/gym.db");
        assert_eq!(config.poll_interval_seconds, 15);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        let remote = config.remote.unwrap();
        assert_eq!(remote.blobs_url, "https://blobs.example.com/");
        assert!(remote.api_token.is_none());
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = Config {
            poll_interval_seconds: 0,
            request_timeout_seconds: 0,
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
    }
}
