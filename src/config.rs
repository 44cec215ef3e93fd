//! Configuration for the authorship engine.

use crate::core::{ConfidenceThresholds, ScoringWeights, SignalThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    /// Path for stored results and ingestion stats
    pub data_path: PathBuf,

    /// Write results to disk under `data_path`; otherwise keep them in memory
    pub persist_results: bool,

    /// Sessions with no report for this long are dropped from memory.
    ///
    /// Must exceed the longest activity window: an evicted session that is
    /// not finalized is rescored from its later reports only.
    #[serde(with = "duration_serde")]
    pub session_idle_timeout: Duration,

    /// How often the idle sweep runs
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Events beyond this count are dropped for a session
    pub max_events_per_session: usize,

    pub thresholds: SignalThresholds,
    pub weights: ScoringWeights,
    pub confidence: ConfidenceThresholds,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dalivim-authorship");

        Self {
            server: ServerConfig::default(),
            data_path: data_dir,
            persist_results: true,
            session_idle_timeout: Duration::from_secs(4 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            max_events_per_session: 200_000,
            thresholds: SignalThresholds::default(),
            weights: ScoringWeights::default(),
            confidence: ConfidenceThresholds::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let config_path = Self::config_path();
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dalivim-authorship")
            .join("config.json")
    }

    /// Directory holding one JSON file per submission.
    pub fn results_path(&self) -> PathBuf {
        self.data_path.join("results")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("ingestion_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        if self.persist_results {
            std::fs::create_dir_all(self.results_path())
                .map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        Ok(())
    }

    /// Apply `DALIVIM_HOST`, `DALIVIM_PORT` and `DALIVIM_DATA_DIR`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DALIVIM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DALIVIM_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DALIVIM_PORT: {port}")))?;
        }
        if let Some(dir) = lookup("DALIVIM_DATA_DIR") {
            self.data_path = PathBuf::from(dir);
        }
        Ok(())
    }
}

/// Where the HTTP server listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.session_idle_timeout, Duration::from_secs(14_400));
        assert_eq!(config.max_events_per_session, 200_000);
        assert_eq!(config.thresholds.paste_char_ratio, 0.3);
        assert!(config.persist_results);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server": {"port": 9000}, "sweep_interval": 5}"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.weights, ScoringWeights::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DALIVIM_HOST", "127.0.0.1"),
            ("DALIVIM_PORT", "3001"),
            ("DALIVIM_DATA_DIR", "/tmp/dalivim"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind_address(), "127.0.0.1:3001");
        assert_eq!(config.data_path, PathBuf::from("/tmp/dalivim"));
        assert_eq!(config.stats_path(), PathBuf::from("/tmp/dalivim/ingestion_stats.json"));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|name| (name == "DALIVIM_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("dalivim-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");

        let mut config = Config::default();
        config.server.port = 4321;
        config.weights.never_executed = 0.5;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
