//! Fallin configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;
use crate::worker::WorkerConfig;

const LOCAL_CONFIG: &str = ".fallin.yml";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message broker connection
    pub broker: BrokerConfig,

    /// Manager side
    pub coordinator: CoordinatorConfig,

    /// Worker side
    pub worker: WorkerConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .fallin.yml
        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/fallin/fallin.yml
        if let Some(user_config) = user_config_path() {
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fallin").join("fallin.yml"))
}

/// Read only the log level from the config chain
///
/// Runs before logging is set up, so parse failures are ignored here and
/// reported later by [`Config::load`].
pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
    #[derive(Deserialize)]
    struct LogLevelOnly {
        #[serde(rename = "log-level")]
        log_level: Option<String>,
    }

    let candidates: Vec<PathBuf> = match config_path {
        Some(path) => vec![path.clone()],
        None => std::iter::once(PathBuf::from(LOCAL_CONFIG))
            .chain(user_config_path())
            .collect(),
    };

    candidates
        .iter()
        .filter(|path| path.exists())
        .filter_map(|path| fs::read_to_string(path).ok())
        .filter_map(|content| serde_yaml::from_str::<LogLevelOnly>(&content).ok())
        .find_map(|config| config.log_level)
}

/// Broker connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URL, e.g. `nats://127.0.0.1:4222`
    pub url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.url, "nats://127.0.0.1:4222");
        assert!(!config.coordinator.auto_shutdown);
        assert!(!config.worker.persistent);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fallin.yml");
        fs::write(
            &path,
            r#"
broker:
  url: nats://broker:4222
coordinator:
  auto-shutdown: true
  heartbeat-timeout-ms: 1500
worker:
  id: Worker_ABC123
  persistent: true
log-level: DEBUG
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.broker.url, "nats://broker:4222");
        assert!(config.coordinator.auto_shutdown);
        assert_eq!(config.coordinator.heartbeat_timeout_ms, 1500);
        assert_eq!(config.coordinator.sweep_interval_ms, 10_000);
        assert_eq!(config.worker.id.as_deref(), Some("Worker_ABC123"));
        assert!(config.worker.persistent);
        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));

        assert_eq!(load_log_level(Some(&path)).as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.yml");
        fs::write(&path, "{}\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert_eq!(load_log_level(Some(&path)), None);
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yml");
        fs::write(&path, "coordinator: [not, a, map]\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
