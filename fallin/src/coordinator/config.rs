//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Disconnect from the channel once every task is done
    #[serde(rename = "auto-shutdown", default)]
    pub auto_shutdown: bool,

    /// A worker silent for longer than this is marked offline
    #[serde(rename = "heartbeat-timeout-ms", default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How often the liveness sweep runs
    #[serde(rename = "sweep-interval-ms", default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Publish a registry snapshot after every processed feedback
    #[serde(rename = "publish-dashboard", default = "default_publish_dashboard")]
    pub publish_dashboard: bool,

    /// Also publish the snapshot on a timer (0 disables)
    #[serde(rename = "dashboard-interval-ms", default)]
    pub dashboard_interval_ms: u64,

    /// Send `disconnect <id>` to workers once no work is left for them
    #[serde(rename = "release-idle-workers", default)]
    pub release_idle_workers: bool,

    /// Channel buffer size for coordinator requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_heartbeat_timeout_ms() -> u64 {
    debug!("default_heartbeat_timeout_ms: called");
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    debug!("default_sweep_interval_ms: called");
    10_000
}

fn default_publish_dashboard() -> bool {
    true
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            auto_shutdown: false,
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            publish_dashboard: default_publish_dashboard(),
            dashboard_interval_ms: 0,
            release_idle_workers: false,
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl CoordinatorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Sweep period, never shorter than 1ms
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Timer period for dashboard snapshots, if enabled
    pub fn dashboard_interval(&self) -> Option<Duration> {
        (self.dashboard_interval_ms > 0).then(|| Duration::from_millis(self.dashboard_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(!config.auto_shutdown);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(10));
        assert!(config.publish_dashboard);
        assert_eq!(config.dashboard_interval(), None);
        assert!(!config.release_idle_workers);
        assert_eq!(config.channel_buffer, 1000);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "auto-shutdown: true\nheartbeat-timeout-ms: 500\ndashboard-interval-ms: 2000\n";
        let config: CoordinatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.auto_shutdown);
        assert_eq!(config.heartbeat_timeout(), Duration::from_millis(500));
        assert_eq!(config.dashboard_interval(), Some(Duration::from_secs(2)));
        assert_eq!(config.sweep_interval_ms, 10_000);
    }

    #[test]
    fn test_zero_sweep_interval_is_clamped() {
        let config = CoordinatorConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_millis(1));
    }
}
