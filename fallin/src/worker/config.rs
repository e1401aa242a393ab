//! Worker configuration

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ID_PREFIX: &str = "Worker_";
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_SUFFIX_LEN: usize = 6;

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fixed worker id; generated when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Ignore `disconnect <id>` broadcasts
    #[serde(default)]
    pub persistent: bool,

    /// Case file opened when the worker starts
    #[serde(default)]
    pub case: Option<String>,

    #[serde(rename = "heartbeat-interval-ms", default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Simulated time spent per engine operation
    #[serde(rename = "op-latency-ms", default = "default_op_latency_ms")]
    pub op_latency_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    debug!("default_heartbeat_interval_ms: called");
    5_000
}

fn default_op_latency_ms() -> u64 {
    debug!("default_op_latency_ms: called");
    200
}

impl Default for WorkerConfig {
    fn default() -> Self {
        debug!("WorkerConfig::default: called");
        Self {
            id: None,
            persistent: false,
            case: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            op_latency_ms: default_op_latency_ms(),
        }
    }
}

impl WorkerConfig {
    /// The configured id, or a fresh `Worker_XXXXXX`
    pub fn resolve_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => generate_worker_id(),
        }
    }

    /// Heartbeat period, never shorter than 1ms
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn op_latency(&self) -> Duration {
        Duration::from_millis(self.op_latency_ms)
    }
}

/// `Worker_` followed by six random upper-case letters or digits
pub fn generate_worker_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", ID_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::validate_worker_id;

    #[test]
    fn test_generated_id_shape() {
        let id = generate_worker_id();
        assert!(id.starts_with("Worker_"));
        let suffix = &id["Worker_".len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert!(validate_worker_id(&id).is_ok());
    }

    #[test]
    fn test_resolve_id_prefers_configured() {
        let config = WorkerConfig {
            id: Some("Worker_FIXED1".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_id(), "Worker_FIXED1");
        assert_ne!(WorkerConfig::default().resolve_id(), "");
    }

    #[test]
    fn test_yaml_defaults() {
        let config: WorkerConfig = serde_yaml::from_str("persistent: true\n").unwrap();
        assert!(config.persistent);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.op_latency(), Duration::from_millis(200));
        assert_eq!(config.case, None);
    }
}
