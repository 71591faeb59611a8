//! Configuration for the loop bridge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::foreign::PRIORITY_DEFAULT;
use crate::poll_set::DEFAULT_POLL_CAPACITY;

/// Loop bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Foreign priority treated as equivalent to host loop activity.
    /// Sources more urgent than this are dispatched before host sources.
    #[serde(default = "default_host_priority")]
    pub host_priority: i32,

    /// Initial capacity of the descriptor buffer handed to `query`.
    #[serde(default = "default_initial_poll_capacity")]
    pub initial_poll_capacity: usize,

    /// Delay between attempts to spawn the select thread, in milliseconds.
    #[serde(default = "default_spawn_retry_delay_ms")]
    pub spawn_retry_delay_ms: u64,

    /// Name given to the select thread.
    #[serde(default = "default_worker_thread_name")]
    pub worker_thread_name: String,

    /// Log every select thread state transition at trace level.
    #[serde(default)]
    pub trace_state_transitions: bool,
}

fn default_host_priority() -> i32 {
    PRIORITY_DEFAULT
}

fn default_initial_poll_capacity() -> usize {
    DEFAULT_POLL_CAPACITY
}

fn default_spawn_retry_delay_ms() -> u64 {
    1000
}

fn default_worker_thread_name() -> String {
    "select-thread".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_priority: default_host_priority(),
            initial_poll_capacity: default_initial_poll_capacity(),
            spawn_retry_delay_ms: default_spawn_retry_delay_ms(),
            worker_thread_name: default_worker_thread_name(),
            trace_state_transitions: false,
        }
    }
}

impl BridgeConfig {
    /// Get the spawn retry delay as Duration.
    pub fn spawn_retry_delay(&self) -> Duration {
        Duration::from_millis(self.spawn_retry_delay_ms)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.initial_poll_capacity == 0 {
            return Err(BridgeError::Config(
                "initial_poll_capacity must be at least 1".to_string(),
            ));
        }
        if self.worker_thread_name.is_empty() {
            return Err(BridgeError::Config(
                "worker_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.host_priority, 0);
        assert_eq!(config.initial_poll_capacity, 16);
        assert_eq!(config.spawn_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.worker_thread_name, "select-thread");
        assert!(!config.trace_state_transitions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = BridgeConfig {
            initial_poll_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: BridgeConfig = toml::from_str("spawn_retry_delay_ms = 250").unwrap();
        assert_eq!(config.spawn_retry_delay(), Duration::from_millis(250));
        assert_eq!(config.initial_poll_capacity, 16);
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.worker_thread_name, config.worker_thread_name);
        assert_eq!(parsed.host_priority, config.host_priority);
    }
}
