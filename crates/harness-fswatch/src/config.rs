//! Watcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Filesystem watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval for notify's polling fallback, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    /// Get the poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: WatchConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_interval_ms, 1000);

        let config: WatchConfig = toml::from_str("poll_interval_ms = 250").unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }
}
