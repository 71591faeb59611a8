//! Configuration file loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use harness_eventloop::{BridgeConfig, BridgeError};
use harness_fswatch::WatchConfig;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] BridgeError),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct HarnessConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

impl HarnessConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            debug!("Config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::load_str(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.bridge.validate()?;
        Ok(config)
    }
}

/// Get the .harness directory path.
pub(crate) fn harness_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".harness"))
        .unwrap_or_else(|| PathBuf::from(".harness"))
}

fn default_config_path() -> PathBuf {
    harness_dir().join("config.toml")
}
