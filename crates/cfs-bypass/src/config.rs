//! Startup configuration.
//!
//! Loaded once before the client is constructed. Key spellings match the
//! established config surface (`mountPoint`, `ignorePath`, `logDir`,
//! `logLevel`, `profPort`); the file format is TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "cfs-bypass.toml";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "CFS_BYPASS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BypassConfig {
    /// Absolute path of the subtree redirected to CFS.
    #[serde(rename = "mountPoint")]
    pub mount_point: String,

    /// Comma-separated entries immediately under the mount point that stay
    /// local.
    #[serde(rename = "ignorePath", default)]
    pub ignore_path: String,

    /// Directory for log files; empty disables file logging.
    #[serde(rename = "logDir", default)]
    pub log_dir: String,

    /// Log level filter.
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,

    /// Port for the profiling endpoint; empty disables it.
    #[serde(rename = "profPort", default)]
    pub prof_port: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl BypassConfig {
    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: BypassConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Resolve the config location: the env override when set, the default
    /// path otherwise.
    pub fn resolve_path() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mount_point.is_empty() {
            return Err(ConfigError::Invalid("mountPoint is required".into()));
        }
        if !self.mount_point.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "mountPoint must be absolute, got {:?}",
                self.mount_point
            )));
        }
        if self.mount_point.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Invalid(
                "mountPoint must not be the filesystem root".into(),
            ));
        }
        Ok(())
    }
}
