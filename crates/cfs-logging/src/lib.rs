use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, trace, warn};

/// Guard keeping the non-blocking file writer alive; hold it for the life
/// of the process.
pub use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files. If None, no file logging.
    pub log_dir: Option<PathBuf>,

    /// Prefix for log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    /// Log rotation: "hourly", "daily", "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Whether to also output to console (stderr).
    ///
    /// Off by default: the bypass library is loaded into arbitrary host
    /// processes whose stdio must not be polluted.
    #[serde(default)]
    pub console_output: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "cfs-bypass".into()
}

fn default_rotation() -> String {
    "daily".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
            rotation: default_rotation(),
            console_output: false,
        }
    }
}

impl LogConfig {
    /// Build a config from the `logLevel` / `logDir` pair of the bypass
    /// configuration. An empty dir disables file logging.
    pub fn from_level_and_dir(level: &str, log_dir: &str) -> Self {
        LogConfig {
            level: if level.is_empty() {
                default_level()
            } else {
                level.to_string()
            },
            log_dir: if log_dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(log_dir))
            },
            ..Default::default()
        }
    }
}

/// Initialize the logging system. Should be called once at startup.
/// Returns a guard that must be held alive for the duration of the process
/// (for the non-blocking file writer).
pub fn init_logging(config: &LogConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> =
        if config.console_output {
            Some(Box::new(fmt::layer().with_writer(std::io::stderr)))
        } else {
            None
        };

    let (file_layer, guard): (
        Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>>,
        Option<tracing_appender::non_blocking::WorkerGuard>,
    ) = if let Some(ref log_dir) = config.log_dir {
        let rotation = match config.rotation.as_str() {
            "hourly" => rolling::Rotation::HOURLY,
            "never" => rolling::Rotation::NEVER,
            // default to daily
            _ => rolling::Rotation::DAILY,
        };

        match rolling::RollingFileAppender::builder()
            .rotation(rotation)
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .build(log_dir)
        {
            Ok(file_appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> =
                    Box::new(fmt::layer().with_writer(non_blocking));
                (Some(layer), Some(guard))
            }
            // An unwritable log dir must not break the host process.
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    // try_init: the host process may already have installed a subscriber.
    let _ = registry.with(console_layer).with(file_layer).try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_level_and_dir() {
        let cfg = LogConfig::from_level_and_dir("debug", "/tmp/cfs-logs");
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/tmp/cfs-logs")));
        assert!(!cfg.console_output);
    }

    #[test]
    fn test_from_empty_falls_back_to_defaults() {
        let cfg = LogConfig::from_level_and_dir("", "");
        assert_eq!(cfg.level, "info");
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn test_default_rotation_daily() {
        assert_eq!(LogConfig::default().rotation, "daily");
    }
}
