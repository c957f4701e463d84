//! Structured logging setup built on the `tracing` crate.
//!
//! Priority order (highest to lowest): `FILEDB_LOG` environment variable,
//! configuration, defaults.

use crate::error::FileDbError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive: trace, debug, info, warn, error, off
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            color: default_true(),
        }
    }
}

/// Initialize the logging system. Safe to call once per process; a second
/// call fails because the global subscriber is already set.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), FileDbError> {
    let default = LoggingConfig::default();
    let config = config.unwrap_or(&default);

    let filter = build_env_filter(config)?;
    let base = Registry::default().with(filter);

    let result = if config.format == "json" {
        base.with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339()),
        )
        .try_init()
    } else {
        base.with(
            fmt::layer()
                .with_target(true)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(config.color),
        )
        .try_init()
    };

    result.map_err(|e| config_error(format!("Failed to initialize logging: {}", e)))
}

/// Build the environment filter, preferring `FILEDB_LOG` over the config.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, FileDbError> {
    if let Ok(filter) = EnvFilter::try_from_env("FILEDB_LOG") {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| config_error(format!("Invalid log level \"{}\": {}", config.level, e)))
}

fn config_error(message: String) -> FileDbError {
    FileDbError::Config(config::ConfigError::Message(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_info_text() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "text");
        assert!(config.color);
    }

    #[test]
    fn test_filter_rejects_malformed_level() {
        let config = LoggingConfig {
            level: "no=such=level".to_string(),
            ..LoggingConfig::default()
        };
        assert!(build_env_filter(&config).is_err());
    }

    #[test]
    fn test_filter_accepts_directive_syntax() {
        let config = LoggingConfig {
            level: "info,filedb::store=debug".to_string(),
            ..LoggingConfig::default()
        };
        assert!(build_env_filter(&config).is_ok());
    }
}
