//! Structured logging setup
//!
//! Installs a `tracing-subscriber` registry driven by [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level when it is set.

use std::io;
use std::str::FromStr;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app_config::{ConfigError, LoggingConfig};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "format".to_string(),
                value: s.to_string(),
                expected: "compact, pretty, or json".to_string(),
            }),
        }
    }
}

/// Build the filter for a configured level, letting `RUST_LOG` win.
pub fn build_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ConfigError::InvalidValue {
            field: "level".to_string(),
            value: level.to_string(),
            expected: format!("a valid tracing filter ({})", e),
        })
}

/// Initialize logging for the process.
///
/// Calling this twice is not an error; the second subscriber is simply not installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let format = LogFormat::from_str(&config.format)?;
    let filter = build_filter(&config.level)?;

    // Logs go to stderr so command output on stdout stays scriptable.
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).pretty())
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).compact())
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(
            target: "strata::logging",
            "Logging initialized (level: {}, format: {})",
            config.level,
            config.format
        );
    }

    Ok(())
}
