//! Logging subsystem for the Eternal Veil core
//!
//! Wraps `tracing-subscriber` so the host application (CLI, desktop shell,
//! test harness) gets one call to install a filtered formatter.
//!
//! Nothing in this crate logs key material, passphrases or plaintext. Log
//! fields carry fingerprints, ids and sizes only.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub with_timestamp: bool,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_timestamp: true,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with specified level
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set whether to include timestamps
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.with_timestamp = enabled;
        self
    }

    /// Set whether to include target information
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Set whether to use JSON formatting
    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

impl TryFrom<&LoggingConfig> for LogConfig {
    type Error = LoggingError;

    fn try_from(config: &LoggingConfig) -> Result<Self, Self::Error> {
        let level = LogLevel::from_str(&config.level).ok_or_else(|| {
            LoggingError::InvalidConfiguration(format!("unknown log level: {}", config.level))
        })?;

        Ok(LogConfig::new(level)
            .with_timestamp(config.with_timestamp)
            .with_target(config.with_target)
            .json_format(config.json_format))
    }
}

/// Initialize the logging subsystem with default configuration
///
/// # Example
/// ```no_run
/// use veil_core::logging::init_logging;
///
/// init_logging().expect("Failed to initialize logging");
/// ```
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
///
/// `RUST_LOG` takes precedence over `config.level` when it is set. Output
/// goes to stderr.
///
/// # Example
/// ```no_run
/// use veil_core::logging::{init_logging_with_config, LogConfig, LogLevel};
///
/// let config = LogConfig::new(LogLevel::Debug)
///     .with_timestamp(true)
///     .with_target(false);
///
/// init_logging_with_config(config).expect("Failed to initialize logging");
/// ```
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    // stderr, so command output on stdout stays machine readable
    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    let fmt_layer = if config.json_format {
        base.json().boxed()
    } else if config.with_timestamp {
        base.boxed()
    } else {
        base.without_time().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(matches!(config.level, LogLevel::Info));
        assert!(config.with_timestamp);
        assert!(config.with_target);
        assert!(!config.json_format);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new(LogLevel::Debug)
            .with_timestamp(false)
            .with_target(false)
            .json_format(true);

        assert!(matches!(config.level, LogLevel::Debug));
        assert!(!config.with_timestamp);
        assert!(!config.with_target);
        assert!(config.json_format);
    }

    #[test]
    fn test_log_config_from_logging_section() {
        let section = LoggingConfig {
            level: "WARN".to_string(),
            json_format: true,
            with_timestamp: false,
            with_target: true,
        };

        let config = LogConfig::try_from(&section).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.json_format);
        assert!(!config.with_timestamp);
    }

    #[test]
    fn test_log_config_rejects_unknown_level() {
        let section = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };

        assert!(matches!(
            LogConfig::try_from(&section),
            Err(LoggingError::InvalidConfiguration(_))
        ));
    }
}
