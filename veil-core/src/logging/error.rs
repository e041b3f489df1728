//! Logging errors

use thiserror::Error;

/// Errors raised while installing the global subscriber
#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// A global subscriber was already installed, or the layer stack failed to build
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// The configuration named a level or format we do not know
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(err.to_string(), "Failed to initialize logging: already set");

        let err = LoggingError::InvalidConfiguration("unknown log level: loud".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid logging configuration: unknown log level: loud"
        );
    }
}
