use crate::messaging::MessagingError;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Messaging layer errors
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    /// Observability setup errors
    #[error("Observability error: {0}")]
    Observability(String),
}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Observability(_) => "OBSERVABILITY_ERROR",
            AppError::Messaging(e) => match e {
                MessagingError::Validation(_) => "VALIDATION_ERROR",
                MessagingError::NotFound(_) => "NOT_FOUND",
                MessagingError::Timeout(_) => "TIMEOUT",
                MessagingError::Cancelled => "CANCELLED",
                MessagingError::SendFailed { .. } => "SEND_FAILED",
                _ => "MESSAGING_ERROR",
            },
        }
    }

    /// Process exit code for the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Messaging(MessagingError::Validation(_)) => 2,
            AppError::Configuration(_) => 78,
            _ => 1,
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from prometheus::Error
impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Observability(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Configuration("test".to_string()).error_code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(
            AppError::from(MessagingError::Validation("bad".into())).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            AppError::from(MessagingError::Cancelled).error_code(),
            "CANCELLED"
        );
        assert_eq!(
            AppError::from(MessagingError::LockLost("t".into())).error_code(),
            "MESSAGING_ERROR"
        );
    }

    #[test]
    fn test_messaging_errors_are_transparent() {
        let err = AppError::from(MessagingError::NotFound("queue 'orders'".into()));
        assert_eq!(err.to_string(), "Entity not found: queue 'orders'");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            AppError::from(MessagingError::Validation("bad".into())).exit_code(),
            2
        );
        assert_eq!(AppError::Configuration("x".into()).exit_code(), 78);
        assert_eq!(AppError::Serialization("x".into()).exit_code(), 1);
    }
}
