//! Error types for messaging operations

use crate::retry::RetryError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Boxed error carried as the cause of a failed operation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Malformed queue, topic or subscription name
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity does not exist on the broker
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Entity was created concurrently by another caller
    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    /// Message body could not be decoded into the requested type
    #[error("Decode error for message {message_id}: {reason}")]
    Decode { message_id: String, reason: String },

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Send retry tier exhausted, wraps the last cause
    #[error("Send to '{entity}' failed after {attempts} attempt(s): {source}")]
    SendFailed {
        entity: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// Inbound transform failed
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Awaited result did not arrive in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Delivery lock is unknown or the message was already settled
    #[error("Message lock lost: {0}")]
    LockLost(String),

    /// A subscription or pending request was closed before resolving
    #[error("Channel closed: {0}")]
    Closed(String),

    /// Broker-side failure
    #[error("Broker error: {0}")]
    Broker(String),
}

impl MessagingError {
    /// Whether this error is the broker's "entity not found" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, MessagingError::NotFound(_))
    }

    /// Whether this error reports a concurrent create of the same entity
    pub fn is_already_exists(&self) -> bool {
        matches!(self, MessagingError::AlreadyExists(_))
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MessagingError::Validation(_) => "validation",
            MessagingError::NotFound(_) => "not_found",
            MessagingError::AlreadyExists(_) => "already_exists",
            MessagingError::Decode { .. } => "decode",
            MessagingError::Serialization(_) => "serialization",
            MessagingError::SendFailed { .. } => "send_failed",
            MessagingError::Processing(_) => "processing",
            MessagingError::Cancelled => "cancelled",
            MessagingError::Timeout(_) => "timeout",
            MessagingError::LockLost(_) => "lock_lost",
            MessagingError::Closed(_) => "closed",
            MessagingError::Broker(_) => "broker",
        }
    }

    /// Convert an exhausted or cancelled send retry into a messaging error
    pub fn from_send_retry(entity: &str, err: RetryError<MessagingError>) -> Self {
        match err {
            RetryError::OperationFailed { attempts, last } => MessagingError::SendFailed {
                entity: entity.to_string(),
                attempts,
                source: Box::new(last),
            },
            RetryError::Cancelled { .. } => MessagingError::Cancelled,
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

impl From<RetryError<MessagingError>> for MessagingError {
    fn from(err: RetryError<MessagingError>) -> Self {
        match err {
            RetryError::OperationFailed { last, .. } => last,
            RetryError::Cancelled { .. } => MessagingError::Cancelled,
        }
    }
}
