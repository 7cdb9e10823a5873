//! Message envelope: header bag plus structured-text body

use crate::messaging::error::{MessagingError, MessagingResult};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Content type stamped on JSON payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker-assigned message identity
///
/// Only transports mint these; clients never construct one for an
/// outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an identifier issued by a broker
    pub fn from_broker(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Headers riding alongside the body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeaders {
    /// Correlation ID linking a reply to its request
    pub correlation_id: Option<String>,

    /// Application-defined label
    pub subject: Option<String>,

    /// Address the receiver should reply to
    pub reply_to: Option<String>,

    /// Session for ordered processing
    pub session_id: Option<String>,

    /// Partition key
    pub partition_key: Option<String>,

    /// Time-to-live from enqueue
    pub time_to_live: Option<Duration>,

    /// Earliest time the message becomes visible
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,

    /// MIME type of the body
    pub content_type: Option<String>,

    /// Custom application properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl MessageHeaders {
    /// Empty header bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set reply-to address
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Set session ID
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set partition key
    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }

    /// Set time-to-live
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Defer visibility until the given time
    pub fn with_scheduled_enqueue_time(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_enqueue_time = Some(at);
        self
    }

    /// Set content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a custom property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Message handed to a transport for sending
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Header bag
    pub headers: MessageHeaders,

    /// Encoded body
    pub body: Vec<u8>,
}

impl OutboundMessage {
    /// Build from raw bytes
    pub fn new(body: Vec<u8>, headers: MessageHeaders) -> Self {
        Self { headers, body }
    }

    /// Encode a payload as JSON, stamping the content type when unset
    pub fn json<T: Serialize + ?Sized>(
        payload: &T,
        mut headers: MessageHeaders,
    ) -> MessagingResult<Self> {
        let body = serde_json::to_vec(payload)?;
        if headers.content_type.is_none() {
            headers.content_type = Some(JSON_CONTENT_TYPE.to_string());
        }
        Ok(Self { headers, body })
    }
}

/// Message as delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Identity assigned at send time
    pub message_id: MessageId,

    /// Header bag
    pub headers: MessageHeaders,

    /// Encoded body
    pub body: Vec<u8>,

    /// Number of times this message was handed to a receiver
    pub delivery_count: u32,

    /// When the broker accepted the message
    pub enqueued_at: DateTime<Utc>,

    /// Set when the message sits in a dead-letter sub-queue
    pub dead_letter_reason: Option<String>,

    /// Diagnostic detail for dead-lettered messages
    pub dead_letter_description: Option<String>,
}

impl ReceivedMessage {
    /// Decode the body as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| MessagingError::Decode {
            message_id: self.message_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Correlation ID for a reply: the request's correlation ID, else its message ID
    pub fn reply_correlation_id(&self) -> String {
        self.headers
            .correlation_id
            .clone()
            .unwrap_or_else(|| self.message_id.to_string())
    }
}
