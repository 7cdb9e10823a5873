//! Processing context for one inbound delivery.

use crate::messaging::delivery::{Delivery, ProcessingOutcome};
use crate::messaging::envelope::{MessageHeaders, MessageId};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::warn;

/// Decoded view of a delivery plus its lifecycle operations.
///
/// A body that fails to decode leaves the payload absent; the failure is
/// logged and kept in [`MessageContext::decode_error`]. Nothing is settled
/// automatically, the caller decides between [`acknowledge`],
/// [`requeue`] and [`dead_letter`].
///
/// [`acknowledge`]: MessageContext::acknowledge
/// [`requeue`]: MessageContext::requeue
/// [`dead_letter`]: MessageContext::dead_letter
pub struct MessageContext<T> {
    delivery: Delivery,
    payload: Option<T>,
    decode_error: Option<MessagingError>,
}

impl<T: DeserializeOwned> MessageContext<T> {
    /// Decode the delivery's body
    pub fn new(delivery: Delivery) -> Self {
        match delivery.message().decode::<T>() {
            Ok(payload) => Self {
                delivery,
                payload: Some(payload),
                decode_error: None,
            },
            Err(e) => {
                warn!(
                    entity = %delivery.entity(),
                    message_id = %delivery.message_id(),
                    error = %e,
                    "Failed to decode message body"
                );
                MESSAGING_METRICS
                    .decode_failures
                    .with_label_values(&[delivery.entity()])
                    .inc();

                Self {
                    delivery,
                    payload: None,
                    decode_error: Some(e),
                }
            }
        }
    }
}

impl<T> MessageContext<T> {
    pub fn message_id(&self) -> &MessageId {
        self.delivery.message_id()
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.delivery.message().headers
    }

    pub fn delivery_count(&self) -> u32 {
        self.delivery.message().delivery_count
    }

    /// Decoded payload, absent when decoding failed
    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }

    /// Move the payload out of the context
    pub fn take_payload(&mut self) -> Option<T> {
        self.payload.take()
    }

    /// Decode failure, if any
    pub fn decode_error(&self) -> Option<&MessagingError> {
        self.decode_error.as_ref()
    }

    /// Move the decode failure out of the context
    pub fn take_decode_error(&mut self) -> Option<MessagingError> {
        self.decode_error.take()
    }

    /// Underlying delivery handle
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Give up the decoded view and keep the delivery handle
    pub fn into_delivery(self) -> Delivery {
        self.delivery
    }

    /// Mark the delivery complete; it is not redelivered
    pub async fn acknowledge(&self) -> MessagingResult<()> {
        self.delivery.complete().await
    }

    /// Return the message to its entity for redelivery
    pub async fn requeue(&self) -> MessagingResult<()> {
        self.delivery.abandon().await
    }

    /// Move the message to the dead-letter sub-queue
    pub async fn dead_letter(&self, reason: &str, detail: &str) -> MessagingResult<()> {
        self.delivery.dead_letter(reason, detail).await
    }

    /// Outcome of the settlement performed so far
    pub fn outcome(&self) -> Option<ProcessingOutcome> {
        self.delivery.outcome()
    }
}

impl<T: fmt::Debug> fmt::Debug for MessageContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("delivery", &self.delivery)
            .field("payload", &self.payload)
            .field("decode_error", &self.decode_error)
            .finish()
    }
}
