//! One inbound delivery and its settlement.

use crate::messaging::envelope::{MessageId, ReceivedMessage};
use crate::messaging::error::MessagingResult;
use crate::messaging::metrics::MESSAGING_METRICS;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Peek-lock token identifying one delivery of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Fresh random token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal disposition of a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingOutcome {
    /// Processed; never redelivered
    Completed,
    /// Returned to the entity for redelivery
    Abandoned,
    /// Moved to the dead-letter sub-queue
    DeadLettered,
}

impl ProcessingOutcome {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingOutcome::Completed => "completed",
            ProcessingOutcome::Abandoned => "abandoned",
            ProcessingOutcome::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-side settlement of locked deliveries
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Mark the delivery processed
    async fn complete(&self, entity: &str, lock_token: LockToken) -> MessagingResult<()>;

    /// Release the lock so the message is delivered again
    async fn abandon(&self, entity: &str, lock_token: LockToken) -> MessagingResult<()>;

    /// Move the message to the entity's dead-letter sub-queue
    async fn dead_letter(
        &self,
        entity: &str,
        lock_token: LockToken,
        reason: &str,
        description: &str,
    ) -> MessagingResult<()>;
}

struct DeliveryInner {
    entity: String,
    message: ReceivedMessage,
    lock_token: LockToken,
    settlement: Arc<dyn Settlement>,
    outcome: Mutex<Option<ProcessingOutcome>>,
}

/// Handle to a single locked delivery, shared by the handler and the
/// processor that invoked it
#[derive(Clone)]
pub struct Delivery {
    inner: Arc<DeliveryInner>,
}

impl Delivery {
    /// Wrap a locked message
    pub fn new(
        entity: impl Into<String>,
        message: ReceivedMessage,
        lock_token: LockToken,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        Self {
            inner: Arc::new(DeliveryInner {
                entity: entity.into(),
                message,
                lock_token,
                settlement,
                outcome: Mutex::new(None),
            }),
        }
    }

    /// Entity path the message was received from
    pub fn entity(&self) -> &str {
        &self.inner.entity
    }

    /// The delivered message
    pub fn message(&self) -> &ReceivedMessage {
        &self.inner.message
    }

    /// Broker-assigned message ID
    pub fn message_id(&self) -> &MessageId {
        &self.inner.message.message_id
    }

    /// Lock token of this delivery
    pub fn lock_token(&self) -> LockToken {
        self.inner.lock_token
    }

    /// Outcome recorded by a successful settlement, if any
    pub fn outcome(&self) -> Option<ProcessingOutcome> {
        *self.inner.outcome.lock()
    }

    /// Whether a settlement call has succeeded
    pub fn is_settled(&self) -> bool {
        self.outcome().is_some()
    }

    /// Complete the delivery
    pub async fn complete(&self) -> MessagingResult<()> {
        self.inner
            .settlement
            .complete(&self.inner.entity, self.inner.lock_token)
            .await?;
        self.record(ProcessingOutcome::Completed);
        Ok(())
    }

    /// Abandon the delivery for redelivery
    pub async fn abandon(&self) -> MessagingResult<()> {
        self.inner
            .settlement
            .abandon(&self.inner.entity, self.inner.lock_token)
            .await?;
        self.record(ProcessingOutcome::Abandoned);
        Ok(())
    }

    /// Dead-letter the delivery with diagnostic metadata
    pub async fn dead_letter(&self, reason: &str, description: &str) -> MessagingResult<()> {
        self.inner
            .settlement
            .dead_letter(&self.inner.entity, self.inner.lock_token, reason, description)
            .await?;
        self.record(ProcessingOutcome::DeadLettered);
        Ok(())
    }

    fn record(&self, outcome: ProcessingOutcome) {
        *self.inner.outcome.lock() = Some(outcome);

        MESSAGING_METRICS
            .settlements
            .with_label_values(&[&self.inner.entity, outcome.as_str()])
            .inc();

        debug!(
            entity = %self.inner.entity,
            message_id = %self.inner.message.message_id,
            outcome = %outcome,
            "Delivery settled"
        );
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("entity", &self.inner.entity)
            .field("message_id", &self.inner.message.message_id)
            .field("lock_token", &self.inner.lock_token)
            .field("outcome", &self.outcome())
            .finish()
    }
}
