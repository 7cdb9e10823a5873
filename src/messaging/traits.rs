//! Messaging trait abstractions

use crate::messaging::delivery::Delivery;
use crate::messaging::envelope::{MessageId, OutboundMessage};
use crate::messaging::error::MessagingResult;
use crate::topology::{QueueProperties, SubscriptionProperties, TopicProperties};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Callback invoked once per inbound delivery
pub type MessageHandler =
    Arc<dyn Fn(Delivery) -> BoxFuture<'static, MessagingResult<()>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    Arc::new(move |delivery| Box::pin(f(delivery)))
}

/// Entity path of a topic subscription
pub fn subscription_path(topic: &str, subscription: &str) -> String {
    format!("{}/subscriptions/{}", topic, subscription)
}

/// Processor options for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Upper bound on concurrently running handler invocations
    pub max_concurrent_calls: usize,

    /// Settle deliveries the handler left unsettled: complete on `Ok`,
    /// abandon on `Err`
    pub auto_complete: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            auto_complete: true,
        }
    }
}

impl SubscribeOptions {
    /// Set the concurrency bound (at least one)
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max.max(1);
        self
    }

    /// Enable or disable auto-completion
    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }
}

/// Handle to a running subscription processor.
///
/// Dropping the handle stops the processor; [`Subscription::close`]
/// additionally waits for its receive loop to exit. Handler invocations
/// already in flight run to completion either way.
pub struct Subscription {
    entity: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a processor task driven by `cancel`
    pub fn new(entity: impl Into<String>, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            entity: entity.into(),
            cancel,
            task: Some(task),
        }
    }

    /// Entity this subscription receives from
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Whether the processor has been asked to stop
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop receiving and wait for the receive loop to exit
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(entity = %self.entity, error = %e, "Subscription task failed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("entity", &self.entity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Minimal send/subscribe facade over a broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a queue or topic, returning the broker-assigned ID
    async fn send(&self, entity: &str, message: OutboundMessage) -> MessagingResult<MessageId>;

    /// Start a processor invoking `handler` for each delivery from a queue
    /// or subscription path
    async fn subscribe(
        &self,
        entity: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> MessagingResult<Subscription>;
}

/// Administrative surface of a broker.
///
/// Lookups of absent entities fail with `MessagingError::NotFound`;
/// creating an existing entity fails with `MessagingError::AlreadyExists`.
#[async_trait]
pub trait Administration: Send + Sync {
    async fn get_queue(&self, name: &str) -> MessagingResult<QueueProperties>;

    async fn create_queue(&self, properties: QueueProperties) -> MessagingResult<()>;

    async fn get_topic(&self, name: &str) -> MessagingResult<TopicProperties>;

    async fn create_topic(&self, properties: TopicProperties) -> MessagingResult<()>;

    async fn get_subscription(
        &self,
        topic: &str,
        name: &str,
    ) -> MessagingResult<SubscriptionProperties>;

    async fn create_subscription(&self, properties: SubscriptionProperties)
        -> MessagingResult<()>;
}
