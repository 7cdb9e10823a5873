//! Shared fixtures for the integration suites
//!
//! Wrappers around the in-process broker that count administration calls
//! or fail a number of sends, a polling helper, and Prometheus exposition
//! parsing.

#![allow(dead_code)]

use async_trait::async_trait;
use relay_bus::messaging::{
    Administration, InMemoryBroker, MessageHandler, MessageId, MessagingError, MessagingResult,
    OutboundMessage, SubscribeOptions, Subscription, Transport,
};
use relay_bus::topology::{
    QueueProperties, SubscriptionProperties, TopicProperties, TopologyManager,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonQuery {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
}

/// Broker with the given queues provisioned under the default policy
pub async fn broker_with_queues(queues: &[&str]) -> InMemoryBroker {
    let broker = InMemoryBroker::new();
    let topology = TopologyManager::new(Arc::new(broker.clone()));
    for queue in queues {
        topology.ensure_queue(queue).await.unwrap();
    }
    broker
}

/// Poll `condition` until it holds, panicking after roughly two seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Administration wrapper recording how often each call reaches the broker
#[derive(Default)]
pub struct CountingAdmin {
    pub inner: InMemoryBroker,
    pub lookups: AtomicU32,
    pub creates: AtomicU32,
}

impl CountingAdmin {
    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Administration for CountingAdmin {
    async fn get_queue(&self, name: &str) -> MessagingResult<QueueProperties> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_queue(name).await
    }

    async fn create_queue(&self, properties: QueueProperties) -> MessagingResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_queue(properties).await
    }

    async fn get_topic(&self, name: &str) -> MessagingResult<TopicProperties> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_topic(name).await
    }

    async fn create_topic(&self, properties: TopicProperties) -> MessagingResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_topic(properties).await
    }

    async fn get_subscription(
        &self,
        topic: &str,
        name: &str,
    ) -> MessagingResult<SubscriptionProperties> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_subscription(topic, name).await
    }

    async fn create_subscription(
        &self,
        properties: SubscriptionProperties,
    ) -> MessagingResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_subscription(properties).await
    }
}

/// Transport whose first `failures` sends fail with a broker error
pub struct FlakyTransport {
    inner: InMemoryBroker,
    failures: u32,
    sends: AtomicU32,
}

impl FlakyTransport {
    pub fn new(inner: InMemoryBroker, failures: u32) -> Self {
        Self {
            inner,
            failures,
            sends: AtomicU32::new(0),
        }
    }

    pub fn send_attempts(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, entity: &str, message: OutboundMessage) -> MessagingResult<MessageId> {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(MessagingError::Broker(format!(
                "connection reset (attempt {})",
                attempt
            )));
        }
        self.inner.send(entity, message).await
    }

    async fn subscribe(
        &self,
        entity: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> MessagingResult<Subscription> {
        self.inner.subscribe(entity, handler, options).await
    }
}

/// Metric family names announced by `# TYPE` lines of a text exposition
pub fn metric_families(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.strip_prefix("# TYPE "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Whether `name` follows the Prometheus metric naming rules
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }

    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Value of the first sample line starting with `prefix`
pub fn sample_value(output: &str, prefix: &str) -> Option<f64> {
    output
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find(|line| line.starts_with(prefix))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
