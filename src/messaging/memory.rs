//! In-process broker with peek-lock delivery.
//!
//! [`InMemoryBroker`] implements [`Transport`], [`Administration`] and
//! [`Settlement`] over per-entity message stores. Queues and subscriptions
//! each own a store; sending to a topic copies the message into every
//! subscription store. Entity names are compared case-insensitively.

use crate::messaging::delivery::{Delivery, LockToken, Settlement};
use crate::messaging::envelope::{MessageId, OutboundMessage, ReceivedMessage};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{
    subscription_path, Administration, MessageHandler, SubscribeOptions, Subscription, Transport,
};
use crate::topology::{QueueProperties, SubscriptionProperties, TopicProperties};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Dead-letter reason used when a message exceeds its entity's max delivery count
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

struct StoredMessage {
    message: ReceivedMessage,
    visible_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredMessage {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Default)]
struct StoreState {
    active: VecDeque<StoredMessage>,
    locked: HashMap<LockToken, StoredMessage>,
    dead_letters: Vec<ReceivedMessage>,
}

enum NextMessage {
    Locked(ReceivedMessage, LockToken),
    Empty { next_visible: Option<DateTime<Utc>> },
}

/// Messages of one queue or subscription
struct MessageStore {
    path: String,
    max_delivery_count: u32,
    default_ttl: Duration,
    state: Mutex<StoreState>,
    notify: Notify,
}

impl MessageStore {
    fn new(path: String, max_delivery_count: u32, default_ttl: Duration) -> Self {
        Self {
            path,
            max_delivery_count,
            default_ttl,
            state: Mutex::new(StoreState::default()),
            notify: Notify::new(),
        }
    }

    fn enqueue(&self, message: ReceivedMessage, ttl: Option<Duration>, visible_at: DateTime<Utc>) {
        let ttl = ttl.map_or(self.default_ttl, |ttl| ttl.min(self.default_ttl));
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| visible_at.checked_add_signed(ttl));

        self.state.lock().active.push_back(StoredMessage {
            message,
            visible_at,
            expires_at,
        });
        self.notify.notify_waiters();
    }

    fn lock_next(&self, now: DateTime<Utc>) -> NextMessage {
        let mut state = self.state.lock();

        let before = state.active.len();
        state.active.retain(|stored| !stored.is_expired(now));
        let expired = before - state.active.len();
        if expired > 0 {
            debug!(entity = %self.path, expired, "Discarded expired messages");
        }

        let position = state.active.iter().position(|stored| stored.visible_at <= now);
        let next = position.and_then(|index| state.active.remove(index));
        match next {
            Some(mut stored) => {
                stored.message.delivery_count += 1;
                let lock_token = LockToken::new();
                let message = stored.message.clone();
                state.locked.insert(lock_token, stored);
                NextMessage::Locked(message, lock_token)
            }
            None => NextMessage::Empty {
                next_visible: state.active.iter().map(|stored| stored.visible_at).min(),
            },
        }
    }

    /// Wait for and lock the next visible message. Cancel-safe: the lock is
    /// taken in the same poll that returns it.
    async fn receive(&self) -> (ReceivedMessage, LockToken) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.lock_next(Utc::now()) {
                NextMessage::Locked(message, lock_token) => return (message, lock_token),
                NextMessage::Empty { next_visible: None } => notified.await,
                NextMessage::Empty {
                    next_visible: Some(due),
                } => {
                    let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    fn take_locked(&self, state: &mut StoreState, lock_token: LockToken) -> MessagingResult<StoredMessage> {
        state.locked.remove(&lock_token).ok_or_else(|| {
            MessagingError::LockLost(format!(
                "lock {} on '{}' is unknown or already settled",
                lock_token, self.path
            ))
        })
    }

    fn complete(&self, lock_token: LockToken) -> MessagingResult<()> {
        let mut state = self.state.lock();
        self.take_locked(&mut state, lock_token).map(|_| ())
    }

    fn abandon(&self, lock_token: LockToken) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let mut stored = self.take_locked(&mut state, lock_token)?;

        if stored.message.delivery_count >= self.max_delivery_count {
            warn!(
                entity = %self.path,
                message_id = %stored.message.message_id,
                delivery_count = stored.message.delivery_count,
                "Max delivery count reached, dead-lettering"
            );
            stored.message.dead_letter_reason = Some(MAX_DELIVERY_COUNT_EXCEEDED.to_string());
            stored.message.dead_letter_description = Some(format!(
                "delivered {} time(s), limit is {}",
                stored.message.delivery_count, self.max_delivery_count
            ));
            state.dead_letters.push(stored.message);
            return Ok(());
        }

        state.active.push_front(stored);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    fn dead_letter(&self, lock_token: LockToken, reason: &str, description: &str) -> MessagingResult<()> {
        let mut state = self.state.lock();
        let mut stored = self.take_locked(&mut state, lock_token)?;
        stored.message.dead_letter_reason = Some(reason.to_string());
        stored.message.dead_letter_description = Some(description.to_string());
        state.dead_letters.push(stored.message);
        Ok(())
    }
}

#[derive(Default)]
struct Namespace {
    queues: HashMap<String, QueueProperties>,
    topics: HashMap<String, TopicProperties>,
    subscriptions: HashMap<String, SubscriptionProperties>,
    stores: HashMap<String, Arc<MessageStore>>,
}

/// In-process broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    namespace: Arc<RwLock<Namespace>>,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, entity: &str) -> MessagingResult<Arc<MessageStore>> {
        self.namespace
            .read()
            .stores
            .get(&key(entity))
            .cloned()
            .ok_or_else(|| MessagingError::NotFound(format!("queue or subscription '{}'", entity)))
    }

    /// Messages in the entity that are not dead-lettered, locked ones included
    pub fn active_message_count(&self, entity: &str) -> MessagingResult<usize> {
        let store = self.store(entity)?;
        let state = store.state.lock();
        Ok(state.active.len() + state.locked.len())
    }

    /// Snapshot of the entity's dead-letter sub-queue
    pub fn dead_letter_messages(&self, entity: &str) -> MessagingResult<Vec<ReceivedMessage>> {
        let store = self.store(entity)?;
        let messages = store.state.lock().dead_letters.clone();
        Ok(messages)
    }

    fn send_targets(&self, entity: &str) -> MessagingResult<Vec<Arc<MessageStore>>> {
        let ns = self.namespace.read();
        let entity_key = key(entity);

        if ns.queues.contains_key(&entity_key) {
            return Ok(ns.stores.get(&entity_key).cloned().into_iter().collect());
        }

        if ns.topics.contains_key(&entity_key) {
            return Ok(ns
                .subscriptions
                .iter()
                .filter(|(_, sub)| key(&sub.topic) == entity_key)
                .filter_map(|(path, _)| ns.stores.get(path).cloned())
                .collect());
        }

        Err(MessagingError::NotFound(format!("queue or topic '{}'", entity)))
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn send(&self, entity: &str, message: OutboundMessage) -> MessagingResult<MessageId> {
        let targets = self.send_targets(entity)?;

        let now = Utc::now();
        let message_id = MessageId::from_broker(Uuid::new_v4().to_string());
        let visible_at = message
            .headers
            .scheduled_enqueue_time
            .map_or(now, |at| at.max(now));
        let ttl = message.headers.time_to_live;

        let received = ReceivedMessage {
            message_id: message_id.clone(),
            headers: message.headers,
            body: message.body,
            delivery_count: 0,
            enqueued_at: now,
            dead_letter_reason: None,
            dead_letter_description: None,
        };

        for store in &targets {
            store.enqueue(received.clone(), ttl, visible_at);
        }

        MESSAGING_METRICS
            .messages_sent
            .with_label_values(&[entity])
            .inc();
        debug!(
            entity = %entity,
            message_id = %message_id,
            targets = targets.len(),
            "Message enqueued"
        );

        Ok(message_id)
    }

    async fn subscribe(
        &self,
        entity: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
    ) -> MessagingResult<Subscription> {
        if self.namespace.read().topics.contains_key(&key(entity)) {
            return Err(MessagingError::Validation(format!(
                "'{}' is a topic; subscribe to one of its subscriptions",
                entity
            )));
        }

        let store = self.store(entity)?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_processor(
            self.clone(),
            store,
            handler,
            options,
            cancel.clone(),
        ));

        info!(
            entity = %entity,
            max_concurrent_calls = options.max_concurrent_calls,
            auto_complete = options.auto_complete,
            "Subscription started"
        );

        Ok(Subscription::new(entity, cancel, task))
    }
}

async fn run_processor(
    broker: InMemoryBroker,
    store: Arc<MessageStore>,
    handler: MessageHandler,
    options: SubscribeOptions,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_calls.max(1)));
    let settlement: Arc<dyn Settlement> = Arc::new(broker);

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (message, lock_token) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = store.receive() => received,
        };

        MESSAGING_METRICS
            .deliveries
            .with_label_values(&[&store.path])
            .inc();

        let delivery = Delivery::new(store.path.clone(), message, lock_token, settlement.clone());
        let handler = handler.clone();
        let auto_complete = options.auto_complete;

        tokio::spawn(async move {
            let _permit = permit;
            let result = handler(delivery.clone()).await;

            if let Err(e) = &result {
                warn!(
                    entity = %delivery.entity(),
                    message_id = %delivery.message_id(),
                    error = %e,
                    "Message handler failed"
                );
            }

            if !auto_complete || delivery.is_settled() {
                return;
            }

            let settled = match result {
                Ok(()) => delivery.complete().await,
                Err(_) => delivery.abandon().await,
            };
            if let Err(e) = settled {
                warn!(
                    entity = %delivery.entity(),
                    message_id = %delivery.message_id(),
                    error = %e,
                    "Automatic settlement failed"
                );
            }
        });
    }

    debug!(entity = %store.path, "Subscription processor stopped");
}

#[async_trait]
impl Settlement for InMemoryBroker {
    async fn complete(&self, entity: &str, lock_token: LockToken) -> MessagingResult<()> {
        self.store(entity)?.complete(lock_token)
    }

    async fn abandon(&self, entity: &str, lock_token: LockToken) -> MessagingResult<()> {
        self.store(entity)?.abandon(lock_token)
    }

    async fn dead_letter(
        &self,
        entity: &str,
        lock_token: LockToken,
        reason: &str,
        description: &str,
    ) -> MessagingResult<()> {
        self.store(entity)?.dead_letter(lock_token, reason, description)
    }
}

#[async_trait]
impl Administration for InMemoryBroker {
    async fn get_queue(&self, name: &str) -> MessagingResult<QueueProperties> {
        self.namespace
            .read()
            .queues
            .get(&key(name))
            .cloned()
            .ok_or_else(|| MessagingError::NotFound(format!("queue '{}'", name)))
    }

    async fn create_queue(&self, properties: QueueProperties) -> MessagingResult<()> {
        let mut ns = self.namespace.write();
        let queue_key = key(&properties.name);

        if ns.queues.contains_key(&queue_key) || ns.topics.contains_key(&queue_key) {
            return Err(MessagingError::AlreadyExists(properties.name));
        }

        ns.stores.insert(
            queue_key.clone(),
            Arc::new(MessageStore::new(
                properties.name.clone(),
                properties.max_delivery_count,
                properties.default_message_ttl,
            )),
        );
        ns.queues.insert(queue_key, properties);
        Ok(())
    }

    async fn get_topic(&self, name: &str) -> MessagingResult<TopicProperties> {
        self.namespace
            .read()
            .topics
            .get(&key(name))
            .cloned()
            .ok_or_else(|| MessagingError::NotFound(format!("topic '{}'", name)))
    }

    async fn create_topic(&self, properties: TopicProperties) -> MessagingResult<()> {
        let mut ns = self.namespace.write();
        let topic_key = key(&properties.name);

        if ns.topics.contains_key(&topic_key) || ns.queues.contains_key(&topic_key) {
            return Err(MessagingError::AlreadyExists(properties.name));
        }

        ns.topics.insert(topic_key, properties);
        Ok(())
    }

    async fn get_subscription(
        &self,
        topic: &str,
        name: &str,
    ) -> MessagingResult<SubscriptionProperties> {
        self.namespace
            .read()
            .subscriptions
            .get(&key(&subscription_path(topic, name)))
            .cloned()
            .ok_or_else(|| {
                MessagingError::NotFound(format!("subscription '{}'", subscription_path(topic, name)))
            })
    }

    async fn create_subscription(
        &self,
        properties: SubscriptionProperties,
    ) -> MessagingResult<()> {
        let mut ns = self.namespace.write();

        let topic_name = ns
            .topics
            .get(&key(&properties.topic))
            .map(|topic| topic.name.clone())
            .ok_or_else(|| MessagingError::NotFound(format!("topic '{}'", properties.topic)))?;

        let path = subscription_path(&topic_name, &properties.name);
        let path_key = key(&path);
        if ns.subscriptions.contains_key(&path_key) {
            return Err(MessagingError::AlreadyExists(path));
        }

        ns.stores.insert(
            path_key.clone(),
            Arc::new(MessageStore::new(
                path,
                properties.max_delivery_count,
                properties.default_message_ttl,
            )),
        );
        ns.subscriptions.insert(path_key, properties);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ns = self.namespace.read();
        f.debug_struct("InMemoryBroker")
            .field("queues", &ns.queues.len())
            .field("topics", &ns.topics.len())
            .field("subscriptions", &ns.subscriptions.len())
            .finish()
    }
}
