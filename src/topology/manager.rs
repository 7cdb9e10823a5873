//! Idempotent provisioning of queues, topics and subscriptions

use super::name::EntityName;
use super::policy::EntityPolicy;
use crate::messaging::{
    subscription_path, Administration, MessagingError, MessagingResult, MESSAGING_METRICS,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of an `ensure_*` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioned {
    /// This call created the entity
    Created,
    /// The entity was already present
    AlreadyExisted,
}

impl Provisioned {
    pub fn was_created(&self) -> bool {
        matches!(self, Provisioned::Created)
    }
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provisioned::Created => write!(f, "created"),
            Provisioned::AlreadyExisted => write!(f, "already existed"),
        }
    }
}

/// Validates names and creates missing entities under a fixed policy.
///
/// No topology state is cached; every check goes to the broker.
#[derive(Clone)]
pub struct TopologyManager {
    admin: Arc<dyn Administration>,
    policy: EntityPolicy,
}

impl TopologyManager {
    /// Create a manager using the default entity policy
    pub fn new(admin: Arc<dyn Administration>) -> Self {
        Self::with_policy(admin, EntityPolicy::default())
    }

    /// Create a manager with a custom entity policy
    pub fn with_policy(admin: Arc<dyn Administration>, policy: EntityPolicy) -> Self {
        Self { admin, policy }
    }

    /// Policy applied to created entities
    pub fn policy(&self) -> &EntityPolicy {
        &self.policy
    }

    /// Create the queue if it does not exist
    pub async fn ensure_queue(&self, name: &str) -> MessagingResult<Provisioned> {
        let name = EntityName::parse(name)?;

        if self.exists(name.as_str()).await? {
            debug!(queue = %name, "Queue already exists");
            return Ok(Provisioned::AlreadyExisted);
        }

        match self
            .admin
            .create_queue(self.policy.queue_properties(name.as_str()))
            .await
        {
            Ok(()) => {
                self.record_created("queue", name.as_str());
                Ok(Provisioned::Created)
            }
            Err(e) if e.is_already_exists() => {
                if self.exists(name.as_str()).await? {
                    debug!(queue = %name, "Queue created concurrently");
                    Ok(Provisioned::AlreadyExisted)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Create the topic if it does not exist
    pub async fn ensure_topic(&self, name: &str) -> MessagingResult<Provisioned> {
        let name = EntityName::parse(name)?;

        if self.is_topic(name.as_str()).await? {
            debug!(topic = %name, "Topic already exists");
            return Ok(Provisioned::AlreadyExisted);
        }

        match self
            .admin
            .create_topic(self.policy.topic_properties(name.as_str()))
            .await
        {
            Ok(()) => {
                self.record_created("topic", name.as_str());
                Ok(Provisioned::Created)
            }
            Err(e) if e.is_already_exists() => {
                if self.is_topic(name.as_str()).await? {
                    debug!(topic = %name, "Topic created concurrently");
                    Ok(Provisioned::AlreadyExisted)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Create the subscription on an existing topic if it does not exist
    pub async fn ensure_subscription(&self, topic: &str, name: &str) -> MessagingResult<Provisioned> {
        let topic = EntityName::parse(topic)?;
        let name = EntityName::parse(name)?;
        let path = subscription_path(topic.as_str(), name.as_str());

        if self.subscription_exists(topic.as_str(), name.as_str()).await? {
            debug!(subscription = %path, "Subscription already exists");
            return Ok(Provisioned::AlreadyExisted);
        }

        match self
            .admin
            .create_subscription(
                self.policy
                    .subscription_properties(topic.as_str(), name.as_str()),
            )
            .await
        {
            Ok(()) => {
                self.record_created("subscription", &path);
                Ok(Provisioned::Created)
            }
            Err(e) if e.is_already_exists() => {
                debug!(subscription = %path, "Subscription created concurrently");
                Ok(Provisioned::AlreadyExisted)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a queue with this name exists
    pub async fn exists(&self, name: &str) -> MessagingResult<bool> {
        not_found_as_false(self.admin.get_queue(name).await)
    }

    /// Whether a topic with this name exists
    pub async fn is_topic(&self, name: &str) -> MessagingResult<bool> {
        not_found_as_false(self.admin.get_topic(name).await)
    }

    /// Whether the topic has a subscription with this name
    pub async fn subscription_exists(&self, topic: &str, name: &str) -> MessagingResult<bool> {
        not_found_as_false(self.admin.get_subscription(topic, name).await)
    }

    fn record_created(&self, kind: &str, name: &str) {
        MESSAGING_METRICS
            .entities_created
            .with_label_values(&[kind])
            .inc();
        info!(
            kind,
            name,
            max_size_mb = self.policy.size_tier.max_size_mb(),
            max_delivery_count = self.policy.max_delivery_count,
            "Entity created"
        );
    }
}

fn not_found_as_false<T>(result: MessagingResult<T>) -> MessagingResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(MessagingError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

impl fmt::Debug for TopologyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyManager")
            .field("policy", &self.policy)
            .finish()
    }
}
