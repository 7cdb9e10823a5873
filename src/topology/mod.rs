//! Broker topology: name validation and idempotent provisioning.
//!
//! Queues, topics and subscriptions share one name grammar
//! (`^[a-z0-9._/-]{1,260}$`, case-insensitive). [`TopologyManager`] creates
//! missing entities under a fixed [`EntityPolicy`]:
//!
//! - message TTL 15 days
//! - duplicate-detection window 15 days
//! - max delivery count 1000
//! - batched operations enabled
//! - max size from a [`SizeTier`]
//!
//! # Example
//!
//! ```no_run
//! use relay_bus::messaging::InMemoryBroker;
//! use relay_bus::topology::TopologyManager;
//! use std::sync::Arc;
//!
//! # async fn example() -> relay_bus::messaging::MessagingResult<()> {
//! let broker = InMemoryBroker::new();
//! let topology = TopologyManager::new(Arc::new(broker));
//!
//! topology.ensure_queue("req.person.get").await?;
//! topology.ensure_topic("person.events").await?;
//! topology.ensure_subscription("person.events", "audit").await?;
//! # Ok(())
//! # }
//! ```

mod manager;
mod name;
mod policy;

pub use manager::{Provisioned, TopologyManager};
pub use name::{validate_entity_name, EntityName, ENTITY_NAME_PATTERN};
pub use policy::{
    EntityPolicy, QueueProperties, SizeTier, SubscriptionProperties, TopicProperties,
    DEFAULT_MAX_DELIVERY_COUNT, FIFTEEN_DAYS,
};
