//! Fixed creation policy for provisioned entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Fifteen days, the default TTL and duplicate-detection window
pub const FIFTEEN_DAYS: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// Default maximum delivery count before dead-lettering
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 1000;

/// Maximum entity size tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    #[default]
    Medium,
    Large,
    XLarge,
    XXLarge,
}

impl SizeTier {
    /// Maximum entity size in megabytes
    pub const fn max_size_mb(self) -> u64 {
        match self {
            SizeTier::Small => 1024,
            SizeTier::Medium => 2048,
            SizeTier::Large => 3072,
            SizeTier::XLarge => 4096,
            SizeTier::XXLarge => 5120,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SizeTier::Small => "small",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
            SizeTier::XLarge => "xlarge",
            SizeTier::XXLarge => "xxlarge",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(SizeTier::Small),
            "medium" => Ok(SizeTier::Medium),
            "large" => Ok(SizeTier::Large),
            "xlarge" => Ok(SizeTier::XLarge),
            "xxlarge" => Ok(SizeTier::XXLarge),
            other => Err(format!("unknown size tier '{}'", other)),
        }
    }
}

/// Properties of a queue as seen by the administration surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProperties {
    pub name: String,
    pub default_message_ttl: Duration,
    pub duplicate_detection_window: Duration,
    pub requires_duplicate_detection: bool,
    pub max_delivery_count: u32,
    pub enable_batched_operations: bool,
    pub max_size_mb: u64,
}

/// Properties of a topic as seen by the administration surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicProperties {
    pub name: String,
    pub default_message_ttl: Duration,
    pub duplicate_detection_window: Duration,
    pub requires_duplicate_detection: bool,
    pub enable_batched_operations: bool,
    pub max_size_mb: u64,
}

/// Properties of a topic subscription as seen by the administration surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionProperties {
    pub topic: String,
    pub name: String,
    pub default_message_ttl: Duration,
    pub max_delivery_count: u32,
    pub enable_batched_operations: bool,
}

/// Creation policy applied to every entity the topology manager creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPolicy {
    /// Default time-to-live of messages
    pub message_ttl: Duration,

    /// Window in which duplicate message IDs are dropped
    pub duplicate_detection_window: Duration,

    /// Deliveries before a message is dead-lettered
    pub max_delivery_count: u32,

    /// Allow the broker to batch store operations
    pub enable_batched_operations: bool,

    /// Maximum entity size
    pub size_tier: SizeTier,
}

impl Default for EntityPolicy {
    fn default() -> Self {
        Self {
            message_ttl: FIFTEEN_DAYS,
            duplicate_detection_window: FIFTEEN_DAYS,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            enable_batched_operations: true,
            size_tier: SizeTier::default(),
        }
    }
}

impl EntityPolicy {
    /// Queue properties for `name` under this policy
    pub fn queue_properties(&self, name: &str) -> QueueProperties {
        QueueProperties {
            name: name.to_string(),
            default_message_ttl: self.message_ttl,
            duplicate_detection_window: self.duplicate_detection_window,
            requires_duplicate_detection: true,
            max_delivery_count: self.max_delivery_count,
            enable_batched_operations: self.enable_batched_operations,
            max_size_mb: self.size_tier.max_size_mb(),
        }
    }

    /// Topic properties for `name` under this policy
    pub fn topic_properties(&self, name: &str) -> TopicProperties {
        TopicProperties {
            name: name.to_string(),
            default_message_ttl: self.message_ttl,
            duplicate_detection_window: self.duplicate_detection_window,
            requires_duplicate_detection: true,
            enable_batched_operations: self.enable_batched_operations,
            max_size_mb: self.size_tier.max_size_mb(),
        }
    }

    /// Subscription properties for `topic`/`name` under this policy
    pub fn subscription_properties(&self, topic: &str, name: &str) -> SubscriptionProperties {
        SubscriptionProperties {
            topic: topic.to_string(),
            name: name.to_string(),
            default_message_ttl: self.message_ttl,
            max_delivery_count: self.max_delivery_count,
            enable_batched_operations: self.enable_batched_operations,
        }
    }
}
