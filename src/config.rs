use crate::correlator::CorrelatorConfig;
use crate::error::{AppError, Result};
use crate::retry::RetryTier;
use crate::topology::{validate_entity_name, EntityPolicy, SizeTier};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "RELAY_BUS_CONFIG";

/// Prefix of environment overrides, e.g. `RELAY_BUS__RETRY__DEFAULT_TIER`
pub const ENV_PREFIX: &str = "RELAY_BUS";

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker connection
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Entity creation policy
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Retry defaults
    #[serde(default)]
    pub retry: RetryConfig,

    /// Request/reply settings
    #[serde(default)]
    pub correlator: CorrelatorSettings,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Declared queues and topics
    #[serde(default)]
    pub topology: TopologyConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, the file named by
    /// `RELAY_BUS_CONFIG` and the environment
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/relay-bus.toml".to_string());
        Self::load_from(Some(Path::new(&config_path)))
    }

    /// Load configuration with an explicit optional file
    pub fn load_from(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));

        // Override with config file if it exists
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder
            // Override with environment variables (prefix: RELAY_BUS__)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.provisioning.max_delivery_count == 0 {
            return Err(AppError::Configuration(
                "provisioning.max_delivery_count must be at least 1".to_string(),
            ));
        }

        if self.correlator.max_concurrent_calls == 0 {
            return Err(AppError::Configuration(
                "correlator.max_concurrent_calls must be at least 1".to_string(),
            ));
        }

        for queue in &self.topology.queues {
            validate_entity_name(queue)
                .map_err(|e| AppError::Configuration(format!("topology.queues: {}", e)))?;
        }

        for topic in &self.topology.topics {
            validate_entity_name(&topic.name)
                .map_err(|e| AppError::Configuration(format!("topology.topics: {}", e)))?;
            for subscription in &topic.subscriptions {
                validate_entity_name(subscription).map_err(|e| {
                    AppError::Configuration(format!("topology.topics.{}: {}", topic.name, e))
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Connection credentials, never logged
    pub connection_string: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            connection_string: None,
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("namespace", &self.namespace)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Default message time-to-live (seconds)
    #[serde(default = "default_fifteen_days")]
    pub message_ttl_secs: u64,

    /// Duplicate-detection window (seconds)
    #[serde(default = "default_fifteen_days")]
    pub duplicate_detection_window_secs: u64,

    /// Deliveries before dead-lettering
    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,

    /// Enable batched store operations
    #[serde(default = "default_true")]
    pub enable_batched_operations: bool,

    /// Maximum entity size tier
    #[serde(default)]
    pub size_tier: SizeTier,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            message_ttl_secs: default_fifteen_days(),
            duplicate_detection_window_secs: default_fifteen_days(),
            max_delivery_count: default_max_delivery_count(),
            enable_batched_operations: true,
            size_tier: SizeTier::default(),
        }
    }
}

impl ProvisioningConfig {
    /// Immutable policy used by the topology manager
    pub fn entity_policy(&self) -> EntityPolicy {
        EntityPolicy {
            message_ttl: Duration::from_secs(self.message_ttl_secs),
            duplicate_detection_window: Duration::from_secs(self.duplicate_detection_window_secs),
            max_delivery_count: self.max_delivery_count,
            enable_batched_operations: self.enable_batched_operations,
            size_tier: self.size_tier,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Tier used when a caller does not pick one
    #[serde(default)]
    pub default_tier: RetryTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorSettings {
    /// Reply timeout (seconds); 0 waits until cancelled
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,

    /// Concurrency of standing subscriptions
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout(),
            max_concurrent_calls: default_max_concurrent_calls(),
        }
    }
}

impl CorrelatorSettings {
    pub fn correlator_config(&self) -> CorrelatorConfig {
        CorrelatorConfig {
            response_timeout: (self.response_timeout_secs > 0)
                .then(|| Duration::from_secs(self.response_timeout_secs)),
            max_concurrent_calls: self.max_concurrent_calls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub queues: Vec<String>,

    #[serde(default)]
    pub topics: Vec<TopicDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDeclaration {
    pub name: String,

    #[serde(default)]
    pub subscriptions: Vec<String>,
}

// Default value functions
fn default_namespace() -> String {
    "relay-bus-local".to_string()
}

fn default_fifteen_days() -> u64 {
    15 * 24 * 60 * 60
}

fn default_max_delivery_count() -> u32 {
    1000
}

fn default_response_timeout() -> u64 {
    60
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_log_filter() -> String {
    "relay_bus=info".to_string()
}

fn default_true() -> bool {
    true
}
