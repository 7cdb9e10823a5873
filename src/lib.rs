//! Typed request/reply messaging over push/pull message brokers.
//!
//! - [`topology`]: queue/topic/subscription name validation and idempotent
//!   provisioning
//! - [`retry`]: fixed retry tiers applied to every send
//! - [`messaging`]: transport and administration traits, the processing
//!   context and an in-process broker
//! - [`correlator`]: send, request/reply, receive/reply and
//!   receive/transform on top of a transport
//!
//! Payloads are JSON inside the broker's native body; headers ride
//! alongside as a flat map.

pub mod config;
pub mod correlator;
pub mod error;
pub mod messaging;
pub mod observability;
pub mod retry;
pub mod topology;

pub use config::Config;
pub use correlator::{ReplyListener, RequestReplyCorrelator};
pub use error::{AppError, Result};
pub use messaging::{InMemoryBroker, MessagingError, MessagingResult};
pub use retry::RetryTier;
pub use topology::TopologyManager;
