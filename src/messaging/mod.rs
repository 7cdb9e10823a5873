//! Broker-facing messaging layer
//!
//! This module defines the boundary between the request/reply layer and a
//! push/pull message broker, plus an in-process broker implementing it.
//!
//! # Features
//!
//! - **Transport**: send to a queue or topic, subscribe a handler to a queue
//!   or subscription path
//! - **Administration**: existence checks and creation of queues, topics and
//!   subscriptions
//! - **Peek-lock delivery**: every delivery is completed, abandoned or
//!   dead-lettered through its [`Delivery`] handle
//! - **Processing context**: typed decode of a delivery with explicit
//!   acknowledge / requeue / dead-letter
//! - **Metrics Integration**: Prometheus metrics for sends, deliveries and
//!   settlements
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │         Request-Reply Correlator                 │
//! ├─────────────────────────────────────────────────┤
//! │  - send()            - request_reply()           │
//! │  - receive_and_reply()  - receive_and_transform()│
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │      Transport / Administration traits           │
//! ├─────────────────────────────────────────────────┤
//! │  - send / subscribe   - get_* / create_*         │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │  InMemoryBroker                                  │
//! ├─────────────────────────────────────────────────┤
//! │ - peek-lock, delivery count, dead-letter         │
//! │ - TTL, scheduled enqueue, topic fan-out          │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use relay_bus::messaging::{
//!     handler_fn, Administration, Delivery, InMemoryBroker, MessageHeaders, OutboundMessage,
//!     SubscribeOptions, Transport,
//! };
//! use relay_bus::topology::EntityPolicy;
//!
//! # async fn example() -> relay_bus::messaging::MessagingResult<()> {
//! let broker = InMemoryBroker::new();
//! broker
//!     .create_queue(EntityPolicy::default().queue_properties("orders"))
//!     .await?;
//!
//! let _subscription = broker
//!     .subscribe(
//!         "orders",
//!         handler_fn(|delivery: Delivery| async move {
//!             println!("received {}", delivery.message_id());
//!             Ok(())
//!         }),
//!         SubscribeOptions::default(),
//!     )
//!     .await?;
//!
//! let message = OutboundMessage::json(&serde_json::json!({"id": 1}), MessageHeaders::new())?;
//! broker.send("orders", message).await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod delivery;
mod envelope;
mod error;
mod memory;
mod metrics;
mod traits;

pub use context::MessageContext;
pub use delivery::{Delivery, LockToken, ProcessingOutcome, Settlement};
pub use envelope::{MessageHeaders, MessageId, OutboundMessage, ReceivedMessage, JSON_CONTENT_TYPE};
pub use error::{BoxError, MessagingError, MessagingResult};
pub use memory::{InMemoryBroker, MAX_DELIVERY_COUNT_EXCEEDED};
pub use metrics::{init_messaging_metrics, MessagingMetrics, MESSAGING_METRICS};
pub use traits::{
    handler_fn, subscription_path, Administration, MessageHandler, SubscribeOptions, Subscription,
    Transport,
};
