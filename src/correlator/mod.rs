//! Request/reply on top of a push/pull broker
//!
//! [`RequestReplyCorrelator`] composes the transport, the retry engine and
//! the processing context:
//!
//! - `send`: fire-and-forget under a retry tier
//! - `request_reply`: send, then await the first message on a response queue
//! - `receive_and_reply`: standing responder sending each transform result
//!   to a response queue
//! - `receive_and_transform`: receive one message and return its transform
//!
//! Every awaited result is a [`PendingRequest`] resolved exactly once by a
//! reply, a failure, cancellation or the response timeout. Cancelling does
//! not retract a request that was already sent.
//!
//! `request_reply` registers on the response queue only after the send
//! returns and does not filter by correlation ID. Concurrent callers sharing
//! a response queue can receive each other's replies. [`ReplyListener`]
//! subscribes before sending and matches replies by correlation ID.
//!
//! # Example
//!
//! ```no_run
//! use relay_bus::correlator::RequestReplyCorrelator;
//! use relay_bus::messaging::{InMemoryBroker, MessageHeaders};
//! use relay_bus::retry::RetryTier;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> relay_bus::messaging::MessagingResult<()> {
//! let correlator = RequestReplyCorrelator::new(Arc::new(InMemoryBroker::new()));
//! let cancel = CancellationToken::new();
//!
//! let person: Value = correlator
//!     .request_reply(
//!         &json!({"id": "p1"}),
//!         "req.person.get",
//!         "res.person.get",
//!         MessageHeaders::new(),
//!         RetryTier::Low,
//!         &cancel,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod listener;
mod pending;
mod service;

pub use listener::{ReplyListener, UNMATCHED_CORRELATION};
pub use pending::{Completion, PendingRequest};
pub use service::{CorrelatorConfig, RequestReplyCorrelator, DECODE_FAILED};
