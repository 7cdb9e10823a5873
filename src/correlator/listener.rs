//! Persistent, correlation-filtered reply listener

use super::pending::{Completion, PendingRequest};
use super::service::RequestReplyCorrelator;
use crate::messaging::{
    handler_fn, Delivery, MessageHeaders, MessagingResult, ReceivedMessage, SubscribeOptions,
    Subscription,
};
use crate::retry::RetryPolicy;
use crate::topology::validate_entity_name;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Dead-letter reason for replies no pending request is waiting for
pub const UNMATCHED_CORRELATION: &str = "UnmatchedCorrelation";

type PendingReplies = DashMap<String, Completion<ReceivedMessage>>;

/// Reply listener subscribed to a response queue before any request is sent.
///
/// Each [`request`](ReplyListener::request) registers under a fresh
/// correlation ID, stamps it and `reply_to` on the outgoing message, and is
/// resolved only by a reply carrying the same correlation ID. Replies
/// nobody is waiting for are dead-lettered with [`UNMATCHED_CORRELATION`].
pub struct ReplyListener {
    correlator: RequestReplyCorrelator,
    response_queue: String,
    pending: Arc<PendingReplies>,
    subscription: Subscription,
}

/// Removes a registration however the request ends
struct Registration<'a> {
    pending: &'a PendingReplies,
    correlation_id: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.correlation_id);
    }
}

impl ReplyListener {
    /// Subscribe to `response_queue`, retrying registration under `tier`
    pub async fn start(
        correlator: RequestReplyCorrelator,
        response_queue: &str,
        tier: impl Into<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> MessagingResult<Self> {
        validate_entity_name(response_queue)?;

        let pending: Arc<PendingReplies> = Arc::new(DashMap::new());
        let routes = pending.clone();

        let handler = handler_fn(move |delivery: Delivery| {
            let routes = routes.clone();
            async move {
                let message = delivery.message();
                let completion = message
                    .headers
                    .correlation_id
                    .as_deref()
                    .and_then(|id| routes.remove(id))
                    .map(|(_, completion)| completion);

                match completion {
                    Some(completion) => {
                        if !completion.resolve(Ok(message.clone())) {
                            debug!(message_id = %message.message_id, "Reply arrived after its request ended");
                        }
                        Ok(())
                    }
                    None => {
                        warn!(
                            message_id = %message.message_id,
                            correlation_id = ?message.headers.correlation_id,
                            "Reply has no pending request"
                        );
                        let description = format!(
                            "no pending request for correlation id {:?}",
                            message.headers.correlation_id
                        );
                        delivery
                            .dead_letter(UNMATCHED_CORRELATION, &description)
                            .await
                    }
                }
            }
        });

        let options = SubscribeOptions::default()
            .with_max_concurrent_calls(correlator.config().max_concurrent_calls);
        let subscription = correlator
            .register(response_queue, handler, options, tier.into(), cancel)
            .await?;

        info!(response_queue, "Reply listener started");

        Ok(Self {
            correlator,
            response_queue: response_queue.to_string(),
            pending,
            subscription,
        })
    }

    /// Queue replies are expected on
    pub fn response_queue(&self) -> &str {
        &self.response_queue
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send `request` and await the reply correlated with it.
    ///
    /// The caller's `correlation_id` and `reply_to` headers are replaced.
    pub async fn request<Req, Res>(
        &self,
        request: &Req,
        request_queue: &str,
        headers: MessageHeaders,
        tier: impl Into<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> MessagingResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let (pending, completion) = PendingRequest::<ReceivedMessage>::new(&self.response_queue);

        self.pending.insert(correlation_id.clone(), completion);
        let _registration = Registration {
            pending: &self.pending,
            correlation_id: &correlation_id,
        };

        let headers = headers
            .with_correlation_id(correlation_id.as_str())
            .with_reply_to(self.response_queue.as_str());
        self.correlator
            .send(request, request_queue, headers, tier, cancel)
            .await?;

        let reply = pending
            .wait(self.correlator.config().response_timeout, cancel)
            .await?;
        reply.decode()
    }

    /// Stop listening and drop every registration still outstanding
    pub async fn close(self) {
        self.pending.clear();
        self.subscription.close().await;
        info!(response_queue = %self.response_queue, "Reply listener stopped");
    }
}

impl fmt::Debug for ReplyListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyListener")
            .field("response_queue", &self.response_queue)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Administration, InMemoryBroker, OutboundMessage, Transport};
    use crate::retry::RetryTier;
    use crate::topology::EntityPolicy;
    use std::time::Duration;

    async fn setup() -> (InMemoryBroker, RequestReplyCorrelator) {
        let broker = InMemoryBroker::new();
        for queue in ["req", "res"] {
            broker
                .create_queue(EntityPolicy::default().queue_properties(queue))
                .await
                .unwrap();
        }
        let correlator = RequestReplyCorrelator::new(Arc::new(broker.clone()));
        (broker, correlator)
    }

    #[tokio::test]
    async fn test_unmatched_reply_is_dead_lettered() {
        let (broker, correlator) = setup().await;
        let listener = ReplyListener::start(correlator, "res", RetryTier::None, &CancellationToken::new())
            .await
            .unwrap();

        broker
            .send(
                "res",
                OutboundMessage::json(
                    &serde_json::json!({"stray": true}),
                    MessageHeaders::new().with_correlation_id("nobody"),
                )
                .unwrap(),
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if !broker.dead_letter_messages("res").unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let dead = broker.dead_letter_messages("res").unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].dead_letter_reason.as_deref(), Some(UNMATCHED_CORRELATION));
        assert_eq!(listener.pending_count(), 0);
        listener.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_request_is_unregistered() {
        let (broker, correlator) = setup().await;
        let listener = ReplyListener::start(correlator, "res", RetryTier::None, &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let body = serde_json::json!({"id": "p1"});
        let request = listener.request::<_, serde_json::Value>(
            &body,
            "req",
            MessageHeaders::new(),
            RetryTier::None,
            &cancel,
        );
        let canceller = async {
            for _ in 0..200 {
                if broker.active_message_count("req").unwrap() == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert_eq!(listener.pending_count(), 1);
            cancel.cancel();
        };

        let (result, ()) = tokio::join!(request, canceller);
        assert!(matches!(
            result,
            Err(crate::messaging::MessagingError::Cancelled)
        ));
        assert_eq!(listener.pending_count(), 0);
        listener.close().await;
    }
}
