//! Request-reply correlator service

use super::pending::PendingRequest;
use crate::messaging::{
    handler_fn, Delivery, MessageContext, MessageHandler, MessageHeaders, MessageId,
    MessagingError, MessagingResult, OutboundMessage, SubscribeOptions, Subscription, Transport,
    MESSAGING_METRICS,
};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::topology::validate_entity_name;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dead-letter reason for requests whose body could not be decoded
pub const DECODE_FAILED: &str = "DecodeFailed";

/// Correlator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// Upper bound on waiting for a reply; `None` waits until cancelled
    pub response_timeout: Option<Duration>,

    /// Concurrency of standing subscriptions
    pub max_concurrent_calls: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(Duration::from_secs(60)),
            max_concurrent_calls: 16,
        }
    }
}

/// Send, request/reply and receive/respond on top of a [`Transport`]
#[derive(Clone)]
pub struct RequestReplyCorrelator {
    transport: Arc<dyn Transport>,
    config: CorrelatorConfig,
}

impl RequestReplyCorrelator {
    /// Create a correlator with the default configuration
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, CorrelatorConfig::default())
    }

    /// Create a correlator with a custom configuration
    pub fn with_config(transport: Arc<dyn Transport>, config: CorrelatorConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Fire-and-forget send under the given retry tier.
    ///
    /// At least one send attempt is made; delivery is not guaranteed.
    pub async fn send<T>(
        &self,
        payload: &T,
        queue: &str,
        headers: MessageHeaders,
        tier: impl Into<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> MessagingResult<MessageId>
    where
        T: Serialize + ?Sized,
    {
        validate_entity_name(queue)?;
        let message = OutboundMessage::json(payload, headers)?;
        let transport = &self.transport;

        let result = run_with_retry(
            |attempt| {
                let message = message.clone();
                async move {
                    debug!(queue, attempt, "Sending message");
                    transport.send(queue, message).await
                }
            },
            tier,
            cancel,
        )
        .await;

        match result {
            Ok(message_id) => {
                debug!(queue, message_id = %message_id, "Message sent");
                Ok(message_id)
            }
            Err(e) => {
                let err = MessagingError::from_send_retry(queue, e);
                MESSAGING_METRICS
                    .send_failures
                    .with_label_values(&[queue, err.kind()])
                    .inc();
                error!(queue, error = %err, "Send failed");
                Err(err)
            }
        }
    }

    /// Send `request`, then await the first message delivered to
    /// `response_queue`.
    ///
    /// The response registration is made after the send returns, and the
    /// first delivery resolves the call whatever its correlation ID. Callers
    /// sharing a response queue must scope it themselves or use a
    /// [`ReplyListener`](super::ReplyListener). A reply that cannot be
    /// decoded is dead-lettered and the call resolves with `Decode`.
    pub async fn request_reply<Req, Res>(
        &self,
        request: &Req,
        request_queue: &str,
        response_queue: &str,
        headers: MessageHeaders,
        tier: impl Into<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> MessagingResult<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned + Send + 'static,
    {
        let policy = tier.into();
        validate_entity_name(response_queue)?;

        let request_id = self
            .send(request, request_queue, headers, policy, cancel)
            .await?;

        let (pending, completion) = PendingRequest::<Res>::new(response_queue);
        let handler = handler_fn(move |delivery: Delivery| {
            let completion = completion.clone();
            async move {
                if completion.is_resolved() {
                    delivery.abandon().await?;
                    return Ok(());
                }

                let mut ctx = MessageContext::<Res>::new(delivery);
                let Some(response) = ctx.take_payload() else {
                    let err = decode_failure(&mut ctx);
                    dead_letter_undecodable(ctx, &err).await?;
                    completion.resolve(Err(err));
                    return Ok(());
                };

                if !completion.resolve(Ok(response)) {
                    ctx.into_delivery().abandon().await?;
                }
                Ok(())
            }
        });

        let subscription = self
            .register(response_queue, handler, SubscribeOptions::default(), policy, cancel)
            .await?;
        debug!(request_id = %request_id, response_queue, "Awaiting reply");

        let result = pending.wait(self.config.response_timeout, cancel).await;
        subscription.close().await;
        result
    }

    /// Answer every request on `request_queue` with `transform`'s output,
    /// sent to `response_queue` under `tier`.
    ///
    /// Replies carry the request's correlation ID, or its message ID when
    /// it has none. Transform and reply-send failures are logged and the
    /// request is still completed. Undecodable requests are dead-lettered.
    pub async fn receive_and_reply<Req, Res, F, Fut, E>(
        &self,
        request_queue: &str,
        response_queue: &str,
        transform: F,
        tier: impl Into<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> MessagingResult<Subscription>
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + Sync + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let policy = tier.into();
        validate_entity_name(request_queue)?;
        validate_entity_name(response_queue)?;

        let this = self.clone();
        let transform = Arc::new(transform);
        let reply_queue = response_queue.to_string();
        let reply_cancel = cancel.clone();

        let handler = handler_fn(move |delivery: Delivery| {
            let this = this.clone();
            let transform = transform.clone();
            let reply_queue = reply_queue.clone();
            let cancel = reply_cancel.clone();

            async move {
                let mut ctx = MessageContext::<Req>::new(delivery);
                let Some(request) = ctx.take_payload() else {
                    let err = decode_failure(&mut ctx);
                    dead_letter_undecodable(ctx, &err).await?;
                    return Ok(());
                };

                let correlation_id = ctx.delivery().message().reply_correlation_id();
                let response = match transform(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(
                            message_id = %ctx.message_id(),
                            error = %e,
                            "Request transform failed, no reply sent"
                        );
                        return Ok(());
                    }
                };

                let headers = MessageHeaders::new().with_correlation_id(correlation_id);
                if let Err(e) = this
                    .send(&response, &reply_queue, headers, policy, &cancel)
                    .await
                {
                    error!(
                        message_id = %ctx.message_id(),
                        response_queue = %reply_queue,
                        error = %e,
                        "Reply send failed"
                    );
                }
                Ok(())
            }
        });

        let options = SubscribeOptions::default()
            .with_max_concurrent_calls(self.config.max_concurrent_calls);
        let subscription = self
            .register(request_queue, handler, options, policy, cancel)
            .await?;

        info!(request_queue, response_queue, "Responder started");
        Ok(subscription)
    }

    /// Receive one message from `queue`, apply `transform` and return its
    /// output.
    ///
    /// A failing transform resolves the call with `Processing` and the
    /// message is requeued. An undecodable message is dead-lettered and the
    /// call resolves with `Decode`.
    pub async fn receive_and_transform<T, R, F, Fut, E>(
        &self,
        queue: &str,
        transform: F,
        tier: impl Into<RetryPolicy>,
        cancel: &CancellationToken,
    ) -> MessagingResult<R>
    where
        T: DeserializeOwned + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let policy = tier.into();
        validate_entity_name(queue)?;

        let (pending, completion) = PendingRequest::<R>::new(queue);
        let transform = Arc::new(transform);

        let handler = handler_fn(move |delivery: Delivery| {
            let completion = completion.clone();
            let transform = transform.clone();

            async move {
                if completion.is_resolved() {
                    delivery.abandon().await?;
                    return Ok(());
                }

                let mut ctx = MessageContext::<T>::new(delivery);
                let Some(message) = ctx.take_payload() else {
                    let err = decode_failure(&mut ctx);
                    dead_letter_undecodable(ctx, &err).await?;
                    completion.resolve(Err(err));
                    return Ok(());
                };

                match transform(message).await {
                    Ok(value) => {
                        if !completion.resolve(Ok(value)) {
                            ctx.into_delivery().abandon().await?;
                        }
                        Ok(())
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(message_id = %ctx.message_id(), error = %reason, "Transform failed");
                        completion.resolve(Err(MessagingError::Processing(reason.clone())));
                        Err(MessagingError::Processing(reason))
                    }
                }
            }
        });

        let subscription = self
            .register(queue, handler, SubscribeOptions::default(), policy, cancel)
            .await?;

        let result = pending.wait(self.config.response_timeout, cancel).await;
        subscription.close().await;
        result
    }

    /// Register a subscription, retrying registration failures under `policy`
    pub(crate) async fn register(
        &self,
        entity: &str,
        handler: MessageHandler,
        options: SubscribeOptions,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> MessagingResult<Subscription> {
        let transport = &self.transport;
        run_with_retry(
            |_| {
                let handler = handler.clone();
                async move { transport.subscribe(entity, handler, options).await }
            },
            policy,
            cancel,
        )
        .await
        .map_err(MessagingError::from)
    }
}

fn decode_failure<T>(ctx: &mut MessageContext<T>) -> MessagingError {
    ctx.take_decode_error().unwrap_or_else(|| MessagingError::Decode {
        message_id: ctx.message_id().to_string(),
        reason: "payload already taken".to_string(),
    })
}

/// Move a message whose body could not be decoded to the dead-letter sub-queue
async fn dead_letter_undecodable<T>(
    ctx: MessageContext<T>,
    err: &MessagingError,
) -> MessagingResult<()> {
    let reason = err.to_string();
    ctx.into_delivery().dead_letter(DECODE_FAILED, &reason).await
}

impl fmt::Debug for RequestReplyCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestReplyCorrelator")
            .field("config", &self.config)
            .finish()
    }
}
