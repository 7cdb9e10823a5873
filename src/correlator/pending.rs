//! One-shot continuation resolved by an inbound delivery

use crate::messaging::{MessagingError, MessagingResult, MESSAGING_METRICS};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Awaiting side of a pending request.
///
/// Created before the awaited message can arrive and discarded once
/// resolved. Dropping it makes later [`Completion::resolve`] calls fail.
pub struct PendingRequest<T> {
    label: String,
    receiver: oneshot::Receiver<MessagingResult<T>>,
    started: Instant,
}

/// Resolving side of a pending request; cheap to clone, resolves at most once
pub struct Completion<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<MessagingResult<T>>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> PendingRequest<T> {
    /// Create a pending request and its completion handle
    pub fn new(label: impl Into<String>) -> (Self, Completion<T>) {
        let (sender, receiver) = oneshot::channel();
        MESSAGING_METRICS.pending_requests.inc();

        let pending = Self {
            label: label.into(),
            receiver,
            started: Instant::now(),
        };
        let completion = Completion {
            sender: Arc::new(Mutex::new(Some(sender))),
        };
        (pending, completion)
    }

    /// What this request waits on, used in logs and errors
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for resolution, cancellation or the optional timeout.
    ///
    /// A resolution that is already available wins over a cancellation
    /// observed in the same poll.
    pub async fn wait(
        mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> MessagingResult<T> {
        let deadline = async move {
            match timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            biased;

            received = &mut self.receiver => match received {
                Ok(result) => result,
                Err(_) => Err(MessagingError::Closed(format!(
                    "pending request on '{}' was dropped before resolving",
                    self.label
                ))),
            },
            _ = cancel.cancelled() => Err(MessagingError::Cancelled),
            limit = deadline => Err(MessagingError::Timeout(format!(
                "no message on '{}' within {}ms",
                self.label,
                limit.as_millis()
            ))),
        };

        let outcome = match &result {
            Ok(_) => "resolved",
            Err(e) => e.kind(),
        };
        MESSAGING_METRICS
            .request_duration
            .with_label_values(&[outcome])
            .observe(self.started.elapsed().as_secs_f64());
        debug!(entity = %self.label, outcome, "Pending request finished");

        result
    }
}

impl<T> Drop for PendingRequest<T> {
    fn drop(&mut self) {
        MESSAGING_METRICS.pending_requests.dec();
    }
}

impl<T> Completion<T> {
    /// Resolve the request. Returns `false` if it was already resolved or
    /// its awaiting side is gone.
    pub fn resolve(&self, result: MessagingResult<T>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    /// Whether resolving would have no effect
    pub fn is_resolved(&self) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.is_closed(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_once() {
        let (pending, completion) = PendingRequest::<u32>::new("res.person.get");
        let other = completion.clone();

        assert!(!completion.is_resolved());
        assert!(completion.resolve(Ok(7)));
        assert!(!other.resolve(Ok(8)));
        assert!(other.is_resolved());

        let cancel = CancellationToken::new();
        assert_eq!(pending.wait(None, &cancel).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failure_is_delivered() {
        let (pending, completion) = PendingRequest::<u32>::new("q");
        completion.resolve(Err(MessagingError::Processing("boom".into())));

        let err = pending.wait(None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Processing(_)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (pending, completion) = PendingRequest::<u32>::new("q");
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { pending.wait(None, &cancel).await }
        });
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, MessagingError::Cancelled));
        assert!(completion.is_resolved());
        assert!(!completion.resolve(Ok(1)));
    }

    #[tokio::test]
    async fn test_result_wins_over_cancellation() {
        let (pending, completion) = PendingRequest::<u32>::new("q");
        let cancel = CancellationToken::new();
        completion.resolve(Ok(3));
        cancel.cancel();

        assert_eq!(pending.wait(None, &cancel).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (pending, _completion) = PendingRequest::<u32>::new("res.slow");
        let err = pending
            .wait(Some(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            MessagingError::Timeout(message) => assert!(message.contains("res.slow")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_completion_closes() {
        let (pending, completion) = PendingRequest::<u32>::new("q");
        drop(completion);

        let err = pending.wait(None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Closed(_)));
    }
}
