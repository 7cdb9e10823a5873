//! Executes an async operation under a retry policy.

use super::{RetryError, RetryPolicy};
use crate::messaging::MESSAGING_METRICS;
use std::fmt::Display;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `operation` until it succeeds or the policy's attempts are exhausted.
///
/// The operation receives the 1-based attempt number. It is always invoked at
/// least once; an attempt that has started is never interrupted. Between two
/// attempts the fixed policy delay is awaited, and a cancellation observed
/// there (or already requested) stops the loop with [`RetryError::Cancelled`].
pub async fn run_with_retry<T, E, F, Fut>(
    mut operation: F,
    policy: impl Into<RetryPolicy>,
    cancel: &CancellationToken,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let policy = policy.into();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        policy = policy.label(),
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if attempt >= policy.max_attempts() {
            warn!(
                policy = policy.label(),
                attempts = attempt,
                error = %err,
                "Retry attempts exhausted"
            );
            return Err(RetryError::OperationFailed {
                attempts: attempt,
                last: err,
            });
        }

        if cancel.is_cancelled() {
            debug!(policy = policy.label(), attempt, "Retry cancelled");
            return Err(RetryError::Cancelled {
                attempts: attempt,
                last: Some(err),
            });
        }

        debug!(
            policy = policy.label(),
            attempt,
            delay_ms = policy.delay().as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );
        MESSAGING_METRICS
            .retry_attempts
            .with_label_values(&[policy.label()])
            .inc();

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(policy = policy.label(), attempt, "Retry cancelled during delay");
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last: Some(err),
                });
            }
            _ = tokio::time::sleep(policy.delay()) => {}
        }
    }
}
