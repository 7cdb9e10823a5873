//! Tiered retry engine used for every send.
//!
//! A [`RetryTier`] names an entry in a fixed catalog of (attempts, delay)
//! pairs. [`run_with_retry`] executes an async operation under such a
//! policy with a fixed delay between attempts:
//!
//! | Tier        | Attempts | Delay |
//! |-------------|----------|-------|
//! | `None`      | 1        | 0s    |
//! | `Low`       | 2        | 1s    |
//! | `Medium`    | 3        | 2s    |
//! | `High`      | 5        | 5s    |
//! | `VeryHigh`  | 7        | 10s   |
//! | `Extreme`   | 10       | 15s   |
//!
//! Total wall-clock time is bounded by
//! `(attempts - 1) * delay + attempts * operation_time`.
//!
//! # Example
//!
//! ```no_run
//! use relay_bus::retry::{run_with_retry, RetryTier};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let cancel = CancellationToken::new();
//! let result = run_with_retry(
//!     |attempt| async move {
//!         if attempt < 2 { Err("not yet") } else { Ok(attempt) }
//!     },
//!     RetryTier::Low,
//!     &cancel,
//! )
//! .await;
//! assert_eq!(result.unwrap(), 2);
//! # }
//! ```

mod engine;
mod tier;

pub use engine::run_with_retry;
pub use tier::{InvalidRetryPolicy, RetryPolicy, RetryTier};

use thiserror::Error;

/// Failure of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last cause
    #[error("Operation failed after {attempts} attempt(s): {last}")]
    OperationFailed {
        attempts: u32,
        #[source]
        last: E,
    },

    /// Cancellation was observed between attempts
    #[error("Operation cancelled after {attempts} attempt(s)")]
    Cancelled {
        attempts: u32,
        #[source]
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::OperationFailed { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The most recent failure, if one was recorded
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::OperationFailed { last, .. } => Some(last),
            RetryError::Cancelled { last, .. } => last.as_ref(),
        }
    }
}
