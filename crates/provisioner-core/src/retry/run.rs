//! Retry loop: run an async closure until success, exhaustion, or cancellation.

use std::fmt;
use std::future::Future;

use super::policy::RetryPolicy;
use crate::cancel::CancelToken;

/// Error returned when a retried operation is exhausted or cancelled.
#[derive(Debug)]
pub enum RetryOutcome<E> {
    /// The operation never succeeded within `max_attempts`.
    Exhausted { attempts: u32, source: E },
    /// `cancel` fired while waiting between attempts.
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryOutcome<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOutcome::Exhausted { attempts, source } => {
                write!(f, "failed after {attempts} attempts: {source}")
            }
            RetryOutcome::Cancelled => write!(f, "retry cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryOutcome<E> {}

/// Runs `op` until it succeeds, the policy says to stop, or `cancel` fires.
///
/// `is_retryable` classifies each error; a non-retryable error (or the final
/// attempt) short-circuits immediately without sleeping, matching
/// `spec.md` §4.1's "Exits when attempts reach N" / non-transient-error
/// contract from §7.
pub async fn run_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryOutcome<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryOutcome::Cancelled);
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retryable = is_retryable(&e) && attempt < policy.max_attempts();
                if !retryable {
                    return Err(RetryOutcome::Exhausted { attempts: attempt, source: e });
                }
                let delay = policy.delay_before_attempt(attempt + 1);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(RetryOutcome::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}
