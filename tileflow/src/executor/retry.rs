//! Bounded retry around fallible async operations.
//!
//! Wraps collaborator IO calls made from inside a task body, not the
//! task-dispatch mechanism itself. Executors reuse the same schedule to
//! re-invoke task bodies transparently.

use super::policy::RetryPolicy;
use super::task::{TaskError, TaskErrorKind};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The attempt budget ran out; wraps the last underlying error.
    #[error("retry budget exhausted after {attempts} attempt(s) in {elapsed:?}: {source}")]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        source: TaskError,
    },

    /// The error kind is not retryable; propagated on first occurrence.
    #[error(transparent)]
    NotRetryable(TaskError),
}

impl RetryError {
    /// The underlying task error.
    pub fn source_error(&self) -> &TaskError {
        match self {
            Self::Exhausted { source, .. } => source,
            Self::NotRetryable(source) => source,
        }
    }

    /// Number of attempts performed before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::NotRetryable(_) => 1,
        }
    }

    /// Folds the retry failure into a task error for per-task capture.
    pub fn into_task_error(self) -> TaskError {
        match self {
            Self::Exhausted {
                attempts,
                elapsed,
                source,
            } => TaskError::new(
                source.kind(),
                format!(
                    "retry budget exhausted after {} attempt(s) in {:?}: {}",
                    attempts, elapsed, source
                ),
            ),
            Self::NotRetryable(source) => source,
        }
    }
}

/// Runs an operation with bounded retry per the given policy.
///
/// Each failure with a retryable kind waits the policy's backoff delay and
/// retries; any other failure propagates immediately. Operations must be
/// idempotent, a retried write repeats verbatim.
///
/// # Arguments
///
/// * `policy` - Attempt budget, delays and retryable kinds
/// * `op` - Factory producing one attempt's future per invocation
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let started = Instant::now();
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !policy.is_retryable(error.kind()) => {
                return Err(RetryError::NotRetryable(error));
            }
            Err(error) => match policy.delay_for_attempt(attempt) {
                Some(delay) => {
                    debug!(
                        attempt,
                        ?delay,
                        kind = %error.kind(),
                        "retrying after transient failure: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        source: error,
                    });
                }
            },
        }
    }
}

/// Classifies a raw IO error for retry purposes.
///
/// Timeouts and connection-shaped errors keep their own kind so retry sets
/// can distinguish them; everything else is a plain IO failure.
pub fn classify_io_error(error: &std::io::Error) -> TaskErrorKind {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => TaskErrorKind::Timeout,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => TaskErrorKind::Connection,
        _ => TaskErrorKind::Io,
    }
}
