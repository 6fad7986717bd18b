//! Policies controlling error handling and retries.
//!
//! - [`RetryPolicy`]: how a task (or a collaborator IO call inside a task
//!   body) handles transient failures.
//! - [`ErrorPolicy`]: how a job reacts to task failures.

use super::task::TaskErrorKind;
use crate::config::IoRetrySettings;
use std::collections::HashSet;
use std::time::Duration;

/// How a job handles task failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop the job on the first failure: cancel the current layer and do
    /// not issue further layers. The default.
    #[default]
    FailFast,

    /// Proceed through all layers, aggregate failures, and report the job
    /// as failed at the end if at least one task failed.
    Continue,
}

/// Bounded retry over a configurable set of transient error kinds.
///
/// The policy wraps individual operations: either a collaborator IO call
/// made from inside a task body (via
/// [`run_with_retry`](super::retry::run_with_retry)) or the body invocation
/// itself, where re-invocation stays invisible as a status change.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    retry_on: HashSet<TaskErrorKind>,
}

impl RetryPolicy {
    /// No retries: every error propagates on first occurrence.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            retry_on: HashSet::new(),
        }
    }

    /// Creates a policy retrying the default transient kinds
    /// (io, timeout, connection).
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Attempts including the initial one
    /// * `initial_delay` - Delay before the first retry
    /// * `backoff_multiplier` - Factor applied to the delay after each retry
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier,
            retry_on: TaskErrorKind::transient().into_iter().collect(),
        }
    }

    /// Creates a policy from the environment-driven IO retry settings.
    pub fn from_settings(settings: &IoRetrySettings) -> Self {
        Self::new(settings.tries, settings.delay, settings.backoff)
    }

    /// Replaces the set of retryable error kinds.
    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = TaskErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    /// Attempts including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true if the error kind is in the retryable set.
    pub fn is_retryable(&self, kind: TaskErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Delay to wait before retrying after the given attempt.
    ///
    /// # Arguments
    ///
    /// * `attempt` - 1-based number of the attempt that just failed
    ///
    /// # Returns
    ///
    /// The backoff delay, or `None` when the attempt budget is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt < self.max_attempts {
            let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
            Some(self.initial_delay.mul_f64(factor))
        } else {
            None
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
