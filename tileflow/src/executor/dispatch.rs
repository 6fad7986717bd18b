//! Shared task dispatch path for the local executor backends.

use super::retry::run_with_retry;
use super::task::{Task, TaskCompletion, TaskContext, TaskError, TaskFailure, TaskFuture, TaskOutcome};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs one task to a terminal completion.
///
/// The task's retry policy is applied around body invocations; retries stay
/// invisible except for the attempt count in the completion. A cancellation
/// observed before the first attempt yields a cancelled completion without
/// running the body; a body failing while cancellation is pending is
/// reported as cancelled rather than failed.
pub(crate) async fn run_task(task: &Task, cancel: &CancellationToken) -> TaskCompletion {
    if cancel.is_cancelled() {
        return TaskCompletion::cancelled(task.id().clone());
    }

    let started = Instant::now();
    let ctx = TaskContext::new(task.id().clone(), cancel.child_token());
    let mut attempts = 0u32;

    let result = run_with_retry(task.retry(), || {
        attempts += 1;
        let attempt: TaskFuture<'_> = if ctx.is_cancelled() {
            // Refuse further attempts once cancellation is requested.
            Box::pin(async { Err(TaskError::process("cancellation requested")) })
        } else {
            task.body().run(&ctx)
        };
        attempt
    })
    .await;

    let outcome = match result {
        Ok(value) => TaskOutcome::Done(value),
        Err(_) if ctx.is_cancelled() => TaskOutcome::Cancelled,
        Err(retry_error) => {
            let error = retry_error.into_task_error();
            debug!(task = %task.id(), "task failed: {}", error);
            TaskOutcome::Failed(TaskFailure::capture(task.id().clone(), &error))
        }
    };

    TaskCompletion {
        task_id: task.id().clone(),
        outcome,
        attempts,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::policy::RetryPolicy;
    use crate::executor::task::{TaskValue, TaskStatus};
    use crate::pyramid::Tile;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_successful_task_reports_one_attempt() {
        let task = Task::tile(Tile::new(2, 0, 0), |_| async { Ok(TaskValue::Empty) });
        let completion = run_task(&task, &CancellationToken::new()).await;

        assert!(completion.outcome.is_done());
        assert_eq!(completion.attempts, 1);
    }

    #[tokio::test]
    async fn test_failure_is_captured_not_propagated() {
        let task = Task::tile(Tile::new(2, 0, 0), |_| async {
            Err(TaskError::process("kaput"))
        });
        let completion = run_task(&task, &CancellationToken::new()).await;

        match completion.outcome {
            TaskOutcome::Failed(failure) => {
                assert_eq!(failure.task_id, task.id().clone());
                assert!(failure.message.contains("kaput"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_policy_applied_around_body() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_body = calls.clone();
        let task = Task::tile(Tile::new(2, 0, 0), move |_| {
            let calls = calls_body.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TaskError::io("transient"))
                } else {
                    Ok(TaskValue::Empty)
                }
            }
        })
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1), 1.0));

        let completion = run_task(&task, &CancellationToken::new()).await;
        assert!(completion.outcome.is_done());
        assert_eq!(completion.attempts, 3);
        assert_eq!(completion.outcome.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_pre_cancelled_task_never_runs() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_body = calls.clone();
        let task = Task::tile(Tile::new(2, 0, 0), move |_| {
            let calls = calls_body.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(TaskValue::Empty)
            }
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let completion = run_task(&task, &cancel).await;

        assert!(completion.outcome.is_cancelled());
        assert_eq!(completion.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_body_failing_under_cancellation_is_cancelled() {
        let cancel = CancellationToken::new();
        let cancel_body = cancel.clone();
        let task = Task::tile(Tile::new(2, 0, 0), move |_| {
            let cancel = cancel_body.clone();
            async move {
                cancel.cancel();
                Err(TaskError::io("interrupted"))
            }
        });

        let completion = run_task(&task, &cancel).await;
        assert!(completion.outcome.is_cancelled());
    }
}
