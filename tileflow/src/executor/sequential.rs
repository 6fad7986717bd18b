//! Sequential executor: single lane, deterministic.

use super::dispatch::run_task;
use super::handle::{ExecutionHandle, TaskEvent, EVENT_CHANNEL_CAPACITY};
use super::task::{TaskBatch, TaskCompletion};
use super::Executor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Executes tasks one at a time, strictly in submission order.
///
/// There is no parallelism; each task finishes before the next one starts,
/// so completions arrive in submission order and runs are fully
/// deterministic. This backend is the correctness oracle the concurrent
/// backends are tested against.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialExecutor;

impl SequentialExecutor {
    /// Creates a sequential executor.
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SequentialExecutor {
    fn name(&self) -> &str {
        "sequential"
    }

    fn submit(&self, batch: TaskBatch) -> ExecutionHandle {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = ExecutionHandle::new(batch.len(), events_rx, cancel.clone());

        debug!(layer = %batch.layer(), tasks = batch.len(), "sequential submit");

        tokio::spawn(async move {
            for task in batch.tasks() {
                if cancel.is_cancelled() {
                    // Not-yet-started tasks complete as cancelled, exactly once.
                    let completion = TaskCompletion::cancelled(task.id().clone());
                    if events.send(TaskEvent::Completed(completion)).await.is_err() {
                        return;
                    }
                    continue;
                }

                if events
                    .send(TaskEvent::Started(task.id().clone()))
                    .await
                    .is_err()
                {
                    return;
                }
                let completion = run_task(task, &cancel).await;
                if events.send(TaskEvent::Completed(completion)).await.is_err() {
                    return;
                }
            }
        });

        handle
    }
}
