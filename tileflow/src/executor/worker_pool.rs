//! Worker pool executor: bounded local parallelism.

use super::dispatch::run_task;
use super::handle::{ExecutionHandle, TaskEvent, EVENT_CHANNEL_CAPACITY};
use super::task::{
    Task, TaskBatch, TaskCompletion, TaskErrorKind, TaskFailure, TaskId, TaskOutcome,
};
use super::Executor;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration of the worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Maximum number of tasks in flight at once. The remainder queues.
    pub workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Executes tasks across a bounded number of local workers.
///
/// At most `workers` tasks run concurrently on the tokio runtime; the rest
/// of the batch waits in a queue, capping memory and load. Task bodies
/// cross worker boundaries, so they must be self-contained
/// (`Send + Sync + 'static`, no shared mutable state).
#[derive(Clone, Debug)]
pub struct WorkerPoolExecutor {
    config: WorkerPoolConfig,
}

impl WorkerPoolExecutor {
    /// Creates a pool with the default worker count.
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    /// Creates a pool with an explicit configuration.
    pub fn with_config(config: WorkerPoolConfig) -> Self {
        Self {
            config: WorkerPoolConfig {
                workers: config.workers.max(1),
            },
        }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.config.workers
    }
}

impl Default for WorkerPoolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for WorkerPoolExecutor {
    fn name(&self) -> &str {
        "worker-pool"
    }

    fn submit(&self, batch: TaskBatch) -> ExecutionHandle {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = ExecutionHandle::new(batch.len(), events_rx, cancel.clone());
        let workers = self.config.workers;

        debug!(
            layer = %batch.layer(),
            tasks = batch.len(),
            workers,
            "worker pool submit"
        );

        tokio::spawn(dispatch(batch, events, cancel, workers));
        handle
    }
}

/// Dispatcher loop: keeps up to `workers` tasks in flight, refilling from
/// the queue as completions come in.
async fn dispatch(
    batch: TaskBatch,
    events: mpsc::Sender<TaskEvent>,
    cancel: CancellationToken,
    workers: usize,
) {
    let mut pending: VecDeque<Arc<Task>> = batch.tasks().to_vec().into();
    let mut in_flight: JoinSet<TaskCompletion> = JoinSet::new();
    // Maps tokio task ids to task ids so a panicking body can still be
    // accounted for with exactly one completion.
    let mut running: HashMap<tokio::task::Id, TaskId> = HashMap::new();

    loop {
        // Top up the pool.
        while !cancel.is_cancelled() && in_flight.len() < workers {
            let Some(task) = pending.pop_front() else {
                break;
            };
            if events
                .send(TaskEvent::Started(task.id().clone()))
                .await
                .is_err()
            {
                return;
            }
            let worker_cancel = cancel.clone();
            let task_id = task.id().clone();
            let abort = in_flight.spawn(async move { run_task(&task, &worker_cancel).await });
            // The completion carries its own task id; the map only serves
            // the panic path.
            running.insert(abort.id(), task_id);
        }

        // Flush queued tasks as cancelled once the signal is observed.
        if cancel.is_cancelled() {
            while let Some(task) = pending.pop_front() {
                let completion = TaskCompletion::cancelled(task.id().clone());
                if events.send(TaskEvent::Completed(completion)).await.is_err() {
                    return;
                }
            }
        }

        match in_flight.join_next_with_id().await {
            Some(Ok((id, completion))) => {
                running.remove(&id);
                if events.send(TaskEvent::Completed(completion)).await.is_err() {
                    return;
                }
            }
            Some(Err(join_error)) => {
                // A panicking body still yields exactly one failed completion.
                let task_id = running
                    .remove(&join_error.id())
                    .unwrap_or_else(|| TaskId::new("unknown"));
                warn!(task = %task_id, "task body panicked: {}", join_error);
                let completion = TaskCompletion {
                    task_id: task_id.clone(),
                    outcome: TaskOutcome::Failed(TaskFailure {
                        task_id,
                        kind: TaskErrorKind::Process,
                        message: format!("task body panicked: {}", join_error),
                    }),
                    attempts: 1,
                    elapsed: Duration::ZERO,
                };
                if events.send(TaskEvent::Completed(completion)).await.is_err() {
                    return;
                }
            }
            None => {
                if pending.is_empty() {
                    return;
                }
            }
        }
    }
}
