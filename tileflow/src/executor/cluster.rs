//! Cluster executor: delegates to a remote distributed scheduler.
//!
//! The scheduler itself is an external collaborator behind the
//! [`RemoteScheduler`] trait; this backend only manages chunked submission,
//! bounded in-flight counts, result retrieval with timeouts and bounded
//! retrieval retries, and the mapping of scheduler-reported cancellation
//! onto the local cancelled outcome.

use super::handle::{ExecutionHandle, TaskEvent, EVENT_CHANNEL_CAPACITY};
use super::task::{
    Task, TaskBatch, TaskCompletion, TaskErrorKind, TaskFailure, TaskId, TaskOutcome, TaskValue,
};
use super::Executor;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of tasks handed to the scheduler per submission call.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default cap on tasks submitted to the scheduler but not yet retrieved.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 500;

/// Default number of retrieval attempts per task.
pub const DEFAULT_RETRIEVE_RETRIES: u32 = 3;

// =============================================================================
// Remote scheduler collaborator
// =============================================================================

/// Opaque ticket identifying one task on the remote scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemoteTicket(pub u64);

impl fmt::Display for RemoteTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket-{}", self.0)
    }
}

/// Result the scheduler reports for one remote task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The task produced a value.
    Done(TaskValue),
    /// The task failed remotely.
    Failed {
        kind: TaskErrorKind,
        message: String,
    },
    /// The scheduler cancelled or lost the task. Mapped onto the same
    /// cancelled outcome used locally.
    Cancelled,
}

/// Error talking to the remote scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Transient connectivity problem; retrieval may be retried.
    #[error("scheduler connection error: {0}")]
    Connection(String),

    /// Permanent scheduler-side failure.
    #[error("scheduler error: {0}")]
    Fatal(String),
}

impl SchedulerError {
    /// Returns true for errors worth retrying the retrieval for.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Client interface of a remote distributed scheduler.
///
/// Consumed, not implemented, by the core. Submitted tasks must be
/// self-contained; the scheduler executes their bodies elsewhere and the
/// backend only ever retrieves outcomes by ticket.
pub trait RemoteScheduler: Send + Sync + 'static {
    /// Hands a chunk of tasks to the scheduler.
    ///
    /// # Returns
    ///
    /// One ticket per task, in the order the tasks were given.
    fn submit(&self, tasks: Vec<Arc<Task>>) -> BoxFuture<'static, Result<Vec<RemoteTicket>, SchedulerError>>;

    /// Retrieves the outcome of one remote task, waiting for it to finish.
    fn retrieve(&self, ticket: RemoteTicket) -> BoxFuture<'static, Result<RemoteOutcome, SchedulerError>>;

    /// Requests cancellation of one remote task. Best effort.
    fn cancel(&self, ticket: RemoteTicket) -> BoxFuture<'static, ()>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Cluster backend configuration.
///
/// There is deliberately no `Default`: the retrieval timeout depends on the
/// deployment and must be chosen explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Tasks handed to the scheduler per submission call.
    pub chunk_size: usize,
    /// Cap on submitted-but-unretrieved tasks.
    pub max_in_flight: usize,
    /// Timeout applied to each result retrieval.
    pub retrieve_timeout: Duration,
    /// Retrieval attempts per task before the task is failed.
    pub retrieve_retries: u32,
}

impl ClusterConfig {
    /// Creates a configuration with the given retrieval timeout.
    pub fn new(retrieve_timeout: Duration) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retrieve_timeout,
            retrieve_retries: DEFAULT_RETRIEVE_RETRIES,
        }
    }

    /// Overrides the submission chunk size.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Overrides the in-flight cap.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Overrides the retrieval retry budget.
    pub fn retrieve_retries(mut self, retries: u32) -> Self {
        self.retrieve_retries = retries.max(1);
        self
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Executes batches on a remote distributed scheduler.
pub struct ClusterExecutor {
    scheduler: Arc<dyn RemoteScheduler>,
    config: ClusterConfig,
}

impl ClusterExecutor {
    /// Creates a cluster executor over a scheduler client.
    pub fn new(scheduler: Arc<dyn RemoteScheduler>, config: ClusterConfig) -> Self {
        Self { scheduler, config }
    }
}

impl Executor for ClusterExecutor {
    fn name(&self) -> &str {
        "cluster"
    }

    fn submit(&self, batch: TaskBatch) -> ExecutionHandle {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let handle = ExecutionHandle::new(batch.len(), events_rx, cancel.clone());

        debug!(
            layer = %batch.layer(),
            tasks = batch.len(),
            chunk_size = self.config.chunk_size,
            max_in_flight = self.config.max_in_flight,
            "cluster submit"
        );

        tokio::spawn(dispatch(
            batch,
            self.scheduler.clone(),
            self.config,
            events,
            cancel,
        ));
        handle
    }
}

/// Dispatcher: submits chunks, retrieves outcomes as they complete.
async fn dispatch(
    batch: TaskBatch,
    scheduler: Arc<dyn RemoteScheduler>,
    config: ClusterConfig,
    events: mpsc::Sender<TaskEvent>,
    cancel: CancellationToken,
) {
    let mut pending: VecDeque<Arc<Task>> = batch.tasks().to_vec().into();
    let mut retrievals: FuturesUnordered<BoxFuture<'static, (TaskId, RemoteTicket, TaskOutcome)>> =
        FuturesUnordered::new();
    let mut outstanding: Vec<RemoteTicket> = Vec::new();
    let mut cancel_requested = false;

    loop {
        if cancel.is_cancelled() && !cancel_requested {
            cancel_requested = true;
            // Queued tasks never reach the scheduler.
            while let Some(task) = pending.pop_front() {
                let completion = TaskCompletion::cancelled(task.id().clone());
                if events.send(TaskEvent::Completed(completion)).await.is_err() {
                    return;
                }
            }
            // Best-effort remote cancellation of everything in flight.
            for ticket in outstanding.iter().copied() {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.cancel(ticket).await });
            }
        }

        // Submit the next chunk while there is room in flight.
        if !cancel_requested && !pending.is_empty() && retrievals.len() < config.max_in_flight {
            let room = config.max_in_flight - retrievals.len();
            let take = room.min(config.chunk_size).min(pending.len());
            let chunk: Vec<Arc<Task>> = pending.drain(..take).collect();
            debug!(chunk = chunk.len(), "submitting chunk to scheduler");

            match scheduler.submit(chunk.clone()).await {
                Ok(tickets) => {
                    for (task, ticket) in chunk.iter().zip(tickets) {
                        if events
                            .send(TaskEvent::Started(task.id().clone()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                        outstanding.push(ticket);
                        retrievals.push(Box::pin(retrieve_outcome(
                            scheduler.clone(),
                            task.id().clone(),
                            ticket,
                            config,
                        )));
                    }
                }
                Err(error) => {
                    // Submission failure fails this chunk only.
                    warn!("chunk submission failed: {}", error);
                    for task in chunk {
                        let completion = TaskCompletion {
                            task_id: task.id().clone(),
                            outcome: TaskOutcome::Failed(TaskFailure {
                                task_id: task.id().clone(),
                                kind: TaskErrorKind::Connection,
                                message: format!("chunk submission failed: {}", error),
                            }),
                            attempts: 0,
                            elapsed: Duration::ZERO,
                        };
                        if events.send(TaskEvent::Completed(completion)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            continue;
        }

        if retrievals.is_empty() {
            if pending.is_empty() {
                return;
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancel_requested => {}
            next = retrievals.next() => {
                if let Some((task_id, ticket, outcome)) = next {
                    outstanding.retain(|t| *t != ticket);
                    let completion = TaskCompletion {
                        task_id: task_id.clone(),
                        outcome,
                        attempts: 1,
                        elapsed: Duration::ZERO,
                    };
                    if events.send(TaskEvent::Completed(completion)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Retrieves one outcome with timeout and bounded retries.
///
/// Only the retrieval is retried, never the remote task itself; exhausting
/// the budget fails this task alone.
async fn retrieve_outcome(
    scheduler: Arc<dyn RemoteScheduler>,
    task_id: TaskId,
    ticket: RemoteTicket,
    config: ClusterConfig,
) -> (TaskId, RemoteTicket, TaskOutcome) {
    let mut attempt = 1u32;
    loop {
        match tokio::time::timeout(config.retrieve_timeout, scheduler.retrieve(ticket)).await {
            Ok(Ok(RemoteOutcome::Done(value))) => {
                return (task_id, ticket, TaskOutcome::Done(value));
            }
            Ok(Ok(RemoteOutcome::Failed { kind, message })) => {
                let failure = TaskFailure {
                    task_id: task_id.clone(),
                    kind,
                    message,
                };
                return (task_id, ticket, TaskOutcome::Failed(failure));
            }
            Ok(Ok(RemoteOutcome::Cancelled)) => {
                return (task_id, ticket, TaskOutcome::Cancelled);
            }
            Ok(Err(error)) if error.is_transient() && attempt < config.retrieve_retries => {
                warn!(task = %task_id, attempt, "transient retrieval failure: {}", error);
                attempt += 1;
            }
            Ok(Err(error)) => {
                let kind = if error.is_transient() {
                    TaskErrorKind::Connection
                } else {
                    TaskErrorKind::Process
                };
                let failure = TaskFailure {
                    task_id: task_id.clone(),
                    kind,
                    message: format!("result retrieval failed after {} attempt(s): {}", attempt, error),
                };
                return (task_id, ticket, TaskOutcome::Failed(failure));
            }
            Err(_elapsed) if attempt < config.retrieve_retries => {
                warn!(task = %task_id, attempt, "result retrieval timed out, retrying");
                attempt += 1;
            }
            Err(_elapsed) => {
                let failure = TaskFailure {
                    task_id: task_id.clone(),
                    kind: TaskErrorKind::Timeout,
                    message: format!(
                        "result retrieval timed out after {} attempt(s) of {:?}",
                        attempt, config.retrieve_timeout
                    ),
                };
                return (task_id, ticket, TaskOutcome::Failed(failure));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::task::{TaskContext, TaskError, TaskValue};
    use crate::executor::BatchLayer;
    use crate::pyramid::Tile;
    use dashmap::{DashMap, DashSet};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    /// In-process scheduler fake: "runs" a task's body at retrieval time.
    ///
    /// Bodies are idempotent in these tests, so retrying a retrieval after
    /// an injected transient failure simply re-runs them.
    struct FakeScheduler {
        next_ticket: AtomicU64,
        tasks: DashMap<u64, Arc<Task>>,
        cancelled: DashSet<u64>,
        transient_failures: AtomicU32,
        fail_submission: bool,
        stall_retrievals: bool,
    }

    impl FakeScheduler {
        fn new() -> Self {
            Self {
                next_ticket: AtomicU64::new(0),
                tasks: DashMap::new(),
                cancelled: DashSet::new(),
                transient_failures: AtomicU32::new(0),
                fail_submission: false,
                stall_retrievals: false,
            }
        }

        fn with_transient_failures(count: u32) -> Self {
            let scheduler = Self::new();
            scheduler.transient_failures.store(count, Ordering::SeqCst);
            scheduler
        }
    }

    impl RemoteScheduler for FakeScheduler {
        fn submit(
            &self,
            tasks: Vec<Arc<Task>>,
        ) -> BoxFuture<'static, Result<Vec<RemoteTicket>, SchedulerError>> {
            if self.fail_submission {
                return Box::pin(async {
                    Err(SchedulerError::Fatal("scheduler rejected chunk".to_string()))
                });
            }
            let tickets: Vec<RemoteTicket> = tasks
                .into_iter()
                .map(|task| {
                    let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                    self.tasks.insert(ticket, task);
                    RemoteTicket(ticket)
                })
                .collect();
            Box::pin(async move { Ok(tickets) })
        }

        fn retrieve(
            &self,
            ticket: RemoteTicket,
        ) -> BoxFuture<'static, Result<RemoteOutcome, SchedulerError>> {
            if self.stall_retrievals {
                return Box::pin(async {
                    futures::future::pending::<()>().await;
                    unreachable!()
                });
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Box::pin(async {
                    Err(SchedulerError::Connection("link flapped".to_string()))
                });
            }
            if self.cancelled.contains(&ticket.0) {
                return Box::pin(async { Ok(RemoteOutcome::Cancelled) });
            }
            let task = self.tasks.get(&ticket.0).map(|entry| entry.value().clone());
            Box::pin(async move {
                let task = task
                    .ok_or_else(|| SchedulerError::Fatal(format!("unknown {}", ticket)))?;
                let ctx = TaskContext::new(task.id().clone(), CancellationToken::new());
                match task.body().run(&ctx).await {
                    Ok(value) => Ok(RemoteOutcome::Done(value)),
                    Err(error) => Ok(RemoteOutcome::Failed {
                        kind: error.kind(),
                        message: error.message().to_string(),
                    }),
                }
            })
        }

        fn cancel(&self, ticket: RemoteTicket) -> BoxFuture<'static, ()> {
            self.cancelled.insert(ticket.0);
            Box::pin(async {})
        }
    }

    fn batch_of(count: u32) -> TaskBatch {
        let tasks = (0..count)
            .map(|col| {
                Arc::new(Task::tile(Tile::new(9, 0, col), |_| async {
                    Ok(TaskValue::Empty)
                }))
            })
            .collect();
        TaskBatch::new(BatchLayer::Tile { zoom: 9 }, tasks)
    }

    fn config() -> ClusterConfig {
        ClusterConfig::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_all_tasks_complete_exactly_once() {
        let executor = ClusterExecutor::new(Arc::new(FakeScheduler::new()), config());
        let batch = batch_of(25);
        let expected: std::collections::BTreeSet<_> = batch.ids().cloned().collect();

        let completions = executor.submit(batch).drain().await;
        assert_eq!(completions.len(), 25);
        let got: std::collections::BTreeSet<_> =
            completions.into_iter().map(|c| c.task_id).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_chunked_submission() {
        let scheduler = Arc::new(FakeScheduler::new());
        let executor =
            ClusterExecutor::new(scheduler.clone(), config().chunk_size(4).max_in_flight(4));

        let completions = executor.submit(batch_of(10)).drain().await;
        assert_eq!(completions.len(), 10);
        assert!(completions.iter().all(|c| c.outcome.is_done()));
    }

    #[tokio::test]
    async fn test_remote_failure_is_captured_per_task() {
        let tasks = vec![
            Arc::new(Task::tile(Tile::new(9, 0, 0), |_| async {
                Err(TaskError::process("remote boom"))
            })),
            Arc::new(Task::tile(Tile::new(9, 0, 1), |_| async {
                Ok(TaskValue::Empty)
            })),
        ];
        let batch = TaskBatch::new(BatchLayer::Tile { zoom: 9 }, tasks);

        let executor = ClusterExecutor::new(Arc::new(FakeScheduler::new()), config());
        let completions = executor.submit(batch).drain().await;

        let failed: Vec<_> = completions.iter().filter(|c| c.outcome.is_failed()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_id, TaskId::new("tile-9-0-0"));
    }

    #[tokio::test]
    async fn test_transient_retrieval_errors_are_retried() {
        // Two injected connection failures, then results flow normally.
        let scheduler = Arc::new(FakeScheduler::with_transient_failures(2));
        let executor = ClusterExecutor::new(scheduler, config().retrieve_retries(3));

        let completions = executor.submit(batch_of(3)).drain().await;
        assert_eq!(completions.len(), 3);
        assert!(completions.iter().all(|c| c.outcome.is_done()));
    }

    #[tokio::test]
    async fn test_retrieval_retry_exhaustion_fails_that_task_only() {
        // Enough failures to exhaust the budget of exactly one task.
        let scheduler = Arc::new(FakeScheduler::with_transient_failures(2));
        let executor = ClusterExecutor::new(scheduler, config().retrieve_retries(2));

        let completions = executor.submit(batch_of(3)).drain().await;
        assert_eq!(completions.len(), 3);
        let failed: Vec<_> = completions
            .iter()
            .filter(|c| c.outcome.is_failed())
            .collect();
        assert_eq!(failed.len(), 1);
        match &failed[0].outcome {
            TaskOutcome::Failed(failure) => {
                assert_eq!(failure.kind, TaskErrorKind::Connection);
                assert!(failure.message.contains("retrieval failed"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_retrieval_timeout_fails_task() {
        let scheduler = Arc::new(FakeScheduler {
            stall_retrievals: true,
            ..FakeScheduler::new()
        });
        let cluster_config = ClusterConfig::new(Duration::from_millis(20)).retrieve_retries(2);
        let executor = ClusterExecutor::new(scheduler, cluster_config);

        let completions = executor.submit(batch_of(1)).drain().await;
        assert_eq!(completions.len(), 1);
        match &completions[0].outcome {
            TaskOutcome::Failed(failure) => {
                assert_eq!(failure.kind, TaskErrorKind::Timeout);
                assert!(failure.message.contains("timed out"));
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submission_failure_fails_chunk_only() {
        let scheduler = Arc::new(FakeScheduler {
            fail_submission: true,
            ..FakeScheduler::new()
        });
        let executor = ClusterExecutor::new(scheduler, config());

        let completions = executor.submit(batch_of(5)).drain().await;
        assert_eq!(completions.len(), 5);
        assert!(completions.iter().all(|c| c.outcome.is_failed()));
    }

    #[tokio::test]
    async fn test_scheduler_reported_cancellation_maps_to_cancelled() {
        let scheduler = Arc::new(FakeScheduler::new());
        // Mark everything as cancelled on the scheduler side up front.
        for ticket in 0..3u64 {
            scheduler.cancelled.insert(ticket);
        }
        let executor = ClusterExecutor::new(scheduler, config());

        let completions = executor.submit(batch_of(3)).drain().await;
        assert_eq!(completions.len(), 3);
        assert!(completions.iter().all(|c| c.outcome.is_cancelled()));
    }

    #[tokio::test]
    async fn test_cancel_flushes_queue_without_submitting() {
        let scheduler = Arc::new(FakeScheduler {
            stall_retrievals: true,
            ..FakeScheduler::new()
        });
        // One task in flight, the rest queued behind the in-flight cap.
        let cluster_config = ClusterConfig::new(Duration::from_millis(100))
            .chunk_size(1)
            .max_in_flight(1)
            .retrieve_retries(1);
        let executor = ClusterExecutor::new(scheduler.clone(), cluster_config);

        let mut handle = executor.submit(batch_of(6));
        // Wait for the first task to be handed to the scheduler.
        assert!(matches!(
            handle.next_event().await,
            Some(TaskEvent::Started(_))
        ));

        handle.cancel();

        let mut cancelled = 0;
        let mut other = 0;
        while let Some(completion) = handle.next_completed().await {
            if completion.outcome.is_cancelled() {
                cancelled += 1;
            } else {
                other += 1;
            }
        }
        // Five queued tasks are cancelled locally; the stalled in-flight
        // retrieval times out and fails its task.
        assert_eq!(cancelled + other, 6);
        assert!(cancelled >= 5);
        // Remote cancellation was requested for the in-flight ticket.
        assert!(scheduler.cancelled.contains(&0));
    }

    #[test]
    fn test_config_builders_clamp() {
        let cluster_config = ClusterConfig::new(Duration::from_secs(1))
            .chunk_size(0)
            .max_in_flight(0)
            .retrieve_retries(0);
        assert_eq!(cluster_config.chunk_size, 1);
        assert_eq!(cluster_config.max_in_flight, 1);
        assert_eq!(cluster_config.retrieve_retries, 1);
    }
}
