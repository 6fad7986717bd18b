//! Job orchestration.
//!
//! A [`Job`] drives one full run: it takes the layered batches from the
//! task graph, submits them to an executor one layer at a time, drains each
//! handle completely before issuing the next layer, updates per-task status
//! and aggregate counters, and notifies observers. The strict
//! layer-after-layer ordering is the only cross-task ordering contract the
//! core provides; it is sufficient because an interpolation task's
//! dependencies always live in an earlier, fully-drained layer.

use crate::executor::{
    ErrorPolicy, Executor, TaskBatch, TaskErrorKind, TaskEvent, TaskFailure, TaskId, TaskOutcome,
    TaskStatus,
};
use crate::graph::TaskGraph;
use crate::observer::Observers;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Terminal (and transient) status of a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// Layers are being executed.
    Running,
    /// All tasks finished successfully.
    Done,
    /// At least one task failed.
    Failed,
    /// The job was cancelled before completing.
    Cancelled,
}

impl JobStatus {
    /// Returns true for Done, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the job finished without failures or cancellation.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Aggregate task counters of one job run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobCounters {
    /// Tasks handed to the executor.
    pub submitted: usize,
    /// Tasks currently running; zero once the job has finished.
    pub running: usize,
    /// Tasks that finished successfully.
    pub done: usize,
    /// Tasks that failed (including dependency failures).
    pub failed: usize,
    /// Tasks cancelled before or during execution.
    pub cancelled: usize,
}

/// Result of a finished job run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub status: JobStatus,
    pub counters: JobCounters,
}

/// One full run over a task graph.
///
/// The executor arrives as an explicit `Arc<dyn Executor>`; there is no
/// process-wide default.
pub struct Job {
    graph: TaskGraph,
    executor: Arc<dyn Executor>,
    observers: Observers,
    error_policy: ErrorPolicy,
    cancel: CancellationToken,
}

impl Job {
    /// Creates a job with no observers and the fail-fast policy.
    pub fn new(graph: TaskGraph, executor: Arc<dyn Executor>) -> Self {
        Self {
            graph,
            executor,
            observers: Observers::none(),
            error_policy: ErrorPolicy::FailFast,
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches observers.
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    /// Sets the failure policy.
    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    /// A token callers can use to cancel the run from outside.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the job to completion.
    ///
    /// Per-task failures never abort the loop directly; they are captured,
    /// counted and folded into the final status per the failure policy.
    pub async fn run(self) -> JobReport {
        let Job {
            graph,
            executor,
            observers,
            error_policy,
            cancel,
        } = self;
        let fail_fast = error_policy == ErrorPolicy::FailFast;
        let batches = graph.into_batches();

        let mut statuses: HashMap<TaskId, TaskStatus> = batches
            .iter()
            .flat_map(|batch| batch.tasks().iter())
            .map(|task| (task.id().clone(), TaskStatus::Pending))
            .collect();
        let mut counters = JobCounters::default();
        let mut failed_any = false;
        let mut was_cancelled = false;

        let mut batches = batches.into_iter();
        let mut unissued: Vec<TaskBatch> = Vec::new();

        for batch in batches.by_ref() {
            if cancel.is_cancelled() {
                was_cancelled = true;
            }
            if was_cancelled || (fail_fast && failed_any) {
                unissued.push(batch);
                break;
            }
            if batch.is_empty() {
                continue;
            }

            // Dependency gate: a task whose dependencies did not all finish
            // `Done` is failed without running. Only reachable under the
            // continue policy; fail-fast stops at the failing layer.
            let mut runnable = Vec::with_capacity(batch.len());
            for task in batch.tasks() {
                let unmet = task
                    .dependencies()
                    .iter()
                    .find(|dep| statuses.get(*dep) != Some(&TaskStatus::Done));
                match unmet {
                    None => runnable.push(task.clone()),
                    Some(dep) => {
                        let outcome = TaskOutcome::Failed(TaskFailure {
                            task_id: task.id().clone(),
                            kind: TaskErrorKind::Process,
                            message: format!("dependency {} did not complete", dep),
                        });
                        statuses.insert(task.id().clone(), TaskStatus::Failed);
                        counters.failed += 1;
                        failed_any = true;
                        observers.notify_task_end(task.id(), &outcome);
                    }
                }
            }
            if runnable.is_empty() {
                continue;
            }

            counters.submitted += runnable.len();
            debug!(
                layer = %batch.layer(),
                tasks = runnable.len(),
                executor = executor.name(),
                "submitting layer"
            );
            let mut handle = executor.submit(TaskBatch::new(batch.layer(), runnable));

            // Drain the layer completely before touching the next one.
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled(), if !was_cancelled => {
                        was_cancelled = true;
                        handle.cancel();
                    }
                    event = handle.next_event() => {
                        let Some(event) = event else { break };
                        match event {
                            TaskEvent::Started(task_id) => {
                                statuses.insert(task_id.clone(), TaskStatus::Running);
                                counters.running += 1;
                                observers.notify_task_start(&task_id);
                            }
                            TaskEvent::Completed(completion) => {
                                if statuses.get(&completion.task_id)
                                    == Some(&TaskStatus::Running)
                                {
                                    counters.running -= 1;
                                }
                                statuses.insert(
                                    completion.task_id.clone(),
                                    completion.outcome.status(),
                                );
                                match &completion.outcome {
                                    TaskOutcome::Done(_) => counters.done += 1,
                                    TaskOutcome::Failed(failure) => {
                                        debug!("{}", failure);
                                        counters.failed += 1;
                                        failed_any = true;
                                        if fail_fast {
                                            handle.cancel();
                                        }
                                    }
                                    TaskOutcome::Cancelled => counters.cancelled += 1,
                                }
                                observers
                                    .notify_task_end(&completion.task_id, &completion.outcome);
                            }
                        }
                    }
                }
            }
        }

        // Layers never issued: every task transitions to cancelled and is
        // reported exactly once.
        unissued.extend(batches);
        for batch in &unissued {
            for task in batch.tasks() {
                statuses.insert(task.id().clone(), TaskStatus::Cancelled);
                counters.cancelled += 1;
                observers.notify_task_end(task.id(), &TaskOutcome::Cancelled);
            }
        }

        let status = if was_cancelled {
            JobStatus::Cancelled
        } else if failed_any {
            JobStatus::Failed
        } else {
            JobStatus::Done
        };
        info!(
            %status,
            done = counters.done,
            failed = counters.failed,
            cancelled = counters.cancelled,
            "job finished"
        );
        observers.notify_job_end(status);
        JobReport { status, counters }
    }
}
