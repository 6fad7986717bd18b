//! Task execution backends.
//!
//! A batch of independent tasks is submitted to an [`Executor`] and drained
//! through an [`ExecutionHandle`]: a finite, single-consumer stream of
//! events in completion order. Three backends satisfy the same contract:
//!
//! - [`SequentialExecutor`] - no parallelism, strict submission order,
//!   deterministic; the reference implementation for correctness testing.
//! - [`WorkerPoolExecutor`] - bounded local parallelism on the tokio
//!   runtime, queued remainder.
//! - [`ClusterExecutor`] - delegates to a remote scheduler in bounded
//!   chunks, with timeouts and bounded retries on result retrieval.
//!
//! Whatever the backend, every submitted task yields exactly one completion
//! (also after cancellation), and per-task bookkeeping is dropped as soon
//! as the completion is handed over.

mod cluster;
mod dispatch;
mod handle;
mod policy;
mod retry;
mod sequential;
mod task;
mod worker_pool;

pub use cluster::{
    ClusterConfig, ClusterExecutor, RemoteOutcome, RemoteScheduler, RemoteTicket, SchedulerError,
};
pub use handle::{ExecutionHandle, TaskEvent, EVENT_CHANNEL_CAPACITY};
pub use policy::{ErrorPolicy, RetryPolicy};
pub use retry::{classify_io_error, run_with_retry, RetryError};
pub use sequential::SequentialExecutor;
pub use task::{
    BatchLayer, Task, TaskBatch, TaskBody, TaskCompletion, TaskContext, TaskError, TaskErrorKind,
    TaskFailure, TaskFuture, TaskId, TaskKind, TaskOutcome, TaskStatus, TaskValue,
};
pub use worker_pool::{WorkerPoolConfig, WorkerPoolExecutor};

/// Contract shared by all execution backends.
///
/// `submit` accepts a batch of independent tasks, starts executing it in
/// the background and returns immediately; results are observed by
/// draining the returned handle. Must be called from within a tokio
/// runtime. No hidden global executor exists; an `Arc<dyn Executor>` is
/// passed explicitly to the job that needs it.
pub trait Executor: Send + Sync + 'static {
    /// A short backend name for logs.
    fn name(&self) -> &str;

    /// Submits a batch for execution.
    fn submit(&self, batch: TaskBatch) -> ExecutionHandle;
}
