//! Task types and the task body contract.
//!
//! A task is the atomic unit of work: one invocation of a collaborator
//! callable per output target (a preprocessing step or a tile). The
//! scheduler treats the callable as opaque and only observes its returned
//! value or error kind.
//!
//! # Example
//!
//! ```ignore
//! use tileflow::executor::{Task, TaskValue};
//!
//! let task = Task::tile(tile, |ctx| async move {
//!     if ctx.is_cancelled() {
//!         return Err(TaskError::process("cancelled mid-flight"));
//!     }
//!     Ok(TaskValue::Data(encoded))
//! });
//! ```

use super::policy::RetryPolicy;
use crate::pyramid::Tile;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Boxed future returned by a task body.
pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<TaskValue, TaskError>> + Send + 'a>>;

// =============================================================================
// Identity and classification
// =============================================================================

/// Unique identifier of a task within a job.
///
/// Ids are constructed from meaningful data (task kind plus tile identity)
/// so logs and observer events stay readable.
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task id from its string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of work a task performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Zoom-independent input preparation, runs before any tile task.
    Preprocessing,
    /// Native tile computation from source inputs.
    Tile,
    /// Tile derived by resampling already-written neighbor-zoom output.
    Interpolation,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Preprocessing => write!(f, "preprocessing"),
            TaskKind::Tile => write!(f, "tile"),
            TaskKind::Interpolation => write!(f, "interpolation"),
        }
    }
}

/// Task lifecycle state.
///
/// Transitions are monotonic: a task never re-enters `Pending`. Retry
/// re-invocations happen inside the executor while the task stays
/// `Running` and are never visible as a status change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns true for Done, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
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

// =============================================================================
// Errors
// =============================================================================

/// Classification of a task error, used for retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskErrorKind {
    /// Storage or filesystem error.
    Io,
    /// An operation exceeded its deadline.
    Timeout,
    /// Network connectivity failure.
    Connection,
    /// The task body itself raised.
    Process,
}

impl TaskErrorKind {
    /// The error kinds considered transient by default.
    pub fn transient() -> [TaskErrorKind; 3] {
        [Self::Io, Self::Timeout, Self::Connection]
    }
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "io"),
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Error raised by a task body or a collaborator call within it.
#[derive(Debug)]
pub struct TaskError {
    kind: TaskErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    /// Creates an error of the given kind.
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an IO error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Io, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Timeout, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Connection, message)
    }

    /// Creates a process error (the task body raised).
    pub fn process(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Process, message)
    }

    /// Attaches a source error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error classification.
    pub fn kind(&self) -> TaskErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &_)
    }
}

/// A captured task failure: error kind, message and originating task.
///
/// Unlike [`TaskError`] this is cheap to clone and send across channels;
/// any source chain is folded into the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskFailure {
    /// Captures a task error for the given task.
    pub fn capture(task_id: TaskId, error: &TaskError) -> Self {
        use std::error::Error;
        let mut message = error.message().to_string();
        if let Some(source) = error.source() {
            message.push_str(": ");
            message.push_str(&source.to_string());
        }
        Self {
            task_id,
            kind: error.kind(),
            message,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} failed ({}): {}", self.task_id, self.kind, self.message)
    }
}

// =============================================================================
// Values and outcomes
// =============================================================================

/// Value produced by a task body, opaque to the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskValue {
    /// Output payload produced by the collaborator callable.
    Data(Bytes),
    /// The tile legitimately has no data to write. Not a failure.
    Empty,
}

impl TaskValue {
    /// Returns true for the empty sentinel.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Terminal outcome of one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task body returned a value.
    Done(TaskValue),
    /// The task body (or its retries) failed.
    Failed(TaskFailure),
    /// The task did not run, or was interrupted, due to cancellation.
    Cancelled,
}

impl TaskOutcome {
    /// Returns true if the task finished successfully.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Returns true if the task failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Maps the outcome to the terminal task status.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Done(_) => TaskStatus::Done,
            Self::Failed(_) => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// One completed task as yielded by an execution handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
    /// Body invocations performed, including retries.
    pub attempts: u32,
    /// Wall time from task start to completion. Zero for tasks that never
    /// started.
    pub elapsed: Duration,
}

impl TaskCompletion {
    /// A completion for a task that was cancelled before it started.
    pub fn cancelled(task_id: TaskId) -> Self {
        Self {
            task_id,
            outcome: TaskOutcome::Cancelled,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }
}

// =============================================================================
// Context and body
// =============================================================================

/// Execution context handed to a task body.
///
/// Carries the task identity and the cooperative cancellation token. Bodies
/// of long-running tasks should check `is_cancelled()` periodically; a
/// running body may finish before honoring cancellation.
#[derive(Clone, Debug)]
pub struct TaskContext {
    task_id: TaskId,
    cancellation: CancellationToken,
}

impl TaskContext {
    /// Creates a context. Called by executors when dispatching a task.
    pub fn new(task_id: TaskId, cancellation: CancellationToken) -> Self {
        Self {
            task_id,
            cancellation,
        }
    }

    /// The id of the task being executed.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The underlying cancellation token, for `select!`-style waiting.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// The collaborator-supplied callable executed once per task.
///
/// Implementations must be self-contained (`Send + Sync + 'static`): worker
/// pool and cluster backends move them across thread or scheduler
/// boundaries, so no shared mutable state may be captured. The output write
/// performed by a body must be idempotent, the retry policy may re-invoke
/// the same operation.
pub trait TaskBody: Send + Sync + 'static {
    /// Runs the task.
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> TaskFuture<'a>;
}

/// Adapter turning an async closure into a [`TaskBody`].
struct FnTaskBody<F>(F);

impl<F, Fut> TaskBody for FnTaskBody<F>
where
    F: Fn(&TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskValue, TaskError>> + Send + 'static,
{
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> TaskFuture<'a> {
        Box::pin((self.0)(ctx))
    }
}

// =============================================================================
// Task
// =============================================================================

/// A scheduled unit of work.
///
/// At most one task exists per `(zoom, tile, kind)` within a job; the graph
/// builder enforces this so no two concurrently running tasks ever target
/// the same output.
pub struct Task {
    id: TaskId,
    kind: TaskKind,
    tile: Option<Tile>,
    dependencies: Vec<TaskId>,
    retry: RetryPolicy,
    body: Arc<dyn TaskBody>,
}

impl Task {
    /// Creates a preprocessing task. No tile, no dependencies.
    pub fn preprocessing<F, Fut>(name: &str, body: F) -> Self
    where
        F: Fn(&TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskValue, TaskError>> + Send + 'static,
    {
        Self {
            id: TaskId::new(format!("pre-{}", name)),
            kind: TaskKind::Preprocessing,
            tile: None,
            dependencies: Vec::new(),
            retry: RetryPolicy::none(),
            body: Arc::new(FnTaskBody(body)),
        }
    }

    /// Creates a native tile task. No dependencies.
    pub fn tile<F, Fut>(tile: Tile, body: F) -> Self
    where
        F: Fn(&TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskValue, TaskError>> + Send + 'static,
    {
        Self {
            id: Self::tile_id(TaskKind::Tile, &tile),
            kind: TaskKind::Tile,
            tile: Some(tile),
            dependencies: Vec::new(),
            retry: RetryPolicy::none(),
            body: Arc::new(FnTaskBody(body)),
        }
    }

    /// Creates an interpolation task depending on neighbor-zoom tiles.
    pub fn interpolation<F, Fut>(tile: Tile, dependencies: Vec<TaskId>, body: F) -> Self
    where
        F: Fn(&TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskValue, TaskError>> + Send + 'static,
    {
        Self {
            id: Self::tile_id(TaskKind::Interpolation, &tile),
            kind: TaskKind::Interpolation,
            tile: Some(tile),
            dependencies,
            retry: RetryPolicy::none(),
            body: Arc::new(FnTaskBody(body)),
        }
    }

    /// Creates a native tile task from a prebuilt body.
    pub fn tile_with_body(tile: Tile, body: Arc<dyn TaskBody>) -> Self {
        Self {
            id: Self::tile_id(TaskKind::Tile, &tile),
            kind: TaskKind::Tile,
            tile: Some(tile),
            dependencies: Vec::new(),
            retry: RetryPolicy::none(),
            body,
        }
    }

    /// Creates an interpolation task from a prebuilt body.
    pub fn interpolation_with_body(
        tile: Tile,
        dependencies: Vec<TaskId>,
        body: Arc<dyn TaskBody>,
    ) -> Self {
        Self {
            id: Self::tile_id(TaskKind::Interpolation, &tile),
            kind: TaskKind::Interpolation,
            tile: Some(tile),
            dependencies,
            retry: RetryPolicy::none(),
            body,
        }
    }

    /// The deterministic id for a tile-bound task.
    pub fn tile_id(kind: TaskKind, tile: &Tile) -> TaskId {
        let prefix = match kind {
            TaskKind::Tile => "tile",
            TaskKind::Interpolation => "interp",
            TaskKind::Preprocessing => "pre",
        };
        TaskId::new(format!("{}-{}-{}-{}", prefix, tile.zoom, tile.row, tile.col))
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The task id.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// The task kind.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The tile this task targets, if any.
    pub fn target_tile(&self) -> Option<&Tile> {
        self.tile.as_ref()
    }

    /// Ids of tasks that must be done before this one may start.
    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    /// The retry policy applied around body invocations.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The collaborator callable.
    pub fn body(&self) -> &Arc<dyn TaskBody> {
        &self.body
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tile", &self.tile)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

// =============================================================================
// Batches
// =============================================================================

/// The layer a batch belongs to within the task graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchLayer {
    /// Zoom-independent preprocessing, always the first layer.
    Preprocessing,
    /// Native tile tasks of one zoom level.
    Tile { zoom: u8 },
    /// Interpolation tasks of one zoom level.
    Interpolation { zoom: u8 },
}

impl fmt::Display for BatchLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preprocessing => write!(f, "preprocessing"),
            Self::Tile { zoom } => write!(f, "tile zoom {}", zoom),
            Self::Interpolation { zoom } => write!(f, "interpolation zoom {}", zoom),
        }
    }
}

/// A set of tasks with no dependencies among themselves.
///
/// Within a batch parallelism is safe; across batches the job enforces
/// strict sequential completion so that interpolation reads only ever see
/// fully-written prior layers.
#[derive(Clone)]
pub struct TaskBatch {
    layer: BatchLayer,
    tasks: Vec<Arc<Task>>,
}

impl TaskBatch {
    /// Creates a batch for a layer.
    pub fn new(layer: BatchLayer, tasks: Vec<Arc<Task>>) -> Self {
        Self { layer, tasks }
    }

    /// The layer this batch belongs to.
    pub fn layer(&self) -> BatchLayer {
        self.layer
    }

    /// The tasks in submission order.
    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    /// Number of tasks in the batch.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the batch has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids of all tasks in submission order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter().map(|task| task.id())
    }
}

impl fmt::Debug for TaskBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBatch")
            .field("layer", &self.layer)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
