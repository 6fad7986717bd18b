//! Tileflow - tiled geospatial processing engine.
//!
//! A user-supplied task body runs once per spatial tile of a
//! multi-resolution pyramid, across arbitrary zoom levels. The crate
//! provides the scheduling and execution core around that callable:
//!
//! - [`pyramid`]: pure tile-grid geometry (bounds, shapes, parents,
//!   children) for a fixed metatiling factor and pixel buffer;
//! - [`zoom`]: zoom ranges and zoom-conditioned configuration values with
//!   first-match-in-declared-order resolution;
//! - [`config`]: validated process configuration and environment settings;
//! - [`graph`]: the layered task graph (preprocessing, native tile and
//!   interpolation batches with baselevel-outward ordering);
//! - [`executor`]: sequential, worker-pool and cluster backends behind one
//!   submit/drain/cancel contract, plus retry policies;
//! - [`job`]: layer-by-layer orchestration with failure policies and
//!   aggregate counters;
//! - [`observer`], [`storage`], [`formats`]: the collaborator seams for
//!   lifecycle events, tile output storage and format drivers.
//!
//! Raster and vector I/O, reprojection and CLI handling live outside this
//! crate; the core only ever invokes opaque collaborator callables.

pub mod config;
pub mod executor;
pub mod formats;
pub mod graph;
pub mod job;
pub mod observer;
pub mod pyramid;
pub mod storage;
pub mod zoom;

pub use config::{
    BaselevelsConfig, ConfigError, IoRetrySettings, ProcessConfig, RawProcessConfig, Resampling,
};
pub use executor::{
    ClusterConfig, ClusterExecutor, ErrorPolicy, ExecutionHandle, Executor, RetryPolicy,
    SequentialExecutor, Task, TaskBatch, TaskCompletion, TaskError, TaskErrorKind, TaskId,
    TaskOutcome, TaskStatus, TaskValue, WorkerPoolExecutor,
};
pub use graph::{TaskGraph, TaskGraphSpec, TileTaskFactory};
pub use job::{Job, JobCounters, JobReport, JobStatus};
pub use observer::{Observer, Observers};
pub use pyramid::{Bounds, GridType, Tile, TilePyramid};
pub use storage::{MemoryStorage, Storage};
pub use zoom::{ZoomConditional, ZoomLevels, ZoomPredicate};
