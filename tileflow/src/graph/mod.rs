//! Task graph builder.
//!
//! Turns a pyramid, a zoom range and an optional baselevel configuration
//! into an ordered collection of [`TaskBatch`]es:
//!
//! 1. preprocessing tasks (zoom-independent), always the first layer;
//! 2. native tile tasks, one batch per zoom, independent of each other;
//! 3. interpolation tasks for zooms outside the baselevel range, one batch
//!    per zoom in strict outward order (downward to the process minimum,
//!    then upward to the maximum).
//!
//! The layering is the whole point: within a batch parallelism is safe,
//! across batches it is not, because an interpolation task reads output
//! written by the previous layer. The builder therefore exposes batches,
//! never a flat task list. Dependencies always point toward zooms closer
//! to the baselevel range, so the graph is cycle-free by construction, and
//! at most one task exists per `(zoom, tile, kind)`.

use crate::config::{BaselevelsConfig, ConfigError, Resampling};
use crate::executor::{BatchLayer, RetryPolicy, Task, TaskBatch, TaskBody, TaskId, TaskKind};
use crate::pyramid::{Bounds, Tile, TilePyramid};
use crate::zoom::ZoomLevels;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Collaborator producing task bodies for tiles.
///
/// The scheduler never looks inside a body; format drivers and the user
/// process live behind this seam.
pub trait TileTaskFactory: Send + Sync {
    /// Body computing a native tile from source inputs.
    fn tile_body(&self, tile: &Tile) -> Arc<dyn TaskBody>;

    /// Body deriving a tile by resampling the given neighbor-zoom tasks'
    /// output with the configured method.
    fn interpolation_body(
        &self,
        tile: &Tile,
        resampling: Resampling,
        dependencies: &[TaskId],
    ) -> Arc<dyn TaskBody>;
}

/// Inputs to the graph builder.
#[derive(Clone, Copy)]
pub struct TaskGraphSpec<'a> {
    pub pyramid: &'a TilePyramid,
    pub zoom_levels: ZoomLevels,
    pub bounds: Option<Bounds>,
    pub baselevels: Option<BaselevelsConfig>,
}

/// An ordered, layered collection of tasks for one job.
pub struct TaskGraph {
    batches: Vec<TaskBatch>,
    preprocessing_count: usize,
    tile_count: usize,
}

impl TaskGraph {
    /// Builds the layered task graph.
    ///
    /// # Arguments
    ///
    /// * `spec` - Pyramid, zoom range, optional bounds filter and baselevels
    /// * `preprocessing` - Zoom-independent tasks, scheduled first
    /// * `factory` - Produces tile and interpolation task bodies
    /// * `retry` - Retry policy applied to every tile-bound task
    ///
    /// # Errors
    ///
    /// `ConfigError` if the baselevel range leaves the process zoom range.
    /// Unknown resampling names are rejected earlier, when the raw
    /// configuration is parsed.
    pub fn build(
        spec: TaskGraphSpec<'_>,
        preprocessing: Vec<Task>,
        factory: &dyn TileTaskFactory,
        retry: &RetryPolicy,
    ) -> Result<Self, ConfigError> {
        if let Some(baselevels) = &spec.baselevels {
            if !spec.zoom_levels.contains_range(&baselevels.levels) {
                return Err(ConfigError::BaselevelsOutsideZoomRange {
                    baselevels: baselevels.levels,
                    zoom_levels: spec.zoom_levels,
                });
            }
        }
        debug_assert!(preprocessing
            .iter()
            .all(|task| task.kind() == TaskKind::Preprocessing));

        let mut graph = Self {
            batches: Vec::new(),
            preprocessing_count: preprocessing.len(),
            tile_count: 0,
        };
        if !preprocessing.is_empty() {
            graph.batches.push(TaskBatch::new(
                BatchLayer::Preprocessing,
                preprocessing.into_iter().map(Arc::new).collect(),
            ));
        }

        // Tracks which tiles materialized per zoom, and under which task id,
        // so interpolation dependencies only ever reference existing tasks.
        let mut materialized: HashMap<u8, HashMap<(u32, u32), TaskId>> = HashMap::new();

        let native_zooms = spec
            .baselevels
            .map(|baselevels| baselevels.levels)
            .unwrap_or(spec.zoom_levels);

        // Native zooms carry no inter-zoom dependencies; they are
        // embarrassingly parallel within and across zooms.
        for zoom in native_zooms.descending() {
            graph.push_native_batch(&spec, zoom, factory, retry, &mut materialized)?;
        }

        if let Some(baselevels) = &spec.baselevels {
            // Walk outward below the baselevel range: each zoom resamples
            // the zoom above it, one layer at a time.
            for zoom in (spec.zoom_levels.min()..baselevels.levels.min()).rev() {
                graph.push_interpolation_batch(
                    &spec,
                    zoom,
                    InterpolationDirection::Lower,
                    baselevels.lower,
                    factory,
                    retry,
                    &mut materialized,
                )?;
            }
            // And outward above it, resampling the zoom below.
            for zoom in (baselevels.levels.max() + 1)..=spec.zoom_levels.max() {
                graph.push_interpolation_batch(
                    &spec,
                    zoom,
                    InterpolationDirection::Higher,
                    baselevels.higher,
                    factory,
                    retry,
                    &mut materialized,
                )?;
            }
        }

        debug!(
            batches = graph.batches.len(),
            preprocessing = graph.preprocessing_count,
            tiles = graph.tile_count,
            "task graph built"
        );
        Ok(graph)
    }

    fn push_native_batch(
        &mut self,
        spec: &TaskGraphSpec<'_>,
        zoom: u8,
        factory: &dyn TileTaskFactory,
        retry: &RetryPolicy,
        materialized: &mut HashMap<u8, HashMap<(u32, u32), TaskId>>,
    ) -> Result<(), ConfigError> {
        let mut tasks = Vec::new();
        let mut by_position = HashMap::new();
        for tile in tiles_of_zoom(spec, zoom)? {
            let task = Task::tile_with_body(tile, factory.tile_body(&tile))
                .with_retry(retry.clone());
            by_position.insert((tile.row, tile.col), task.id().clone());
            tasks.push(Arc::new(task));
        }
        self.tile_count += tasks.len();
        materialized.insert(zoom, by_position);
        self.batches
            .push(TaskBatch::new(BatchLayer::Tile { zoom }, tasks));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn push_interpolation_batch(
        &mut self,
        spec: &TaskGraphSpec<'_>,
        zoom: u8,
        direction: InterpolationDirection,
        resampling: Resampling,
        factory: &dyn TileTaskFactory,
        retry: &RetryPolicy,
        materialized: &mut HashMap<u8, HashMap<(u32, u32), TaskId>>,
    ) -> Result<(), ConfigError> {
        let source_zoom = match direction {
            InterpolationDirection::Lower => zoom + 1,
            InterpolationDirection::Higher => zoom - 1,
        };
        let mut tasks = Vec::new();
        let mut by_position = HashMap::new();
        for tile in tiles_of_zoom(spec, zoom)? {
            let dependencies = match direction {
                InterpolationDirection::Lower => spec
                    .pyramid
                    .child_tiles(&tile)?
                    .into_iter()
                    .filter_map(|child| {
                        materialized
                            .get(&source_zoom)
                            .and_then(|tiles| tiles.get(&(child.row, child.col)))
                            .cloned()
                    })
                    .collect::<Vec<_>>(),
                InterpolationDirection::Higher => spec
                    .pyramid
                    .parent_tile(&tile)
                    .and_then(|parent| {
                        materialized
                            .get(&source_zoom)
                            .and_then(|tiles| tiles.get(&(parent.row, parent.col)))
                            .cloned()
                    })
                    .into_iter()
                    .collect::<Vec<_>>(),
            };
            let body = factory.interpolation_body(&tile, resampling, &dependencies);
            let task = Task::interpolation_with_body(tile, dependencies, body)
                .with_retry(retry.clone());
            by_position.insert((tile.row, tile.col), task.id().clone());
            tasks.push(Arc::new(task));
        }
        self.tile_count += tasks.len();
        materialized.insert(zoom, by_position);
        self.batches
            .push(TaskBatch::new(BatchLayer::Interpolation { zoom }, tasks));
        Ok(())
    }

    /// The batches in submission order.
    pub fn batches(&self) -> &[TaskBatch] {
        &self.batches
    }

    /// Consumes the graph into its batches.
    pub fn into_batches(self) -> Vec<TaskBatch> {
        self.batches
    }

    /// Total number of tasks.
    pub fn len(&self) -> usize {
        self.preprocessing_count + self.tile_count
    }

    /// Returns true if the graph holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of preprocessing tasks.
    pub fn preprocessing_tasks_count(&self) -> usize {
        self.preprocessing_count
    }

    /// Number of tile-bound tasks (native and interpolation).
    pub fn tile_tasks_count(&self) -> usize {
        self.tile_count
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InterpolationDirection {
    Lower,
    Higher,
}

fn tiles_of_zoom(spec: &TaskGraphSpec<'_>, zoom: u8) -> Result<Vec<Tile>, ConfigError> {
    Ok(match &spec.bounds {
        Some(bounds) => spec.pyramid.tiles_from_bounds(bounds, zoom)?,
        None => spec.pyramid.tiles_for_zoom(zoom)?.collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{TaskError, TaskFuture, TaskValue};
    use crate::pyramid::GridType;
    use std::collections::HashSet;

    struct EmptyBody;

    impl TaskBody for EmptyBody {
        fn run<'a>(&'a self, _ctx: &'a crate::executor::TaskContext) -> TaskFuture<'a> {
            Box::pin(async { Ok(TaskValue::Empty) })
        }
    }

    struct EmptyFactory;

    impl TileTaskFactory for EmptyFactory {
        fn tile_body(&self, _tile: &Tile) -> Arc<dyn TaskBody> {
            Arc::new(EmptyBody)
        }

        fn interpolation_body(
            &self,
            _tile: &Tile,
            _resampling: Resampling,
            _dependencies: &[TaskId],
        ) -> Arc<dyn TaskBody> {
            Arc::new(EmptyBody)
        }
    }

    fn pyramid() -> TilePyramid {
        TilePyramid::new(GridType::Geodetic, 1, 0).unwrap()
    }

    fn baselevels(min: u8, max: u8) -> BaselevelsConfig {
        BaselevelsConfig {
            levels: ZoomLevels::new(min, max).unwrap(),
            lower: Resampling::Cubic,
            higher: Resampling::Bilinear,
        }
    }

    fn build(spec: TaskGraphSpec<'_>, preprocessing: Vec<Task>) -> TaskGraph {
        TaskGraph::build(spec, preprocessing, &EmptyFactory, &RetryPolicy::none()).unwrap()
    }

    fn preprocessing_task(name: &str) -> Task {
        Task::preprocessing(name, |_| async { Ok(TaskValue::Empty) })
    }

    #[test]
    fn test_without_baselevels_all_zooms_native() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(0, 3).unwrap(),
                bounds: None,
                baselevels: None,
            },
            vec![],
        );

        let layers: Vec<_> = graph.batches().iter().map(|b| b.layer()).collect();
        assert_eq!(
            layers,
            vec![
                BatchLayer::Tile { zoom: 3 },
                BatchLayer::Tile { zoom: 2 },
                BatchLayer::Tile { zoom: 1 },
                BatchLayer::Tile { zoom: 0 },
            ]
        );
        // Native tasks carry no dependencies.
        for batch in graph.batches() {
            for task in batch.tasks() {
                assert!(task.dependencies().is_empty());
            }
        }
    }

    #[test]
    fn test_preprocessing_layer_comes_first() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(2, 3).unwrap(),
                bounds: None,
                baselevels: None,
            },
            vec![preprocessing_task("ingest"), preprocessing_task("reproject")],
        );

        assert_eq!(graph.batches()[0].layer(), BatchLayer::Preprocessing);
        assert_eq!(graph.batches()[0].len(), 2);
        assert_eq!(graph.preprocessing_tasks_count(), 2);
    }

    #[test]
    fn test_baselevels_layering_matches_outward_walk() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(0, 14).unwrap(),
                bounds: Some(Bounds::new(-1.0, -1.0, 1.0, 1.0)),
                baselevels: Some(baselevels(10, 12)),
            },
            vec![],
        );

        let layers: Vec<_> = graph.batches().iter().map(|b| b.layer()).collect();
        let mut expected = vec![
            BatchLayer::Tile { zoom: 12 },
            BatchLayer::Tile { zoom: 11 },
            BatchLayer::Tile { zoom: 10 },
        ];
        expected.extend((0..10).rev().map(|zoom| BatchLayer::Interpolation { zoom }));
        expected.push(BatchLayer::Interpolation { zoom: 13 });
        expected.push(BatchLayer::Interpolation { zoom: 14 });
        assert_eq!(layers, expected);
    }

    #[test]
    fn test_lower_interpolation_depends_only_on_zoom_above() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(0, 14).unwrap(),
                bounds: Some(Bounds::new(-1.0, -1.0, 1.0, 1.0)),
                baselevels: Some(baselevels(10, 12)),
            },
            vec![],
        );

        let zoom_9 = graph
            .batches()
            .iter()
            .find(|b| b.layer() == BatchLayer::Interpolation { zoom: 9 })
            .unwrap();
        assert!(!zoom_9.is_empty());
        for task in zoom_9.tasks() {
            assert!(!task.dependencies().is_empty());
            for dep in task.dependencies() {
                // Zoom 10 is native, so dependencies are tile tasks there.
                assert!(
                    dep.as_str().starts_with("tile-10-"),
                    "unexpected dependency {}",
                    dep
                );
            }
        }

        let zoom_8 = graph
            .batches()
            .iter()
            .find(|b| b.layer() == BatchLayer::Interpolation { zoom: 8 })
            .unwrap();
        for task in zoom_8.tasks() {
            for dep in task.dependencies() {
                assert!(dep.as_str().starts_with("interp-9-"));
            }
        }
    }

    #[test]
    fn test_higher_interpolation_depends_on_single_parent() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(0, 14).unwrap(),
                bounds: Some(Bounds::new(-1.0, -1.0, 1.0, 1.0)),
                baselevels: Some(baselevels(10, 12)),
            },
            vec![],
        );

        let zoom_13 = graph
            .batches()
            .iter()
            .find(|b| b.layer() == BatchLayer::Interpolation { zoom: 13 })
            .unwrap();
        for task in zoom_13.tasks() {
            assert_eq!(task.dependencies().len(), 1);
            assert!(task.dependencies()[0].as_str().starts_with("tile-12-"));
        }

        let zoom_14 = graph
            .batches()
            .iter()
            .find(|b| b.layer() == BatchLayer::Interpolation { zoom: 14 })
            .unwrap();
        for task in zoom_14.tasks() {
            assert_eq!(task.dependencies().len(), 1);
            assert!(task.dependencies()[0].as_str().starts_with("interp-13-"));
        }
    }

    #[test]
    fn test_no_duplicate_zoom_tile_kind() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(0, 8).unwrap(),
                bounds: Some(Bounds::new(-20.0, -20.0, 20.0, 20.0)),
                baselevels: Some(baselevels(4, 6)),
            },
            vec![preprocessing_task("ingest")],
        );

        let mut seen = HashSet::new();
        let mut tile_bound = 0;
        for batch in graph.batches() {
            for task in batch.tasks() {
                if let Some(tile) = task.target_tile() {
                    tile_bound += 1;
                    assert!(
                        seen.insert((task.kind(), *tile)),
                        "duplicate task for {} {}",
                        task.kind(),
                        tile
                    );
                }
            }
        }
        assert_eq!(seen.len(), tile_bound);
        assert_eq!(tile_bound, graph.tile_tasks_count());
    }

    #[test]
    fn test_dependencies_always_point_to_earlier_layer() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(0, 8).unwrap(),
                bounds: Some(Bounds::new(-20.0, -20.0, 20.0, 20.0)),
                baselevels: Some(baselevels(4, 6)),
            },
            vec![],
        );

        let mut known = HashSet::new();
        for batch in graph.batches() {
            for task in batch.tasks() {
                for dep in task.dependencies() {
                    assert!(
                        known.contains(dep),
                        "dependency {} of {} not in an earlier layer",
                        dep,
                        task.id()
                    );
                }
            }
            for task in batch.tasks() {
                known.insert(task.id().clone());
            }
        }
    }

    #[test]
    fn test_bounds_filter_restricts_tiles() {
        let pyramid = pyramid();
        let all = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(3, 3).unwrap(),
                bounds: None,
                baselevels: None,
            },
            vec![],
        );
        let filtered = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(3, 3).unwrap(),
                bounds: Some(Bounds::new(-10.0, -10.0, 10.0, 10.0)),
                baselevels: None,
            },
            vec![],
        );

        assert!(filtered.tile_tasks_count() < all.tile_tasks_count());
        assert_eq!(filtered.tile_tasks_count(), 4);
    }

    #[test]
    fn test_baselevels_outside_process_range_rejected() {
        let pyramid = pyramid();
        let result = TaskGraph::build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(5, 10).unwrap(),
                bounds: None,
                baselevels: Some(baselevels(8, 12)),
            },
            vec![],
            &EmptyFactory,
            &RetryPolicy::none(),
        );
        assert!(matches!(
            result,
            Err(ConfigError::BaselevelsOutsideZoomRange { .. })
        ));
    }

    #[test]
    fn test_counts() {
        let pyramid = pyramid();
        let graph = build(
            TaskGraphSpec {
                pyramid: &pyramid,
                zoom_levels: ZoomLevels::new(1, 2).unwrap(),
                bounds: None,
                baselevels: None,
            },
            vec![preprocessing_task("ingest")],
        );
        // Zoom 1: 2x4 tiles, zoom 2: 4x8 tiles.
        assert_eq!(graph.tile_tasks_count(), 8 + 32);
        assert_eq!(graph.preprocessing_tasks_count(), 1);
        assert_eq!(graph.len(), 41);
        assert!(!graph.is_empty());
    }
}
