//! The per-step semantic map update.
//!
//! [`SemanticMapModule`] chains the stages of one update:
//!
//! ```text
//! depth ─► PointCloudProjector ─► point cloud ─┐
//! frame + detections ─► FeatureAssembler ──────┴─► VoxelSplatter ─► ColumnProjector
//!     ─► probability log-odds + Canvas ─► StabilizingWarp ─► BayesianFuser ─► map, pose
//!                                                         └─► instance extraction
//! ```
//!
//! The module holds only configuration: maps and poses are passed in and
//! returned, so independent agents can be updated concurrently. A batch
//! with more than one agent runs without instance channels and returns no
//! instance dictionary.
//!
//! Intermediate results can be inspected by registering a
//! [`StageObserver`]; it receives a borrowed [`Stage`] per agent per stage.

use std::fmt;
use std::sync::Arc;

use polo_map::config::{MapConfig, MapGeometry};
use polo_map::layout::MapLayout;
use polo_map::semantic_map::SemanticMap;
use polo_types::{
    CameraPose, DetectionResults, InstanceDict, MapError, ObservationFrame, Pose, PoseDelta,
    WindowBounds, empty_instance_dict,
};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, instrument};

use crate::features::{FeatureAssembler, PointFeatures};
use crate::fusion::BayesianFuser;
use crate::instances::extract_instances;
use crate::point_cloud::{PinholeProjector, PointCloud, PointCloudProjector};
use crate::transform::{CameraExtrinsics, apply_pose_delta};
use crate::voxel::{ColumnProjection, ColumnProjector, VoxelGrid, VoxelSplatter};
use crate::warp::{Canvas, CanvasChannel, StabilizingWarp, probability_log_odds};

// ────────────────────────────────────────────────────────────────────────────
// Observation hooks
// ────────────────────────────────────────────────────────────────────────────

/// Borrowed intermediate result of one stage.
#[derive(Debug, Clone, Copy)]
pub enum Stage<'a> {
    PointCloud(&'a PointCloud),
    Features(&'a PointFeatures),
    Voxels(&'a VoxelGrid),
    Columns(&'a ColumnProjection),
    /// Egocentric canvas before the warp.
    Canvas(&'a Canvas),
    /// Canvas in the local map frame.
    Warped(&'a Canvas),
}

impl Stage<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::PointCloud(_) => "point_cloud",
            Stage::Features(_) => "features",
            Stage::Voxels(_) => "voxels",
            Stage::Columns(_) => "columns",
            Stage::Canvas(_) => "canvas",
            Stage::Warped(_) => "warped",
        }
    }
}

/// Receives intermediate results; called from whichever thread updates the
/// agent.
pub trait StageObserver: Send + Sync {
    fn observe(&self, agent: usize, stage: Stage<'_>);
}

// ────────────────────────────────────────────────────────────────────────────
// Inputs and outputs
// ────────────────────────────────────────────────────────────────────────────

/// Everything one agent contributes to an update.
#[derive(Debug, Clone, Copy)]
pub struct AgentStep<'a> {
    pub frame: &'a ObservationFrame,
    /// Motion since `prev_pose`.
    pub pose_delta: PoseDelta,
    /// Absolute camera pose; `None` means a level camera at the configured
    /// height.
    pub camera_pose: Option<CameraPose>,
    pub prev_map: &'a SemanticMap,
    pub prev_pose: Pose,
    /// `None` is the same as an empty detection set.
    pub detections: Option<&'a DetectionResults>,
    /// Local window inside the global map, for instance coordinates.
    pub bounds: WindowBounds,
}

/// Updated map and pose of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentUpdate {
    pub map: SemanticMap,
    pub pose: Pose,
}

/// Result of [`SemanticMapModule::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub map: SemanticMap,
    pub pose: Pose,
    pub instances: InstanceDict,
}

/// Result of [`SemanticMapModule::update_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub agents: Vec<AgentUpdate>,
    /// Only present for single-agent batches.
    pub instances: Option<InstanceDict>,
}

// ────────────────────────────────────────────────────────────────────────────
// SemanticMapModule
// ────────────────────────────────────────────────────────────────────────────

pub struct SemanticMapModule {
    config: MapConfig,
    geometry: MapGeometry,
    layout: MapLayout,
    projector: Arc<dyn PointCloudProjector>,
    assembler: FeatureAssembler,
    splatter: VoxelSplatter,
    columns: ColumnProjector,
    fuser: BayesianFuser,
    observers: Vec<Arc<dyn StageObserver>>,
}

impl fmt::Debug for SemanticMapModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticMapModule")
            .field("geometry", &self.geometry)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl SemanticMapModule {
    /// Validate `config` and build the stages, with a [`PinholeProjector`].
    pub fn new(config: MapConfig) -> Result<Self, MapError> {
        let geometry = config.geometry()?;
        Ok(Self {
            layout: MapLayout::for_map(geometry.max_mapped_bin, config.num_sem_categories),
            projector: Arc::new(PinholeProjector::from_config(&config)?),
            assembler: FeatureAssembler::new(config.du_scale, config.confirm_threshold),
            splatter: VoxelSplatter::new(&geometry),
            columns: ColumnProjector::new(&geometry, &config),
            fuser: BayesianFuser::new(&geometry, &config),
            observers: Vec::new(),
            geometry,
            config,
        })
    }

    /// Replace the point-cloud projector.
    pub fn with_projector(mut self, projector: Arc<dyn PointCloudProjector>) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn geometry(&self) -> &MapGeometry {
        &self.geometry
    }

    /// Layout every local map passed to this module must have.
    pub fn map_layout(&self) -> &MapLayout {
        &self.layout
    }

    /// An empty local map of the right size and layout.
    pub fn empty_local_map(&self) -> SemanticMap {
        SemanticMap::new(
            self.geometry.local_map_size,
            self.layout.num_voxel_bins(),
            self.layout.num_categories(),
        )
    }

    /// Update one agent.
    #[instrument(skip_all, fields(agents = 1))]
    pub fn update(&self, step: &AgentStep<'_>) -> Result<StepOutput, MapError> {
        let (update, instances) = self.update_agent(0, step, true)?;
        Ok(StepOutput {
            map: update.map,
            pose: update.pose,
            instances: instances
                .unwrap_or_else(|| empty_instance_dict(self.config.num_sem_categories)),
        })
    }

    /// Update independent agents, in parallel with the `parallel` feature.
    #[instrument(skip_all, fields(agents = steps.len()))]
    pub fn update_batch(&self, steps: &[AgentStep<'_>]) -> Result<BatchOutput, MapError> {
        let with_instances = steps.len() == 1;

        #[cfg(feature = "parallel")]
        let results: Vec<_> = steps
            .par_iter()
            .enumerate()
            .map(|(agent, step)| self.update_agent(agent, step, with_instances))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = steps
            .iter()
            .enumerate()
            .map(|(agent, step)| self.update_agent(agent, step, with_instances))
            .collect();

        let mut agents = Vec::with_capacity(results.len());
        let mut instances = None;
        for result in results {
            let (update, dict) = result?;
            agents.push(update);
            instances = instances.or(dict);
        }
        Ok(BatchOutput { agents, instances })
    }

    fn notify(&self, agent: usize, stage: Stage<'_>) {
        for observer in &self.observers {
            observer.observe(agent, stage);
        }
    }

    fn validate(&self, step: &AgentStep<'_>) -> Result<(), MapError> {
        let cfg = &self.config;
        let frame = step.frame;
        if (frame.height(), frame.width()) != (cfg.frame_height, cfg.frame_width) {
            return Err(MapError::shape(
                "observation frame",
                (cfg.frame_height, cfg.frame_width),
                (frame.height(), frame.width()),
            ));
        }
        if frame.num_categories() != cfg.num_sem_categories {
            return Err(MapError::shape(
                "semantic planes",
                cfg.num_sem_categories,
                frame.num_categories(),
            ));
        }
        let m = self.geometry.local_map_size;
        step.prev_map.ensure_shape("previous local map", &self.layout, m)?;
        if !step.bounds.is_ordered() {
            return Err(MapError::WindowOutOfBounds {
                bounds: step.bounds,
                rows: self.geometry.global_map_size,
                cols: self.geometry.global_map_size,
            });
        }
        if step.bounds.rows() != m || step.bounds.cols() != m {
            return Err(MapError::shape(
                "local window bounds",
                (m, m),
                (step.bounds.rows(), step.bounds.cols()),
            ));
        }
        Ok(())
    }

    fn update_agent(
        &self,
        agent: usize,
        step: &AgentStep<'_>,
        with_instances: bool,
    ) -> Result<(AgentUpdate, Option<InstanceDict>), MapError> {
        self.validate(step)?;
        let geometry = &self.geometry;

        let extrinsics =
            CameraExtrinsics::resolve(step.camera_pose.as_ref(), geometry.agent_height_cm);
        let cloud = self.projector.project(step.frame.depth(), &extrinsics)?;
        self.notify(agent, Stage::PointCloud(&cloud));

        let features = self
            .assembler
            .assemble(step.frame, step.detections, with_instances)?;
        self.notify(agent, Stage::Features(&features));

        let grid = self.splatter.splat(&cloud, &features)?;
        self.notify(agent, Stage::Voxels(&grid));

        let projection = self.columns.project(&grid);
        self.notify(agent, Stage::Columns(&projection));

        let prob_log_odds = probability_log_odds(
            &projection.probability,
            &projection.explored,
            geometry.prior_logit,
            self.config.logit_eps,
            self.config.log_odds_bound,
        );
        let canvas = Canvas::from_projection(&projection, &prob_log_odds, geometry);
        self.notify(agent, Stage::Canvas(&canvas));

        let pose = apply_pose_delta(&step.prev_pose, &step.pose_delta);
        let warped = StabilizingWarp::for_pose(&pose, geometry).apply(&canvas);
        self.notify(agent, Stage::Warped(&warped));

        let map = self.fuser.fuse(step.prev_map, &warped, &pose)?;

        let instances = if with_instances {
            Some(extract_instances(
                warped.block(CanvasChannel::Instances),
                &features.confirmed,
                &step.bounds,
                self.config.num_sem_categories,
            )?)
        } else {
            None
        };

        debug!(
            agent,
            x_cm = pose.x_cm,
            y_cm = pose.y_cm,
            heading_rad = pose.heading_rad,
            confirmed = features.confirmed.len(),
            "updated local map"
        );
        Ok((AgentUpdate { map, pose }, instances))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, ArrayView2, Zip, s};
    use polo_map::layout::Plane;
    use polo_map::log_odds::logit;
    use polo_map::semantic_map::VoxelBelief;
    use polo_types::{BoundingBox, Detection};
    use std::f32::consts::FRAC_PI_2;
    use std::sync::Mutex;

    // ── Fixtures ────────────────────────────────────────────────────────────

    fn config() -> MapConfig {
        MapConfig {
            frame_height: 8,
            frame_width: 8,
            du_scale: 2,
            num_sem_categories: 2,
            map_size_cm: 400,
            map_resolution_cm: 5,
            vision_range: 20,
            global_downscaling: 2,
            close_range_cm: 50,
            dilate_obstacles: false,
            ..MapConfig::default()
        }
    }

    /// Maps point `(i, j)` of the 4×4 point grid to the egocentric cell
    /// `(row + i, col + j)` at height bin `bin`.
    struct GridProjector {
        row: usize,
        col: usize,
        bin: usize,
    }

    impl PointCloudProjector for GridProjector {
        fn project(
            &self,
            _depth: ArrayView2<'_, f32>,
            _extrinsics: &CameraExtrinsics,
        ) -> Result<PointCloud, MapError> {
            let points = Array2::from_shape_fn((16, 3), |(p, k)| {
                let (i, j) = (p / 4, p % 4);
                match k {
                    0 => ((self.col + j) as f32 - 10.0 + 0.5) * 5.0,
                    1 => ((self.row + i) as f32 + 0.5) * 5.0,
                    _ => (self.bin as f32 - 8.0 + 0.5) * 5.0,
                }
            });
            PointCloud::new(points, 4, 4)
        }
    }

    const BIN: usize = 18;

    /// Rows 2..6: within the 10-row close range.
    fn near() -> Arc<GridProjector> {
        Arc::new(GridProjector { row: 2, col: 8, bin: BIN })
    }

    /// Rows 12..16: beyond the close range.
    fn far() -> Arc<GridProjector> {
        Arc::new(GridProjector { row: 12, col: 8, bin: BIN })
    }

    fn module(projector: Arc<GridProjector>) -> SemanticMapModule {
        SemanticMapModule::new(config()).unwrap().with_projector(projector)
    }

    fn frame() -> ObservationFrame {
        let mut semantic = Array3::zeros((2, 8, 8));
        semantic.slice_mut(s![1, .., ..]).fill(1.0);
        ObservationFrame::new(Array3::zeros((3, 8, 8)), Array2::from_elem((8, 8), 100.0), semantic)
            .unwrap()
    }

    fn full_mask() -> Array2<bool> {
        Array2::from_elem((8, 8), true)
    }

    /// Facing +row from the local map centre: the warp is the identity, so
    /// egocentric cell `(r, c)` lands on local cell `(20 + r, 10 + c)`.
    fn centre_pose() -> Pose {
        Pose::new(100.0, 100.0, FRAC_PI_2)
    }

    fn bounds() -> WindowBounds {
        WindowBounds::new(200, 240, 300, 340)
    }

    fn step<'a>(
        frame: &'a ObservationFrame,
        prev_map: &'a SemanticMap,
        prev_pose: Pose,
        detections: Option<&'a DetectionResults>,
    ) -> AgentStep<'a> {
        AgentStep {
            frame,
            pose_delta: PoseDelta::zero(),
            camera_pose: None,
            prev_map,
            prev_pose,
            detections,
            bounds: bounds(),
        }
    }

    fn evidence_planes(map: &SemanticMap) -> Vec<Array2<f32>> {
        let mut planes: Vec<Array2<f32>> = [Plane::Obstacle, Plane::Explored, Plane::Visited, Plane::BeenClose]
            .iter()
            .map(|&p| map.plane(p).to_owned())
            .collect();
        planes.extend(map.categories().outer_iter().map(|c| c.to_owned()));
        planes
    }

    // ── Pipeline ────────────────────────────────────────────────────────────

    #[test]
    fn observation_lands_on_expected_local_cells() {
        let m = module(far());
        let f = frame();
        let prev = m.empty_local_map();
        let out = m.update(&step(&f, &prev, centre_pose(), None)).unwrap();

        let explored = out.map.plane(Plane::Explored);
        assert_eq!(explored.sum(), 16.0);
        assert_eq!(explored[[32, 18]], 1.0);
        assert_eq!(explored[[35, 21]], 1.0);
        assert_eq!(out.map.plane(Plane::Obstacle)[[32, 18]], 1.0);
        // One point per cell, category 1 score 1 over a threshold of 5.
        assert!((out.map.categories()[[1, 33, 19]] - 0.2).abs() < 1e-6);
        assert_eq!(out.map.plane(Plane::BeenClose).sum(), 0.0);
        assert_eq!(out.map.plane(Plane::CurrentLocation)[[20, 20]], 1.0);
    }

    #[test]
    fn stage_observers_see_every_stage_in_order() {
        struct Recorder(Mutex<Vec<(usize, &'static str)>>);
        impl StageObserver for Recorder {
            fn observe(&self, agent: usize, stage: Stage<'_>) {
                self.0.lock().unwrap().push((agent, stage.name()));
            }
        }
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let m = module(far()).with_observer(recorder.clone());
        let f = frame();
        let prev = m.empty_local_map();
        m.update(&step(&f, &prev, centre_pose(), None)).unwrap();

        let seen: Vec<&str> = recorder.0.lock().unwrap().iter().map(|(_, n)| *n).collect();
        assert_eq!(
            seen,
            vec!["point_cloud", "features", "voxels", "columns", "canvas", "warped"]
        );
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let m = module(far());
        let f = ObservationFrame::new(Array3::zeros((3, 4, 4)), Array2::zeros((4, 4)), Array3::zeros((2, 4, 4)))
            .unwrap();
        let prev = m.empty_local_map();
        let err = m.update(&step(&f, &prev, centre_pose(), None)).unwrap_err();
        assert!(matches!(err, MapError::ShapeMismatch { .. }));
    }

    #[test]
    fn wrong_map_layout_is_rejected() {
        let m = module(far());
        let f = frame();
        let prev = SemanticMap::new(40, 3, 2);
        assert!(m.update(&step(&f, &prev, centre_pose(), None)).is_err());
    }

    #[test]
    fn inverted_window_bounds_are_rejected() {
        let m = module(far());
        let f = frame();
        let prev = SemanticMap::new(40, 25, 2);
        let mut s = step(&f, &prev, centre_pose(), None);
        s.bounds = WindowBounds::new(240, 200, 300, 340);
        let err = m.update(&s).unwrap_err();
        assert!(matches!(err, MapError::WindowOutOfBounds { .. }), "{err}");

        s.bounds = WindowBounds::new(200, 230, 300, 340);
        let err = m.update(&s).unwrap_err();
        assert!(matches!(err, MapError::ShapeMismatch { .. }), "{err}");
    }

    // ── Monotonicity ────────────────────────────────────────────────────────

    #[test]
    fn evidence_channels_never_decrease() {
        let f = frame();
        let detections = DetectionResults::new(
            vec![Detection { class_id: 1, score: 0.9, mask: full_mask() }],
            vec![0.0, 1.0],
        );
        let mut map = SemanticMap::new(40, 25, 2);
        let mut pose = centre_pose();
        for (i, projector) in [far(), near(), far(), near()].into_iter().enumerate() {
            let m = module(projector);
            let mut s = step(&f, &map, pose, (i % 2 == 0).then_some(&detections));
            s.pose_delta = PoseDelta::new(5.0 * i as f32, 0.0, 0.1);
            let out = m.update(&s).unwrap();
            for (after, before) in evidence_planes(&out.map).iter().zip(evidence_planes(&map)) {
                Zip::from(after).and(&before).for_each(|&a, &b| assert!(a >= b));
            }
            map = out.map;
            pose = out.pose;
        }
    }

    // ── Log-odds boundedness ────────────────────────────────────────────────

    #[test]
    fn log_odds_stay_bounded_over_many_steps() {
        let f = frame();
        let detections = DetectionResults::new(
            vec![Detection { class_id: 1, score: 1.0, mask: full_mask() }],
            vec![1.0, 1.0],
        );
        let mut map = SemanticMap::new(40, 25, 2);
        for i in 0..6 {
            let m = module(if i % 3 == 0 { near() } else { far() });
            let out = m.update(&step(&f, &map, centre_pose(), Some(&detections))).unwrap();
            map = out.map;
            assert!(map.plane(Plane::Probability).iter().all(|v| (-10.0..=10.0).contains(v)));
            for cell in map.voxels().iter() {
                if let VoxelBelief::LogOdds(l) = cell {
                    assert!((-10.0..=10.0).contains(l), "voxel log-odds {l}");
                }
            }
        }
        assert!(map.plane(Plane::Probability).iter().any(|&v| v == 10.0));
    }

    // ── Sentinel preservation ───────────────────────────────────────────────

    #[test]
    fn unobserved_voxels_keep_sentinel_and_first_observation_assigns_logit() {
        let m = module(far());
        let f = frame();
        let detections = DetectionResults::new(
            vec![Detection { class_id: 1, score: 0.9, mask: full_mask() }],
            vec![0.0, 0.5],
        );
        let prev = m.empty_local_map();
        let first = m.update(&step(&f, &prev, centre_pose(), Some(&detections))).unwrap();

        let l = logit(0.45, 1e-6);
        assert_eq!(first.map.assigned_voxels(), 16);
        match first.map.voxels()[[BIN, 32, 18]] {
            VoxelBelief::LogOdds(v) => assert!((v - l).abs() < 1e-5, "v={v}"),
            other => panic!("expected assigned voxel, got {other:?}"),
        }
        assert_eq!(first.map.voxels()[[BIN - 1, 32, 18]], VoxelBelief::Unassigned);
        assert_eq!(first.map.voxels()[[BIN, 31, 18]], VoxelBelief::Unassigned);

        let second = m
            .update(&step(&f, &first.map, first.pose, Some(&detections)))
            .unwrap();
        assert_eq!(second.map.assigned_voxels(), 16);
        let prior = m.geometry().prior_logit;
        match second.map.voxels()[[BIN, 32, 18]] {
            VoxelBelief::LogOdds(v) => assert!((v - (2.0 * l - prior)).abs() < 1e-4, "v={v}"),
            other => panic!("expected assigned voxel, got {other:?}"),
        }
    }

    // ── Been-close override ─────────────────────────────────────────────────

    #[test]
    fn been_close_cells_stay_confidently_empty() {
        let f = frame();
        let detections = DetectionResults::new(
            vec![Detection { class_id: 1, score: 1.0, mask: full_mask() }],
            vec![0.0, 1.0],
        );
        let near_module = module(near());
        let prev = near_module.empty_local_map();
        let first = near_module
            .update(&step(&f, &prev, centre_pose(), Some(&detections)))
            .unwrap();
        assert_eq!(first.map.plane(Plane::BeenClose)[[22, 10 + 8]], 1.0);
        assert_eq!(first.map.plane(Plane::Probability)[[22, 18]], -10.0);

        // Strong detections from far away do not lift the override.
        let mut map = first.map;
        for _ in 0..3 {
            let out = near_module
                .update(&step(&f, &map, centre_pose(), Some(&detections)))
                .unwrap();
            map = out.map;
            Zip::from(&map.plane(Plane::BeenClose))
                .and(&map.plane(Plane::Probability))
                .for_each(|&close, &p| {
                    if close == 1.0 {
                        assert_eq!(p, -10.0);
                    }
                });
        }

        let far_out = module(far())
            .update(&step(&f, &map, centre_pose(), Some(&detections)))
            .unwrap();
        assert_eq!(far_out.map.plane(Plane::Probability)[[22, 18]], -10.0);
        assert!(far_out.map.plane(Plane::Probability)[[32, 18]] > 0.0);
    }

    // ── No-detection degeneracy ─────────────────────────────────────────────

    #[test]
    fn missing_detections_match_zero_confidence_detections() {
        let m = module(far());
        let f = frame();
        let prev = m.empty_local_map();
        let zero = DetectionResults::new(
            vec![Detection { class_id: 1, score: 0.0, mask: full_mask() }],
            vec![1.0, 1.0],
        );
        let none = m.update(&step(&f, &prev, centre_pose(), None)).unwrap();
        let zeroed = m.update(&step(&f, &prev, centre_pose(), Some(&zero))).unwrap();
        assert_eq!(none, zeroed);
        assert!(none.instances.values().all(|v| v.is_empty()));

        // Only the prior shift remains, clamped, and only where explored.
        let prob = none.map.plane(Plane::Probability);
        assert_eq!(prob[[32, 18]], -10.0);
        assert_eq!(prob.iter().filter(|&&v| v != 0.0).count(), 16);
    }

    // ── Instance grouping ───────────────────────────────────────────────────

    #[test]
    fn only_confirmed_instance_is_extracted_with_global_extent() {
        let m = module(far());
        let f = frame();
        let prev = m.empty_local_map();

        // Pixel rows 0..4, cols 0..2 → points (0..2, 0) → local rows 32..34, col 18.
        let mut confirmed = Array2::from_elem((8, 8), false);
        confirmed.slice_mut(s![0..4, 0..2]).fill(true);
        // Disjoint, below the confirm threshold.
        let mut weak = Array2::from_elem((8, 8), false);
        weak.slice_mut(s![4..8, 4..8]).fill(true);
        let detections = DetectionResults::new(
            vec![
                Detection { class_id: 1, score: 0.9, mask: confirmed },
                Detection { class_id: 0, score: 0.3, mask: weak },
            ],
            vec![0.7, 1.0],
        );
        let out = m.update(&step(&f, &prev, centre_pose(), Some(&detections))).unwrap();

        assert!(out.instances[&0].is_empty());
        let records = &out.instances[&1];
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].bbox,
            BoundingBox { row_min: 232, row_max: 233, col_min: 318, col_max: 318 }
        );
        assert_eq!(records[0].center, (232.5, 318.0));
        assert!((records[0].score - 0.9).abs() < 1e-6);
        assert_eq!(records[0].class_id, 1);
    }

    // ── Round-trip warp ─────────────────────────────────────────────────────

    #[test]
    fn zero_delta_at_stabilized_pose_is_near_identity() {
        let m = module(far());
        let geometry = m.geometry();
        let pose = apply_pose_delta(&centre_pose(), &PoseDelta::zero());
        let mut canvas = Canvas::zeros(crate::warp::canvas_layout(2, 1, 0), geometry.local_map_size);
        for ((c, r, col), v) in canvas.data.indexed_iter_mut() {
            *v = ((c * 7 + r * 3 + col) % 11) as f32 / 10.0;
        }
        let warped = StabilizingWarp::for_pose(&pose, geometry).apply(&canvas);
        Zip::from(&warped.data)
            .and(&canvas.data)
            .for_each(|&a, &b| assert!((a - b).abs() < 1e-4));
    }

    // ── Batch independence ──────────────────────────────────────────────────

    #[test]
    fn batch_matches_individual_updates() {
        let m = SemanticMapModule::new(config()).unwrap();
        let f1 = frame();
        let mut depth = Array2::from_elem((8, 8), 150.0);
        depth.slice_mut(s![4.., ..]).fill(60.0);
        let f2 = ObservationFrame::new(Array3::zeros((3, 8, 8)), depth, Array3::zeros((2, 8, 8))).unwrap();
        let detections = DetectionResults::new(
            vec![Detection { class_id: 1, score: 0.8, mask: full_mask() }],
            vec![0.0, 1.0],
        );
        let prev = m.empty_local_map();
        let a = step(&f1, &prev, centre_pose(), Some(&detections));
        let mut b = step(&f2, &prev, Pose::new(90.0, 110.0, 0.3), None);
        b.pose_delta = PoseDelta::new(10.0, -5.0, 0.2);

        let batch = m.update_batch(&[a, b]).unwrap();
        assert!(batch.instances.is_none());
        let single_a = m.update_batch(&[a]).unwrap();
        let single_b = m.update_batch(&[b]).unwrap();
        assert!(single_a.instances.is_some());
        assert_eq!(batch.agents[0], single_a.agents[0]);
        assert_eq!(batch.agents[1], single_b.agents[0]);
    }
}
