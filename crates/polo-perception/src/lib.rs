//! `polo-perception` – the per-step update of a probabilistic semantic map.
//!
//! One RGB-D frame with per-pixel class scores, optional instance
//! detections and the agent's odometry become an updated egocentric local
//! map, an updated pose and the confirmed object instances in global map
//! cells.
//!
//! # Modules
//!
//! | Module | Stage |
//! |---|---|
//! | [`transform`] | Pose integration and camera tilt/height ([`CameraExtrinsics`][transform::CameraExtrinsics]) |
//! | [`point_cloud`] | Depth → agent-frame points ([`PinholeProjector`][point_cloud::PinholeProjector]) |
//! | [`features`] | Per-point presence, semantic, probability and instance features |
//! | [`voxel`] | Splatting into the voxel grid and column projection |
//! | [`warp`] | Egocentric canvas and the two-pass stabilising warp |
//! | [`fusion`] | Max / log-odds fusion into the previous map ([`BayesianFuser`][fusion::BayesianFuser]) |
//! | [`instances`] | Bounding boxes and centres of confirmed instances |
//! | [`map_module`] | [`SemanticMapModule`][map_module::SemanticMapModule], chaining the stages |
//!
//! # Example
//!
//! ```rust
//! use polo_map::config::MapConfig;
//! use polo_perception::map_module::{AgentStep, SemanticMapModule};
//! use polo_types::{ObservationFrame, Pose, PoseDelta, WindowBounds};
//! use ndarray::{Array2, Array3};
//!
//! let config = MapConfig {
//!     frame_height: 8,
//!     frame_width: 8,
//!     du_scale: 2,
//!     num_sem_categories: 2,
//!     map_size_cm: 400,
//!     vision_range: 20,
//!     ..MapConfig::default()
//! };
//! let module = SemanticMapModule::new(config).unwrap();
//! let frame = ObservationFrame::new(
//!     Array3::zeros((3, 8, 8)),
//!     Array2::from_elem((8, 8), 120.0),
//!     Array3::zeros((2, 8, 8)),
//! )
//! .unwrap();
//! let prev = module.empty_local_map();
//! let out = module
//!     .update(&AgentStep {
//!         frame: &frame,
//!         pose_delta: PoseDelta::new(10.0, 0.0, 0.0),
//!         camera_pose: None,
//!         prev_map: &prev,
//!         prev_pose: Pose::new(100.0, 100.0, std::f32::consts::FRAC_PI_2),
//!         detections: None,
//!         bounds: WindowBounds::new(0, 40, 0, 40),
//!     })
//!     .unwrap();
//! assert!((out.pose.y_cm - 110.0).abs() < 1e-3);
//! ```

pub mod features;
pub mod fusion;
pub mod instances;
pub mod map_module;
pub mod point_cloud;
pub mod transform;
pub mod voxel;
pub mod warp;

pub use map_module::{AgentStep, AgentUpdate, BatchOutput, SemanticMapModule, Stage, StageObserver, StepOutput};
