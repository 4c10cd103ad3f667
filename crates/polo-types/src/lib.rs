//! `polo-types` – shared vocabulary of the POLo semantic mapping stack.
//!
//! Every crate in the workspace speaks in these types: agent poses and
//! egomotion increments, the per-step observation frame, instance detections,
//! the instance records extracted from the map, local-window bounds, and the
//! single [`MapError`] enum used to reject malformed inputs.

use std::collections::BTreeMap;
use std::f32::consts::{PI, TAU};
use std::fmt::Debug;
use std::ops::{Add, Sub};

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Poses
// ────────────────────────────────────────────────────────────────────────────

/// Agent pose on the ground plane.
///
/// Positions are centimetres, heading is radians measured counter-clockwise
/// from the map +x axis and kept in `[-π, π)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x_cm: f32,
    pub y_cm: f32,
    pub heading_rad: f32,
}

impl Pose {
    pub fn new(x_cm: f32, y_cm: f32, heading_rad: f32) -> Self {
        Self {
            x_cm,
            y_cm,
            heading_rad,
        }
    }
}

/// Component-wise sum, used to lift a window-relative pose into the global
/// map (`global = local + origin`).
impl Add for Pose {
    type Output = Pose;

    fn add(self, rhs: Pose) -> Pose {
        Pose::new(
            self.x_cm + rhs.x_cm,
            self.y_cm + rhs.y_cm,
            self.heading_rad + rhs.heading_rad,
        )
    }
}

/// Component-wise difference (`local = global - origin`).
impl Sub for Pose {
    type Output = Pose;

    fn sub(self, rhs: Pose) -> Pose {
        Pose::new(
            self.x_cm - rhs.x_cm,
            self.y_cm - rhs.y_cm,
            self.heading_rad - rhs.heading_rad,
        )
    }
}

/// Incremental motion since the previous step, expressed in the agent frame
/// at the previous step: `dx_cm` along the heading, `dy_cm` to its left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseDelta {
    pub dx_cm: f32,
    pub dy_cm: f32,
    pub dtheta_rad: f32,
}

impl PoseDelta {
    pub fn new(dx_cm: f32, dy_cm: f32, dtheta_rad: f32) -> Self {
        Self {
            dx_cm,
            dy_cm,
            dtheta_rad,
        }
    }

    /// No motion.
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Wrap an angle into `[-π, π)`.
pub fn wrap_angle(rad: f32) -> f32 {
    (rad + PI).rem_euclid(TAU) - PI
}

/// Absolute camera pose as a row-major 4×4 rigid transform.
///
/// The rotation block gives the camera orientation relative to gravity; the
/// translation column is in metres (the z component is the camera height).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose(pub [[f32; 4]; 4]);

impl CameraPose {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self(m)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Observation frame
// ────────────────────────────────────────────────────────────────────────────

/// One aligned RGB + depth + semantic frame for a single agent.
///
/// `depth` is in centimetres; `semantic` holds one score plane per category.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationFrame {
    rgb: Array3<f32>,
    depth: Array2<f32>,
    semantic: Array3<f32>,
}

impl ObservationFrame {
    /// Assemble a frame from its parts, checking that every plane shares the
    /// same height and width.
    pub fn new(rgb: Array3<f32>, depth: Array2<f32>, semantic: Array3<f32>) -> Result<Self, MapError> {
        let (h, w) = depth.dim();
        let (rgb_c, rgb_h, rgb_w) = rgb.dim();
        if rgb_c != 3 || rgb_h != h || rgb_w != w {
            return Err(MapError::shape("rgb plane", (3, h, w), rgb.dim()));
        }
        let (_, sem_h, sem_w) = semantic.dim();
        if sem_h != h || sem_w != w {
            return Err(MapError::shape(
                "semantic planes",
                (semantic.dim().0, h, w),
                semantic.dim(),
            ));
        }
        Ok(Self { rgb, depth, semantic })
    }

    /// Split a stacked `[rgb(3), depth(1), semantic(C)]` frame.
    pub fn from_stacked(frame: Array3<f32>) -> Result<Self, MapError> {
        let channels = frame.len_of(Axis(0));
        if channels < 4 {
            return Err(MapError::shape("stacked frame channels", ">= 4", channels));
        }
        let rgb = frame.slice(s![0..3, .., ..]).to_owned();
        let depth = frame.index_axis(Axis(0), 3).to_owned();
        let semantic = frame.slice(s![4.., .., ..]).to_owned();
        Self::new(rgb, depth, semantic)
    }

    pub fn height(&self) -> usize {
        self.depth.nrows()
    }

    pub fn width(&self) -> usize {
        self.depth.ncols()
    }

    pub fn num_categories(&self) -> usize {
        self.semantic.len_of(Axis(0))
    }

    pub fn rgb(&self) -> ArrayView3<'_, f32> {
        self.rgb.view()
    }

    pub fn depth(&self) -> ArrayView2<'_, f32> {
        self.depth.view()
    }

    pub fn semantic(&self) -> ArrayView3<'_, f32> {
        self.semantic.view()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detections
// ────────────────────────────────────────────────────────────────────────────

/// A single instance detection on the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    /// Detector confidence in `[0, 1]`.
    pub score: f32,
    /// Full-resolution binary pixel mask.
    pub mask: Array2<bool>,
}

/// All detections for one agent on one step, plus the per-class relevance
/// weights used to turn detector confidence into object probability.
///
/// The detection count is free to change between steps; instances are not
/// tracked across steps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResults {
    pub detections: Vec<Detection>,
    /// `relevance[class_id]` scales the confidence of that class.
    pub relevance: Vec<f32>,
}

impl DetectionResults {
    pub fn new(detections: Vec<Detection>, relevance: Vec<f32>) -> Self {
        Self {
            detections,
            relevance,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Relevance weight for `class_id`.
    pub fn relevance_of(&self, class_id: usize) -> Result<f32, MapError> {
        self.relevance
            .get(class_id)
            .copied()
            .ok_or(MapError::UnknownClass {
                class_id,
                num_classes: self.relevance.len(),
            })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Map windows and instances
// ────────────────────────────────────────────────────────────────────────────

/// Half-open bounds of the local window inside the global map, in global
/// cells: rows `[row_start, row_end)`, columns `[col_start, col_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowBounds {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl WindowBounds {
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    /// `false` when an end lies before its start.
    pub fn is_ordered(&self) -> bool {
        self.row_start <= self.row_end && self.col_start <= self.col_end
    }

    /// Row extent; zero for an inverted window.
    pub fn rows(&self) -> usize {
        self.row_end.saturating_sub(self.row_start)
    }

    /// Column extent; zero for an inverted window.
    pub fn cols(&self) -> usize {
        self.col_end.saturating_sub(self.col_start)
    }
}

/// Axis-aligned, inclusive bounding box in global map cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

/// One confirmed instance located in the map on the current step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub bbox: BoundingBox,
    /// Box centre as `(row, col)` in global map cells.
    pub center: (f32, f32),
    pub score: f32,
    pub class_id: usize,
}

/// Instances of the current step grouped by class id.
pub type InstanceDict = BTreeMap<usize, Vec<InstanceRecord>>;

/// A dictionary with an empty list for every category.
pub fn empty_instance_dict(num_categories: usize) -> InstanceDict {
    (0..num_categories).map(|c| (c, Vec::new())).collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Errors raised when inputs violate the fixed-shape contract of the map
/// pipeline. Numeric edge cases (no-return depth, out-of-range points,
/// saturated probabilities) are never errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("Invalid map configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch on {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Detection class {class_id} has no relevance weight ({num_classes} classes configured)")]
    UnknownClass { class_id: usize, num_classes: usize },

    #[error("Window {bounds:?} does not fit inside a {rows}x{cols} map")]
    WindowOutOfBounds {
        bounds: WindowBounds,
        rows: usize,
        cols: usize,
    },
}

impl MapError {
    /// Build a [`MapError::ShapeMismatch`] from any two debuggable shapes.
    pub fn shape(what: &str, expected: impl Debug, actual: impl Debug) -> Self {
        MapError::ShapeMismatch {
            what: what.to_string(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_add_sub_are_inverse() {
        let local = Pose::new(120.0, -40.0, 0.5);
        let origin = Pose::new(600.0, 800.0, 0.0);
        let global = local + origin;
        assert!((global.x_cm - 720.0).abs() < 1e-4);
        let back = global - origin;
        assert!((back.y_cm + 40.0).abs() < 1e-4);
        assert!((back.heading_rad - 0.5).abs() < 1e-6);
    }

    #[test]
    fn wrap_angle_stays_in_half_open_range() {
        assert!((wrap_angle(0.0)).abs() < 1e-6);
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((wrap_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-5);
        assert!((wrap_angle(PI) + PI).abs() < 1e-5);
    }

    #[test]
    fn stacked_frame_is_split_by_channel() {
        let mut stacked = Array3::<f32>::zeros((6, 4, 5));
        stacked.index_axis_mut(Axis(0), 3).fill(150.0);
        stacked.index_axis_mut(Axis(0), 5).fill(0.7);
        let frame = ObservationFrame::from_stacked(stacked).unwrap();
        assert_eq!(frame.height(), 4);
        assert_eq!(frame.width(), 5);
        assert_eq!(frame.num_categories(), 2);
        assert!((frame.depth()[[2, 2]] - 150.0).abs() < 1e-6);
        assert!((frame.semantic()[[1, 0, 0]] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn frame_rejects_misaligned_planes() {
        let err = ObservationFrame::new(
            Array3::zeros((3, 4, 4)),
            Array2::zeros((4, 5)),
            Array3::zeros((1, 4, 5)),
        )
        .unwrap_err();
        assert!(matches!(err, MapError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("rgb plane"));
    }

    #[test]
    fn stacked_frame_needs_depth_channel() {
        let err = ObservationFrame::from_stacked(Array3::zeros((3, 2, 2))).unwrap_err();
        assert!(matches!(err, MapError::ShapeMismatch { .. }));
    }

    #[test]
    fn relevance_lookup_rejects_unknown_class() {
        let results = DetectionResults::new(Vec::new(), vec![0.0, 1.0, 0.7]);
        assert!((results.relevance_of(2).unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(
            results.relevance_of(5),
            Err(MapError::UnknownClass {
                class_id: 5,
                num_classes: 3
            })
        );
    }

    #[test]
    fn empty_instance_dict_has_every_category() {
        let dict = empty_instance_dict(4);
        assert_eq!(dict.len(), 4);
        assert!(dict.values().all(Vec::is_empty));
    }

    #[test]
    fn instance_record_roundtrip() {
        let record = InstanceRecord {
            bbox: BoundingBox {
                row_min: 10,
                row_max: 12,
                col_min: 3,
                col_max: 8,
            },
            center: (11.0, 5.5),
            score: 0.9,
            class_id: 1,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: InstanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn window_bounds_extent() {
        let b = WindowBounds::new(20, 60, 5, 45);
        assert_eq!(b.rows(), 40);
        assert_eq!(b.cols(), 40);
        assert!(b.is_ordered());
    }

    #[test]
    fn inverted_window_has_no_extent() {
        let b = WindowBounds::new(240, 200, 300, 340);
        assert!(!b.is_ordered());
        assert_eq!(b.rows(), 0);
        assert_eq!(b.cols(), 40);
    }
}
