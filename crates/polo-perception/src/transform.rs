//! Frame algebra.
//!
//! Three frames appear in one map update:
//!
//! | Frame | Axes | Units |
//! |---|---|---|
//! | camera | x right, y forward (depth), z up in the image plane | cm |
//! | base | gravity-aligned: x lateral, y forward, z up from the floor | cm |
//! | map pose | planar `(x, y, heading)` in the local map | cm, rad |
//!
//! [`CameraExtrinsics`] carries the camera tilt and height needed to go from
//! camera to base coordinates; it is read off an optional 4×4 camera pose or
//! falls back to a configured height with zero tilt. [`apply_pose_delta`]
//! composes an egomotion estimate onto the previous pose.
//!
//! # Example
//!
//! ```rust
//! use polo_perception::transform::{apply_pose_delta, CameraExtrinsics};
//! use polo_types::{Pose, PoseDelta};
//!
//! // Drive 10 cm forward while facing +y.
//! let pose = Pose::new(0.0, 0.0, std::f32::consts::FRAC_PI_2);
//! let next = apply_pose_delta(&pose, &PoseDelta::new(10.0, 0.0, 0.0));
//! assert!((next.y_cm - 10.0).abs() < 1e-4);
//!
//! let ext = CameraExtrinsics::level(88.0);
//! let p = ext.camera_to_base([0.0, 100.0, 0.0]);
//! assert!((p[2] - 88.0).abs() < 1e-4);
//! ```

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use polo_types::{CameraPose, Pose, PoseDelta, wrap_angle};

// ────────────────────────────────────────────────────────────────────────────
// Pose composition
// ────────────────────────────────────────────────────────────────────────────

/// `pose ⊕ delta`: the delta is expressed in the frame of `pose` (forward,
/// left, turn). The heading is wrapped to `[-π, π)`.
pub fn apply_pose_delta(pose: &Pose, delta: &PoseDelta) -> Pose {
    let (sin_h, cos_h) = pose.heading_rad.sin_cos();
    Pose::new(
        pose.x_cm + delta.dx_cm * cos_h - delta.dy_cm * sin_h,
        pose.y_cm + delta.dx_cm * sin_h + delta.dy_cm * cos_h,
        wrap_angle(pose.heading_rad + delta.dtheta_rad),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// CameraExtrinsics
// ────────────────────────────────────────────────────────────────────────────

/// Camera tilt and height above the floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraExtrinsics {
    /// Rotation about the lateral axis; positive looks up (radians).
    pub tilt_rad: f32,
    /// Height of the optical centre above the floor (centimetres).
    pub height_cm: f32,
}

impl CameraExtrinsics {
    /// A level camera at `height_cm`.
    pub fn level(height_cm: f32) -> Self {
        Self {
            tilt_rad: 0.0,
            height_cm,
        }
    }

    /// Tilt is the pitch of the `z-y-x` Euler decomposition of the rotation
    /// block; height is the z translation, converted from metres.
    pub fn from_camera_pose(pose: &CameraPose) -> Self {
        let m = Matrix4::from_fn(|r, c| pose.0[r][c]);
        let block: Matrix3<f32> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let (_roll, pitch, _yaw) = Rotation3::from_matrix(&block).euler_angles();
        Self {
            tilt_rad: pitch,
            height_cm: m[(2, 3)] * 100.0,
        }
    }

    /// Use `camera_pose` when present, else a level camera at
    /// `default_height_cm`.
    pub fn resolve(camera_pose: Option<&CameraPose>, default_height_cm: f32) -> Self {
        camera_pose
            .map(Self::from_camera_pose)
            .unwrap_or_else(|| Self::level(default_height_cm))
    }

    pub fn tilt_rotation(&self) -> Rotation3<f32> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), self.tilt_rad)
    }

    /// Camera-frame point → base-frame point: rotate by the tilt, then lift
    /// by the camera height.
    pub fn camera_to_base(&self, point: [f32; 3]) -> [f32; 3] {
        let p = self.tilt_rotation() * Vector3::from(point);
        [p.x, p.y, p.z + self.height_cm]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
