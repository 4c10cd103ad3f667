//! Depth → point cloud.
//!
//! The map update consumes a [`PointCloudProjector`]: anything that turns a
//! depth plane and the camera extrinsics into one base-frame point per
//! (subsampled) pixel. [`PinholeProjector`] is the default, built from the
//! frame size and horizontal field of view.
//!
//! Points are produced on the subsampled pixel grid in row-major order, which
//! is the same order the feature assembler uses for its per-point features.

use ndarray::{Array2, ArrayView2};
use polo_map::config::MapConfig;
use polo_types::MapError;

use crate::transform::CameraExtrinsics;

// ────────────────────────────────────────────────────────────────────────────
// PointCloud
// ────────────────────────────────────────────────────────────────────────────

/// Base-frame points on a `rows × cols` pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    /// `(rows · cols, 3)` as `[x lateral, y forward, z up]` in centimetres.
    pub points: Array2<f32>,
    pub rows: usize,
    pub cols: usize,
}

impl PointCloud {
    pub fn new(points: Array2<f32>, rows: usize, cols: usize) -> Result<Self, MapError> {
        if points.dim() != (rows * cols, 3) {
            return Err(MapError::shape("point cloud", (rows * cols, 3), points.dim()));
        }
        Ok(Self { points, rows, cols })
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }
}

/// Depth plane + extrinsics → base-frame point cloud.
///
/// Implementations zero depth beyond their maximum range (no return) and
/// must be usable from several threads at once.
pub trait PointCloudProjector: Send + Sync {
    fn project(
        &self,
        depth: ArrayView2<'_, f32>,
        extrinsics: &CameraExtrinsics,
    ) -> Result<PointCloud, MapError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PinholeProjector
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole intrinsics with square pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Horizontal principal point (pixels).
    pub xc: f32,
    /// Vertical principal point (pixels).
    pub zc: f32,
    /// Focal length (pixels).
    pub focal: f32,
}

impl CameraIntrinsics {
    pub fn from_fov(width: usize, height: usize, hfov_deg: f32) -> Self {
        Self {
            xc: (width as f32 - 1.0) / 2.0,
            zc: (height as f32 - 1.0) / 2.0,
            focal: (width as f32 / 2.0) / (hfov_deg.to_radians() / 2.0).tan(),
        }
    }
}

/// Back-projects every `stride`-th pixel through a pinhole camera.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeProjector {
    pub intrinsics: CameraIntrinsics,
    pub stride: usize,
    pub max_depth_cm: f32,
}

impl PinholeProjector {
    pub fn from_config(config: &MapConfig) -> Result<Self, MapError> {
        let geometry = config.geometry()?;
        Ok(Self {
            intrinsics: CameraIntrinsics::from_fov(
                config.frame_width,
                config.frame_height,
                config.hfov_deg,
            ),
            stride: config.du_scale,
            max_depth_cm: geometry.max_depth_cm,
        })
    }
}

impl PointCloudProjector for PinholeProjector {
    fn project(
        &self,
        depth: ArrayView2<'_, f32>,
        extrinsics: &CameraExtrinsics,
    ) -> Result<PointCloud, MapError> {
        let (h, w) = depth.dim();
        if self.stride == 0 || h % self.stride != 0 || w % self.stride != 0 {
            return Err(MapError::shape(
                "depth plane",
                format!("multiples of {}", self.stride),
                (h, w),
            ));
        }
        let rows = h / self.stride;
        let cols = w / self.stride;
        let CameraIntrinsics { xc, zc, focal } = self.intrinsics;

        let mut points = Array2::zeros((rows * cols, 3));
        for (i, mut point) in points.outer_iter_mut().enumerate() {
            let row = (i / cols) * self.stride;
            let col = (i % cols) * self.stride;
            let mut d = depth[[row, col]];
            if d > self.max_depth_cm {
                d = 0.0;
            }
            // Image rows grow downward; camera z grows upward.
            let up = (h - 1 - row) as f32;
            let camera = [
                (col as f32 - xc) * d / focal,
                d,
                (up - zc) * d / focal,
            ];
            let base = extrinsics.camera_to_base(camera);
            point[0] = base[0];
            point[1] = base[1];
            point[2] = base[2];
        }
        PointCloud::new(points, rows, cols)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> PinholeProjector {
        PinholeProjector {
            intrinsics: CameraIntrinsics::from_fov(4, 4, 90.0),
            stride: 1,
            max_depth_cm: 500.0,
        }
    }

    #[test]
    fn intrinsics_from_fov() {
        let k = CameraIntrinsics::from_fov(640, 480, 90.0);
        assert!((k.xc - 319.5).abs() < 1e-5);
        assert!((k.zc - 239.5).abs() < 1e-5);
        assert!((k.focal - 320.0).abs() < 1e-3);
    }

    #[test]
    fn level_camera_keeps_depth_as_forward_distance() {
        let depth = Array2::from_elem((4, 4), 200.0);
        let cloud = projector()
            .project(depth.view(), &CameraExtrinsics::level(100.0))
            .unwrap();
        assert_eq!(cloud.len(), 16);
        for p in cloud.points.outer_iter() {
            assert!((p[1] - 200.0).abs() < 1e-4);
        }
        // Top-left pixel: left of centre and above the camera.
        let tl = cloud.points.row(0);
        assert!(tl[0] < 0.0);
        assert!(tl[2] > 100.0);
        // Bottom-right pixel: right of centre and below the camera.
        let br = cloud.points.row(15);
        assert!(br[0] > 0.0);
        assert!(br[2] < 100.0);
        // f = 2 for a 4-wide 90° frame: (3 - 1.5) · 200 / 2.
        assert!((br[0] - 150.0).abs() < 1e-3);
    }

    #[test]
    fn depth_beyond_range_collapses_to_camera() {
        let mut depth = Array2::from_elem((4, 4), 100.0);
        depth[[0, 0]] = 900.0;
        let cloud = projector()
            .project(depth.view(), &CameraExtrinsics::level(88.0))
            .unwrap();
        let p = cloud.points.row(0);
        assert_eq!([p[0], p[1]], [0.0, 0.0]);
        assert!((p[2] - 88.0).abs() < 1e-5);
    }

    #[test]
    fn stride_subsamples_grid() {
        let proj = PinholeProjector {
            stride: 2,
            ..projector()
        };
        let depth = Array2::from_elem((4, 4), 50.0);
        let cloud = proj.project(depth.view(), &CameraExtrinsics::level(0.0)).unwrap();
        assert_eq!((cloud.rows, cloud.cols), (2, 2));
        assert_eq!(cloud.len(), 4);
    }

    #[test]
    fn stride_must_divide_frame() {
        let proj = PinholeProjector {
            stride: 3,
            ..projector()
        };
        let depth = Array2::zeros((4, 4));
        assert!(proj.project(depth.view(), &CameraExtrinsics::level(0.0)).is_err());
    }

    #[test]
    fn point_cloud_rejects_wrong_shape() {
        assert!(PointCloud::new(Array2::zeros((5, 3)), 2, 2).is_err());
    }
}
