//! Synthetic replay scene: a floor, a wall ahead of the start pose and one
//! box-shaped object, ray-cast into depth and semantic frames.
//!
//! World coordinates are centimetres with the agent starting at the origin
//! facing `+y`; the camera is level at the configured height.

use ndarray::{Array2, Array3};
use polo_map::MapConfig;
use polo_perception::point_cloud::CameraIntrinsics;
use polo_types::{Detection, DetectionResults, MapError, ObservationFrame, PoseDelta};

use crate::config::SceneConfig;

/// Depth written for rays that hit nothing; beyond any sensible max depth.
const NO_HIT_CM: f32 = 1.0e4;

/// One rendered step.
#[derive(Debug, Clone)]
pub struct SceneStep {
    pub frame: ObservationFrame,
    pub pose_delta: PoseDelta,
    /// `None` when the object is out of view.
    pub detections: Option<DetectionResults>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Surface {
    Floor,
    Wall,
    Object,
}

/// Agent pose in world coordinates and the fixed scene geometry.
#[derive(Debug, Clone)]
pub struct Scene {
    config: SceneConfig,
    intrinsics: CameraIntrinsics,
    height: usize,
    width: usize,
    num_categories: usize,
    camera_height_cm: f32,
    x_cm: f32,
    y_cm: f32,
    heading_rad: f32,
}

impl Scene {
    pub fn new(config: &SceneConfig, map: &MapConfig) -> Result<Self, MapError> {
        if config.object_class >= map.num_sem_categories {
            return Err(MapError::UnknownClass {
                class_id: config.object_class,
                num_classes: map.num_sem_categories,
            });
        }
        Ok(Self {
            config: config.clone(),
            intrinsics: CameraIntrinsics::from_fov(map.frame_width, map.frame_height, map.hfov_deg),
            height: map.frame_height,
            width: map.frame_width,
            num_categories: map.num_sem_categories,
            camera_height_cm: map.camera_height_m * 100.0,
            x_cm: 0.0,
            y_cm: 0.0,
            heading_rad: std::f32::consts::FRAC_PI_2,
        })
    }

    /// Move one step and render what the agent sees from the new pose.
    pub fn advance(&mut self) -> Result<SceneStep, MapError> {
        let pose_delta = PoseDelta::new(self.config.forward_cm, 0.0, self.config.turn_deg.to_radians());
        let (sin_h, cos_h) = self.heading_rad.sin_cos();
        self.x_cm += pose_delta.dx_cm * cos_h;
        self.y_cm += pose_delta.dx_cm * sin_h;
        self.heading_rad += pose_delta.dtheta_rad;

        let (frame, object_mask) = self.render()?;
        let detections = object_mask.iter().any(|&m| m).then(|| {
            let mut relevance = vec![self.config.background_relevance; self.num_categories];
            relevance[self.config.object_class] = 1.0;
            DetectionResults::new(
                vec![Detection {
                    class_id: self.config.object_class,
                    score: self.config.detection_score,
                    mask: object_mask,
                }],
                relevance,
            )
        });
        Ok(SceneStep {
            frame,
            pose_delta,
            detections,
        })
    }

    fn render(&self) -> Result<(ObservationFrame, Array2<bool>), MapError> {
        let (h, w) = (self.height, self.width);
        let mut depth = Array2::from_elem((h, w), NO_HIT_CM);
        let mut semantic = Array3::zeros((self.num_categories, h, w));
        let mut rgb = Array3::zeros((3, h, w));
        let mut mask = Array2::from_elem((h, w), false);

        for row in 0..h {
            for col in 0..w {
                let Some((t, surface)) = self.cast(row, col) else {
                    continue;
                };
                depth[[row, col]] = t;
                let shade = match surface {
                    Surface::Floor => 0.3,
                    Surface::Wall => 0.6,
                    Surface::Object => {
                        semantic[[self.config.object_class, row, col]] = 1.0;
                        mask[[row, col]] = true;
                        0.9
                    }
                };
                for c in 0..3 {
                    rgb[[c, row, col]] = shade;
                }
            }
        }
        Ok((ObservationFrame::new(rgb, depth, semantic)?, mask))
    }

    /// Nearest hit along the ray through pixel `(row, col)`. The ray has
    /// unit forward component, so the hit distance is the optical depth.
    fn cast(&self, row: usize, col: usize) -> Option<(f32, Surface)> {
        let k = &self.intrinsics;
        let lateral = (col as f32 - k.xc) / k.focal;
        let up = ((self.height - 1 - row) as f32 - k.zc) / k.focal;
        let (sin_h, cos_h) = self.heading_rad.sin_cos();
        // Right-hand side of the heading is (sin h, -cos h).
        let dir = [
            cos_h + lateral * sin_h,
            sin_h - lateral * cos_h,
            up,
        ];
        let origin = [self.x_cm, self.y_cm, self.camera_height_cm];

        let mut best: Option<(f32, Surface)> = None;
        let mut consider = |t: f32, surface: Surface| {
            if t > 0.0 && best.is_none_or(|(b, _)| t < b) {
                best = Some((t, surface));
            }
        };

        if dir[2] < 0.0 {
            consider(-origin[2] / dir[2], Surface::Floor);
        }
        if dir[1] > 0.0 {
            let t = (self.config.wall_distance_cm - origin[1]) / dir[1];
            let z = origin[2] + t * dir[2];
            if (0.0..=self.config.wall_height_cm).contains(&z) {
                consider(t, Surface::Wall);
            }
        }
        let (ox, oy) = self.config.object_offset_cm;
        let s = self.config.object_half_width_cm;
        let lo = [ox - s, oy - s, 0.0];
        let hi = [ox + s, oy + s, self.config.object_height_cm];
        if let Some(t) = slab_hit(origin, dir, lo, hi) {
            consider(t, Surface::Object);
        }
        best
    }
}

/// Entry distance of a ray into an axis-aligned box.
fn slab_hit(origin: [f32; 3], dir: [f32; 3], lo: [f32; 3], hi: [f32; 3]) -> Option<f32> {
    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    for axis in 0..3 {
        if dir[axis].abs() < 1e-9 {
            if origin[axis] < lo[axis] || origin[axis] > hi[axis] {
                return None;
            }
            continue;
        }
        let a = (lo[axis] - origin[axis]) / dir[axis];
        let b = (hi[axis] - origin[axis]) / dir[axis];
        t_near = t_near.max(a.min(b));
        t_far = t_far.min(a.max(b));
    }
    (t_near <= t_far && t_near > 0.0).then_some(t_near)
}
