//! Map configuration and the geometry derived from it.
//!
//! [`MapConfig`] is the user-facing, serde-deserialisable parameter set.
//! [`MapConfig::geometry`] validates it once and derives every constant the
//! per-step pipeline needs ([`MapGeometry`]): map sizes in cells, the
//! height-bin indices that split the voxel column into ground / obstacle /
//! mapped bands, the close-range row cutoff, and the prior log-odds.
//!
//! # Height bins
//!
//! The vertical span `[voxel_min_height_cm, voxel_max_height_cm)` is cut into
//! bins of `map_resolution_cm`. Bin indices are offset so that bin 0 is the
//! lowest bin:
//!
//! ```text
//! bin(z) = floor(z / res) - floor_toward_zero(voxel_min_height_cm / res)
//! ```
//!
//! | Band | Bins |
//! |---|---|
//! | explored   | all bins |
//! | obstacle   | `[min_obstacle_bin, max_mapped_bin)` |
//! | semantic   | `[ground_exclusion_bin, max_mapped_bin)` |
//! | voxel maps | `[0, max_mapped_bin)` |

use polo_types::MapError;
use serde::{Deserialize, Serialize};

use crate::log_odds::logit;

// ────────────────────────────────────────────────────────────────────────────
// MapConfig
// ────────────────────────────────────────────────────────────────────────────

/// Parameters of the semantic map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// First-person frame height in pixels.
    #[serde(default = "default_frame_height")]
    pub frame_height: usize,

    /// First-person frame width in pixels.
    #[serde(default = "default_frame_width")]
    pub frame_width: usize,

    /// Camera height above the floor (metres), used when no camera pose is
    /// supplied and to size the voxel maps.
    #[serde(default = "default_camera_height")]
    pub camera_height_m: f32,

    /// Horizontal field of view (degrees).
    #[serde(default = "default_hfov")]
    pub hfov_deg: f32,

    /// Number of semantic categories in the segmentation planes.
    #[serde(default = "default_num_sem_categories")]
    pub num_sem_categories: usize,

    /// Side length of the global map (centimetres).
    #[serde(default = "default_map_size")]
    pub map_size_cm: usize,

    /// Size of one map cell and one height bin (centimetres).
    #[serde(default = "default_map_resolution")]
    pub map_resolution_cm: usize,

    /// Side length of the egocentric grid (cells).
    #[serde(default = "default_vision_range")]
    pub vision_range: usize,

    /// Ratio of global over local map size.
    #[serde(default = "default_global_downscaling")]
    pub global_downscaling: usize,

    /// Frame downscaling before projecting to a point cloud.
    #[serde(default = "default_du_scale")]
    pub du_scale: usize,

    /// Points per column to mark a cell as a semantic category.
    #[serde(default = "default_cat_pred_threshold")]
    pub cat_pred_threshold: f32,

    /// Points per column to mark a cell as explored.
    #[serde(default = "default_exp_pred_threshold")]
    pub exp_pred_threshold: f32,

    /// Points per column to mark a cell as an obstacle.
    #[serde(default = "default_map_pred_threshold")]
    pub map_pred_threshold: f32,

    /// Depth beyond this is treated as no return (metres).
    #[serde(default = "default_max_depth")]
    pub max_depth_m: f32,

    /// Minimum height of obstacles (centimetres).
    #[serde(default)]
    pub min_obs_height_cm: i32,

    /// Dilate the obstacle evidence with a square box kernel.
    #[serde(default = "default_true")]
    pub dilate_obstacles: bool,

    /// Side of the dilation kernel (cells).
    #[serde(default = "default_dilate_size")]
    pub dilate_size: usize,

    /// Prior probability that a cell holds the goal object.
    #[serde(default = "default_probability_prior")]
    pub probability_prior: f32,

    /// Distance in front of the agent inside which observations count as
    /// "been close" (centimetres).
    #[serde(default = "default_close_range")]
    pub close_range_cm: usize,

    /// Detections scoring above this get their own instance channel.
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: f32,

    /// Symmetric clamp applied to every log-odds value.
    #[serde(default = "default_log_odds_bound")]
    pub log_odds_bound: f32,

    /// Epsilon used when taking the logit of a probability.
    #[serde(default = "default_logit_eps")]
    pub logit_eps: f32,

    /// Half-width of the square current-location marker (cells).
    #[serde(default = "default_location_half_width")]
    pub location_half_width: usize,

    /// Bottom of the voxel column, relative to the floor (centimetres).
    #[serde(default = "default_voxel_min_height")]
    pub voxel_min_height_cm: i32,

    /// Top of the voxel column, relative to the floor (centimetres).
    #[serde(default = "default_voxel_max_height")]
    pub voxel_max_height_cm: i32,

    /// Heights below this are treated as floor for semantic evidence
    /// (centimetres).
    #[serde(default = "default_ground_exclusion")]
    pub ground_exclusion_cm: i32,
}

fn default_frame_height() -> usize {
    480
}
fn default_frame_width() -> usize {
    640
}
fn default_camera_height() -> f32 {
    0.88
}
fn default_hfov() -> f32 {
    79.0
}
fn default_num_sem_categories() -> usize {
    5
}
fn default_map_size() -> usize {
    4800
}
fn default_map_resolution() -> usize {
    5
}
fn default_vision_range() -> usize {
    100
}
fn default_global_downscaling() -> usize {
    2
}
fn default_du_scale() -> usize {
    4
}
fn default_cat_pred_threshold() -> f32 {
    5.0
}
fn default_exp_pred_threshold() -> f32 {
    1.0
}
fn default_map_pred_threshold() -> f32 {
    1.0
}
fn default_max_depth() -> f32 {
    5.0
}
fn default_true() -> bool {
    true
}
fn default_dilate_size() -> usize {
    3
}
fn default_probability_prior() -> f32 {
    0.2
}
fn default_close_range() -> usize {
    150
}
fn default_confirm_threshold() -> f32 {
    0.5
}
fn default_log_odds_bound() -> f32 {
    10.0
}
fn default_logit_eps() -> f32 {
    1e-6
}
fn default_location_half_width() -> usize {
    2
}
fn default_voxel_min_height() -> i32 {
    -40
}
fn default_voxel_max_height() -> i32 {
    360
}
fn default_ground_exclusion() -> i32 {
    20
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            frame_height: default_frame_height(),
            frame_width: default_frame_width(),
            camera_height_m: default_camera_height(),
            hfov_deg: default_hfov(),
            num_sem_categories: default_num_sem_categories(),
            map_size_cm: default_map_size(),
            map_resolution_cm: default_map_resolution(),
            vision_range: default_vision_range(),
            global_downscaling: default_global_downscaling(),
            du_scale: default_du_scale(),
            cat_pred_threshold: default_cat_pred_threshold(),
            exp_pred_threshold: default_exp_pred_threshold(),
            map_pred_threshold: default_map_pred_threshold(),
            max_depth_m: default_max_depth(),
            min_obs_height_cm: 0,
            dilate_obstacles: default_true(),
            dilate_size: default_dilate_size(),
            probability_prior: default_probability_prior(),
            close_range_cm: default_close_range(),
            confirm_threshold: default_confirm_threshold(),
            log_odds_bound: default_log_odds_bound(),
            logit_eps: default_logit_eps(),
            location_half_width: default_location_half_width(),
            voxel_min_height_cm: default_voxel_min_height(),
            voxel_max_height_cm: default_voxel_max_height(),
            ground_exclusion_cm: default_ground_exclusion(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MapGeometry
// ────────────────────────────────────────────────────────────────────────────

/// Validated constants derived from a [`MapConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct MapGeometry {
    /// Cell size in x, y and z (centimetres).
    pub resolution_cm: f32,
    /// Side of the local map (cells).
    pub local_map_size: usize,
    /// Side of the global map (cells).
    pub global_map_size: usize,
    /// Side of the egocentric grid (cells).
    pub vision_range: usize,
    /// Lowest height bin before offsetting (may be negative).
    pub min_voxel_bin: i32,
    /// One past the highest height bin before offsetting.
    pub max_voxel_bin: i32,
    /// Number of height bins in the voxel grid.
    pub num_height_bins: usize,
    /// First bin of the obstacle band.
    pub min_obstacle_bin: usize,
    /// First bin above the floor.
    pub ground_exclusion_bin: usize,
    /// One past the last mapped bin; also the number of voxel map channels.
    pub max_mapped_bin: usize,
    /// Default camera height (centimetres).
    pub agent_height_cm: f32,
    /// No-return cutoff (centimetres).
    pub max_depth_cm: f32,
    /// Egocentric rows at or beyond this index are not "close".
    pub close_range_rows: usize,
    /// `logit(probability_prior)`.
    pub prior_logit: f32,
    /// Top-left `(row, col)` of the egocentric grid inside the local canvas.
    pub canvas_origin: (usize, usize),
}

impl MapGeometry {
    /// Side of the local canvas halved: the agent's cell on the canvas.
    pub fn canvas_center(&self) -> usize {
        self.local_map_size / 2
    }
}

impl MapConfig {
    /// Validate the configuration and derive the pipeline geometry.
    pub fn geometry(&self) -> Result<MapGeometry, MapError> {
        let invalid = |msg: String| Err(MapError::InvalidConfig(msg));

        if self.map_resolution_cm == 0 {
            return invalid("map_resolution_cm must be positive".to_string());
        }
        if self.global_downscaling == 0 {
            return invalid("global_downscaling must be positive".to_string());
        }
        if self.du_scale == 0
            || self.frame_height % self.du_scale != 0
            || self.frame_width % self.du_scale != 0
        {
            return invalid(format!(
                "frame {}x{} is not divisible by du_scale {}",
                self.frame_height, self.frame_width, self.du_scale
            ));
        }
        if self.vision_range == 0 {
            return invalid("vision_range must be positive".to_string());
        }
        for (name, value) in [
            ("cat_pred_threshold", self.cat_pred_threshold),
            ("exp_pred_threshold", self.exp_pred_threshold),
            ("map_pred_threshold", self.map_pred_threshold),
            ("log_odds_bound", self.log_odds_bound),
        ] {
            if !(value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if !(self.probability_prior > 0.0 && self.probability_prior < 1.0) {
            return invalid(format!(
                "probability_prior must lie in (0, 1), got {}",
                self.probability_prior
            ));
        }
        if !(self.logit_eps > 0.0 && self.logit_eps < 0.5) {
            return invalid(format!("logit_eps must lie in (0, 0.5), got {}", self.logit_eps));
        }

        let res = self.map_resolution_cm as f32;
        let global_map_size = self.map_size_cm / self.map_resolution_cm;
        let local_map_size = self.map_size_cm / self.global_downscaling / self.map_resolution_cm;
        if self.vision_range > local_map_size / 2 {
            return invalid(format!(
                "vision_range {} does not fit in half of the {local_map_size}-cell local map",
                self.vision_range
            ));
        }

        // Truncation toward zero matches how the bin offsets were always
        // computed for negative spans.
        let min_voxel_bin = (self.voxel_min_height_cm as f32 / res) as i32;
        let max_voxel_bin = (self.voxel_max_height_cm as f32 / res) as i32;
        if max_voxel_bin <= min_voxel_bin {
            return invalid("voxel height span is empty".to_string());
        }
        let num_height_bins = (max_voxel_bin - min_voxel_bin) as usize;

        let agent_height_cm = self.camera_height_m * 100.0;
        let band_bin = |height_cm: f32| (height_cm / res - min_voxel_bin as f32) as i64;
        let min_obstacle_bin = band_bin(self.min_obs_height_cm as f32);
        let ground_exclusion_bin = band_bin(self.ground_exclusion_cm as f32);
        let max_mapped_bin = band_bin(agent_height_cm + 1.0);

        if min_obstacle_bin < 0 || ground_exclusion_bin < 0 {
            return invalid("obstacle and ground bands must lie above the voxel floor".to_string());
        }
        if max_mapped_bin as usize > num_height_bins || max_mapped_bin <= 0 {
            return invalid(format!(
                "camera height {} m falls outside the voxel column",
                self.camera_height_m
            ));
        }
        if min_obstacle_bin > max_mapped_bin || ground_exclusion_bin > max_mapped_bin {
            return invalid("obstacle and ground bands must start below the camera".to_string());
        }

        let half = local_map_size / 2;
        Ok(MapGeometry {
            resolution_cm: res,
            local_map_size,
            global_map_size,
            vision_range: self.vision_range,
            min_voxel_bin,
            max_voxel_bin,
            num_height_bins,
            min_obstacle_bin: min_obstacle_bin as usize,
            ground_exclusion_bin: ground_exclusion_bin as usize,
            max_mapped_bin: max_mapped_bin as usize,
            agent_height_cm,
            max_depth_cm: self.max_depth_m * 100.0,
            close_range_rows: self.close_range_cm / self.map_resolution_cm,
            prior_logit: logit(self.probability_prior, self.logit_eps),
            canvas_origin: (half, half - self.vision_range / 2),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
