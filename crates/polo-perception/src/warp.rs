//! Egomotion warp.
//!
//! The step's [`ColumnProjection`] is written onto an `M × M` canvas (the
//! local map size) with the agent at the canvas centre facing `+row`, then
//! resampled into the local map frame at the agent's updated pose:
//!
//! 1. **Rotate** about the canvas centre by `π/2 - heading`.
//! 2. **Translate** by `-(p / res - ⌊M / 2⌋)` cells along each axis.
//!    This is an exact cell shift. Dividing a normalised shift by `M / 2`
//!    on a corner-aligned grid would scale it by `(M - 1) / M` instead.
//!
//! Both passes use bilinear interpolation with zero padding over a grid
//! normalised to `[-1, 1]` with the corner pixels at `±1`, so a pass with no
//! rotation and no translation reproduces its input exactly. The passes stay
//! separate: the translation interpolates over the already rotated canvas.
//!
//! # Example
//!
//! ```rust
//! use polo_perception::warp::{bilinear_taps, SamplingGrid};
//!
//! // Sampling halfway between two pixels mixes them equally.
//! let taps = bilinear_taps(0.5, 0.0, 4);
//! assert_eq!(taps[0], (0, 0.5));
//! assert_eq!(taps[1], (1, 0.5));
//!
//! let identity = SamplingGrid::from_fn(4, |r, c| (c as f32, r as f32));
//! assert_eq!(identity.len(), 16);
//! ```

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use polo_map::config::MapGeometry;
use polo_map::layout::{ChannelLayout, Plane};
use polo_map::log_odds::{clamp_log_odds, logit};
use polo_types::Pose;
use tracing::trace;

use crate::voxel::ColumnProjection;

// ────────────────────────────────────────────────────────────────────────────
// Probability → log-odds
// ────────────────────────────────────────────────────────────────────────────

/// `clamp(logit(p) - prior_logit)`, forced to 0 wherever `explored` is 0.
pub fn probability_log_odds(
    probability: &Array2<f32>,
    explored: &Array2<f32>,
    prior_logit: f32,
    eps: f32,
    bound: f32,
) -> Array2<f32> {
    let mut out = probability.mapv(|p| logit(p, eps) - prior_logit);
    out.zip_mut_with(explored, |l, &e| {
        *l = if e == 0.0 { 0.0 } else { clamp_log_odds(*l, bound) };
    });
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Canvas
// ────────────────────────────────────────────────────────────────────────────

/// Channel groups of the egocentric canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanvasChannel {
    /// Same meaning as the map plane; `Probability` holds this step's
    /// prior-relative log-odds.
    Plane(Plane),
    /// Accumulated probability feature per mapped height bin.
    VoxelProbability,
    Categories,
    /// Point count per mapped height bin.
    VoxelOccupancy,
    /// One channel per confirmed instance.
    Instances,
}

pub type CanvasLayout = ChannelLayout<CanvasChannel>;

pub fn canvas_layout(voxel_bins: usize, num_categories: usize, num_instances: usize) -> CanvasLayout {
    Plane::ALL
        .iter()
        .fold(ChannelLayout::new(), |layout, &p| layout.with(CanvasChannel::Plane(p), 1))
        .with(CanvasChannel::VoxelProbability, voxel_bins)
        .with(CanvasChannel::Categories, num_categories)
        .with(CanvasChannel::VoxelOccupancy, voxel_bins)
        .with(CanvasChannel::Instances, num_instances)
}

/// A multi-channel `M × M` image described by a [`CanvasLayout`].
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub layout: CanvasLayout,
    /// `(channel, row, col)`.
    pub data: Array3<f32>,
}

impl Canvas {
    pub fn zeros(layout: CanvasLayout, size: usize) -> Self {
        let data = Array3::zeros((layout.total(), size, size));
        Self { layout, data }
    }

    pub fn size(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn plane(&self, plane: Plane) -> ArrayView2<'_, f32> {
        self.data
            .index_axis(Axis(0), self.layout.index(CanvasChannel::Plane(plane)))
    }

    /// All channels of `group` as `(channel, row, col)`.
    pub fn block(&self, group: CanvasChannel) -> ArrayView3<'_, f32> {
        self.data.slice(s![self.layout.range(group), .., ..])
    }

    /// Place a column projection at the egocentric offset of `geometry`.
    pub fn from_projection(
        projection: &ColumnProjection,
        probability_log_odds: &Array2<f32>,
        geometry: &MapGeometry,
    ) -> Self {
        let layout = canvas_layout(
            projection.voxel_probability.len_of(Axis(0)),
            projection.categories.len_of(Axis(0)),
            projection.instances.len_of(Axis(0)),
        );
        let mut canvas = Canvas::zeros(layout, geometry.local_map_size);
        let (r0, c0) = geometry.canvas_origin;
        let vr = geometry.vision_range;
        let rows = r0..r0 + vr;
        let cols = c0..c0 + vr;

        let planes: [(Plane, &Array2<f32>); 4] = [
            (Plane::Obstacle, &projection.obstacle),
            (Plane::Explored, &projection.explored),
            (Plane::BeenClose, &projection.close_explored),
            (Plane::Probability, probability_log_odds),
        ];
        for (plane, values) in planes {
            let ch = canvas.layout.index(CanvasChannel::Plane(plane));
            canvas
                .data
                .slice_mut(s![ch, rows.clone(), cols.clone()])
                .assign(values);
        }

        let blocks: [(CanvasChannel, &Array3<f32>); 4] = [
            (CanvasChannel::VoxelProbability, &projection.voxel_probability),
            (CanvasChannel::Categories, &projection.categories),
            (CanvasChannel::VoxelOccupancy, &projection.voxel_occupancy),
            (CanvasChannel::Instances, &projection.instances),
        ];
        for (group, values) in blocks {
            let range = canvas.layout.range(group);
            canvas
                .data
                .slice_mut(s![range, rows.clone(), cols.clone()])
                .assign(values);
        }
        canvas
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bilinear resampling
// ────────────────────────────────────────────────────────────────────────────

/// Sampling positions closer than this to a pixel centre snap onto it, so
/// that pose round-off does not blur exact-valued planes.
const SNAP_TOLERANCE: f32 = 1e-4;

/// Four `(flat index, weight)` taps for sampling an `n × n` plane at pixel
/// coordinates `(x = col, y = row)`. Taps outside the plane get weight 0.
pub fn bilinear_taps(x: f32, y: f32, n: usize) -> [(usize, f32); 4] {
    let snap = |v: f32| {
        let r = v.round();
        if (v - r).abs() < SNAP_TOLERANCE { r } else { v }
    };
    let (x, y) = (snap(x), snap(y));
    let mut taps = [(0usize, 0.0f32); 4];
    if !x.is_finite() || !y.is_finite() {
        return taps;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = x - x0;
    let wy = y - y0;
    let corners = [
        (y0, x0, (1.0 - wy) * (1.0 - wx)),
        (y0, x0 + 1.0, (1.0 - wy) * wx),
        (y0 + 1.0, x0, wy * (1.0 - wx)),
        (y0 + 1.0, x0 + 1.0, wy * wx),
    ];
    let limit = n as f32;
    for (tap, (r, c, w)) in taps.iter_mut().zip(corners) {
        if w > 0.0 && r >= 0.0 && c >= 0.0 && r < limit && c < limit {
            *tap = (r as usize * n + c as usize, w);
        }
    }
    taps
}

/// Precomputed bilinear taps for every output pixel of an `n × n` plane.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingGrid {
    size: usize,
    taps: Vec<[(usize, f32); 4]>,
}

impl SamplingGrid {
    /// `source(row, col)` gives the `(x, y)` pixel to sample for output
    /// `(row, col)`.
    pub fn from_fn(size: usize, source: impl Fn(usize, usize) -> (f32, f32)) -> Self {
        let taps = (0..size * size)
            .map(|i| {
                let (x, y) = source(i / size, i % size);
                bilinear_taps(x, y, size)
            })
            .collect();
        Self { size, taps }
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Resample every channel of `data`.
    pub fn resample(&self, data: &Array3<f32>) -> Array3<f32> {
        let n = self.size;
        let mut out = Array3::zeros(data.raw_dim());
        for (src, mut dst) in data.outer_iter().zip(out.outer_iter_mut()) {
            for ((r, c), v) in dst.indexed_iter_mut() {
                *v = self.taps[r * n + c]
                    .iter()
                    .filter(|(_, w)| *w > 0.0)
                    .map(|&(idx, w)| w * src[[idx / n, idx % n]])
                    .sum();
            }
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StabilizingWarp
// ────────────────────────────────────────────────────────────────────────────

/// Rotation and translation taking the egocentric canvas into the local map
/// frame at one pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizingWarp {
    /// `π/2 - heading` (radians).
    pub rotation_rad: f32,
    /// Sampling offset `(x = col, y = row)` in cells.
    pub shift_cells: (f32, f32),
}

impl StabilizingWarp {
    pub fn for_pose(pose: &Pose, geometry: &MapGeometry) -> Self {
        let centre = geometry.canvas_center() as f32;
        let res = geometry.resolution_cm;
        Self {
            rotation_rad: std::f32::consts::FRAC_PI_2 - pose.heading_rad,
            shift_cells: (-(pose.x_cm / res - centre), -(pose.y_cm / res - centre)),
        }
    }

    /// Grid sampling the canvas rotated about its centre.
    pub fn rotation_grid(&self, size: usize) -> SamplingGrid {
        let (sin_t, cos_t) = self.rotation_rad.sin_cos();
        let c0 = (size as f32 - 1.0) / 2.0;
        SamplingGrid::from_fn(size, |r, c| {
            let xo = c as f32 - c0;
            let yo = r as f32 - c0;
            (c0 + cos_t * xo - sin_t * yo, c0 + sin_t * xo + cos_t * yo)
        })
    }

    /// Grid sampling the canvas shifted by the pose offset.
    pub fn translation_grid(&self, size: usize) -> SamplingGrid {
        let (dx, dy) = self.shift_cells;
        SamplingGrid::from_fn(size, |r, c| (c as f32 + dx, r as f32 + dy))
    }

    /// Rotate, then translate.
    pub fn apply(&self, canvas: &Canvas) -> Canvas {
        let n = canvas.size();
        let rotated = self.rotation_grid(n).resample(&canvas.data);
        let translated = self.translation_grid(n).resample(&rotated);
        trace!(
            rotation_rad = self.rotation_rad,
            shift_x = self.shift_cells.0,
            shift_y = self.shift_cells.1,
            "warped canvas"
        );
        Canvas {
            layout: canvas.layout.clone(),
            data: translated,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
