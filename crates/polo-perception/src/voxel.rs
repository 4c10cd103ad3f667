//! Voxel splatting and column projection.
//!
//! # Splat
//!
//! The egocentric grid is `vision_range` cells wide and deep and
//! `num_height_bins` tall. The agent stands at the middle of the first row,
//! so a base-frame point is first shifted laterally by half the grid width.
//! Each axis is then normalised to `[-1, 1]`:
//!
//! ```text
//! x' = (x / res - ⌊vr / 2⌋) / vr · 2        (lateral, after the shift)
//! y' = (y / res - ⌊vr / 2⌋) / vr · 2        (forward)
//! z' = (z / res - ⌊(zmax + zmin) / 2⌋) / (zmax - zmin) · 2
//! ```
//!
//! and mapped to the cell `⌊x' · n / 2 + n / 2⌋`. Points outside `[-1, 1)`
//! are dropped; points that share a cell sum their features.
//!
//! # Columns
//!
//! [`ColumnProjector`] collapses the height axis into the 2-D evidence of one
//! step; see [`ColumnProjection`] for the bands each plane integrates.

use ndarray::{Array2, Array3, Array4, ArrayView3, Axis, s};
use polo_map::config::{MapConfig, MapGeometry};
use polo_types::MapError;
use tracing::trace;

use crate::features::{FeatureChannel, FeatureLayout, PointFeatures};
use crate::point_cloud::PointCloud;

// ────────────────────────────────────────────────────────────────────────────
// VoxelGrid
// ────────────────────────────────────────────────────────────────────────────

/// Accumulated per-feature sums on the egocentric grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    pub layout: FeatureLayout,
    /// `(feature, row = forward, col = lateral, height bin)`.
    pub cells: Array4<f32>,
}

impl VoxelGrid {
    /// `(height bin, row, col)` view of one feature channel.
    pub fn channel(&self, channel: usize) -> ArrayView3<'_, f32> {
        self.cells
            .index_axis(Axis(0), channel)
            .permuted_axes([2, 0, 1])
    }
}

/// Scatter-adds point features into a [`VoxelGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelSplatter {
    pub resolution_cm: f32,
    pub vision_range: usize,
    pub min_voxel_bin: i32,
    pub max_voxel_bin: i32,
}

impl VoxelSplatter {
    pub fn new(geometry: &MapGeometry) -> Self {
        Self {
            resolution_cm: geometry.resolution_cm,
            vision_range: geometry.vision_range,
            min_voxel_bin: geometry.min_voxel_bin,
            max_voxel_bin: geometry.max_voxel_bin,
        }
    }

    pub fn num_height_bins(&self) -> usize {
        (self.max_voxel_bin - self.min_voxel_bin) as usize
    }

    /// Cell `(row, col, bin)` of a base-frame point, or `None` when it falls
    /// outside the grid.
    ///
    /// `⌊v' · n / 2 + n / 2⌋` is evaluated in cell units so that points on a
    /// cell boundary land in the same cell regardless of rounding.
    pub fn cell_of(&self, point: [f32; 3]) -> Option<(usize, usize, usize)> {
        let vr = self.vision_range;
        let half = (vr / 2) as f32;
        let shift_cm = vr as f32 * self.resolution_cm / 2.0;

        let col = (point[0] + shift_cm) / self.resolution_cm - half + vr as f32 / 2.0;
        let row = point[1] / self.resolution_cm - half + vr as f32 / 2.0;

        let bins = self.num_height_bins();
        let mid = (self.max_voxel_bin + self.min_voxel_bin).div_euclid(2) as f32;
        let bin = point[2] / self.resolution_cm - mid + bins as f32 / 2.0;

        Some((
            cell_index(row, vr)?,
            cell_index(col, vr)?,
            cell_index(bin, bins)?,
        ))
    }

    pub fn splat(&self, cloud: &PointCloud, features: &PointFeatures) -> Result<VoxelGrid, MapError> {
        if cloud.len() != features.num_points() {
            return Err(MapError::shape(
                "point features",
                cloud.len(),
                features.num_points(),
            ));
        }
        let vr = self.vision_range;
        let mut cells = Array4::zeros((features.layout.total(), vr, vr, self.num_height_bins()));
        let mut dropped = 0usize;
        for (i, p) in cloud.points.outer_iter().enumerate() {
            match self.cell_of([p[0], p[1], p[2]]) {
                Some((row, col, bin)) => {
                    let mut cell = cells.slice_mut(s![.., row, col, bin]);
                    cell += &features.values.column(i);
                }
                None => dropped += 1,
            }
        }
        trace!(points = cloud.len(), dropped, "splatted point cloud");
        Ok(VoxelGrid {
            layout: features.layout.clone(),
            cells,
        })
    }
}

fn cell_index(pos: f32, n: usize) -> Option<usize> {
    if !pos.is_finite() {
        return None;
    }
    let pos = pos.floor();
    if pos < 0.0 || pos >= n as f32 {
        return None;
    }
    Some(pos as usize)
}

// ────────────────────────────────────────────────────────────────────────────
// ColumnProjection
// ────────────────────────────────────────────────────────────────────────────

/// 2-D evidence of one step on the `vr × vr` egocentric grid.
///
/// | Plane | Bins | Reduction |
/// |---|---|---|
/// | `explored` | all | presence sum / explored threshold |
/// | `obstacle` | `[min_obstacle, max_mapped)` | presence sum / obstacle threshold, dilated |
/// | `categories` | `[ground_exclusion, max_mapped)` | semantic sum / category threshold |
/// | `instances` | `[ground_exclusion, max_mapped)` | instance sum |
/// | `probability` | `[ground_exclusion, max_mapped)` | max of probability |
/// | `voxel_*` | `[0, max_mapped)` | per bin |
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProjection {
    pub obstacle: Array2<f32>,
    pub explored: Array2<f32>,
    /// `explored` with rows beyond the close range zeroed.
    pub close_explored: Array2<f32>,
    /// Raw detection probability, before the log-odds transform.
    pub probability: Array2<f32>,
    /// `(category, row, col)`.
    pub categories: Array3<f32>,
    /// `(instance, row, col)`.
    pub instances: Array3<f32>,
    /// `(bin, row, col)` accumulated probability feature.
    pub voxel_probability: Array3<f32>,
    /// `(bin, row, col)` point count.
    pub voxel_occupancy: Array3<f32>,
}

/// Thresholds and bands for [`ColumnProjection`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProjector {
    pub min_obstacle_bin: usize,
    pub ground_exclusion_bin: usize,
    pub max_mapped_bin: usize,
    pub close_range_rows: usize,
    pub exp_pred_threshold: f32,
    pub map_pred_threshold: f32,
    pub cat_pred_threshold: f32,
    /// Side of the obstacle dilation kernel; `None` disables dilation.
    pub dilate_size: Option<usize>,
}

impl ColumnProjector {
    pub fn new(geometry: &MapGeometry, config: &MapConfig) -> Self {
        Self {
            min_obstacle_bin: geometry.min_obstacle_bin,
            ground_exclusion_bin: geometry.ground_exclusion_bin,
            max_mapped_bin: geometry.max_mapped_bin,
            close_range_rows: geometry.close_range_rows,
            exp_pred_threshold: config.exp_pred_threshold,
            map_pred_threshold: config.map_pred_threshold,
            cat_pred_threshold: config.cat_pred_threshold,
            dilate_size: (config.dilate_obstacles && config.dilate_size > 0)
                .then_some(config.dilate_size),
        }
    }

    pub fn project(&self, grid: &VoxelGrid) -> ColumnProjection {
        let layout = &grid.layout;
        let cells = &grid.cells;

        let presence = cells.index_axis(Axis(0), layout.index(FeatureChannel::Presence));
        let explored = presence.sum_axis(Axis(2)) / self.exp_pred_threshold;
        let mut obstacle = presence
            .slice(s![.., .., self.min_obstacle_bin..self.max_mapped_bin])
            .sum_axis(Axis(2))
            / self.map_pred_threshold;
        if let Some(size) = self.dilate_size {
            obstacle = box_dilate(&obstacle, size).mapv(|v| v.clamp(0.0, 1.0));
        }

        let filtered = cells
            .slice(s![.., .., .., self.ground_exclusion_bin..self.max_mapped_bin])
            .sum_axis(Axis(3));
        let categories =
            filtered.slice(s![layout.range(FeatureChannel::Semantic), .., ..]).to_owned()
                / self.cat_pred_threshold;
        let instances = filtered
            .slice(s![layout.range(FeatureChannel::Instances), .., ..])
            .to_owned();

        let prob_channel = layout.index(FeatureChannel::Probability);
        let probability = cells
            .index_axis(Axis(0), prob_channel)
            .slice(s![.., .., self.ground_exclusion_bin..self.max_mapped_bin])
            .fold_axis(Axis(2), f32::NEG_INFINITY, |&m, &v| m.max(v))
            .mapv(|v| if v.is_finite() { v } else { 0.0 });

        let per_bin = |channel: usize| {
            grid.channel(channel)
                .slice(s![..self.max_mapped_bin, .., ..])
                .to_owned()
        };

        let mut close_explored = explored.clone();
        if self.close_range_rows < close_explored.nrows() {
            close_explored
                .slice_mut(s![self.close_range_rows.., ..])
                .fill(0.0);
        }

        ColumnProjection {
            obstacle,
            explored,
            close_explored,
            probability,
            categories,
            instances,
            voxel_probability: per_bin(prob_channel),
            voxel_occupancy: per_bin(layout.index(FeatureChannel::Presence)),
        }
    }
}

/// Sum over a `size × size` window centred on each cell, zero-padded by
/// `size / 2`.
pub fn box_dilate(plane: &Array2<f32>, size: usize) -> Array2<f32> {
    let (h, w) = plane.dim();
    let pad = (size / 2) as isize;
    Array2::from_shape_fn((h, w), |(r, c)| {
        let r0 = (r as isize - pad).max(0) as usize;
        let c0 = (c as isize - pad).max(0) as usize;
        let r1 = ((r as isize - pad + size as isize) as usize).min(h);
        let c1 = ((c as isize - pad + size as isize) as usize).min(w);
        plane.slice(s![r0..r1, c0..c1]).sum()
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
