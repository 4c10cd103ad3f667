//! The multi-channel semantic map.
//!
//! A [`SemanticMap`] stores the `[0, 1]` evidence planes, the goal-object
//! log-odds plane, one plane per semantic category, and a block of per-height
//! voxel occupancy beliefs. Voxel cells are a tagged [`VoxelBelief`] rather
//! than a float with a magic value: a cell that has never been observed
//! occupied is [`VoxelBelief::Unassigned`].
//!
//! The flat `(channels, rows, cols)` interchange form described by
//! [`MapLayout`] is available through [`SemanticMap::to_dense`] and
//! [`SemanticMap::from_dense`]; there an unassigned voxel is `+∞`, outside
//! any valid clamped log-odds value.

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, s};
use polo_types::{MapError, WindowBounds};

use crate::layout::{MapChannel, MapLayout, Plane};

// ────────────────────────────────────────────────────────────────────────────
// VoxelBelief
// ────────────────────────────────────────────────────────────────────────────

/// Occupancy belief of one voxel map cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum VoxelBelief {
    /// Never observed occupied.
    #[default]
    Unassigned,
    /// Accumulated log-odds of the goal object at this voxel.
    LogOdds(f32),
}

impl VoxelBelief {
    /// Dense encoding of [`VoxelBelief::Unassigned`].
    pub const DENSE_SENTINEL: f32 = f32::INFINITY;

    pub fn is_assigned(self) -> bool {
        matches!(self, VoxelBelief::LogOdds(_))
    }

    pub fn log_odds(self) -> Option<f32> {
        match self {
            VoxelBelief::Unassigned => None,
            VoxelBelief::LogOdds(l) => Some(l),
        }
    }

    pub fn to_dense(self) -> f32 {
        self.log_odds().unwrap_or(Self::DENSE_SENTINEL)
    }

    /// Any infinite or NaN value decodes as unassigned.
    pub fn from_dense(v: f32) -> Self {
        if v.is_finite() {
            VoxelBelief::LogOdds(v)
        } else {
            VoxelBelief::Unassigned
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SemanticMap
// ────────────────────────────────────────────────────────────────────────────

/// A square multi-channel semantic map (local window or global map).
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticMap {
    layout: MapLayout,
    /// `Plane::ALL` followed by one plane per category.
    planes: Array3<f32>,
    voxels: Array3<VoxelBelief>,
}

impl SemanticMap {
    /// An empty `size × size` map: all evidence and log-odds at zero, all
    /// voxels unassigned.
    pub fn new(size: usize, voxel_bins: usize, num_categories: usize) -> Self {
        Self {
            layout: MapLayout::for_map(voxel_bins, num_categories),
            planes: Array3::zeros((Plane::ALL.len() + num_categories, size, size)),
            voxels: Array3::from_elem((voxel_bins, size, size), VoxelBelief::Unassigned),
        }
    }

    pub fn layout(&self) -> &MapLayout {
        &self.layout
    }

    /// Side length in cells.
    pub fn size(&self) -> usize {
        self.planes.len_of(Axis(1))
    }

    pub fn num_categories(&self) -> usize {
        self.layout.num_categories()
    }

    pub fn num_voxel_bins(&self) -> usize {
        self.layout.num_voxel_bins()
    }

    pub fn plane(&self, plane: Plane) -> ArrayView2<'_, f32> {
        self.planes.index_axis(Axis(0), plane.index())
    }

    pub fn plane_mut(&mut self, plane: Plane) -> ArrayViewMut2<'_, f32> {
        self.planes.index_axis_mut(Axis(0), plane.index())
    }

    /// `(category, row, col)` evidence.
    pub fn categories(&self) -> ArrayView3<'_, f32> {
        self.planes.slice(s![Plane::ALL.len().., .., ..])
    }

    pub fn categories_mut(&mut self) -> ArrayViewMut3<'_, f32> {
        self.planes.slice_mut(s![Plane::ALL.len().., .., ..])
    }

    /// `(height bin, row, col)` voxel beliefs.
    pub fn voxels(&self) -> ArrayView3<'_, VoxelBelief> {
        self.voxels.view()
    }

    pub fn voxels_mut(&mut self) -> ArrayViewMut3<'_, VoxelBelief> {
        self.voxels.view_mut()
    }

    /// Number of voxel cells holding a log-odds value.
    pub fn assigned_voxels(&self) -> usize {
        self.voxels.iter().filter(|v| v.is_assigned()).count()
    }

    /// Fail unless this map has `layout` and side `size`.
    pub fn ensure_shape(
        &self,
        what: &str,
        layout: &MapLayout,
        size: usize,
    ) -> Result<(), MapError> {
        if &self.layout != layout || self.size() != size {
            return Err(MapError::shape(
                what,
                (layout.total(), size, size),
                (self.layout.total(), self.size(), self.size()),
            ));
        }
        Ok(())
    }

    // ── Dense interchange ────────────────────────────────────────────────

    /// Flatten into the `(channels, rows, cols)` form of [`MapLayout`].
    pub fn to_dense(&self) -> Array3<f32> {
        let n = self.size();
        let mut dense = Array3::zeros((self.layout.total(), n, n));
        for p in Plane::ALL {
            dense
                .index_axis_mut(Axis(0), self.layout.index(MapChannel::Planar(p)))
                .assign(&self.plane(p));
        }
        let voxel_range = self.layout.range(MapChannel::VoxelLogOdds);
        dense
            .slice_mut(s![voxel_range, .., ..])
            .zip_mut_with(&self.voxels, |d, v| *d = v.to_dense());
        let cat_range = self.layout.range(MapChannel::Categories);
        dense.slice_mut(s![cat_range, .., ..]).assign(&self.categories());
        dense
    }

    /// Rebuild a map from its dense form.
    pub fn from_dense(layout: &MapLayout, dense: &Array3<f32>) -> Result<Self, MapError> {
        let (channels, rows, cols) = dense.dim();
        if channels != layout.total() || rows != cols {
            return Err(MapError::shape(
                "dense map",
                (layout.total(), rows, rows),
                dense.dim(),
            ));
        }
        let mut map = SemanticMap::new(rows, layout.num_voxel_bins(), layout.num_categories());
        for p in Plane::ALL {
            map.plane_mut(p)
                .assign(&dense.index_axis(Axis(0), layout.index(MapChannel::Planar(p))));
        }
        let voxel_range = layout.range(MapChannel::VoxelLogOdds);
        map.voxels
            .zip_mut_with(&dense.slice(s![voxel_range, .., ..]), |v, &d| {
                *v = VoxelBelief::from_dense(d)
            });
        let cat_range = layout.range(MapChannel::Categories);
        map.categories_mut()
            .assign(&dense.slice(s![cat_range, .., ..]));
        Ok(map)
    }

    // ── Windows ──────────────────────────────────────────────────────────

    fn check_window(&self, bounds: &WindowBounds) -> Result<(), MapError> {
        let n = self.size();
        if !bounds.is_ordered() || bounds.row_end > n || bounds.col_end > n {
            return Err(MapError::WindowOutOfBounds {
                bounds: *bounds,
                rows: n,
                cols: n,
            });
        }
        Ok(())
    }

    /// Copy the square window `bounds` out of this map.
    pub fn window(&self, bounds: &WindowBounds) -> Result<SemanticMap, MapError> {
        self.check_window(bounds)?;
        if bounds.rows() != bounds.cols() {
            return Err(MapError::shape(
                "window",
                (bounds.rows(), bounds.rows()),
                (bounds.rows(), bounds.cols()),
            ));
        }
        let rows = bounds.row_start..bounds.row_end;
        let cols = bounds.col_start..bounds.col_end;
        Ok(SemanticMap {
            layout: self.layout.clone(),
            planes: self
                .planes
                .slice(s![.., rows.clone(), cols.clone()])
                .to_owned(),
            voxels: self.voxels.slice(s![.., rows, cols]).to_owned(),
        })
    }

    /// Overwrite the window `bounds` of this map with `local`.
    pub fn write_window(&mut self, bounds: &WindowBounds, local: &SemanticMap) -> Result<(), MapError> {
        self.check_window(bounds)?;
        if local.layout != self.layout
            || local.size() != bounds.rows()
            || local.size() != bounds.cols()
        {
            return Err(MapError::shape(
                "local window",
                (self.layout.total(), bounds.rows(), bounds.cols()),
                (local.layout.total(), local.size(), local.size()),
            ));
        }
        let rows = bounds.row_start..bounds.row_end;
        let cols = bounds.col_start..bounds.col_end;
        self.planes
            .slice_mut(s![.., rows.clone(), cols.clone()])
            .assign(&local.planes);
        self.voxels
            .slice_mut(s![.., rows, cols])
            .assign(&local.voxels);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_map_is_empty_with_unassigned_voxels() {
        let map = SemanticMap::new(8, 3, 2);
        assert_eq!(map.size(), 8);
        assert_eq!(map.assigned_voxels(), 0);
        assert!(map.plane(Plane::Explored).iter().all(|&v| v == 0.0));
        assert_eq!(map.categories().dim(), (2, 8, 8));
        assert_eq!(map.voxels().dim(), (3, 8, 8));
    }

    #[test]
    fn voxel_belief_dense_encoding() {
        assert_eq!(VoxelBelief::Unassigned.to_dense(), f32::INFINITY);
        assert_eq!(VoxelBelief::LogOdds(-2.5).to_dense(), -2.5);
        assert_eq!(VoxelBelief::from_dense(f32::INFINITY), VoxelBelief::Unassigned);
        assert_eq!(VoxelBelief::from_dense(10.0), VoxelBelief::LogOdds(10.0));
    }

    #[test]
    fn dense_roundtrip_preserves_sentinel_and_values() {
        let mut map = SemanticMap::new(4, 2, 3);
        map.plane_mut(Plane::Obstacle)[[1, 2]] = 1.0;
        map.plane_mut(Plane::Probability)[[0, 0]] = -3.0;
        map.categories_mut()[[2, 3, 3]] = 0.5;
        map.voxels_mut()[[1, 2, 2]] = VoxelBelief::LogOdds(4.0);

        let dense = map.to_dense();
        assert_eq!(dense.dim(), (6 + 2 + 3, 4, 4));
        assert_eq!(dense[[0, 1, 2]], 1.0);
        assert_eq!(dense[[5, 0, 0]], -3.0);
        assert_eq!(dense[[7, 2, 2]], 4.0);
        assert_eq!(dense[[6, 0, 0]], f32::INFINITY);
        assert_eq!(dense[[10, 3, 3]], 0.5);

        let back = SemanticMap::from_dense(map.layout(), &dense).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn from_dense_rejects_wrong_channel_count() {
        let layout = MapLayout::for_map(2, 3);
        let dense = Array3::zeros((5, 4, 4));
        assert!(SemanticMap::from_dense(&layout, &dense).is_err());
    }

    #[test]
    fn window_copy_and_write_back() {
        let mut global = SemanticMap::new(10, 1, 1);
        global.plane_mut(Plane::Explored)[[4, 6]] = 1.0;
        let bounds = WindowBounds::new(2, 7, 3, 8);

        let mut local = global.window(&bounds).unwrap();
        assert_eq!(local.size(), 5);
        assert_eq!(local.plane(Plane::Explored)[[2, 3]], 1.0);

        local.plane_mut(Plane::Obstacle)[[0, 0]] = 1.0;
        local.voxels_mut()[[0, 4, 4]] = VoxelBelief::LogOdds(1.5);
        global.write_window(&bounds, &local).unwrap();
        assert_eq!(global.plane(Plane::Obstacle)[[2, 3]], 1.0);
        assert_eq!(global.voxels()[[0, 6, 7]], VoxelBelief::LogOdds(1.5));
    }

    #[test]
    fn window_outside_map_is_rejected() {
        let global = SemanticMap::new(10, 1, 1);
        let err = global.window(&WindowBounds::new(5, 12, 0, 7)).unwrap_err();
        assert!(matches!(err, MapError::WindowOutOfBounds { .. }));
    }

    #[test]
    fn shape_check_compares_layout_and_size() {
        let a = SemanticMap::new(6, 2, 2);
        let same = SemanticMap::new(6, 2, 2);
        assert!(a.ensure_shape("map", same.layout(), 6).is_ok());
        assert!(a.ensure_shape("map", SemanticMap::new(6, 3, 2).layout(), 6).is_err());
        let err = a.ensure_shape("map", same.layout(), 7).unwrap_err();
        assert!(err.to_string().contains("map"));
    }
}
