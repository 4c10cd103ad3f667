//! Global/local map bookkeeping.
//!
//! The per-step pipeline only ever sees the local map: a window of the
//! global map, recentered on the agent after every step. This module keeps
//! that window in sync with the global map and converts poses between the
//! two frames.
//!
//! ## Frames
//!
//! * Global pose: centimetres from the global map corner, heading in radians.
//! * Local pose: global pose minus the window origin
//!   `(col_start · res, row_start · res, 0)`.
//! * Cells: `row = y / res`, `col = x / res`, truncated.
//!
//! # Example
//!
//! ```rust
//! use polo_map::config::MapConfig;
//! use polo_map::global::GlobalMapManager;
//!
//! let manager = GlobalMapManager::new(&MapConfig::default()).unwrap();
//! let mut agent = manager.init_agent().unwrap();
//!
//! // The agent starts at the centre of the global map.
//! assert_eq!(agent.global_pose.x_cm, 2400.0);
//!
//! // Hand back an updated local map and pose after one step.
//! let local_map = agent.local_map.clone();
//! let local_pose = agent.local_pose;
//! manager.update_global_map_and_pose(&mut agent, local_map, local_pose).unwrap();
//! assert_eq!(agent.bounds.rows(), 480);
//! ```

use polo_types::{MapError, Pose, WindowBounds};
use tracing::debug;

use crate::config::MapConfig;
use crate::layout::Plane;
use crate::semantic_map::SemanticMap;

// ────────────────────────────────────────────────────────────────────────────
// Cells
// ────────────────────────────────────────────────────────────────────────────

/// `(row, col)` cell of `pose`, truncated toward zero.
pub fn pose_cell(pose: &Pose, resolution_cm: f32) -> (i64, i64) {
    (
        (pose.y_cm / resolution_cm) as i64,
        (pose.x_cm / resolution_cm) as i64,
    )
}

/// Set every plane in `planes` to 1 over the square of half-width
/// `half_width` around `cell`, clipped to the map.
pub fn mark_square(map: &mut SemanticMap, planes: &[Plane], cell: (i64, i64), half_width: usize) {
    let n = map.size() as i64;
    let hw = half_width as i64;
    let r0 = (cell.0 - hw).clamp(0, n) as usize;
    let r1 = (cell.0 + hw + 1).clamp(0, n) as usize;
    let c0 = (cell.1 - hw).clamp(0, n) as usize;
    let c1 = (cell.1 + hw + 1).clamp(0, n) as usize;
    if r0 >= r1 || c0 >= c1 {
        return;
    }
    for &p in planes {
        map.plane_mut(p)
            .slice_mut(ndarray::s![r0..r1, c0..c1])
            .fill(1.0);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MapSizeParameters
// ────────────────────────────────────────────────────────────────────────────

/// Sizes shared by the global map and its local windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapSizeParameters {
    pub resolution_cm: f32,
    /// Side of the global map (cells).
    pub global_map_size: usize,
    /// Side of a local window (cells).
    pub local_map_size: usize,
    pub global_downscaling: usize,
}

impl MapSizeParameters {
    pub fn from_config(config: &MapConfig) -> Result<Self, MapError> {
        let geometry = config.geometry()?;
        Ok(Self {
            resolution_cm: geometry.resolution_cm,
            global_map_size: geometry.global_map_size,
            local_map_size: geometry.local_map_size,
            global_downscaling: config.global_downscaling,
        })
    }

    /// Local window centred on `cell` and shifted back inside the global map
    /// when it would cross an edge. Without downscaling the window is the
    /// whole map.
    pub fn local_map_boundaries(&self, cell: (i64, i64)) -> WindowBounds {
        if self.global_downscaling <= 1 {
            return WindowBounds::new(0, self.global_map_size, 0, self.global_map_size);
        }
        let full = self.global_map_size as i64;
        let local = self.local_map_size as i64;
        let axis = |centre: i64| {
            let start = (centre - local / 2).clamp(0, full - local);
            (start as usize, (start + local) as usize)
        };
        let (row_start, row_end) = axis(cell.0);
        let (col_start, col_end) = axis(cell.1);
        WindowBounds::new(row_start, row_end, col_start, col_end)
    }

    /// Pose of the window's corner in the global frame.
    pub fn window_origin(&self, bounds: &WindowBounds) -> Pose {
        Pose::new(
            bounds.col_start as f32 * self.resolution_cm,
            bounds.row_start as f32 * self.resolution_cm,
            0.0,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AgentMapState
// ────────────────────────────────────────────────────────────────────────────

/// Everything the navigation loop persists for one agent between steps.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMapState {
    pub global_map: SemanticMap,
    pub global_pose: Pose,
    /// Current window of `global_map`, updated by the per-step pipeline.
    pub local_map: SemanticMap,
    pub local_pose: Pose,
    /// Window of the local map inside the global map.
    pub bounds: WindowBounds,
    /// Global pose of the window corner.
    pub origin: Pose,
}

// ────────────────────────────────────────────────────────────────────────────
// GlobalMapManager
// ────────────────────────────────────────────────────────────────────────────

/// Creates agent map state and keeps local windows in sync with the global
/// map.
#[derive(Debug, Clone)]
pub struct GlobalMapManager {
    sizes: MapSizeParameters,
    voxel_bins: usize,
    num_categories: usize,
}

impl GlobalMapManager {
    pub fn new(config: &MapConfig) -> Result<Self, MapError> {
        let geometry = config.geometry()?;
        Ok(Self {
            sizes: MapSizeParameters::from_config(config)?,
            voxel_bins: geometry.max_mapped_bin,
            num_categories: config.num_sem_categories,
        })
    }

    pub fn sizes(&self) -> &MapSizeParameters {
        &self.sizes
    }

    /// Fresh state: empty maps, agent at the global map centre facing +x,
    /// a 3×3 location marker, and the window centred on the agent.
    pub fn init_agent(&self) -> Result<AgentMapState, MapError> {
        let n = self.sizes.global_map_size;
        let centre_cm = n as f32 * self.sizes.resolution_cm / 2.0;
        let global_pose = Pose::new(centre_cm, centre_cm, 0.0);

        let mut global_map = SemanticMap::new(n, self.voxel_bins, self.num_categories);
        let cell = pose_cell(&global_pose, self.sizes.resolution_cm);
        mark_square(
            &mut global_map,
            &[Plane::CurrentLocation, Plane::Visited],
            cell,
            1,
        );

        let bounds = self.sizes.local_map_boundaries(cell);
        let origin = self.sizes.window_origin(&bounds);
        let local_map = global_map.window(&bounds)?;
        debug!(?bounds, x_cm = global_pose.x_cm, y_cm = global_pose.y_cm, "initialised agent map");

        Ok(AgentMapState {
            global_map,
            global_pose,
            local_map,
            local_pose: global_pose - origin,
            bounds,
            origin,
        })
    }

    /// Write the updated local map back into the global map, derive the
    /// global pose, and recenter the local window on the agent.
    pub fn update_global_map_and_pose(
        &self,
        state: &mut AgentMapState,
        local_map: SemanticMap,
        local_pose: Pose,
    ) -> Result<(), MapError> {
        state.global_map.write_window(&state.bounds, &local_map)?;
        state.global_pose = local_pose + state.origin;

        let cell = pose_cell(&state.global_pose, self.sizes.resolution_cm);
        let bounds = self.sizes.local_map_boundaries(cell);
        if bounds != state.bounds {
            debug!(old = ?state.bounds, new = ?bounds, "recentering local window");
        }
        state.bounds = bounds;
        state.origin = self.sizes.window_origin(&bounds);
        state.local_map = state.global_map.window(&bounds)?;
        state.local_pose = state.global_pose - state.origin;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
