//! Bayesian map fusion.
//!
//! Merges the warped observation of one step into the running local map.
//! Each channel group has its own rule:
//!
//! | Channels | Rule |
//! |---|---|
//! | obstacle, explored, visited, been-close, categories | `max(prev, clamp(obs, 0, 1))` |
//! | probability | `clamp(prev + obs, ±B)`, then `-B` wherever been-close is 1 |
//! | voxel log-odds | per-cell state machine, see below |
//! | current location | reset, then a square marker at the new pose |
//!
//! The observation's probability plane is already relative to the prior, so
//! summing log-odds is the Bayesian update.
//!
//! ## Voxel cells
//!
//! A cell counts as occupied this step when the warped point count exceeds
//! 0.5. With `l = logit(p_obs)` and `l0` the prior logit:
//!
//! ```text
//! occupied, Unassigned   → LogOdds(l)
//! occupied, LogOdds(v)   → LogOdds(v + l - l0)
//! not occupied, any      → unchanged
//! ```
//!
//! Assigned cells are then clamped to `±B`, and assigned cells under a
//! been-close column are forced to `-B`. Once the agent has been close to a
//! cell without the detector firing, the cell is treated as a confident
//! non-detection.
//!
//! # Example
//!
//! ```rust
//! use polo_map::semantic_map::VoxelBelief;
//! use polo_perception::fusion::BayesianFuser;
//!
//! let fuser = BayesianFuser {
//!     log_odds_bound: 10.0,
//!     prior_logit: -1.0,
//!     logit_eps: 1e-6,
//!     occupied_threshold: 0.5,
//!     location_half_width: 2,
//!     resolution_cm: 5.0,
//! };
//!
//! let first = fuser.update_voxel(VoxelBelief::Unassigned, true, 2.0);
//! assert_eq!(first, VoxelBelief::LogOdds(2.0));
//! let second = fuser.update_voxel(first, true, 2.0);
//! assert_eq!(second, VoxelBelief::LogOdds(5.0));
//! assert_eq!(fuser.update_voxel(second, false, 9.0), second);
//! ```

use ndarray::{Array2, Zip};
use polo_map::config::{MapConfig, MapGeometry};
use polo_map::global::{mark_square, pose_cell};
use polo_map::layout::Plane;
use polo_map::log_odds::{clamp_log_odds, logit};
use polo_map::semantic_map::{SemanticMap, VoxelBelief};
use polo_types::{MapError, Pose};
use tracing::trace;

use crate::warp::{Canvas, CanvasChannel};

// ────────────────────────────────────────────────────────────────────────────
// BayesianFuser
// ────────────────────────────────────────────────────────────────────────────

/// Fuses warped observations into a [`SemanticMap`].
#[derive(Debug, Clone, PartialEq)]
pub struct BayesianFuser {
    /// Symmetric log-odds clamp `B`.
    pub log_odds_bound: f32,
    pub prior_logit: f32,
    pub logit_eps: f32,
    /// Warped point count above which a voxel counts as occupied.
    pub occupied_threshold: f32,
    /// Half-width of the current-location marker (cells).
    pub location_half_width: usize,
    pub resolution_cm: f32,
}

impl BayesianFuser {
    pub fn new(geometry: &MapGeometry, config: &MapConfig) -> Self {
        Self {
            log_odds_bound: config.log_odds_bound,
            prior_logit: geometry.prior_logit,
            logit_eps: config.logit_eps,
            occupied_threshold: 0.5,
            location_half_width: config.location_half_width,
            resolution_cm: geometry.resolution_cm,
        }
    }

    /// One voxel cell transition; `log_odds` is this step's raw logit.
    pub fn update_voxel(&self, prev: VoxelBelief, occupied: bool, log_odds: f32) -> VoxelBelief {
        let bound = self.log_odds_bound;
        match (occupied, prev) {
            (false, belief) => belief,
            (true, VoxelBelief::Unassigned) => VoxelBelief::LogOdds(clamp_log_odds(log_odds, bound)),
            (true, VoxelBelief::LogOdds(v)) => {
                VoxelBelief::LogOdds(clamp_log_odds(v + log_odds - self.prior_logit, bound))
            }
        }
    }

    fn check_shapes(&self, prev: &SemanticMap, warped: &Canvas) -> Result<(), MapError> {
        let expected = (
            prev.size(),
            prev.num_voxel_bins(),
            prev.num_categories(),
        );
        let actual = (
            warped.size(),
            warped.layout.width(CanvasChannel::VoxelOccupancy),
            warped.layout.width(CanvasChannel::Categories),
        );
        if expected != actual
            || warped.layout.width(CanvasChannel::VoxelProbability) != prev.num_voxel_bins()
        {
            return Err(MapError::shape(
                "warped observation (size, voxel bins, categories)",
                expected,
                actual,
            ));
        }
        Ok(())
    }

    /// Fuse `warped` into `prev` and mark the agent at `pose`.
    pub fn fuse(&self, prev: &SemanticMap, warped: &Canvas, pose: &Pose) -> Result<SemanticMap, MapError> {
        self.check_shapes(prev, warped)?;
        let bound = self.log_odds_bound;
        let mut map = prev.clone();

        // ── Evidence: monotone maximum ──────────────────────────────────────
        let max_fuse = |m: &mut f32, &w: &f32| *m = m.max(w.clamp(0.0, 1.0));
        for plane in Plane::ALL.into_iter().filter(|p| p.is_evidence()) {
            map.plane_mut(plane).zip_mut_with(&warped.plane(plane), max_fuse);
        }
        map.categories_mut()
            .zip_mut_with(&warped.block(CanvasChannel::Categories), max_fuse);

        let been_close: Array2<bool> = map.plane(Plane::BeenClose).mapv(|v| v == 1.0);

        // ── Probability: log-odds sum, then been-close override ─────────────
        Zip::from(map.plane_mut(Plane::Probability))
            .and(&warped.plane(Plane::Probability))
            .and(&been_close)
            .for_each(|m, &w, &close| {
                *m = if close { -bound } else { clamp_log_odds(*m + w, bound) };
            });

        // ── Voxels ──────────────────────────────────────────────────────────
        let occupancy = warped.block(CanvasChannel::VoxelOccupancy);
        let probability = warped.block(CanvasChannel::VoxelProbability);
        let mut occupied_cells = 0usize;
        let mut voxels = map.voxels_mut();
        for ((mut cells, occ), prob) in voxels
            .outer_iter_mut()
            .zip(occupancy.outer_iter())
            .zip(probability.outer_iter())
        {
            Zip::from(&mut cells)
                .and(&occ)
                .and(&prob)
                .and(&been_close)
                .for_each(|cell, &o, &p, &close| {
                    let occupied = o > self.occupied_threshold;
                    let mut next = self.update_voxel(*cell, occupied, logit(p, self.logit_eps));
                    if close && next.is_assigned() {
                        next = VoxelBelief::LogOdds(-bound);
                    }
                    if occupied {
                        occupied_cells += 1;
                    }
                    *cell = next;
                });
        }

        // ── Current location ────────────────────────────────────────────────
        map.plane_mut(Plane::CurrentLocation).fill(0.0);
        let cell = pose_cell(pose, self.resolution_cm);
        mark_square(
            &mut map,
            &[Plane::CurrentLocation, Plane::Visited],
            cell,
            self.location_half_width,
        );

        trace!(occupied_voxels = occupied_cells, row = cell.0, col = cell.1, "fused observation");
        Ok(map)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
