//! Named channel layouts.
//!
//! A [`ChannelLayout`] is an ordered list of named, contiguous channel
//! ranges. Every multi-channel array in the pipeline (per-pixel features,
//! voxel grids, the egocentric canvas, the dense map) is described by one,
//! so stages index channels by name instead of by bare offsets. Layouts whose
//! width depends on the step (e.g. one channel per confirmed instance) are
//! rebuilt per call.
//!
//! # Example
//!
//! ```rust
//! use polo_map::layout::ChannelLayout;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Feat { Presence, Semantic, Instances }
//!
//! let layout = ChannelLayout::new()
//!     .with(Feat::Presence, 1)
//!     .with(Feat::Semantic, 4)
//!     .with(Feat::Instances, 0);
//!
//! assert_eq!(layout.range(Feat::Semantic), 1..5);
//! assert!(layout.range(Feat::Instances).is_empty());
//! assert_eq!(layout.total(), 5);
//! ```

use std::fmt::Debug;
use std::ops::Range;

// ────────────────────────────────────────────────────────────────────────────
// ChannelLayout
// ────────────────────────────────────────────────────────────────────────────

/// Ordered named channel ranges over group type `G`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout<G> {
    entries: Vec<(G, Range<usize>)>,
    total: usize,
}

impl<G: Copy + Eq + Debug> Default for ChannelLayout<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Copy + Eq + Debug> ChannelLayout<G> {
    /// An empty layout.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
        }
    }

    /// Append `width` channels named `group`. Zero-width groups are kept so
    /// that lookups on them yield an empty range.
    pub fn with(mut self, group: G, width: usize) -> Self {
        assert!(
            self.get(group).is_none(),
            "channel group {group:?} appears twice in layout"
        );
        self.entries.push((group, self.total..self.total + width));
        self.total += width;
        self
    }

    /// Range of `group`, or `None` when the layout does not name it.
    pub fn get(&self, group: G) -> Option<Range<usize>> {
        self.entries
            .iter()
            .find(|(g, _)| *g == group)
            .map(|(_, r)| r.clone())
    }

    /// Range of `group`.
    ///
    /// # Panics
    ///
    /// When the layout does not name `group`; stages only query groups their
    /// own layout declares.
    pub fn range(&self, group: G) -> Range<usize> {
        self.get(group)
            .unwrap_or_else(|| panic!("channel group {group:?} missing from layout"))
    }

    /// First channel of `group`.
    pub fn index(&self, group: G) -> usize {
        self.range(group).start
    }

    /// Number of channels in `group`.
    pub fn width(&self, group: G) -> usize {
        self.range(group).len()
    }

    /// Total number of channels.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Iterate `(group, range)` in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (G, Range<usize>)> + '_ {
        self.entries.iter().map(|(g, r)| (*g, r.clone()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Map channels
// ────────────────────────────────────────────────────────────────────────────

/// The single-channel planes of a semantic map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    /// Obstacle evidence in `[0, 1]`.
    Obstacle,
    /// Explored-area evidence in `[0, 1]`.
    Explored,
    /// Marker of the agent's cell on the latest step only.
    CurrentLocation,
    /// Every cell the location marker has ever covered.
    Visited,
    /// Cells observed from within the close range.
    BeenClose,
    /// Goal-object log-odds, relative to the prior.
    Probability,
}

impl Plane {
    /// Planes in map channel order.
    pub const ALL: [Plane; 6] = [
        Plane::Obstacle,
        Plane::Explored,
        Plane::CurrentLocation,
        Plane::Visited,
        Plane::BeenClose,
        Plane::Probability,
    ];

    /// Position of the plane in [`Plane::ALL`].
    pub fn index(self) -> usize {
        match self {
            Plane::Obstacle => 0,
            Plane::Explored => 1,
            Plane::CurrentLocation => 2,
            Plane::Visited => 3,
            Plane::BeenClose => 4,
            Plane::Probability => 5,
        }
    }

    /// Whether the plane holds `[0, 1]` evidence fused by maximum.
    pub fn is_evidence(self) -> bool {
        !matches!(self, Plane::Probability)
    }
}

/// Channel groups of the dense map layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapChannel {
    Planar(Plane),
    /// One log-odds occupancy channel per mapped height bin.
    VoxelLogOdds,
    /// One evidence channel per semantic category.
    Categories,
}

/// Layout of the dense semantic map.
pub type MapLayout = ChannelLayout<MapChannel>;

impl ChannelLayout<MapChannel> {
    /// `[planes…, voxel log-odds × voxel_bins, categories × num_categories]`.
    pub fn for_map(voxel_bins: usize, num_categories: usize) -> Self {
        Plane::ALL
            .iter()
            .fold(ChannelLayout::new(), |layout, &p| {
                layout.with(MapChannel::Planar(p), 1)
            })
            .with(MapChannel::VoxelLogOdds, voxel_bins)
            .with(MapChannel::Categories, num_categories)
    }

    /// Channels before the first semantic category.
    pub fn non_semantic_channels(&self) -> usize {
        self.index(MapChannel::Categories)
    }

    pub fn num_voxel_bins(&self) -> usize {
        self.width(MapChannel::VoxelLogOdds)
    }

    pub fn num_categories(&self) -> usize {
        self.width(MapChannel::Categories)
    }
}
