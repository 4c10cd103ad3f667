//! `polo-map` – Map storage and bookkeeping.
//!
//! Owns everything about the semantic map that is not per-step perception:
//! its configuration, channel layout, storage, and the global/local window
//! bookkeeping around the per-step pipeline.
//!
//! # Modules
//!
//! - [`config`] – [`MapConfig`][config::MapConfig]: serde-loadable parameters,
//!   validated into a [`MapGeometry`][config::MapGeometry] of derived sizes and
//!   height-bin indices.
//! - [`layout`] – [`ChannelLayout`][layout::ChannelLayout]: ordered named
//!   channel ranges shared by every multi-channel array in the pipeline.
//! - [`semantic_map`] – [`SemanticMap`][semantic_map::SemanticMap]: evidence
//!   planes, category planes and tagged [`VoxelBelief`][semantic_map::VoxelBelief]
//!   cells, with a dense interchange form.
//! - [`log_odds`] – logit and clamp helpers.
//! - [`global`] – [`GlobalMapManager`][global::GlobalMapManager]: initialises
//!   agents, writes local windows back into the global map, and recenters.
//! - [`features`] – [`map_features`][features::map_features]: local + pooled
//!   global stack for a downstream policy.

pub mod config;
pub mod features;
pub mod global;
pub mod layout;
pub mod log_odds;
pub mod semantic_map;

pub use config::{MapConfig, MapGeometry};
pub use global::{AgentMapState, GlobalMapManager, MapSizeParameters};
pub use layout::{ChannelLayout, MapChannel, MapLayout, Plane};
pub use semantic_map::{SemanticMap, VoxelBelief};
