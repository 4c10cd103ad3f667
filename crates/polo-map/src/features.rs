//! Map features for a downstream policy.
//!
//! Stacks, in this order:
//!
//! | Channels | Source |
//! |---|---|
//! | `NON_SEM` | local map, non-semantic channels |
//! | `NON_SEM` | global map, non-semantic channels, max-pooled to local size |
//! | `C` | local map, semantic categories |
//!
//! where `NON_SEM` is [`MapLayout::non_semantic_channels`]. Values are taken
//! from the dense form, so unassigned voxels read `+∞` and any pooled block
//! containing one does too.

use ndarray::{Array3, Axis, s};
use polo_types::MapError;

use crate::layout::MapLayout;
use crate::semantic_map::SemanticMap;

/// Number of channels produced by [`map_features`] for `layout`.
pub fn map_feature_channels(layout: &MapLayout) -> usize {
    2 * layout.non_semantic_channels() + layout.num_categories()
}

/// Stack local, pooled global and semantic channels into one
/// `(channels, M, M)` array.
pub fn map_features(local: &SemanticMap, global: &SemanticMap) -> Result<Array3<f32>, MapError> {
    if local.layout() != global.layout() {
        return Err(MapError::shape(
            "global map channels",
            local.layout().total(),
            global.layout().total(),
        ));
    }
    let m = local.size();
    if m == 0 || global.size() % m != 0 {
        return Err(MapError::shape(
            "global map size",
            format!("a multiple of {m}"),
            global.size(),
        ));
    }
    let pool = global.size() / m;
    let non_sem = local.layout().non_semantic_channels();

    let local_dense = local.to_dense();
    let global_dense = global.to_dense();

    let mut out = Array3::zeros((map_feature_channels(local.layout()), m, m));
    out.slice_mut(s![..non_sem, .., ..])
        .assign(&local_dense.slice(s![..non_sem, .., ..]));

    for (c, channel) in global_dense.axis_iter(Axis(0)).take(non_sem).enumerate() {
        let mut pooled = out.index_axis_mut(Axis(0), non_sem + c);
        for ((r, col), v) in pooled.indexed_iter_mut() {
            let block = channel.slice(s![r * pool..(r + 1) * pool, col * pool..(col + 1) * pool]);
            *v = block.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
        }
    }

    out.slice_mut(s![2 * non_sem.., .., ..])
        .assign(&local_dense.slice(s![non_sem.., .., ..]));
    Ok(out)
}
