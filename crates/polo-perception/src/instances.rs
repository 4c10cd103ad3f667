//! Instance extraction.
//!
//! Turns the warped mask of every confirmed detection into an
//! [`InstanceRecord`] in global map cells. A mask is "non-empty" when any
//! cell is positive after warping; its bounding box is the extent of those
//! cells, its centre the midpoint of the box, both shifted by the local
//! window's offset inside the global map.
//!
//! Records are grouped by class. Every category has an entry, possibly
//! empty, and classes outside the category range get their own entry.

use ndarray::{ArrayView2, ArrayView3, Axis};
use polo_types::{BoundingBox, InstanceDict, InstanceRecord, MapError, WindowBounds, empty_instance_dict};

use crate::features::ConfirmedInstance;

/// Bounding box of the positive cells of `mask`, in local cells.
pub fn mask_extent(mask: ArrayView2<'_, f32>) -> Option<BoundingBox> {
    mask.indexed_iter()
        .filter(|(_, v)| **v > 0.0)
        .fold(None, |acc: Option<BoundingBox>, ((r, c), _)| {
            Some(match acc {
                None => BoundingBox {
                    row_min: r,
                    row_max: r,
                    col_min: c,
                    col_max: c,
                },
                Some(b) => BoundingBox {
                    row_min: b.row_min.min(r),
                    row_max: b.row_max.max(r),
                    col_min: b.col_min.min(c),
                    col_max: b.col_max.max(c),
                },
            })
        })
}

/// Extract records from `masks` (`(instance, row, col)`), one per confirmed
/// instance in the same order.
pub fn extract_instances(
    masks: ArrayView3<'_, f32>,
    confirmed: &[ConfirmedInstance],
    bounds: &WindowBounds,
    num_categories: usize,
) -> Result<InstanceDict, MapError> {
    if masks.len_of(Axis(0)) != confirmed.len() {
        return Err(MapError::shape(
            "instance masks",
            confirmed.len(),
            masks.len_of(Axis(0)),
        ));
    }
    let mut dict = empty_instance_dict(num_categories);
    for (mask, instance) in masks.outer_iter().zip(confirmed) {
        let Some(local) = mask_extent(mask) else {
            continue;
        };
        let bbox = BoundingBox {
            row_min: local.row_min + bounds.row_start,
            row_max: local.row_max + bounds.row_start,
            col_min: local.col_min + bounds.col_start,
            col_max: local.col_max + bounds.col_start,
        };
        let center = (
            (local.row_min + local.row_max) as f32 / 2.0 + bounds.row_start as f32,
            (local.col_min + local.col_max) as f32 / 2.0 + bounds.col_start as f32,
        );
        dict.entry(instance.class_id).or_default().push(InstanceRecord {
            bbox,
            center,
            score: instance.score,
            class_id: instance.class_id,
        });
    }
    Ok(dict)
}
