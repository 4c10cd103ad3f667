//! Per-point feature assembly.
//!
//! Every subsampled pixel carries a feature vector that the voxel splatter
//! accumulates:
//!
//! | Group | Width | Value |
//! |---|---|---|
//! | `Presence` | 1 | constant 1 |
//! | `Semantic` | C | category scores, average-pooled |
//! | `Probability` | 1 | `max_i(score_i · relevance[class_i] · mask_i)`, max-pooled |
//! | `Instances` | K | mask of each confirmed detection, max-pooled |
//!
//! K (the number of detections scoring above the confirm threshold) changes
//! from step to step, so the layout is rebuilt on every call. Max pooling
//! keeps the peak detection confidence of a pooled block instead of diluting
//! it with background pixels.

use ndarray::{Array2, ArrayView2, Axis, s};
use polo_map::layout::ChannelLayout;
use polo_types::{DetectionResults, MapError, ObservationFrame};
use tracing::trace;

// ────────────────────────────────────────────────────────────────────────────
// Layout
// ────────────────────────────────────────────────────────────────────────────

/// Channel groups of the per-point feature matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureChannel {
    Presence,
    Semantic,
    Probability,
    Instances,
}

pub type FeatureLayout = ChannelLayout<FeatureChannel>;

/// Layout for `num_categories` semantic planes and `num_instances` confirmed
/// detections.
pub fn feature_layout(num_categories: usize, num_instances: usize) -> FeatureLayout {
    ChannelLayout::new()
        .with(FeatureChannel::Presence, 1)
        .with(FeatureChannel::Semantic, num_categories)
        .with(FeatureChannel::Probability, 1)
        .with(FeatureChannel::Instances, num_instances)
}

/// A detection that scored above the confirm threshold and owns an instance
/// channel this step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmedInstance {
    pub class_id: usize,
    pub score: f32,
}

/// Per-point features in the same order as the point cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeatures {
    pub layout: FeatureLayout,
    /// `(channels, points)`.
    pub values: Array2<f32>,
    /// One entry per `Instances` channel, in channel order.
    pub confirmed: Vec<ConfirmedInstance>,
}

impl PointFeatures {
    pub fn num_points(&self) -> usize {
        self.values.ncols()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pooling
// ────────────────────────────────────────────────────────────────────────────

fn pool(plane: ArrayView2<'_, f32>, k: usize, reduce: impl Fn(ArrayView2<'_, f32>) -> f32) -> Array2<f32> {
    let (h, w) = plane.dim();
    Array2::from_shape_fn((h / k, w / k), |(r, c)| {
        reduce(plane.slice(s![r * k..(r + 1) * k, c * k..(c + 1) * k]))
    })
}

/// Non-overlapping `k × k` mean.
pub fn avg_pool(plane: ArrayView2<'_, f32>, k: usize) -> Array2<f32> {
    pool(plane, k, |block| block.mean().unwrap_or(0.0))
}

/// Non-overlapping `k × k` maximum.
pub fn max_pool(plane: ArrayView2<'_, f32>, k: usize) -> Array2<f32> {
    pool(plane, k, |block| block.fold(f32::NEG_INFINITY, |m, &v| m.max(v)))
}

// ────────────────────────────────────────────────────────────────────────────
// FeatureAssembler
// ────────────────────────────────────────────────────────────────────────────

/// Builds [`PointFeatures`] from a frame and optional detections.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureAssembler {
    /// Pixel stride of the point grid.
    pub stride: usize,
    /// Detections scoring strictly above this get an instance channel.
    pub confirm_threshold: f32,
}

impl FeatureAssembler {
    pub fn new(stride: usize, confirm_threshold: f32) -> Self {
        Self {
            stride,
            confirm_threshold,
        }
    }

    /// Assemble features. With `with_instances == false` no instance
    /// channels are produced even when detections are confirmed.
    pub fn assemble(
        &self,
        frame: &ObservationFrame,
        detections: Option<&DetectionResults>,
        with_instances: bool,
    ) -> Result<PointFeatures, MapError> {
        let (h, w) = (frame.height(), frame.width());
        let k = self.stride;
        let points = (h / k) * (w / k);

        let probability = match detections {
            Some(results) if !results.is_empty() => Some(self.probability_feature(frame, results)?),
            _ => None,
        };

        let confirmed: Vec<(ConfirmedInstance, Array2<f32>)> = match detections {
            Some(results) if with_instances => results
                .detections
                .iter()
                .filter(|d| d.score > self.confirm_threshold)
                .map(|d| {
                    let mask = d.mask.mapv(|m| if m { 1.0 } else { 0.0 });
                    let instance = ConfirmedInstance {
                        class_id: d.class_id,
                        score: d.score,
                    };
                    (instance, max_pool(mask.view(), k))
                })
                .collect(),
            _ => Vec::new(),
        };

        let layout = feature_layout(frame.num_categories(), confirmed.len());
        let mut values = Array2::zeros((layout.total(), points));

        values.row_mut(layout.index(FeatureChannel::Presence)).fill(1.0);

        let semantic_start = layout.index(FeatureChannel::Semantic);
        for (c, plane) in frame.semantic().axis_iter(Axis(0)).enumerate() {
            let pooled = avg_pool(plane, k);
            values
                .row_mut(semantic_start + c)
                .assign(&pooled.into_shape_with_order(points).map_err(|e| {
                    MapError::shape("pooled semantic plane", points, e.to_string())
                })?);
        }

        if let Some(prob) = probability {
            values
                .row_mut(layout.index(FeatureChannel::Probability))
                .assign(&prob.into_shape_with_order(points).map_err(|e| {
                    MapError::shape("pooled probability plane", points, e.to_string())
                })?);
        }

        let instance_start = layout.index(FeatureChannel::Instances);
        for (i, (_, pooled)) in confirmed.iter().enumerate() {
            for (j, &v) in pooled.iter().enumerate() {
                values[[instance_start + i, j]] = v;
            }
        }

        trace!(
            points,
            channels = layout.total(),
            confirmed = confirmed.len(),
            "assembled point features"
        );
        Ok(PointFeatures {
            layout,
            values,
            confirmed: confirmed.into_iter().map(|(c, _)| c).collect(),
        })
    }

    /// Per-pixel max of `score · relevance` over detection masks, max-pooled.
    fn probability_feature(
        &self,
        frame: &ObservationFrame,
        results: &DetectionResults,
    ) -> Result<Array2<f32>, MapError> {
        let (h, w) = (frame.height(), frame.width());
        let mut peak = Array2::<f32>::zeros((h, w));
        for det in &results.detections {
            if det.mask.dim() != (h, w) {
                return Err(MapError::shape("detection mask", (h, w), det.mask.dim()));
            }
            let weight = det.score * results.relevance_of(det.class_id)?;
            peak.zip_mut_with(&det.mask, |p, &m| {
                if m {
                    *p = p.max(weight);
                }
            });
        }
        Ok(max_pool(peak.view(), self.stride))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};
    use polo_types::Detection;

    fn frame(h: usize, w: usize, categories: usize) -> ObservationFrame {
        ObservationFrame::new(
            Array3::zeros((3, h, w)),
            Array2::from_elem((h, w), 100.0),
            Array3::zeros((categories, h, w)),
        )
        .unwrap()
    }

    fn mask(h: usize, w: usize, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> Array2<bool> {
        let mut m = Array2::from_elem((h, w), false);
        m.slice_mut(s![rows, cols]).fill(true);
        m
    }

    #[test]
    fn pooling() {
        let plane = array![
            [1.0f32, 3.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 8.0],
        ];
        assert_eq!(avg_pool(plane.view(), 2), array![[1.0f32, 2.0]]);
        assert_eq!(max_pool(plane.view(), 2), array![[3.0f32, 8.0]]);
    }

    #[test]
    fn no_detections_gives_zero_probability_and_no_instances() {
        let f = frame(4, 4, 2);
        let feats = FeatureAssembler::new(2, 0.5).assemble(&f, None, true).unwrap();
        assert_eq!(feats.layout.total(), 1 + 2 + 1);
        assert_eq!(feats.num_points(), 4);
        assert!(feats.confirmed.is_empty());
        assert!(feats.values.row(0).iter().all(|&v| v == 1.0));
        let prob = feats.layout.index(FeatureChannel::Probability);
        assert!(feats.values.row(prob).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_detection_set_matches_none() {
        let f = frame(4, 4, 2);
        let asm = FeatureAssembler::new(2, 0.5);
        let empty = DetectionResults::new(Vec::new(), vec![1.0, 1.0]);
        assert_eq!(
            asm.assemble(&f, Some(&empty), true).unwrap(),
            asm.assemble(&f, None, true).unwrap()
        );
    }

    #[test]
    fn semantic_scores_are_average_pooled() {
        let mut sem = Array3::zeros((1, 4, 4));
        sem[[0, 0, 0]] = 1.0;
        let f = ObservationFrame::new(Array3::zeros((3, 4, 4)), Array2::zeros((4, 4)), sem).unwrap();
        let feats = FeatureAssembler::new(2, 0.5).assemble(&f, None, true).unwrap();
        let row = feats.layout.index(FeatureChannel::Semantic);
        assert!((feats.values[[row, 0]] - 0.25).abs() < 1e-6);
        assert_eq!(feats.values[[row, 1]], 0.0);
    }

    #[test]
    fn probability_takes_max_over_overlapping_detections() {
        let f = frame(4, 4, 3);
        let detections = DetectionResults::new(
            vec![
                Detection { class_id: 1, score: 0.9, mask: mask(4, 4, 0..2, 0..4) },
                Detection { class_id: 2, score: 0.8, mask: mask(4, 4, 0..1, 0..1) },
            ],
            vec![0.0, 1.0, 0.5],
        );
        let feats = FeatureAssembler::new(2, 0.5)
            .assemble(&f, Some(&detections), true)
            .unwrap();
        let prob = feats.layout.index(FeatureChannel::Probability);
        // Point 0 sees 0.9 and 0.4: the max wins, no summing.
        assert!((feats.values[[prob, 0]] - 0.9).abs() < 1e-6);
        assert!((feats.values[[prob, 1]] - 0.9).abs() < 1e-6);
        assert_eq!(feats.values[[prob, 2]], 0.0);
    }

    #[test]
    fn only_confirmed_detections_get_instance_channels() {
        let f = frame(4, 4, 2);
        let detections = DetectionResults::new(
            vec![
                Detection { class_id: 0, score: 0.3, mask: mask(4, 4, 0..4, 0..4) },
                Detection { class_id: 1, score: 0.7, mask: mask(4, 4, 2..3, 3..4) },
            ],
            vec![1.0, 1.0],
        );
        let feats = FeatureAssembler::new(2, 0.5)
            .assemble(&f, Some(&detections), true)
            .unwrap();
        assert_eq!(feats.confirmed, vec![ConfirmedInstance { class_id: 1, score: 0.7 }]);
        assert_eq!(feats.layout.width(FeatureChannel::Instances), 1);
        let inst = feats.layout.index(FeatureChannel::Instances);
        assert_eq!(feats.values.row(inst).to_vec(), vec![0.0, 0.0, 0.0, 1.0]);

        let without = FeatureAssembler::new(2, 0.5)
            .assemble(&f, Some(&detections), false)
            .unwrap();
        assert!(without.confirmed.is_empty());
        assert_eq!(without.layout.width(FeatureChannel::Instances), 0);
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let f = frame(4, 4, 1);
        let detections = DetectionResults::new(
            vec![Detection { class_id: 0, score: 0.9, mask: Array2::from_elem((2, 2), true) }],
            vec![1.0],
        );
        let err = FeatureAssembler::new(2, 0.5)
            .assemble(&f, Some(&detections), true)
            .unwrap_err();
        assert!(matches!(err, MapError::ShapeMismatch { .. }));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let f = frame(4, 4, 1);
        let detections = DetectionResults::new(
            vec![Detection { class_id: 4, score: 0.9, mask: mask(4, 4, 0..1, 0..1) }],
            vec![1.0],
        );
        let err = FeatureAssembler::new(2, 0.5)
            .assemble(&f, Some(&detections), true)
            .unwrap_err();
        assert!(matches!(err, MapError::UnknownClass { class_id: 4, .. }));
    }
}
