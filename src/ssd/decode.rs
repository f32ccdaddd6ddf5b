//! Tensor reordering and location decoding
//!
//! The model emits its tensors per feature map, channel-major. Decoding
//! first reorders them into a single prior-major sequence, then applies the
//! variance-scaled offsets to the prior table and normalizes class logits.

use ndarray::Array2;

use crate::error::PipelineError;

use super::{FeatureMapConfig, PriorBox, PriorTable, RectForm};

/// Reorder a model-native tensor into prior-major order.
///
/// Each feature map block arrives channel-major
/// (`[priors_per_activation * floats_per_prior][height][width]`) and is
/// emitted position-major (`[height][width][prior][float]`); blocks stay in
/// configuration order. An element count that does not match the
/// configuration is a contract violation and fails fast.
pub fn rearrange_layers(
    data: &[f32],
    maps: &[FeatureMapConfig],
    priors_per_activation: usize,
    floats_per_prior: usize,
) -> Result<Vec<f32>, PipelineError> {
    let expected: usize = maps
        .iter()
        .map(|map| map.tensor_len(priors_per_activation, floats_per_prior))
        .sum();
    if data.len() != expected {
        return Err(PipelineError::ShapeMismatch {
            expected,
            actual: data.len(),
        });
    }

    let channels = priors_per_activation * floats_per_prior;
    let mut out = Vec::with_capacity(expected);
    let mut offset = 0;
    for map in maps {
        let block = &data[offset..offset + map.tensor_len(priors_per_activation, floats_per_prior)];
        let plane = map.width * map.height;
        for y in 0..map.height {
            for x in 0..map.width {
                for c in 0..channels {
                    out.push(block[c * plane + y * map.width + x]);
                }
            }
        }
        offset += block.len();
    }
    Ok(out)
}

/// Shape a flat prior-major vector into a (priors x columns) matrix.
pub fn into_matrix(data: Vec<f32>, columns: usize) -> Result<Array2<f32>, PipelineError> {
    let len = data.len();
    if columns == 0 || len % columns != 0 {
        return Err(PipelineError::ShapeMismatch {
            expected: columns,
            actual: len,
        });
    }
    let rows = len / columns;
    Array2::from_shape_vec((rows, columns), data).map_err(|_| PipelineError::ShapeMismatch {
        expected: rows * columns,
        actual: len,
    })
}

/// Decode per-prior location offsets into absolute rect-form boxes.
///
/// Offsets are ordered `[cx, cy, h, w]` per prior; a zero offset reproduces
/// the prior's own rectangle.
pub fn decode_locations(
    locations: &Array2<f32>,
    priors: &PriorTable,
    center_variance: f32,
    size_variance: f32,
) -> Result<Vec<RectForm>, PipelineError> {
    if locations.nrows() != priors.len() || locations.ncols() != 4 {
        return Err(PipelineError::ShapeMismatch {
            expected: priors.len() * 4,
            actual: locations.len(),
        });
    }

    Ok(locations
        .rows()
        .into_iter()
        .zip(priors.as_slice())
        .map(|(offsets, prior)| {
            PriorBox {
                cx: offsets[0] * center_variance * prior.w + prior.cx,
                cy: offsets[1] * center_variance * prior.h + prior.cy,
                h: (offsets[2] * size_variance).exp() * prior.h,
                w: (offsets[3] * size_variance).exp() * prior.w,
            }
            .to_rect_form()
        })
        .collect())
}

/// Normalize per-prior class logits into probabilities.
///
/// Independent softmax per row; the row maximum is subtracted before
/// exponentiating to keep the computation stable for large logits.
pub fn softmax_scores(mut scores: Array2<f32>) -> Array2<f32> {
    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssd::PriorConfig;

    fn tiny_config() -> PriorConfig {
        PriorConfig {
            image_width: 100,
            image_height: 100,
            feature_maps: vec![FeatureMapConfig {
                width: 2,
                height: 2,
                shrinkage: 50,
                box_size_min: 20,
                box_size_max: 40,
            }],
            aspect_ratio_one: 2,
            aspect_ratio_two: 3,
            priors_per_activation: 2,
        }
    }

    #[test]
    fn test_rearrange_single_layer() {
        // 2x2 map, 1 prior, 2 floats per prior: channels are [p0f0, p0f1]
        let maps = [FeatureMapConfig {
            width: 2,
            height: 2,
            shrinkage: 1,
            box_size_min: 1,
            box_size_max: 1,
        }];
        // Channel-major: all f0 values for the 4 positions, then all f1 values
        let native = vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0];
        let rearranged = rearrange_layers(&native, &maps, 1, 2).unwrap();
        assert_eq!(rearranged, vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0]);
    }

    #[test]
    fn test_rearrange_rejects_wrong_length() {
        let maps = [FeatureMapConfig {
            width: 2,
            height: 2,
            shrinkage: 1,
            box_size_min: 1,
            box_size_max: 1,
        }];
        let err = rearrange_layers(&[0.0; 7], &maps, 1, 2).unwrap_err();
        assert_eq!(
            err,
            PipelineError::ShapeMismatch {
                expected: 8,
                actual: 7
            }
        );
    }

    #[test]
    fn test_zero_offsets_reproduce_priors() {
        let config = tiny_config();
        let priors = PriorTable::generate(&config);
        let locations = Array2::zeros((priors.len(), 4));
        let rects = decode_locations(&locations, &priors, 0.1, 0.2).unwrap();
        for (rect, prior) in rects.iter().zip(priors.as_slice()) {
            let expected = prior.to_rect_form();
            assert!((rect.left - expected.left).abs() < 1e-6);
            assert!((rect.top - expected.top).abs() < 1e-6);
            assert!((rect.right - expected.right).abs() < 1e-6);
            assert!((rect.bottom - expected.bottom).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decoded_rects_are_well_formed() {
        let config = tiny_config();
        let priors = PriorTable::generate(&config);
        let mut locations = Array2::zeros((priors.len(), 4));
        locations[[0, 0]] = 2.5;
        locations[[0, 2]] = -1.0;
        locations[[1, 3]] = 1.5;
        let rects = decode_locations(&locations, &priors, 0.1, 0.2).unwrap();
        for rect in &rects {
            assert!(rect.left <= rect.right);
            assert!(rect.top <= rect.bottom);
        }
    }

    #[test]
    fn test_decode_rejects_mismatched_priors() {
        let config = tiny_config();
        let priors = PriorTable::generate(&config);
        let locations = Array2::zeros((priors.len() + 1, 4));
        assert!(decode_locations(&locations, &priors, 0.1, 0.2).is_err());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let logits =
            Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0]).unwrap();
        let probs = softmax_scores(logits);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        // Largest logit wins
        assert!(probs[[0, 2]] > probs[[0, 1]]);
        // Uniform logits split evenly, even when individually huge
        assert!((probs[[1, 0]] - 1.0 / 3.0).abs() < 1e-5);
    }
}
