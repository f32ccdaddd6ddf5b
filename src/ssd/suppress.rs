//! Non-maximum suppression
//!
//! Reduces the dense decoded box set to a clean, non-overlapping candidate
//! set. Two policies: cross-class "hard" suppression over arbitrary box
//! sets, and "greedy" run collapsing over an ordered prediction stream.

use ndarray::Array2;

use crate::error::PipelineError;

use super::{DetectionBox, RectForm};

/// Intersection-over-union of two rect-form boxes.
pub fn intersection_over_union(a: &RectForm, b: &RectForm) -> f32 {
    let overlap = RectForm {
        left: a.left.max(b.left),
        top: a.top.max(b.top),
        right: a.right.min(b.right),
        bottom: a.bottom.min(b.bottom),
    };
    let overlap_area = overlap.area();
    let union = a.area() + b.area() - overlap_area;
    if union <= f32::EPSILON {
        0.0
    } else {
        overlap_area / union
    }
}

/// Cross-class hard non-maximum suppression.
///
/// Repeatedly keeps the most confident remaining box and removes every box
/// whose IoU with it meets the threshold. Returns retained indices in
/// confidence-descending order; the sort is stable, so equal confidences
/// keep their input order. A `limit` of 0 keeps every survivor.
pub fn hard_non_maximum_suppression(
    boxes: &[RectForm],
    probabilities: &[f32],
    iou_threshold: f32,
    limit: usize,
) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), probabilities.len());

    let mut remaining: Vec<usize> = (0..boxes.len()).collect();
    remaining.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let mut picked = Vec::new();
    while let Some(&current) = remaining.first() {
        picked.push(current);
        if limit > 0 && picked.len() == limit {
            break;
        }
        remaining.retain(|&candidate| {
            candidate != current
                && intersection_over_union(&boxes[current], &boxes[candidate]) < iou_threshold
        });
    }
    picked
}

/// Greedy suppression of an ordered prediction stream.
///
/// Collapses each run of consecutive identical labels to its single
/// highest-confidence member and returns the retained indices in input
/// order. The background label collapses like any other label, so callers
/// can still filter it afterwards.
pub fn greedy_non_maximum_suppression(labels: &[usize], confidence: &[f32]) -> Vec<usize> {
    debug_assert_eq!(labels.len(), confidence.len());

    let mut picked = Vec::new();
    let mut best_in_run: Option<usize> = None;
    for index in 0..labels.len() {
        match best_in_run {
            Some(best) if labels[best] == labels[index] => {
                if confidence[index] > confidence[best] {
                    best_in_run = Some(index);
                }
            }
            Some(best) => {
                picked.push(best);
                best_in_run = Some(index);
            }
            None => best_in_run = Some(index),
        }
    }
    if let Some(best) = best_in_run {
        picked.push(best);
    }
    picked
}

/// Threshold, suppress and label the decoded output of one SSD pass.
///
/// Every prior contributes its arg-max non-background class; predictions
/// above `probability_threshold` go through hard NMS, and the surviving raw
/// class indices are remapped through `class_to_label`.
pub fn extract_predictions(
    scores: &Array2<f32>,
    boxes: &[RectForm],
    probability_threshold: f32,
    iou_threshold: f32,
    limit: usize,
    class_to_label: impl Fn(usize) -> usize,
) -> Result<Vec<DetectionBox>, PipelineError> {
    if scores.nrows() != boxes.len() {
        return Err(PipelineError::ShapeMismatch {
            expected: boxes.len() * scores.ncols(),
            actual: scores.len(),
        });
    }

    let mut candidate_boxes = Vec::new();
    let mut candidate_probs = Vec::new();
    let mut candidate_classes = Vec::new();
    for (prior, row) in scores.rows().into_iter().enumerate() {
        let mut best_class = 0;
        let mut best_prob = 0.0f32;
        for class in 1..row.len() {
            if row[class] > best_prob {
                best_prob = row[class];
                best_class = class;
            }
        }
        if best_class != 0 && best_prob > probability_threshold {
            candidate_boxes.push(boxes[prior]);
            candidate_probs.push(best_prob);
            candidate_classes.push(best_class);
        }
    }

    let picked = hard_non_maximum_suppression(
        &candidate_boxes,
        &candidate_probs,
        iou_threshold,
        limit,
    );
    Ok(picked
        .into_iter()
        .map(|index| DetectionBox {
            rect: candidate_boxes[index],
            label: class_to_label(candidate_classes[index]),
            confidence: candidate_probs[index],
        })
        .collect())
}
