//! SSD output decoding primitives
//!
//! Anchor ("prior") box generation, tensor decoding, and suppression for
//! single-shot detector heads. Everything in this module is pure and
//! deterministic: the same configuration and tensors always produce the same
//! boxes, so per-frame decode can run on any worker without synchronization.

pub mod decode;
pub mod priors;
pub mod suppress;

pub use decode::{decode_locations, into_matrix, rearrange_layers, softmax_scores};
pub use priors::{FeatureMapConfig, PriorConfig, PriorTable};
pub use suppress::{
    extract_predictions, greedy_non_maximum_suppression, hard_non_maximum_suppression,
    intersection_over_union,
};

use serde::{Deserialize, Serialize};

use crate::geometry::Size;

/// A bounding box in center-size form, normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorBox {
    pub cx: f32,
    pub cy: f32,
    pub h: f32,
    pub w: f32,
}

impl PriorBox {
    /// Convert to edge (rect) form.
    pub fn to_rect_form(&self) -> RectForm {
        RectForm {
            left: self.cx - self.w / 2.0,
            top: self.cy - self.h / 2.0,
            right: self.cx + self.w / 2.0,
            bottom: self.cy + self.h / 2.0,
        }
    }
}

/// A bounding box in edge form. Coordinates are normalized to the image the
/// box was decoded against unless noted otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectForm {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectForm {
    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Scale unit coordinates into a pixel space of the given size.
    pub fn scaled(&self, size: Size) -> RectForm {
        RectForm {
            left: self.left * size.width as f32,
            top: self.top * size.height as f32,
            right: self.right * size.width as f32,
            bottom: self.bottom * size.height as f32,
        }
    }
}

/// A decoded, suppressed detection.
#[derive(Debug, Clone)]
pub struct DetectionBox {
    pub rect: RectForm,
    /// Detector-specific label index, background already dropped
    pub label: usize,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_size_to_rect_form() {
        let prior = PriorBox {
            cx: 0.5,
            cy: 0.5,
            h: 0.2,
            w: 0.4,
        };
        let rect = prior.to_rect_form();
        assert!((rect.left - 0.3).abs() < 1e-6);
        assert!((rect.top - 0.4).abs() < 1e-6);
        assert!((rect.right - 0.7).abs() < 1e-6);
        assert!((rect.bottom - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_rect_has_zero_area() {
        let rect = RectForm {
            left: 0.6,
            top: 0.2,
            right: 0.4,
            bottom: 0.3,
        };
        assert_eq!(rect.width(), 0.0);
        assert_eq!(rect.area(), 0.0);
    }

    #[test]
    fn test_scaled_maps_to_pixels() {
        let rect = RectForm {
            left: 0.25,
            top: 0.5,
            right: 0.75,
            bottom: 1.0,
        };
        let scaled = rect.scaled(Size::new(400, 200));
        assert_eq!(scaled.left, 100.0);
        assert_eq!(scaled.top, 100.0);
        assert_eq!(scaled.right, 300.0);
        assert_eq!(scaled.bottom, 200.0);
    }
}
