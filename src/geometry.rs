//! Pixel-space geometry for crop calculations
//!
//! Pure math shared by the detectors: mapping the card finder viewport onto
//! the full camera image, deriving the square object-detection crop, and
//! mapping detected rectangles back into card-finder-relative coordinates.
//! The camera collaborator performs the actual pixel work; everything here
//! only computes rectangles.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::ssd::RectForm;

/// Pixel dimensions of an image or viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Pixel rectangle, edge form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> i32 {
        (self.left + self.right) / 2
    }

    pub fn center_y(&self) -> i32 {
        (self.top + self.bottom) / 2
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }
}

/// Largest size of the given aspect ratio that fits inside `area`.
pub fn max_aspect_ratio_in_size(area: Size, aspect_ratio: f32) -> Size {
    let mut width = area.width;
    let mut height = (width as f32 / aspect_ratio).round() as i32;
    if height <= area.height {
        Size::new(width, height)
    } else {
        height = area.height;
        width = (height as f32 * aspect_ratio).round() as i32;
        Size::new(width.min(area.width), height)
    }
}

/// Scale `size` to fit inside `containing`, centered within it.
pub fn scale_and_center_within(size: Size, containing: Size) -> Rect {
    let scaled = max_aspect_ratio_in_size(containing, size.aspect_ratio());
    let left = (containing.width - scaled.width) / 2;
    let top = (containing.height - scaled.height) / 2;
    Rect::new(left, top, left + scaled.width, top + scaled.height)
}

/// Precondition shared by every crop calculation: the card finder must sit
/// fully inside the preview viewport it was reported against.
fn ensure_finder_within_preview(preview: Size, card_finder: Rect) -> Result<(), PipelineError> {
    if card_finder.left >= 0
        && card_finder.right <= preview.width
        && card_finder.top >= 0
        && card_finder.bottom <= preview.height
    {
        Ok(())
    } else {
        Err(PipelineError::RegionOutOfBounds {
            region: card_finder,
            bounds: preview,
        })
    }
}

/// Scale a pixel rect by a uniform factor, rounding each edge.
fn scale_rect(rect: Rect, factor: f32) -> Rect {
    Rect::new(
        (rect.left as f32 * factor).round() as i32,
        (rect.top as f32 * factor).round() as i32,
        (rect.right as f32 * factor).round() as i32,
        (rect.bottom as f32 * factor).round() as i32,
    )
}

/// Position a preview-relative rect on the full image and clamp it to the
/// image bounds.
fn place_on_full_image(rect: Rect, scaled_preview: Rect, full_image: Size) -> Rect {
    Rect::new(
        (rect.left + scaled_preview.left).max(0),
        (rect.top + scaled_preview.top).max(0),
        (rect.right + scaled_preview.left).min(full_image.width),
        (rect.bottom + scaled_preview.top).min(full_image.height),
    )
}

/// Crop of the full image holding the card number region.
///
/// Assumes the preview and the full image are centered relative to each
/// other, share a field of view, and have the same orientation.
pub fn calculate_card_crop(
    full_image: Size,
    preview: Size,
    card_finder: Rect,
) -> Result<Rect, PipelineError> {
    ensure_finder_within_preview(preview, card_finder)?;

    let scaled_preview = scale_and_center_within(preview, full_image);
    let preview_scale = scaled_preview.width() as f32 / preview.width as f32;
    let scaled_finder = scale_rect(card_finder, preview_scale);

    Ok(place_on_full_image(scaled_finder, scaled_preview, full_image))
}

/// Largest square centered on the card finder, clamped to the preview.
pub fn object_detection_square(preview: Size, card_finder: Rect) -> Rect {
    let square = max_aspect_ratio_in_size(preview, 1.0);
    Rect::new(
        (card_finder.center_x() - square.width / 2).max(0),
        (card_finder.center_y() - square.height / 2).max(0),
        (card_finder.center_x() + square.width / 2).min(preview.width),
        (card_finder.center_y() + square.height / 2).min(preview.height),
    )
}

/// Crop of the full image handed to the card-feature detector.
pub fn calculate_object_crop(
    full_image: Size,
    preview: Size,
    card_finder: Rect,
) -> Result<Rect, PipelineError> {
    ensure_finder_within_preview(preview, card_finder)?;

    let square = object_detection_square(preview, card_finder);
    let scaled_preview = scale_and_center_within(preview, full_image);
    let preview_scale = scaled_preview.width() as f32 / preview.width as f32;
    let scaled_square = scale_rect(square, preview_scale);

    Ok(place_on_full_image(scaled_square, scaled_preview, full_image))
}

/// Map a normalized rect from object-detection space back into
/// card-finder-relative unit coordinates.
pub fn card_finder_rect_from_object_detection(
    rect: &RectForm,
    preview: Size,
    card_finder: Rect,
) -> RectForm {
    let square = object_detection_square(preview, card_finder);
    let scaled = rect.scaled(square.size());
    let dx = (square.width() - card_finder.width()) as f32 / 2.0;
    let dy = (square.height() - card_finder.height()) as f32 / 2.0;
    let finder_width = card_finder.width() as f32;
    let finder_height = card_finder.height() as f32;
    RectForm {
        left: (scaled.left - dx) / finder_width,
        top: (scaled.top - dy) / finder_height,
        right: (scaled.right - dx) / finder_width,
        bottom: (scaled.bottom - dy) / finder_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_aspect_ratio_wide_area() {
        // A square in a 16:9 area is limited by height
        let size = max_aspect_ratio_in_size(Size::new(1280, 720), 1.0);
        assert_eq!(size, Size::new(720, 720));
    }

    #[test]
    fn test_max_aspect_ratio_fits_width() {
        let size = max_aspect_ratio_in_size(Size::new(600, 600), 2.0);
        assert_eq!(size, Size::new(600, 300));
    }

    #[test]
    fn test_scale_and_center_within_centers() {
        let rect = scale_and_center_within(Size::new(640, 360), Size::new(1280, 720));
        assert_eq!(rect, Rect::new(0, 0, 1280, 720));

        let rect = scale_and_center_within(Size::new(100, 100), Size::new(300, 200));
        assert_eq!(rect, Rect::new(50, 0, 250, 200));
    }

    #[test]
    fn test_card_crop_identity_when_sizes_match() {
        let finder = Rect::new(320, 180, 960, 540);
        let crop = calculate_card_crop(Size::new(1280, 720), Size::new(1280, 720), finder).unwrap();
        assert_eq!(crop, finder);
    }

    #[test]
    fn test_card_crop_scales_with_full_image() {
        let finder = Rect::new(100, 100, 500, 300);
        let crop = calculate_card_crop(Size::new(1280, 720), Size::new(640, 360), finder).unwrap();
        assert_eq!(crop, Rect::new(200, 200, 1000, 600));
    }

    #[test]
    fn test_card_crop_rejects_out_of_bounds_finder() {
        let finder = Rect::new(-10, 0, 600, 360);
        let result = calculate_card_crop(Size::new(1280, 720), Size::new(640, 360), finder);
        assert!(matches!(
            result,
            Err(PipelineError::RegionOutOfBounds { .. })
        ));

        let finder = Rect::new(0, 0, 700, 360);
        let result = calculate_card_crop(Size::new(1280, 720), Size::new(640, 360), finder);
        assert!(result.is_err());
    }

    #[test]
    fn test_object_detection_square_is_square_and_clamped() {
        let preview = Size::new(1280, 720);
        let finder = Rect::new(0, 0, 200, 100);
        let square = object_detection_square(preview, finder);
        // Centered on the finder, clamped at the preview's top-left corner
        assert_eq!(square.left, 0);
        assert_eq!(square.top, 0);
        assert!(square.width() <= 720);
        assert!(square.height() <= 720);
    }

    #[test]
    fn test_object_crop_requires_finder_in_preview() {
        let finder = Rect::new(0, 0, 1300, 100);
        let result = calculate_object_crop(Size::new(1280, 720), Size::new(1280, 720), finder);
        assert!(result.is_err());
    }

    #[test]
    fn test_card_finder_rect_roundtrip_center() {
        // A rect covering the middle of the detection square maps near the
        // finder's own unit space
        let preview = Size::new(720, 720);
        let finder = Rect::new(60, 260, 660, 460);
        let rect = RectForm {
            left: 0.25,
            top: 0.25,
            right: 0.75,
            bottom: 0.75,
        };
        let mapped = card_finder_rect_from_object_detection(&rect, preview, finder);
        assert!(mapped.left < mapped.right);
        assert!(mapped.top < mapped.bottom);
        // Horizontal center of the square maps to the finder's center
        let center_x = (mapped.left + mapped.right) / 2.0;
        assert!((center_x - 0.5).abs() < 1e-4);
    }
}
