//! Expiry strip reading
//!
//! The expiry model scans 17 fixed window positions across the strip and
//! scores 11 classes per position (ten digits plus background). Consecutive
//! duplicate detections are collapsed greedily before the digit sequence is
//! validated into a month/year pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::geometry::{Rect, Size};
use crate::ssd::{greedy_non_maximum_suppression, RectForm};

const NUM_CLASSES: usize = 11;
const NUM_POSITIONS: usize = 17;
const BACKGROUND_CLASS: usize = 10;

/// Input strips are scaled to this size before inference.
pub const TRAINED_IMAGE_SIZE: Size = Size {
    width: 80,
    height: 36,
};

/// A card expiry date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expiry {
    pub month: u32,
    pub year: u32,
}

impl Expiry {
    pub fn is_valid_month(month: u32) -> bool {
        (1..=12).contains(&month)
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}", self.month, self.year % 100)
    }
}

/// Pixel rect of the expiry strip within its crop, recentered vertically to
/// the model's input aspect ratio.
pub fn strip_rect(expiry_box: &RectForm, crop: Size) -> Rect {
    let aspect = TRAINED_IMAGE_SIZE.height as f32 / TRAINED_IMAGE_SIZE.width as f32;
    let scaled = expiry_box.scaled(crop);
    let new_height = scaled.width() * aspect;
    let center_y = (scaled.top + scaled.bottom) / 2.0;
    Rect::new(
        scaled.left.round() as i32,
        (center_y - new_height / 2.0).round() as i32,
        scaled.right.round() as i32,
        (center_y + new_height / 2.0).round() as i32,
    )
}

/// Decode the 17-position classifier output into an expiry, if one is
/// legible.
///
/// Four digits are required; five are accepted when the middle one reads as
/// a 1, since the separator glyph is sometimes taken for that digit. A
/// month outside 1-12 or too few digits is a "no result", not an error.
pub fn interpret_strip(scores: &[f32]) -> Result<Option<Expiry>, PipelineError> {
    if scores.len() != NUM_POSITIONS * NUM_CLASSES {
        return Err(PipelineError::ShapeMismatch {
            expected: NUM_POSITIONS * NUM_CLASSES,
            actual: scores.len(),
        });
    }

    let mut labels = Vec::with_capacity(NUM_POSITIONS);
    let mut confidence = Vec::with_capacity(NUM_POSITIONS);
    for row in scores.chunks_exact(NUM_CLASSES) {
        let mut best = 0;
        for (class, &score) in row.iter().enumerate() {
            if score > row[best] {
                best = class;
            }
        }
        labels.push(best);
        confidence.push(row[best]);
    }

    let digits: Vec<usize> = greedy_non_maximum_suppression(&labels, &confidence)
        .into_iter()
        .map(|index| labels[index])
        .filter(|&label| label != BACKGROUND_CLASS)
        .collect();

    let legible = digits.len() == 4 || (digits.len() == 5 && digits[2] == 1);
    if !legible {
        return Ok(None);
    }

    let month = (digits[0] * 10 + digits[1]) as u32;
    let year = 2000 + (digits[digits.len() - 2] * 10 + digits[digits.len() - 1]) as u32;
    if Expiry::is_valid_month(month) {
        Ok(Some(Expiry { month, year }))
    } else {
        Ok(None)
    }
}
