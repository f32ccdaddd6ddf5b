//! Cardholder name extraction
//!
//! Slides a square character window across the detected name box, classifies
//! each window through the external classifier, and reconstructs the printed
//! name from the noisy, overlapping prediction stream: hard NMS deduplicates
//! windows, cluster voting picks each letter, and the word-space width is
//! inferred from the space-run distribution instead of a fixed threshold.

use anyhow::Result;
use tracing::debug;

use crate::geometry::{Rect, Size};
use crate::ssd::{hard_non_maximum_suppression, RectForm};

use super::alphabet::{self, CharPrediction};
use super::{ScanBackends, WindowCrop};

/// Prediction windows per character width.
const PREDICTION_STRIDES: i32 = 10;
const NMS_THRESHOLD: f32 = 0.75;
/// Peak confidence a cluster must reach to emit its letter.
const CHAR_CONFIDENCE_THRESHOLD: f32 = 0.7;
/// Word-space width assumed when too few space runs exist to infer one.
const DEFAULT_SPACE_WIDTH: usize = 10;

/// A window's character prediction with the region-relative box it was read
/// from.
#[derive(Debug, Clone)]
struct CharPredictionWithBox {
    prediction: CharPrediction,
    window: Rect,
}

impl CharPredictionWithBox {
    fn normalized_rect(&self, size: Size) -> RectForm {
        RectForm {
            left: self.window.left as f32 / size.width as f32,
            top: self.window.top as f32 / size.height as f32,
            right: self.window.right as f32 / size.width as f32,
            bottom: self.window.bottom as f32 / size.height as f32,
        }
    }
}

/// Extracts the printed name behind a detected name box.
pub struct NameExtractor;

impl NameExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Sample, classify and reconstruct the name within `name_box`.
    ///
    /// `name_box` is normalized against the object-detection crop. Windows
    /// are classified serially, left to right; an unreadable or empty region
    /// is `None`, not an error.
    pub async fn extract<B: ScanBackends + ?Sized>(
        &self,
        backend: &B,
        name_box: &RectForm,
        object_crop: Rect,
    ) -> Result<Option<String>> {
        let crop_size = object_crop.size();
        let scaled = name_box.scaled(crop_size);
        let x = scaled.left as i32;
        let y = scaled.top as i32;
        let width = scaled.width() as i32;
        let height = scaled.height() as i32;

        // The character recognizer reads square windows, so the name box
        // height doubles as the window edge length.
        let char_width = height;
        if char_width <= 0 {
            return Ok(None);
        }

        // Widen the region so the first character is fully captured.
        let x_start = (x - char_width / 2).max(0);
        let region_width = (width + char_width).min(crop_size.width - x_start);

        let stride = (char_width / PREDICTION_STRIDES).max(1);
        let mut predictions = Vec::new();
        let mut name_x = 0;
        while name_x < region_width - char_width {
            let window = Rect::new(
                x_start + name_x,
                y,
                x_start + name_x + char_width,
                y + char_width,
            );
            let probabilities = backend
                .alphabet(WindowCrop {
                    base: object_crop,
                    window,
                })
                .await?;
            predictions.push(CharPredictionWithBox {
                prediction: alphabet::interpret_window(&probabilities)?,
                window: Rect::new(name_x, 0, name_x + char_width, char_width),
            });
            name_x += stride;
        }

        if predictions.is_empty() {
            return Ok(None);
        }

        let boxes: Vec<RectForm> = predictions
            .iter()
            .map(|p| p.normalized_rect(crop_size))
            .collect();
        let probabilities: Vec<f32> = predictions
            .iter()
            .map(|p| p.prediction.confidence)
            .collect();
        let keep = hard_non_maximum_suppression(&boxes, &probabilities, NMS_THRESHOLD, 0);

        let surviving: Vec<CharPrediction> = predictions
            .into_iter()
            .enumerate()
            .filter(|(index, _)| keep.contains(index))
            .map(|(_, p)| p.prediction)
            .collect();

        let name = reconstruct_sequence(&surviving);
        debug!(windows = surviving.len(), name = %name, "reconstructed name");
        Ok(if name.is_empty() { None } else { Some(name) })
    }
}

impl Default for NameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuild the printed string from an ordered, deduplicated prediction
/// stream.
pub fn reconstruct_sequence(predictions: &[CharPrediction]) -> String {
    let mut intermediate: Vec<char> = Vec::new();
    let mut cluster: Vec<&CharPrediction> = Vec::new();
    let mut space_runs: Vec<usize> = Vec::new();

    let mut current_space_run = 0usize;
    let mut chars_seen = false;
    for prediction in predictions {
        if prediction.character == ' ' {
            if !cluster.is_empty() {
                intermediate.push(vote_cluster(&cluster));
                cluster.clear();
            }
            current_space_run += 1;
            intermediate.push(' ');
        } else {
            if current_space_run > 0 {
                // Leading runs carry no word-boundary information
                if chars_seen {
                    space_runs.push(current_space_run);
                }
                current_space_run = 0;
            }
            chars_seen = true;
            cluster.push(prediction);
        }
    }
    if !cluster.is_empty() {
        intermediate.push(vote_cluster(&cluster));
    }

    assemble(&intermediate, space_width(&space_runs))
}

/// Pick the letter a cluster of consecutive predictions agrees on.
///
/// The longest run of one letter wins; equal-length runs are tie-broken by
/// peak confidence. A winner below the confidence threshold reads as a
/// space.
fn vote_cluster(cluster: &[&CharPrediction]) -> char {
    let mut candidate = ' ';
    let mut candidate_confidence = 0.0f32;
    let mut candidate_run = 0usize;
    let mut current_run = 0usize;
    let mut current_peak = 0.0f32;
    let mut last_seen = '\0';

    for prediction in cluster {
        if last_seen == prediction.character {
            current_run += 1;
            current_peak = current_peak.max(prediction.confidence);
        } else {
            current_run = 1;
            current_peak = prediction.confidence;
            last_seen = prediction.character;
        }
        if (current_run == candidate_run && current_peak > candidate_confidence)
            || current_run > candidate_run
        {
            candidate = prediction.character;
            candidate_confidence = current_peak;
            candidate_run = current_run;
        }
    }

    if candidate_confidence > CHAR_CONFIDENCE_THRESHOLD {
        candidate
    } else {
        ' '
    }
}

/// Infer how many consecutive space predictions separate two words.
///
/// Operates on the interior space-run lengths (leading/trailing runs
/// excluded by the caller). With two or fewer runs the default width
/// applies. Otherwise the two largest runs are compared against the 25th
/// percentile of the distribution: when the widest run is not clearly wider
/// than the runner-up, the runner-up already marks a word gap.
fn space_width(runs: &[usize]) -> usize {
    if runs.len() <= 2 {
        return DEFAULT_SPACE_WIDTH;
    }
    let mut sorted = runs.to_vec();
    sorted.sort_unstable();
    let p25 = sorted[sorted.len() * 25 / 100];
    let pmax = sorted[sorted.len() - 1];
    let pmax2 = sorted[sorted.len() - 2];
    if pmax == pmax2 && pmax == p25 {
        pmax + 1
    } else if (pmax - pmax2) * 2 <= pmax2 - p25 {
        pmax2
    } else {
        pmax
    }
}

/// Emit the final string, swallowing space runs narrower than a word gap.
fn assemble(intermediate: &[char], space_width: usize) -> String {
    let mut word = String::new();
    let mut consecutive_spaces = 0usize;
    for &c in intermediate {
        if c == ' ' {
            consecutive_spaces += 1;
            if consecutive_spaces == space_width {
                word.push(' ');
            }
        } else {
            word.push(c);
            consecutive_spaces = 0;
        }
    }
    word.trim().to_string()
}
