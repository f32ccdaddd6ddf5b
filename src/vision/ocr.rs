//! Card number OCR
//!
//! Decodes the digit-detector SSD head into the printed card number. The
//! detector reads two feature maps (38x24 and 19x12) with three priors per
//! activation, 3420 priors total, over an 11-class head (ten digits plus
//! background).

use tracing::debug;

use crate::error::PipelineError;
use crate::geometry::Size;
use crate::ssd::{self, DetectionBox, FeatureMapConfig, PriorConfig, PriorTable};

use super::SsdRawOutput;

const NUM_CLASSES: usize = 11;
const NUM_COORDINATES: usize = 4;
const PRIORS_PER_ACTIVATION: usize = 3;

const PROB_THRESHOLD: f32 = 0.50;
const IOU_THRESHOLD: f32 = 0.50;
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;
const LIMIT: usize = 20;

/// Input crops are scaled to this size before inference.
pub const TRAINED_IMAGE_SIZE: Size = Size {
    width: 600,
    height: 375,
};

fn prior_config() -> PriorConfig {
    PriorConfig {
        image_width: 600,
        image_height: 375,
        feature_maps: vec![
            FeatureMapConfig {
                width: 38,
                height: 24,
                shrinkage: 16,
                box_size_min: 14,
                box_size_max: 30,
            },
            FeatureMapConfig {
                width: 19,
                height: 12,
                shrinkage: 31,
                box_size_min: 30,
                box_size_max: 45,
            },
        ],
        aspect_ratio_one: 2,
        aspect_ratio_two: 3,
        priors_per_activation: PRIORS_PER_ACTIVATION,
    }
}

/// Result of reading the number strip on one frame.
#[derive(Debug, Clone)]
pub struct OcrPrediction {
    /// The card number as printed, left to right
    pub pan: String,
    /// The per-digit boxes backing the string
    pub boxes: Vec<DetectionBox>,
}

/// Interpreter for the card-number SSD output.
pub struct OcrDetector {
    priors: PriorTable,
    config: PriorConfig,
}

impl OcrDetector {
    pub fn new() -> Self {
        let config = prior_config();
        let priors = PriorTable::generate(&config);
        Self { priors, config }
    }

    /// Decode one frame's raw tensors into the predicted card number.
    pub fn interpret(&self, output: &SsdRawOutput) -> Result<OcrPrediction, PipelineError> {
        let locations = ssd::rearrange_layers(
            &output.locations,
            &self.config.feature_maps,
            PRIORS_PER_ACTIVATION,
            NUM_COORDINATES,
        )?;
        let locations = ssd::into_matrix(locations, NUM_COORDINATES)?;
        let boxes = ssd::decode_locations(&locations, &self.priors, CENTER_VARIANCE, SIZE_VARIANCE)?;

        let scores = ssd::rearrange_layers(
            &output.class_scores,
            &self.config.feature_maps,
            PRIORS_PER_ACTIVATION,
            NUM_CLASSES,
        )?;
        let scores = ssd::softmax_scores(ssd::into_matrix(scores, NUM_CLASSES)?);

        // Digit classes 1-9 carry their own value; class 10 is the digit 0
        let mut detected = ssd::extract_predictions(
            &scores,
            &boxes,
            PROB_THRESHOLD,
            IOU_THRESHOLD,
            LIMIT,
            |class| if class == 10 { 0 } else { class },
        )?;
        detected.sort_by(|a, b| a.rect.left.total_cmp(&b.rect.left));
        let detected = filter_vertical_outliers(detected);

        let pan: String = detected.iter().map(|b| digit_char(b.label)).collect();
        debug!(digits = detected.len(), pan = %pan, "decoded number strip");
        Ok(OcrPrediction {
            pan,
            boxes: detected,
        })
    }
}

impl Default for OcrDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn digit_char(label: usize) -> char {
    (b'0' + label as u8) as char
}

/// Drop digit boxes that sit off the dominant text line.
///
/// The card number is printed on a single line; reflections and embossed
/// second rows occasionally produce stray digits above or below it.
fn filter_vertical_outliers(boxes: Vec<DetectionBox>) -> Vec<DetectionBox> {
    if boxes.len() < 3 {
        return boxes;
    }

    let mut centers: Vec<f32> = boxes
        .iter()
        .map(|b| (b.rect.top + b.rect.bottom) / 2.0)
        .collect();
    centers.sort_by(|a, b| a.total_cmp(b));
    let median_center = centers[centers.len() / 2];

    let mut heights: Vec<f32> = boxes.iter().map(|b| b.rect.height()).collect();
    heights.sort_by(|a, b| a.total_cmp(b));
    let median_height = heights[heights.len() / 2];

    boxes
        .into_iter()
        .filter(|b| {
            let center = (b.rect.top + b.rect.bottom) / 2.0;
            (center - median_center).abs() <= median_height / 2.0
        })
        .collect()
}
