//! Card feature detection
//!
//! Decodes the whole-card SSD head into labelled feature boxes (logos, chip,
//! number strip, cardholder name, expiry). Two feature maps (19x19 and
//! 10x10) with six priors per activation, 2766 priors total, over a 14-class
//! head (13 card features plus background).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PipelineError;
use crate::geometry::Size;
use crate::ssd::{self, DetectionBox, FeatureMapConfig, PriorConfig, PriorTable};

use super::SsdRawOutput;

const NUM_CLASSES: usize = 14;
const NUM_COORDINATES: usize = 4;
const PRIORS_PER_ACTIVATION: usize = 6;

const PROB_THRESHOLD: f32 = 0.3;
const IOU_THRESHOLD: f32 = 0.45;
const CENTER_VARIANCE: f32 = 0.1;
const SIZE_VARIANCE: f32 = 0.2;
const LIMIT: usize = 10;

/// Input crops are scaled to this size before inference.
pub const TRAINED_IMAGE_SIZE: Size = Size {
    width: 300,
    height: 300,
};

fn prior_config() -> PriorConfig {
    PriorConfig {
        image_width: 300,
        image_height: 300,
        feature_maps: vec![
            FeatureMapConfig {
                width: 19,
                height: 19,
                shrinkage: 16,
                box_size_min: 60,
                box_size_max: 105,
            },
            FeatureMapConfig {
                width: 10,
                height: 10,
                shrinkage: 32,
                box_size_min: 105,
                box_size_max: 150,
            },
        ],
        aspect_ratio_one: 2,
        aspect_ratio_two: 3,
        priors_per_activation: PRIORS_PER_ACTIVATION,
    }
}

/// Card features the object model distinguishes, in label order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectLabel {
    AmericanExpressLogo,
    BankOfAmericaText,
    Card,
    ChaseLogo,
    Chip,
    DebitText,
    DoveLogoHolo,
    Expiry,
    Mastercard,
    Name,
    Pan,
    Visa,
    WellsFargoLogo,
}

impl ObjectLabel {
    pub fn from_index(index: usize) -> Option<ObjectLabel> {
        use ObjectLabel::*;
        match index {
            0 => Some(AmericanExpressLogo),
            1 => Some(BankOfAmericaText),
            2 => Some(Card),
            3 => Some(ChaseLogo),
            4 => Some(Chip),
            5 => Some(DebitText),
            6 => Some(DoveLogoHolo),
            7 => Some(Expiry),
            8 => Some(Mastercard),
            9 => Some(Name),
            10 => Some(Pan),
            11 => Some(Visa),
            12 => Some(WellsFargoLogo),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// First detection carrying the given label, if any.
pub fn find_box(boxes: &[DetectionBox], label: ObjectLabel) -> Option<&DetectionBox> {
    boxes.iter().find(|b| b.label == label.index())
}

/// Interpreter for the card-feature SSD output.
pub struct ObjectDetector {
    priors: PriorTable,
    config: PriorConfig,
}

impl ObjectDetector {
    pub fn new() -> Self {
        let config = prior_config();
        let priors = PriorTable::generate(&config);
        Self { priors, config }
    }

    /// Decode one frame's raw tensors into labelled feature boxes.
    pub fn interpret(&self, output: &SsdRawOutput) -> Result<Vec<DetectionBox>, PipelineError> {
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

        // Shift classes down one to drop the background slot from the labels
        let detected = ssd::extract_predictions(
            &scores,
            &boxes,
            PROB_THRESHOLD,
            IOU_THRESHOLD,
            LIMIT,
            |class| class - 1,
        )?;
        debug!(features = detected.len(), "decoded card features");
        Ok(detected)
    }
}

impl Default for ObjectDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssd::RectForm;

    #[test]
    fn test_prior_table_size() {
        let detector = ObjectDetector::new();
        assert_eq!(detector.priors.len(), 2766);
    }

    #[test]
    fn test_label_index_roundtrip() {
        for index in 0..13 {
            let label = ObjectLabel::from_index(index).unwrap();
            assert_eq!(label.index(), index);
        }
        assert_eq!(ObjectLabel::from_index(13), None);
    }

    #[test]
    fn test_find_box_returns_first_match() {
        let rect = RectForm {
            left: 0.1,
            top: 0.1,
            right: 0.2,
            bottom: 0.2,
        };
        let boxes = vec![
            DetectionBox {
                rect,
                label: ObjectLabel::Chip.index(),
                confidence: 0.8,
            },
            DetectionBox {
                rect,
                label: ObjectLabel::Name.index(),
                confidence: 0.7,
            },
            DetectionBox {
                rect,
                label: ObjectLabel::Name.index(),
                confidence: 0.6,
            },
        ];
        let found = find_box(&boxes, ObjectLabel::Name).unwrap();
        assert!((found.confidence - 0.7).abs() < 1e-6);
        assert!(find_box(&boxes, ObjectLabel::Visa).is_none());
    }
}
