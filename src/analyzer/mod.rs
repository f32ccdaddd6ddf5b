//! Per-frame composite analysis
//!
//! Joins the two halves of one frame's work: the card-number branch and the
//! card-feature branch (object detection, then name and expiry reading).
//! Both branches run concurrently and are joined before the frame's
//! composite prediction exists.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::geometry;
use crate::ssd::DetectionBox;
use crate::vision::expiry::{self, Expiry};
use crate::vision::name::NameExtractor;
use crate::vision::object::{self, ObjectDetector, ObjectLabel};
use crate::vision::ocr::{OcrDetector, OcrPrediction};
use crate::vision::{FrameGeometry, ScanBackends, WindowCrop};

/// Which stages run for a given frame.
#[derive(Debug, Clone, Copy)]
pub struct ScanState {
    pub run_ocr: bool,
    pub run_name_extraction: bool,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            run_ocr: true,
            run_name_extraction: false,
        }
    }
}

/// Whether an optional pipeline stage could be constructed. Checked once at
/// analyzer construction instead of being threaded through every call.
#[derive(Debug)]
pub enum Availability<T> {
    Available(T),
    Unavailable,
}

impl<T> Availability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }

    pub fn as_available(&self) -> Option<&T> {
        match self {
            Availability::Available(value) => Some(value),
            Availability::Unavailable => None,
        }
    }
}

/// The card-feature branch: object detection plus name and expiry reading.
pub struct NameBranch {
    object: ObjectDetector,
    name: NameExtractor,
}

impl NameBranch {
    pub fn new() -> Self {
        Self {
            object: ObjectDetector::new(),
            name: NameExtractor::new(),
        }
    }
}

impl Default for NameBranch {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite result of analyzing one frame.
#[derive(Debug, Clone, Default)]
pub struct FramePrediction {
    pub pan: Option<String>,
    pub pan_boxes: Option<Vec<DetectionBox>>,
    pub name: Option<String>,
    pub expiry: Option<Expiry>,
    pub object_boxes: Option<Vec<DetectionBox>>,
    pub name_extraction_available: bool,
}

/// An analysis stage driven once per frame.
#[async_trait]
pub trait Analyzer: Send + Sync {
    type Output;

    async fn analyze(
        &self,
        backends: &dyn ScanBackends,
        frame: &FrameGeometry,
        state: &ScanState,
    ) -> Result<Self::Output>;
}

struct CardFeatures {
    boxes: Vec<DetectionBox>,
    name: Option<String>,
    expiry: Option<Expiry>,
}

/// Analyzer joining the OCR branch and the name/expiry branch of each frame.
pub struct PaymentCardAnalyzer {
    ocr: OcrDetector,
    name_branch: Availability<NameBranch>,
}

impl PaymentCardAnalyzer {
    pub fn new(name_branch: Availability<NameBranch>) -> Self {
        Self {
            ocr: OcrDetector::new(),
            name_branch,
        }
    }

    async fn analyze_ocr(
        &self,
        backends: &dyn ScanBackends,
        frame: &FrameGeometry,
    ) -> Result<OcrPrediction> {
        let crop = geometry::calculate_card_crop(frame.full_image, frame.preview, frame.card_finder)?;
        let raw = backends
            .ocr(crop)
            .await
            .context("card number inference failed")?;
        Ok(self.ocr.interpret(&raw)?)
    }

    async fn analyze_card_features(
        &self,
        backends: &dyn ScanBackends,
        frame: &FrameGeometry,
        branch: &NameBranch,
    ) -> Result<CardFeatures> {
        let crop =
            geometry::calculate_object_crop(frame.full_image, frame.preview, frame.card_finder)?;
        let raw = backends
            .object(crop)
            .await
            .context("card feature inference failed")?;
        let boxes = branch.object.interpret(&raw)?;

        let name = match object::find_box(&boxes, ObjectLabel::Name) {
            Some(name_box) => branch.name.extract(backends, &name_box.rect, crop).await?,
            None => None,
        };

        let expiry = match object::find_box(&boxes, ObjectLabel::Expiry) {
            Some(expiry_box) => {
                let strip = expiry::strip_rect(&expiry_box.rect, crop.size());
                let scores = backends
                    .expiry(WindowCrop {
                        base: crop,
                        window: strip,
                    })
                    .await
                    .context("expiry inference failed")?;
                expiry::interpret_strip(&scores)?
            }
            None => None,
        };

        Ok(CardFeatures {
            boxes,
            name,
            expiry,
        })
    }
}

#[async_trait]
impl Analyzer for PaymentCardAnalyzer {
    type Output = FramePrediction;

    /// Run both branches concurrently and join them into the frame result.
    async fn analyze(
        &self,
        backends: &dyn ScanBackends,
        frame: &FrameGeometry,
        state: &ScanState,
    ) -> Result<FramePrediction> {
        let ocr_branch = async {
            if state.run_ocr {
                self.analyze_ocr(backends, frame).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let feature_branch = async {
            match (&self.name_branch, state.run_name_extraction) {
                (Availability::Available(branch), true) => self
                    .analyze_card_features(backends, frame, branch)
                    .await
                    .map(Some),
                _ => Ok(None),
            }
        };

        let (ocr, features) = tokio::join!(ocr_branch, feature_branch);
        let ocr = ocr?;
        let features = features?;

        Ok(FramePrediction {
            pan: ocr.as_ref().map(|o| o.pan.clone()),
            pan_boxes: ocr.map(|o| o.boxes),
            name: features.as_ref().and_then(|f| f.name.clone()),
            expiry: features.as_ref().and_then(|f| f.expiry),
            object_boxes: features.map(|f| f.boxes),
            name_extraction_available: self.name_branch.is_available(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_checks() {
        let available: Availability<u32> = Availability::Available(7);
        assert!(available.is_available());
        assert_eq!(available.as_available(), Some(&7));

        let unavailable: Availability<u32> = Availability::Unavailable;
        assert!(!unavailable.is_available());
        assert_eq!(unavailable.as_available(), None);
    }

    #[test]
    fn test_default_state_runs_ocr_only() {
        let state = ScanState::default();
        assert!(state.run_ocr);
        assert!(!state.run_name_extraction);
    }
}
