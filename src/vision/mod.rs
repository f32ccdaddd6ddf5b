//! Card Vision Layer
//!
//! Interprets the raw tensor output of the scanning models into card fields.
//! Inference itself is an external collaborator behind [`ScanBackends`]; the
//! interpreters here are pure, deterministic, and shape-checked.

pub mod alphabet;
pub mod expiry;
pub mod name;
pub mod object;
pub mod ocr;

pub use alphabet::CharPrediction;
pub use expiry::Expiry;
pub use name::NameExtractor;
pub use object::{ObjectDetector, ObjectLabel};
pub use ocr::{OcrDetector, OcrPrediction};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, Size};

/// Geometry of one captured frame, as reported by the camera collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Dimensions of the full captured image
    pub full_image: Size,
    /// Dimensions of the preview viewport
    pub preview: Size,
    /// Card finder rectangle within the preview
    pub card_finder: Rect,
}

/// Raw output of one SSD inference pass, in the model's native layout
/// (per feature map, then flattened).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsdRawOutput {
    /// Class logits, `num_classes` floats per prior
    pub class_scores: Vec<f32>,
    /// Location offsets, 4 floats per prior
    pub locations: Vec<f32>,
}

/// A pixel-space window within a detector crop, handed to a classifier.
#[derive(Debug, Clone, Copy)]
pub struct WindowCrop {
    /// The crop on the full image the window is relative to
    pub base: Rect,
    /// Window rectangle in base-crop pixel coordinates
    pub window: Rect,
}

/// Inference collaborator: accepts crop requests and returns fixed-shape
/// tensors. Implementations own image access and model execution; tensor
/// shapes are validated by the interpreters, not here.
#[async_trait]
pub trait ScanBackends: Send + Sync {
    /// Run the card-number SSD over the card crop.
    async fn ocr(&self, crop: Rect) -> Result<SsdRawOutput>;

    /// Run the card-feature SSD over the object-detection crop.
    async fn object(&self, crop: Rect) -> Result<SsdRawOutput>;

    /// Classify one character window into 27 class probabilities.
    async fn alphabet(&self, window: WindowCrop) -> Result<Vec<f32>>;

    /// Read the expiry strip into 17 x 11 class scores.
    async fn expiry(&self, strip: WindowCrop) -> Result<Vec<f32>>;
}
