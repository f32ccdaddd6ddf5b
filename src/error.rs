//! Pipeline error types
//!
//! Contract violations (wrong tensor shapes, bad crop regions) surface as
//! typed errors. "Nothing detected" is never an error; empty results are
//! represented as empty lists or `None`.

use thiserror::Error;

use crate::geometry::{Rect, Size};

/// Errors produced by the decode pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// An input tensor did not carry the element count its configuration demands
    #[error("tensor shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// A crop region was not contained in the image it was stated against
    #[error("region {region:?} is outside the bounds of its {bounds:?} image")]
    RegionOutOfBounds { region: Rect, bounds: Size },
}
