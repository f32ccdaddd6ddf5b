//! cardscan-core - Frame-by-frame payment card scanning pipeline
//!
//! Turns raw SSD tensor output and per-character classifier output, produced
//! once per video frame, into a stable card number, cardholder name and
//! expiry. The pipeline is deterministic end to end: prior generation, box
//! decoding, suppression and sequence reconstruction are pure functions of
//! their inputs, and cross-frame consensus resolves ties explicitly.
//!
//! Inference, image access and card-number validation are external
//! collaborators; see [`vision::ScanBackends`] and [`session::ScanSession`].

pub mod aggregate;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod geometry;
pub mod session;
pub mod ssd;
pub mod vision;

pub use error::PipelineError;
