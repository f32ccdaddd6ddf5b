//! Character window classification
//!
//! The external classifier reports 27 class probabilities per window: class 0
//! means "no letter" and reads as a space, classes 1-26 map to A-Z.

use crate::error::PipelineError;

/// Space plus the 26 uppercase letters.
const NUM_CLASSES: usize = 27;

/// One window's classification outcome.
#[derive(Debug, Clone)]
pub struct CharPrediction {
    /// The winning character, `' '` for the no-letter class
    pub character: char,
    /// Probability of the winning class
    pub confidence: f32,
    /// Full class-probability vector
    pub probabilities: Vec<f32>,
}

/// Interpret a 27-class probability vector into a character prediction.
pub fn interpret_window(probabilities: &[f32]) -> Result<CharPrediction, PipelineError> {
    if probabilities.len() != NUM_CLASSES {
        return Err(PipelineError::ShapeMismatch {
            expected: NUM_CLASSES,
            actual: probabilities.len(),
        });
    }

    let mut index = 0;
    for (i, &p) in probabilities.iter().enumerate() {
        if p > probabilities[index] {
            index = i;
        }
    }

    let character = if index > 0 {
        (b'A' + index as u8 - 1) as char
    } else {
        ' '
    };
    Ok(CharPrediction {
        character,
        confidence: probabilities[index],
        probabilities: probabilities.to_vec(),
    })
}
