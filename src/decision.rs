//! Decision: probability vector to (label, confidence).

use std::fmt;

use crate::classify::ProbabilityVector;
use crate::LABELS;

/// Winning label of one classification.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub label: &'static str,
    pub confidence: f32,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prediction: {} ({:.2}%)",
            self.label,
            self.confidence * 100.0
        )
    }
}

/// Index and value of the maximum score. The first index wins ties.
///
/// Returns `None` for an empty slice. NaN scores never win over a number.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let (&first, rest) = scores.split_first()?;
    let mut best = (0, first);
    for (offset, &score) in rest.iter().enumerate() {
        if score > best.1 || (best.1.is_nan() && !score.is_nan()) {
            best = (offset + 1, score);
        }
    }
    Some(best)
}

/// Pick the label with the highest probability.
pub fn decide(probabilities: &ProbabilityVector) -> Prediction {
    // ProbabilityVector is never empty and always label-aligned.
    let (index, confidence) = argmax(probabilities.as_slice()).unwrap_or((0, 0.0));
    Prediction {
        index,
        label: LABELS[index],
        confidence,
    }
}
