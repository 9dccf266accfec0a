use anyhow::Result;

use crate::tensor::InputTensor;
use crate::{fail, ErrorKind, LABEL_COUNT};

/// One score per label, index-aligned with `LABELS`.
///
/// The length is checked at construction; the values are whatever the model
/// produced (they usually sum to about 1, which is not enforced).
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityVector {
    scores: Vec<f32>,
}

impl ProbabilityVector {
    pub fn new(scores: Vec<f32>) -> Result<Self> {
        if scores.len() != LABEL_COUNT {
            return fail(
                ErrorKind::ShapeMismatch,
                format!(
                    "classifier returned {} scores, expected {}",
                    scores.len(),
                    LABEL_COUNT
                ),
            );
        }
        Ok(Self { scores })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.scores
    }

    pub fn sum(&self) -> f32 {
        self.scores.iter().sum()
    }
}

/// Letter classifier backend.
///
/// # Contract
///
/// - `classify` receives a tensor of exactly `INPUT_SHAPE` and returns exactly
///   `LABEL_COUNT` scores, or an error.
/// - Implementations must not keep the tensor beyond the call.
/// - A backend is opened by its loader and released by dropping it.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one input.
    fn classify(&mut self, input: &InputTensor) -> Result<ProbabilityVector>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
