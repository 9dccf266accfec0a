use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::classify::backend::{Classifier, ProbabilityVector};
use crate::tensor::InputTensor;
use crate::LABEL_COUNT;

/// Stub classifier for running without a model.
///
/// Hashes the input tensor and turns the digest into a softmax over the labels,
/// so identical frames always get identical scores.
#[derive(Default)]
pub struct StubClassifier {
    calls: u64,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        self.calls += 1;
        let digest: [u8; 32] = Sha256::digest(input.to_ne_bytes()).into();

        let logits: Vec<f32> = (0..LABEL_COUNT)
            .map(|i| digest[i % digest.len()] as f32 / 32.0)
            .collect();
        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f32 = exps.iter().sum();

        ProbabilityVector::new(exps.into_iter().map(|e| e / total).collect())
    }
}
