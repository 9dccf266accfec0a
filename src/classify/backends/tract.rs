#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::classify::backend::{Classifier, ProbabilityVector};
use crate::tensor::{InputTensor, INPUT_SHAPE};
use crate::{fail, ErrorKind, TENSOR_LEN};

/// Tract-based letter classifier.
///
/// Loads a local ONNX export of the letter model with a `[1, 64, 64, 3]` float32
/// input and a `[1, 29]` float32 output. Loading happens in `new`, so a
/// per-inference session pays the load on every frame.
pub struct TractClassifier {
    model: TypedRunnableModel<TypedModel>,
    model_path: PathBuf,
}

impl TractClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 64, 64, 3)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            model_path: model_path.to_path_buf(),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.len() != TENSOR_LEN {
            return fail(
                ErrorKind::ShapeMismatch,
                format!("expected {} input values, received {}", TENSOR_LEN, input.len()),
            );
        }
        let array = tract_ndarray::Array4::from_shape_vec(
            (INPUT_SHAPE[0], INPUT_SHAPE[1], INPUT_SHAPE[2], INPUT_SHAPE[3]),
            input.as_slice().to_vec(),
        )
        .context("failed to shape input tensor")?;
        Ok(array.into_tensor())
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        ProbabilityVector::new(scores.iter().cloned().collect())
    }
}
