//! Tensor encoder.
//!
//! Row-major over (height, width), three consecutive channel values per pixel,
//! each byte divided by 255. This is the `[1, 64, 64, 3]` float32 layout the
//! letter model was trained on.

use anyhow::Result;

use crate::frame::NormalizedFrame;
use crate::{fail, ErrorKind, INPUT_CHANNELS, INPUT_SIDE, TENSOR_LEN};

/// Model input shape, batch first.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIDE as usize, INPUT_SIDE as usize, INPUT_CHANNELS];

/// Flat model input. Always exactly `TENSOR_LEN` values in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    values: Vec<f32>,
}

impl InputTensor {
    /// Wrap precomputed values, checking length and range.
    pub fn from_values(values: Vec<f32>) -> Result<Self> {
        if values.len() != TENSOR_LEN {
            return fail(
                ErrorKind::ShapeMismatch,
                format!(
                    "input tensor must hold {} values, got {}",
                    TENSOR_LEN,
                    values.len()
                ),
            );
        }
        if let Some(bad) = values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return fail(
                ErrorKind::ConversionError,
                format!("input tensor value {} outside [0, 1]", bad),
            );
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Native-endian byte view, as handed to flat-buffer model runtimes.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }
}

/// Encode a normalized frame. Pure; cannot fail for a well-formed frame.
pub fn encode(frame: &NormalizedFrame) -> InputTensor {
    let values = frame
        .as_bytes()
        .iter()
        .map(|&byte| byte as f32 / 255.0)
        .collect();
    InputTensor { values }
}
