//! ASL letter capture pipeline.
//!
//! This crate turns a stream of camera frames into American Sign Language letter
//! predictions and keeps a copy of every frame it classified.
//!
//! # Architecture
//!
//! Frames flow strictly one way, one frame at a time:
//!
//! 1. **Frame Source** (`ingest`): pushes raw buffers into a latest-only slot.
//! 2. **Rate Gate** (`gate`): admits a frame only while capturing and only once
//!    per trigger interval.
//! 3. **Frame Normalizer** (`preprocess`): decode, rotate, crop, resize to 64x64.
//! 4. **Tensor Encoder** (`tensor`): 12288 interleaved floats in [0, 1].
//! 5. **Classifier** (`classify`): opaque model call, 29 probabilities out.
//! 6. **Decision** (`decision`): argmax over the label vocabulary.
//! 7. **Sink** (`sink`): display the prediction, persist the normalized frame.
//!
//! `pipeline` runs steps 3-7 for one admitted frame and isolates its failures.
//! `runtime` owns the threads: source pump, worker, and the UI event channel.

use std::fmt;

pub mod classify;
pub mod config;
pub mod decision;
pub mod frame;
pub mod gate;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod preprocess;
pub mod runtime;
pub mod sink;
pub mod tensor;
pub mod ui;

pub use classify::{
    Classifier, ClassifierRegistry, ClassifierSession, ProbabilityVector, SessionPolicy,
    StubClassifier,
};
pub use config::CaptureConfig;
pub use decision::{decide, Prediction};
pub use frame::{LatestFrameSlot, NormalizedFrame, PixelFormat, RawFrame};
pub use gate::{Admission, RateGate, TriggerMode};
pub use ingest::{FileSource, FrameSource, SyntheticSource};
pub use overlay::GuideBox;
pub use pipeline::{FrameOutcome, Pipeline, PipelineStats, StatsSnapshot};
pub use preprocess::{CropMode, FrameNormalizer};
pub use runtime::{CaptureService, Permissions, PipelineState};
pub use sink::{
    select_store, CollectionStore, DirectoryStore, FrameStore, LogDisplay, Notice,
    ResultDisplay, StorageCapabilities, StoredImage, UiEvent,
};
pub use tensor::{encode, InputTensor};

// -------------------- Model Geometry --------------------

/// Side length of the square model input, in pixels.
pub const INPUT_SIDE: u32 = 64;

/// Color channels per pixel in the model input.
pub const INPUT_CHANNELS: usize = 3;

/// Number of floats in one input tensor (64 * 64 * 3).
pub const TENSOR_LEN: usize = (INPUT_SIDE as usize) * (INPUT_SIDE as usize) * INPUT_CHANNELS;

// -------------------- Label Vocabulary --------------------

/// Output classes of the letter model, index-aligned with its probability vector.
pub const LABELS: [&str; 29] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
    "S", "T", "U", "V", "W", "X", "Y", "Z", "del", "nothing", "space",
];

/// Number of classes the model scores.
pub const LABEL_COUNT: usize = LABELS.len();

// -------------------- Pipeline Errors --------------------

/// Failure categories a single frame can run into.
///
/// None of them is fatal to the process; each one ends the current frame only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    DecodeError,
    ConversionError,
    ShapeMismatch,
    InferenceFailure,
    PersistenceFailure,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DecodeError => "DECODE_ERROR",
            ErrorKind::ConversionError => "CONVERSION_ERROR",
            ErrorKind::ShapeMismatch => "SHAPE_MISMATCH",
            ErrorKind::InferenceFailure => "INFERENCE_FAILURE",
            ErrorKind::PersistenceFailure => "PERSISTENCE_FAILURE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Find the pipeline error kind carried anywhere in an `anyhow` chain.
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        if let Some(e) = err.downcast_ref::<PipelineError>() {
            return Some(e.kind);
        }
        err.chain()
            .find_map(|cause| cause.downcast_ref::<PipelineError>())
            .map(|e| e.kind)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}
impl std::error::Error for PipelineError {}

/// Shorthand for returning a `PipelineError` through `anyhow`.
pub(crate) fn fail<T>(kind: ErrorKind, message: impl Into<String>) -> anyhow::Result<T> {
    Err(PipelineError::new(kind, message).into())
}
