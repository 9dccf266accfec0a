use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

use super::backend::{Classifier, ProbabilityVector};
use crate::tensor::InputTensor;
use crate::{fail, ErrorKind, PipelineError};

/// Opens a fresh classifier handle (loads the model).
pub type ClassifierLoader = Arc<dyn Fn() -> Result<Box<dyn Classifier>> + Send + Sync>;

/// How long a classifier handle lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Open before every inference, release right after.
    #[default]
    PerInference,
    /// Open on first use, keep until the session is released.
    Pooled,
}

impl SessionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per_inference" => Some(SessionPolicy::PerInference),
            "pooled" => Some(SessionPolicy::Pooled),
            _ => None,
        }
    }
}

/// Owns the acquire/release discipline around a classifier backend.
///
/// Once released, the session refuses every further inference.
pub struct ClassifierSession {
    backend: String,
    loader: ClassifierLoader,
    policy: SessionPolicy,
    pooled: Option<Box<dyn Classifier>>,
    released: bool,
    handles_opened: u64,
}

impl ClassifierSession {
    pub fn new(backend: impl Into<String>, loader: ClassifierLoader, policy: SessionPolicy) -> Self {
        Self {
            backend: backend.into(),
            loader,
            policy,
            pooled: None,
            released: false,
            handles_opened: 0,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Number of handles opened so far.
    pub fn handles_opened(&self) -> u64 {
        self.handles_opened
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Run one inference. Failures carry `InferenceFailure` unless the backend
    /// already tagged them (e.g. `ShapeMismatch`).
    pub fn infer(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
        if self.released {
            return fail(
                ErrorKind::InferenceFailure,
                format!("classifier session '{}' already released", self.backend),
            );
        }
        let result = match self.policy {
            SessionPolicy::PerInference => {
                let mut handle = self.open()?;
                let out = handle.classify(input);
                drop(handle);
                out
            }
            SessionPolicy::Pooled => {
                if self.pooled.is_none() {
                    let mut handle = self.open()?;
                    handle.warm_up().map_err(as_inference_failure)?;
                    self.pooled = Some(handle);
                }
                match self.pooled.as_mut() {
                    Some(handle) => handle.classify(input),
                    None => fail(ErrorKind::InferenceFailure, "pooled classifier missing"),
                }
            }
        };
        result.map_err(as_inference_failure)
    }

    /// Drop any pooled handle and refuse further inference.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.pooled = None;
        self.released = true;
        log::debug!(
            "classifier session '{}' released after {} handle(s)",
            self.backend,
            self.handles_opened
        );
    }

    fn open(&mut self) -> Result<Box<dyn Classifier>> {
        let handle = (self.loader)().map_err(as_inference_failure)?;
        self.handles_opened += 1;
        Ok(handle)
    }
}

impl Drop for ClassifierSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn as_inference_failure(err: anyhow::Error) -> anyhow::Error {
    if PipelineError::kind_of(&err).is_some() {
        return err;
    }
    PipelineError::new(ErrorKind::InferenceFailure, format!("{:#}", err)).into()
}
