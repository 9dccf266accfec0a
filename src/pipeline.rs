//! Per-frame pipeline: normalize, encode, classify, decide, display, persist.
//!
//! One admitted frame runs to completion here. Every failure is scoped to the
//! frame that caused it: it is counted, logged, and the pipeline stays usable.

use anyhow::Result;
use chrono::Local;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::classify::{builtin_registry, ClassifierSession};
use crate::config::{CaptureConfig, StorageSettings};
use crate::decision::{decide, Prediction};
use crate::frame::RawFrame;
use crate::preprocess::FrameNormalizer;
use crate::sink::{select_store, FrameStore, Notice, ResultDisplay, StorageCapabilities, StoredImage};
use crate::tensor;
use crate::{ErrorKind, PipelineError};

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters shared by the source pump, the worker, and status readers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    offered: AtomicU64,
    superseded: AtomicU64,
    denied: AtomicU64,
    admitted: AtomicU64,
    decode_failures: AtomicU64,
    inference_failures: AtomicU64,
    persistence_failures: AtomicU64,
    classified: AtomicU64,
    saved: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_offered(&self) {
        self.offered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_classified(&self) {
        self.classified.fetch_add(1, Ordering::Relaxed);
    }

    fn record_saved(&self) {
        self.saved.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::DecodeError | ErrorKind::ConversionError => &self.decode_failures,
            ErrorKind::ShapeMismatch | ErrorKind::InferenceFailure => &self.inference_failures,
            ErrorKind::PersistenceFailure => &self.persistence_failures,
            ErrorKind::PermissionDenied => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            saved: self.saved.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub offered: u64,
    pub superseded: u64,
    pub denied: u64,
    pub admitted: u64,
    pub decode_failures: u64,
    pub inference_failures: u64,
    pub persistence_failures: u64,
    pub classified: u64,
    pub saved: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offered={} superseded={} denied={} admitted={} classified={} saved={} \
             decode_failures={} inference_failures={} persistence_failures={}",
            self.offered,
            self.superseded,
            self.denied,
            self.admitted,
            self.classified,
            self.saved,
            self.decode_failures,
            self.inference_failures,
            self.persistence_failures
        )
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// What happened to one admitted frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Normalization failed; the classifier was never called.
    Dropped(ErrorKind),
    /// The frame reached the classifier. Either sink step may still have failed.
    Processed {
        prediction: Option<Prediction>,
        stored: Option<StoredImage>,
        failures: Vec<ErrorKind>,
    },
}

impl FrameOutcome {
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            FrameOutcome::Processed { prediction, .. } => prediction.as_ref(),
            FrameOutcome::Dropped(_) => None,
        }
    }

    pub fn stored(&self) -> Option<&StoredImage> {
        match self {
            FrameOutcome::Processed { stored, .. } => stored.as_ref(),
            FrameOutcome::Dropped(_) => None,
        }
    }

    pub fn failures(&self) -> Vec<ErrorKind> {
        match self {
            FrameOutcome::Dropped(kind) => vec![*kind],
            FrameOutcome::Processed { failures, .. } => failures.clone(),
        }
    }
}

pub struct Pipeline {
    normalizer: FrameNormalizer,
    session: ClassifierSession,
    display: Box<dyn ResultDisplay>,
    store: Option<Box<dyn FrameStore>>,
    /// Storage opened on the first frame after the permission is granted.
    deferred_store: Option<(StorageSettings, StorageCapabilities)>,
    storage_granted: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(
        normalizer: FrameNormalizer,
        session: ClassifierSession,
        display: Box<dyn ResultDisplay>,
    ) -> Self {
        Self {
            normalizer,
            session,
            display,
            store: None,
            deferred_store: None,
            storage_granted: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(PipelineStats::new()),
        }
    }

    pub fn with_store(mut self, store: Box<dyn FrameStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Assemble the pipeline a configuration describes.
    ///
    /// Persistence is left out when storage is disabled. Without the storage
    /// permission nothing is opened on disk until it is granted.
    pub fn from_config(
        cfg: &CaptureConfig,
        display: Box<dyn ResultDisplay>,
        caps: &StorageCapabilities,
    ) -> Result<Self> {
        let registry = builtin_registry(&cfg.classifier)?;
        let session = registry.default_session(cfg.classifier.session)?;
        log::info!(
            "classifier backend: {} ({:?})",
            session.backend(),
            session.policy()
        );
        let normalizer = FrameNormalizer::new(cfg.preprocess.crop, cfg.preprocess.apply_rotation);
        let mut pipeline = Self::new(normalizer, session, display);
        if !cfg.storage.enabled {
            log::info!("capture storage disabled; frames will not be saved");
        } else if cfg.permissions.storage {
            pipeline.store = Some(select_store(&cfg.storage, caps)?);
        } else {
            log::info!("storage permission not granted; frames will not be saved");
            pipeline.deferred_store = Some((cfg.storage.clone(), *caps));
            pipeline.storage_granted.store(false, Ordering::SeqCst);
        }
        Ok(pipeline)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some() || self.deferred_store.is_some()
    }

    /// Shared flag gating persistence. Frames are saved only while it is set.
    pub fn storage_grant(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.storage_granted)
    }

    fn open_deferred_store(&mut self) -> Result<()> {
        if self.store.is_some() {
            return Ok(());
        }
        if let Some((settings, caps)) = &self.deferred_store {
            let store = select_store(settings, caps)?;
            log::info!("capture storage opened: {}", store.name());
            self.store = Some(store);
            self.deferred_store = None;
        }
        Ok(())
    }

    pub fn session(&self) -> &ClassifierSession {
        &self.session
    }

    /// Run one admitted frame to completion. The frame is released on return.
    pub fn process(&mut self, frame: RawFrame) -> FrameOutcome {
        let sequence = frame.sequence;
        let captured_at = Local::now();

        let normalized = match self.normalizer.normalize(&frame) {
            Ok(normalized) => normalized,
            Err(e) => {
                let kind = PipelineError::kind_of(&e).unwrap_or(ErrorKind::DecodeError);
                self.stats.record_failure(kind);
                log::warn!("frame {} dropped: {:#}", sequence, e);
                return FrameOutcome::Dropped(kind);
            }
        };
        drop(frame);

        let mut failures = Vec::new();
        let input = tensor::encode(&normalized);
        let prediction = match self.session.infer(&input) {
            Ok(probabilities) => {
                let prediction = decide(&probabilities);
                self.stats.record_classified();
                log::debug!("frame {}: {}", sequence, prediction);
                self.display.show(&prediction);
                Some(prediction)
            }
            Err(e) => {
                let kind = PipelineError::kind_of(&e).unwrap_or(ErrorKind::InferenceFailure);
                self.stats.record_failure(kind);
                failures.push(kind);
                log::warn!("frame {} not classified: {:#}", sequence, e);
                None
            }
        };

        if !self.storage_granted.load(Ordering::SeqCst) {
            return FrameOutcome::Processed {
                prediction,
                stored: None,
                failures,
            };
        }
        if let Err(e) = self.open_deferred_store() {
            let kind = PipelineError::kind_of(&e).unwrap_or(ErrorKind::PersistenceFailure);
            self.stats.record_failure(kind);
            failures.push(kind);
            log::warn!("frame {} not saved: {:#}", sequence, e);
            return FrameOutcome::Processed {
                prediction,
                stored: None,
                failures,
            };
        }

        let stored = match self.store.as_mut() {
            Some(store) => match store.persist(&normalized, captured_at) {
                Ok(stored) => {
                    self.stats.record_saved();
                    log::info!("frame {} saved to {}", sequence, stored.location);
                    self.display.notify(&Notice::Saved(stored.location.clone()));
                    Some(stored)
                }
                Err(e) => {
                    let kind = PipelineError::kind_of(&e).unwrap_or(ErrorKind::PersistenceFailure);
                    self.stats.record_failure(kind);
                    failures.push(kind);
                    log::warn!("frame {} not saved: {:#}", sequence, e);
                    None
                }
            },
            None => None,
        };

        FrameOutcome::Processed {
            prediction,
            stored,
            failures,
        }
    }

    /// Return to the idle hint.
    pub fn reset_display(&self) {
        self.display.reset();
    }

    /// Release the classifier. Further frames fail with `InferenceFailure`.
    pub fn release(&mut self) {
        self.session.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Classifier, ClassifierLoader, ProbabilityVector, SessionPolicy};
    use crate::frame::PixelFormat;
    use crate::preprocess::CropMode;
    use crate::tensor::InputTensor;
    use crate::{fail, LABEL_COUNT};
    use chrono::DateTime;
    use std::sync::Mutex;

    struct FixedClassifier {
        winner: usize,
    }

    impl Classifier for FixedClassifier {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn classify(&mut self, input: &InputTensor) -> Result<ProbabilityVector> {
            assert_eq!(input.len(), crate::TENSOR_LEN);
            let mut scores = vec![0.01; LABEL_COUNT];
            scores[self.winner] = 0.7;
            ProbabilityVector::new(scores)
        }
    }

    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn classify(&mut self, _input: &InputTensor) -> Result<ProbabilityVector> {
            ProbabilityVector::new(vec![0.5; 3])
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        shown: Arc<Mutex<Vec<String>>>,
        notices: Arc<Mutex<Vec<Notice>>>,
    }

    impl ResultDisplay for Recorder {
        fn show(&self, prediction: &Prediction) {
            self.shown.lock().unwrap().push(prediction.to_string());
        }

        fn notify(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(notice.clone());
        }
    }

    struct FailingStore;

    impl FrameStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn persist(
            &mut self,
            _frame: &crate::frame::NormalizedFrame,
            _captured_at: DateTime<Local>,
        ) -> Result<StoredImage> {
            fail(ErrorKind::PersistenceFailure, "disk full")
        }
    }

    fn session(loader: ClassifierLoader) -> ClassifierSession {
        ClassifierSession::new("test", loader, SessionPolicy::PerInference)
    }

    fn fixed(winner: usize) -> ClassifierSession {
        session(Arc::new(move || {
            Ok(Box::new(FixedClassifier { winner }) as Box<dyn Classifier>)
        }))
    }

    fn rgb_frame(width: u32, height: u32) -> RawFrame {
        RawFrame::new(
            vec![128; (width * height * 3) as usize],
            width,
            height,
            PixelFormat::Rgb24,
            90,
        )
        .unwrap()
        .with_sequence(1)
    }

    #[test]
    fn classifies_and_displays() {
        let recorder = Recorder::default();
        let mut pipeline = Pipeline::new(
            FrameNormalizer::default(),
            fixed(1),
            Box::new(recorder.clone()),
        );
        let outcome = pipeline.process(rgb_frame(320, 240));
        assert_eq!(outcome.prediction().map(|p| p.label), Some("B"));
        assert!(outcome.failures().is_empty());
        assert_eq!(
            recorder.shown.lock().unwrap().as_slice(),
            ["Prediction: B (70.00%)"]
        );
        assert_eq!(pipeline.stats().snapshot().classified, 1);
    }

    #[test]
    fn decode_failure_never_reaches_classifier() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let loader: ClassifierLoader = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedClassifier { winner: 0 }) as Box<dyn Classifier>)
        });
        let mut pipeline =
            Pipeline::new(FrameNormalizer::default(), session(loader), Box::new(Recorder::default()));

        let truncated = RawFrame::new(vec![0; 10], 8, 8, PixelFormat::Rgb24, 0).unwrap();
        assert_eq!(
            pipeline.process(truncated),
            FrameOutcome::Dropped(ErrorKind::DecodeError)
        );
        let garbage = RawFrame::new(vec![1, 2, 3], 8, 8, PixelFormat::Jpeg, 0).unwrap();
        assert_eq!(
            pipeline.process(garbage),
            FrameOutcome::Dropped(ErrorKind::DecodeError)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.stats().snapshot().decode_failures, 2);

        // The pipeline keeps working after a dropped frame.
        assert!(pipeline.process(rgb_frame(16, 16)).prediction().is_some());
    }

    #[test]
    fn shape_mismatch_skips_display_but_still_saves() {
        let root = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let store = crate::sink::DirectoryStore::new(
            root.path(),
            "ASL_Images",
            crate::sink::ImageEncoding::Png,
        );
        let mut pipeline = Pipeline::new(
            FrameNormalizer::default(),
            session(Arc::new(|| Ok(Box::new(BrokenClassifier) as Box<dyn Classifier>))),
            Box::new(recorder.clone()),
        )
        .with_store(Box::new(store));

        let outcome = pipeline.process(rgb_frame(64, 64));
        assert_eq!(outcome.failures(), vec![ErrorKind::ShapeMismatch]);
        assert!(outcome.prediction().is_none());
        assert!(outcome.stored().is_some());
        assert!(recorder.shown.lock().unwrap().is_empty());

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.inference_failures, 1);
        assert_eq!(stats.saved, 1);
    }

    #[test]
    fn persistence_failure_keeps_prediction() {
        let recorder = Recorder::default();
        let mut pipeline = Pipeline::new(
            FrameNormalizer::new(CropMode::CenterSquare, true),
            fixed(27),
            Box::new(recorder.clone()),
        )
        .with_store(Box::new(FailingStore));

        for _ in 0..2 {
            let outcome = pipeline.process(rgb_frame(48, 32));
            assert_eq!(outcome.prediction().map(|p| p.label), Some("nothing"));
            assert_eq!(outcome.failures(), vec![ErrorKind::PersistenceFailure]);
        }
        assert_eq!(recorder.shown.lock().unwrap().len(), 2);
        assert!(recorder.notices.lock().unwrap().is_empty());
        assert_eq!(pipeline.stats().snapshot().persistence_failures, 2);
    }

    #[test]
    fn withheld_storage_grant_skips_saving() {
        let root = tempfile::tempdir().unwrap();
        let store = crate::sink::DirectoryStore::new(
            root.path(),
            "ASL_Images",
            crate::sink::ImageEncoding::Png,
        );
        let mut pipeline =
            Pipeline::new(FrameNormalizer::default(), fixed(2), Box::new(Recorder::default()))
                .with_store(Box::new(store));
        let grant = pipeline.storage_grant();

        grant.store(false, Ordering::SeqCst);
        let outcome = pipeline.process(rgb_frame(16, 16));
        assert_eq!(outcome.prediction().map(|p| p.label), Some("C"));
        assert!(outcome.stored().is_none());
        assert!(outcome.failures().is_empty());

        grant.store(true, Ordering::SeqCst);
        assert!(pipeline.process(rgb_frame(16, 16)).stored().is_some());
        assert_eq!(pipeline.stats().snapshot().saved, 1);
    }

    #[test]
    fn storage_opens_only_after_permission_is_granted() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = CaptureConfig::default();
        cfg.storage.root = root.path().to_path_buf();
        cfg.storage.backend = crate::sink::StorageBackend::Directory;
        cfg.permissions.storage = false;

        let mut pipeline = Pipeline::from_config(
            &cfg,
            Box::new(Recorder::default()),
            &StorageCapabilities::default(),
        )
        .unwrap();
        assert!(pipeline.has_store());
        assert!(pipeline.process(rgb_frame(16, 16)).stored().is_none());
        assert!(!root.path().join("ASL_Images").exists());

        pipeline.storage_grant().store(true, Ordering::SeqCst);
        let outcome = pipeline.process(rgb_frame(16, 16));
        let stored = outcome.stored().expect("saved after grant");
        assert!(stored.location.contains("ASL_Images"));
        assert_eq!(pipeline.stats().snapshot().saved, 1);
    }

    #[test]
    fn released_pipeline_reports_inference_failure() {
        let mut pipeline =
            Pipeline::new(FrameNormalizer::default(), fixed(0), Box::new(Recorder::default()));
        pipeline.release();
        let outcome = pipeline.process(rgb_frame(8, 8));
        assert_eq!(outcome.failures(), vec![ErrorKind::InferenceFailure]);
    }

    #[test]
    fn stats_display_lists_every_counter() {
        let stats = PipelineStats::new();
        stats.record_offered();
        stats.record_superseded();
        stats.record_denied();
        stats.record_admitted();
        let line = stats.snapshot().to_string();
        assert!(line.starts_with("offered=1 superseded=1 denied=1 admitted=1"));
        assert!(line.contains("persistence_failures=0"));
    }
}
