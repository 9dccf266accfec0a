//! Capture runtime: the source pump and the pipeline worker.
//!
//! The pump thread pulls frames from the source and drops them into the
//! latest-only slot. The worker takes the newest frame, asks the gate, and runs
//! the pipeline on admitted frames. Start, stop and shot requests come from the
//! caller's (UI) thread and only touch the gate.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::LatestFrameSlot;
use crate::gate::{Admission, RateGate, TriggerMode};
use crate::ingest::FrameSource;
use crate::pipeline::{Pipeline, PipelineStats, StatsSnapshot};
use crate::sink::{Notice, ResultDisplay};
use crate::{fail, ErrorKind};

const WORKER_POLL: Duration = Duration::from_millis(100);
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Runtime permissions granted by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permissions {
    pub camera: bool,
    pub storage: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            camera: true,
            storage: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Processing,
}

pub struct CaptureService {
    gate: Arc<RateGate>,
    slot: Arc<LatestFrameSlot>,
    stats: Arc<PipelineStats>,
    processing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    permissions: Permissions,
    storage_granted: Arc<AtomicBool>,
    notices: Box<dyn ResultDisplay>,
    /// Held unopened until the camera permission is granted.
    pending_source: Option<Box<dyn FrameSource>>,
    pump: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureService {
    /// Connect the source and start both threads. Capturing starts disabled.
    ///
    /// Without the camera permission the source stays closed until [`grant`].
    /// Without the storage permission frames are classified but not saved.
    ///
    /// [`grant`]: CaptureService::grant
    pub fn spawn(
        source: Box<dyn FrameSource>,
        pipeline: Pipeline,
        gate: RateGate,
        permissions: Permissions,
        notices: Box<dyn ResultDisplay>,
    ) -> Result<Self> {
        let gate = Arc::new(gate);
        let slot = Arc::new(LatestFrameSlot::new());
        let stats = pipeline.stats();
        let processing = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let storage_granted = pipeline.storage_grant();
        storage_granted.store(permissions.storage, Ordering::SeqCst);

        let (pump, pending_source) = if permissions.camera {
            let mut source = source;
            source.connect()?;
            let pump = spawn_pump(source, &slot, &stats, &shutdown)?;
            (Some(pump), None)
        } else {
            log::warn!("camera permission not granted; frame source not opened");
            (None, Some(source))
        };

        let worker = {
            let gate = Arc::clone(&gate);
            let slot = Arc::clone(&slot);
            let processing = Arc::clone(&processing);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("asl-worker".to_string())
                .spawn(move || run_worker(pipeline, &gate, &slot, &processing, &shutdown))?
        };

        log::info!("capture service ready ({} trigger)", gate.mode().label());
        Ok(Self {
            gate,
            slot,
            stats,
            processing,
            shutdown,
            permissions,
            storage_granted,
            notices,
            pending_source,
            pump,
            worker: Some(worker),
        })
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.gate.mode()
    }

    pub fn state(&self) -> PipelineState {
        if self.processing.load(Ordering::SeqCst) {
            PipelineState::Processing
        } else if self.gate.is_capturing() {
            PipelineState::Capturing
        } else {
            PipelineState::Idle
        }
    }

    /// Enable capturing. Returns false when capturing was already on.
    pub fn start(&self) -> Result<bool> {
        if !self.permissions.camera {
            self.notices.notify(&Notice::PermissionDenied("Camera"));
            return fail(
                ErrorKind::PermissionDenied,
                "camera permission is required to start capturing",
            );
        }
        if !self.gate.start() {
            return Ok(false);
        }
        log::info!("capture started");
        self.notices.notify(&Notice::CaptureStarted);
        if !self.permissions.storage {
            self.notices.notify(&Notice::StorageUnavailable);
        }
        Ok(true)
    }

    /// Grant permissions the user accepted after the service was spawned.
    ///
    /// Grants only add. The first camera grant opens the source and starts the
    /// pump; a failed connect leaves the permission withheld so it can be
    /// retried. A storage grant lets the next processed frame be saved.
    pub fn grant(&mut self, granted: Permissions) -> Result<()> {
        if granted.storage && !self.permissions.storage {
            self.permissions.storage = true;
            self.storage_granted.store(true, Ordering::SeqCst);
            log::info!("storage permission granted");
        }
        if granted.camera && !self.permissions.camera {
            if self.shutdown.load(Ordering::SeqCst) {
                log::debug!("camera grant ignored after shutdown");
                return Ok(());
            }
            if let Some(mut source) = self.pending_source.take() {
                if let Err(e) = source.connect() {
                    self.pending_source = Some(source);
                    return Err(e);
                }
                self.pump = Some(spawn_pump(source, &self.slot, &self.stats, &self.shutdown)?);
            }
            self.permissions.camera = true;
            log::info!("camera permission granted");
        }
        Ok(())
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Disable capturing.
    ///
    /// The display is reset before `CaptureStopped` is posted. A frame
    /// admitted before the stop still completes on the worker, so its
    /// prediction can land after the reset and replace the idle hint.
    pub fn stop(&self) -> bool {
        if !self.gate.stop() {
            return false;
        }
        log::info!("capture stopped");
        self.notices.reset();
        self.notices.notify(&Notice::CaptureStopped);
        true
    }

    /// Manual mode: capture the next delivered frame.
    pub fn request_shot(&self) -> bool {
        if self.gate.mode() != TriggerMode::Manual {
            log::debug!("shot request ignored in {} mode", self.gate.mode().label());
            return false;
        }
        self.gate.request_shot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop both threads and release the classifier. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.stop();
        self.slot.close();
        for handle in [self.pump.take(), self.worker.take()].into_iter().flatten() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
        }
        log::info!("capture service shut down ({})", self.stats.snapshot());
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_pump(
    source: Box<dyn FrameSource>,
    slot: &Arc<LatestFrameSlot>,
    stats: &Arc<PipelineStats>,
    shutdown: &Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    log::info!("frame source connected: {}", source.name());
    let slot = Arc::clone(slot);
    let stats = Arc::clone(stats);
    let shutdown = Arc::clone(shutdown);
    Ok(std::thread::Builder::new()
        .name("asl-source".to_string())
        .spawn(move || run_pump(source, &slot, &stats, &shutdown))?)
}

fn run_pump(
    mut source: Box<dyn FrameSource>,
    slot: &LatestFrameSlot,
    stats: &PipelineStats,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(Some(frame)) => {
                stats.record_offered();
                if let Some(old) = slot.offer(frame) {
                    if slot.is_closed() {
                        break;
                    }
                    stats.record_superseded();
                    log::debug!("frame {} superseded before processing", old.sequence);
                }
            }
            Ok(None) => {
                log::info!("frame source {} exhausted", source.name());
                break;
            }
            Err(e) => {
                log::warn!("frame source {} error: {:#}", source.name(), e);
                if !source.is_healthy() {
                    std::thread::sleep(SOURCE_ERROR_BACKOFF);
                }
            }
        }
    }
    let source_stats = source.stats();
    log::debug!(
        "source pump finished: {} frames from {}",
        source_stats.frames_captured,
        source_stats.source
    );
}

fn run_worker(
    mut pipeline: Pipeline,
    gate: &RateGate,
    slot: &LatestFrameSlot,
    processing: &AtomicBool,
    shutdown: &AtomicBool,
) {
    let stats = pipeline.stats();
    while !shutdown.load(Ordering::SeqCst) {
        let Some(frame) = slot.take_timeout(WORKER_POLL) else {
            if slot.is_closed() {
                break;
            }
            continue;
        };
        match gate.try_admit(Instant::now()) {
            Admission::Admitted => {
                stats.record_admitted();
                processing.store(true, Ordering::SeqCst);
                pipeline.process(frame);
                processing.store(false, Ordering::SeqCst);
            }
            denied => {
                stats.record_denied();
                log::trace!("frame {} not admitted: {:?}", frame.sequence, denied);
            }
        }
    }
    pipeline.release();
}
