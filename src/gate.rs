//! Rate gate: decides which delivered frames enter the pipeline.
//!
//! The gate owns the capture state shared between the UI thread (start, stop,
//! shot requests) and the worker thread (admission). All of it lives behind one
//! mutex so the check and the timestamp update happen atomically.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Capture-trigger strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerMode {
    /// One frame per shot request while capturing.
    Manual,
    /// Timer-driven stills. The schedule restarts on every start, so the first
    /// frame after start is admitted immediately.
    Periodic(Duration),
    /// Continuous analysis throttled to one frame per interval. The last capture
    /// time survives stop/start.
    Throttled(Duration),
}

impl TriggerMode {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            TriggerMode::Manual => None,
            TriggerMode::Periodic(interval) | TriggerMode::Throttled(interval) => Some(*interval),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TriggerMode::Manual => "manual",
            TriggerMode::Periodic(_) => "periodic",
            TriggerMode::Throttled(_) => "throttled",
        }
    }
}

/// Result of offering a frame to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    NotCapturing,
    TooSoon { remaining: Duration },
    NoShotPending,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Debug, Default)]
struct CaptureState {
    capturing: bool,
    last_capture: Option<Instant>,
    pending_shots: u32,
}

pub struct RateGate {
    mode: TriggerMode,
    state: Mutex<CaptureState>,
}

impl RateGate {
    pub fn new(mode: TriggerMode) -> Self {
        Self {
            mode,
            state: Mutex::new(CaptureState::default()),
        }
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable capturing. Returns false when already capturing.
    pub fn start(&self) -> bool {
        let mut state = self.lock();
        if state.capturing {
            return false;
        }
        state.capturing = true;
        if let TriggerMode::Periodic(_) = self.mode {
            state.last_capture = None;
        }
        true
    }

    /// Disable capturing. Pending shots are discarded. Returns false when idle.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        if !state.capturing {
            return false;
        }
        state.capturing = false;
        state.pending_shots = 0;
        true
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    /// Ask for one more frame in manual mode. Ignored while idle.
    pub fn request_shot(&self) -> bool {
        let mut state = self.lock();
        if !state.capturing {
            return false;
        }
        state.pending_shots = state.pending_shots.saturating_add(1);
        true
    }

    pub fn last_capture(&self) -> Option<Instant> {
        self.lock().last_capture
    }

    /// Check a frame delivered at `now` and record the admission.
    ///
    /// Timestamps going backwards count as no time elapsed, so the recorded
    /// last-capture time never decreases.
    pub fn try_admit(&self, now: Instant) -> Admission {
        let mut state = self.lock();
        if !state.capturing {
            return Admission::NotCapturing;
        }
        match self.mode {
            TriggerMode::Manual => {
                if state.pending_shots == 0 {
                    return Admission::NoShotPending;
                }
                state.pending_shots -= 1;
            }
            TriggerMode::Periodic(interval) | TriggerMode::Throttled(interval) => {
                if let Some(last) = state.last_capture {
                    let elapsed = now.saturating_duration_since(last);
                    if elapsed < interval {
                        return Admission::TooSoon {
                            remaining: interval - elapsed,
                        };
                    }
                }
            }
        }
        state.last_capture = Some(match state.last_capture {
            Some(last) if last > now => last,
            _ => now,
        });
        Admission::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_secs(3);

    #[test]
    fn admits_first_frame_then_waits_for_interval() {
        let gate = RateGate::new(TriggerMode::Throttled(INTERVAL));
        gate.start();
        let t0 = Instant::now();

        assert_eq!(gate.try_admit(t0), Admission::Admitted);
        assert_eq!(
            gate.try_admit(t0 + Duration::from_millis(1)),
            Admission::TooSoon {
                remaining: INTERVAL - Duration::from_millis(1)
            }
        );
        assert!(!gate.try_admit(t0 + INTERVAL - Duration::from_nanos(1)).is_admitted());
        assert_eq!(gate.try_admit(t0 + INTERVAL), Admission::Admitted);
        assert_eq!(gate.last_capture(), Some(t0 + INTERVAL));
    }

    #[test]
    fn idle_gate_denies_everything() {
        let gate = RateGate::new(TriggerMode::Periodic(INTERVAL));
        let t0 = Instant::now();
        for offset in [0u64, 1, 10, 1000] {
            assert_eq!(
                gate.try_admit(t0 + Duration::from_secs(offset)),
                Admission::NotCapturing
            );
        }

        gate.start();
        gate.stop();
        assert_eq!(
            gate.try_admit(t0 + Duration::from_secs(5000)),
            Admission::NotCapturing
        );
    }

    #[test]
    fn periodic_restarts_schedule_on_start() {
        let gate = RateGate::new(TriggerMode::Periodic(INTERVAL));
        let t0 = Instant::now();
        gate.start();
        assert!(gate.try_admit(t0).is_admitted());
        gate.stop();
        gate.start();
        assert!(gate.try_admit(t0 + Duration::from_millis(10)).is_admitted());
    }

    #[test]
    fn throttled_keeps_last_capture_across_restart() {
        let gate = RateGate::new(TriggerMode::Throttled(INTERVAL));
        let t0 = Instant::now();
        gate.start();
        assert!(gate.try_admit(t0).is_admitted());
        gate.stop();
        gate.start();
        assert!(!gate.try_admit(t0 + Duration::from_millis(10)).is_admitted());
    }

    #[test]
    fn manual_mode_admits_one_frame_per_shot() {
        let gate = RateGate::new(TriggerMode::Manual);
        let t0 = Instant::now();
        assert!(!gate.request_shot());

        gate.start();
        assert_eq!(gate.try_admit(t0), Admission::NoShotPending);
        gate.request_shot();
        gate.request_shot();
        assert!(gate.try_admit(t0).is_admitted());
        assert!(gate.try_admit(t0).is_admitted());
        assert_eq!(gate.try_admit(t0), Admission::NoShotPending);

        gate.request_shot();
        gate.stop();
        gate.start();
        assert_eq!(gate.try_admit(t0), Admission::NoShotPending);
    }

    #[test]
    fn timestamps_never_move_backwards() {
        let gate = RateGate::new(TriggerMode::Throttled(Duration::ZERO));
        let t0 = Instant::now();
        gate.start();
        let later = t0 + Duration::from_secs(10);
        assert!(gate.try_admit(later).is_admitted());
        assert!(gate.try_admit(t0).is_admitted());
        assert_eq!(gate.last_capture(), Some(later));
    }

    #[test]
    fn concurrent_callbacks_admit_once_per_interval() {
        let gate = Arc::new(RateGate::new(TriggerMode::Throttled(Duration::from_secs(3600))));
        gate.start();
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.try_admit(now).is_admitted())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn start_and_stop_report_transitions() {
        let gate = RateGate::new(TriggerMode::Manual);
        assert!(gate.start());
        assert!(!gate.start());
        assert!(gate.is_capturing());
        assert!(gate.stop());
        assert!(!gate.stop());
    }
}
