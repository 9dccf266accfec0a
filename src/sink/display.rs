use std::fmt;
use std::sync::mpsc::Sender;

use crate::decision::Prediction;

/// Result text shown while no prediction is available.
pub const IDLE_HINT: &str = "Result will appear here. Click on 'Start' button";

/// Short user-facing messages (toasts).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    CaptureStarted,
    CaptureStopped,
    Saved(String),
    PermissionDenied(&'static str),
    StorageUnavailable,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::CaptureStarted => write!(f, "Image capturing started"),
            Notice::CaptureStopped => write!(f, "Image capturing stopped"),
            Notice::Saved(location) => write!(f, "Image saved: {}", location),
            Notice::PermissionDenied(what) => {
                write!(f, "{} permission is required to start capturing", what)
            }
            Notice::StorageUnavailable => {
                write!(f, "Storage permission not granted; captures will not be saved")
            }
        }
    }
}

/// Everything the worker asks the UI thread to render.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    Prediction(Prediction),
    Reset,
    Notice(Notice),
}

/// Display surface for predictions and notices.
///
/// Implementations must not block the caller; rendering belongs on the UI thread.
pub trait ResultDisplay: Send {
    fn show(&self, prediction: &Prediction);

    /// Return to the idle hint.
    fn reset(&self) {}

    fn notify(&self, notice: &Notice) {
        log::info!("{}", notice);
    }
}

/// Writes predictions to the log. Used when no UI is attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDisplay;

impl ResultDisplay for LogDisplay {
    fn show(&self, prediction: &Prediction) {
        log::info!("{}", prediction);
    }
}

/// Forwards everything to the UI thread over a channel.
///
/// A disconnected receiver means the UI is gone; events are then dropped.
#[derive(Clone, Debug)]
pub struct ChannelDisplay {
    tx: Sender<UiEvent>,
}

impl ChannelDisplay {
    pub fn new(tx: Sender<UiEvent>) -> Self {
        Self { tx }
    }

    fn post(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("ui channel closed; dropping display update");
        }
    }
}

impl ResultDisplay for ChannelDisplay {
    fn show(&self, prediction: &Prediction) {
        self.post(UiEvent::Prediction(prediction.clone()));
    }

    fn reset(&self) {
        self.post(UiEvent::Reset);
    }

    fn notify(&self, notice: &Notice) {
        self.post(UiEvent::Notice(notice.clone()));
    }
}

/// UI-thread state of the result text.
#[derive(Clone, Debug)]
pub struct ResultBoard {
    text: String,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self {
            text: IDLE_HINT.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Apply an event. Returns the toast text for notices.
    pub fn apply(&mut self, event: &UiEvent) -> Option<String> {
        match event {
            UiEvent::Prediction(prediction) => {
                self.text = prediction.to_string();
                None
            }
            UiEvent::Reset => {
                self.text = IDLE_HINT.to_string();
                None
            }
            UiEvent::Notice(notice) => Some(notice.to_string()),
        }
    }
}

impl Default for ResultBoard {
    fn default() -> Self {
        Self::new()
    }
}
