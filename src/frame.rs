//! Frame containers.
//!
//! - `RawFrame`: a buffer as delivered by a frame source, with layout and rotation metadata.
//! - `NormalizedFrame`: the fixed 64x64 RGB grid the model consumes.
//! - `LatestFrameSlot`: single-slot mailbox between the source pump and the worker.
//!   Offering a frame replaces any frame the worker has not taken yet.

use anyhow::Result;
use image::RgbImage;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::{fail, ErrorKind, INPUT_SIDE, TENSOR_LEN};

/// Byte layout of a raw frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Encoded JPEG still.
    Jpeg,
    /// Encoded PNG still.
    Png,
    /// Packed 8-bit RGB.
    Rgb24,
    /// Packed 8-bit RGBA.
    Rgba8888,
    /// Full-resolution Y plane followed by interleaved half-resolution UV plane.
    Nv12,
    /// Single 8-bit luminance plane.
    Gray8,
}

impl PixelFormat {
    pub fn is_encoded(&self) -> bool {
        matches!(self, PixelFormat::Jpeg | PixelFormat::Png)
    }

    /// Buffer length a frame of this layout must have, `None` for encoded stills.
    pub fn expected_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Jpeg | PixelFormat::Png => None,
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Rgba8888 => pixels.checked_mul(4),
            PixelFormat::Nv12 => {
                // Interleaved UV plane at half resolution, rounded up on odd sides.
                let chroma = (width as usize)
                    .div_ceil(2)
                    .checked_mul((height as usize).div_ceil(2))?
                    .checked_mul(2)?;
                pixels.checked_add(chroma)
            }
            PixelFormat::Gray8 => Some(pixels),
        }
    }
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// A frame as produced by a `FrameSource`.
///
/// Dropping the frame releases its buffer; the pipeline consumes it by value.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation the sensor reports for this frame.
    pub rotation_degrees: i32,
    pub format: PixelFormat,
    /// Source-assigned sequence number, 1-based.
    pub sequence: u64,
    captured_at: Instant,
}

impl RawFrame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation_degrees: i32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return fail(
                ErrorKind::ConversionError,
                format!("frame dimensions must be non-zero, got {}x{}", width, height),
            );
        }
        Ok(Self {
            data,
            width,
            height,
            rotation_degrees,
            format,
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Time since the source produced this frame.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("rotation_degrees", &self.rotation_degrees)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// NormalizedFrame
// ----------------------------------------------------------------------------

/// Exactly 64x64 RGB pixels. Construction is the only place the shape is checked.
#[derive(Clone, Debug)]
pub struct NormalizedFrame {
    image: RgbImage,
}

impl NormalizedFrame {
    pub fn from_image(image: RgbImage) -> Result<Self> {
        if image.width() != INPUT_SIDE || image.height() != INPUT_SIDE {
            return fail(
                ErrorKind::ShapeMismatch,
                format!(
                    "normalized frame must be {side}x{side}, got {}x{}",
                    image.width(),
                    image.height(),
                    side = INPUT_SIDE
                ),
            );
        }
        Ok(Self { image })
    }

    /// Build from interleaved RGB bytes, row-major.
    pub fn from_rgb_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != TENSOR_LEN {
            return fail(
                ErrorKind::ShapeMismatch,
                format!("expected {} RGB bytes, got {}", TENSOR_LEN, bytes.len()),
            );
        }
        match RgbImage::from_raw(INPUT_SIDE, INPUT_SIDE, bytes) {
            Some(image) => Ok(Self { image }),
            None => fail(ErrorKind::ShapeMismatch, "RGB buffer does not fit 64x64"),
        }
    }

    /// Uniform frame, every channel of every pixel set to `value`.
    pub fn filled(value: u8) -> Self {
        Self {
            image: RgbImage::from_pixel(INPUT_SIDE, INPUT_SIDE, image::Rgb([value; 3])),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Interleaved RGB bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

// ----------------------------------------------------------------------------
// LatestFrameSlot
// ----------------------------------------------------------------------------

struct SlotState {
    frame: Option<RawFrame>,
    closed: bool,
}

/// Bounded latest-only handoff between one producer and one consumer.
///
/// At most one frame waits in the slot. A newer frame supersedes the waiting one,
/// which is handed back to the producer to drop.
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a frame in the slot. Returns the superseded frame, if any.
    ///
    /// Frames offered after `close` are returned immediately.
    pub fn offer(&self, frame: RawFrame) -> Option<RawFrame> {
        let mut state = self.lock();
        if state.closed {
            return Some(frame);
        }
        let previous = state.frame.replace(frame);
        drop(state);
        self.ready.notify_one();
        previous
    }

    /// Take the waiting frame, blocking up to `timeout` for one to arrive.
    pub fn take_timeout(&self, timeout: Duration) -> Option<RawFrame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frame.take() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Reject further frames, drop the waiting one and wake the consumer.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.frame = None;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frame.is_none()
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
