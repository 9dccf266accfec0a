//! Frame ingestion sources.
//!
//! This module provides the sources a capture session can pull frames from:
//! - Synthetic stream (`stub://` URLs, testing and demos)
//! - Local image files or directories of stills (replayed as encoded frames)
//!
//! Every source produces `RawFrame` instances with layout and rotation metadata.
//! Sources pace themselves to their configured frame rate; the runtime pump hands
//! each frame to the latest-only slot and never queues more than one.

pub mod file;
pub(crate) mod normalize;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use crate::config::SourceSettings;
use crate::frame::RawFrame;

pub use file::{FileConfig, FileSource};
pub(crate) use normalize::decode_to_rgb;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Abstraction over a camera's frame delivery.
pub trait FrameSource: Send {
    /// Source identifier used in logs and stats.
    fn name(&self) -> &str;

    /// Prepare the source. Called once before the first `next_frame`.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capture the next frame. `Ok(None)` means the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Build the source a configured URL points at.
///
/// `stub://...` selects the synthetic source, anything else must be a local path.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if settings.url.starts_with("stub://") {
        let source = SyntheticSource::new(SyntheticConfig {
            url: settings.url.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            rotation_degrees: settings.rotation_degrees,
            frame_limit: None,
        });
        return Ok(Box::new(source));
    }
    if !is_local_path(&settings.url) {
        return Err(anyhow!(
            "unsupported frame source '{}'; expected stub:// or a local path",
            settings.url
        ));
    }
    let source = FileSource::new(FileConfig {
        path: settings.url.clone(),
        target_fps: settings.target_fps,
        rotation_degrees: settings.rotation_degrees,
        loop_playback: settings.loop_playback,
    })?;
    Ok(Box::new(source))
}

fn is_local_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / target_fps as f64)
    }
}

/// Sleep until one frame interval has passed since `last`.
fn pace(last: Option<Instant>, target_fps: u32) {
    let interval = frame_interval(target_fps);
    if let Some(last) = last {
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}
