//! Local still-image frame source.
//!
//! This module provides `FileSource` for replaying stills from local storage:
//! - A single JPEG/PNG file, or a directory of them (sorted by file name)
//! - Frames are handed over encoded, exactly like a still-capture callback
//! - Optional looping once the last still has been delivered
//!
//! The file source MUST NOT fetch remote URLs.

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{pace, FrameSource, SourceStats};
use crate::frame::{PixelFormat, RawFrame};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Image file or directory of images.
    pub path: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Rotation reported with every frame.
    pub rotation_degrees: i32,
    /// Start over after the last still.
    pub loop_playback: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 10,
            rotation_degrees: 0,
            loop_playback: false,
        }
    }
}

pub struct FileSource {
    config: FileConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if config.path.trim().is_empty() || config.path.contains("://") {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let files = collect_stills(Path::new(&config.path))?;
        if files.is_empty() {
            return Err(anyhow!("no JPEG or PNG stills found at {}", config.path));
        }
        Ok(Self {
            config,
            files,
            cursor: 0,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    /// Stills this source will replay, in order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn read_still(&self, path: &Path) -> Result<RawFrame> {
        let format = still_format(path)
            .ok_or_else(|| anyhow!("unsupported still {}", path.display()))?;
        let bytes =
            std::fs::read(path).with_context(|| format!("read still {}", path.display()))?;
        let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .with_context(|| format!("sniff still {}", path.display()))?
            .into_dimensions()
            .with_context(|| format!("read dimensions of {}", path.display()))?;
        RawFrame::new(bytes, width, height, format, self.config.rotation_degrees)
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &str {
        &self.config.path
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "FileSource: {} stills from {}",
            self.files.len(),
            self.config.path
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.cursor >= self.files.len() {
            if !self.config.loop_playback {
                return Ok(None);
            }
            self.cursor = 0;
        }
        pace(self.last_frame_at, self.config.target_fps);
        let path = self.files[self.cursor].clone();
        self.cursor += 1;
        self.last_frame_at = Some(Instant::now());

        match self.read_still(&path) {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(Some(frame.with_sequence(self.frame_count)))
            }
            Err(e) => {
                self.last_error = Some(format!("{:#}", e));
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.path.clone(),
        }
    }
}

fn still_format(path: &Path) -> Option<PixelFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(PixelFormat::Jpeg),
        "png" => Some(PixelFormat::Png),
        _ => None,
    }
}

fn collect_stills(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(path).with_context(|| format!("read directory {}", path.display()))?
    {
        let entry = entry?;
        let candidate = entry.path();
        if candidate.is_file() && still_format(&candidate).is_some() {
            files.push(candidate);
        }
    }
    files.sort();
    Ok(files)
}
