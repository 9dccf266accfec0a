//! Synthetic frame source (`stub://` URLs).
//!
//! Produces packed RGB frames at the configured rate: a drifting background
//! gradient with a bright block standing in for a hand. The block moves every
//! 50 frames so consecutive captures differ.

use anyhow::Result;
use std::time::Instant;

use super::{pace, FrameSource, SourceStats};
use crate::frame::{PixelFormat, RawFrame};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: i32,
    /// Stop after this many frames. `None` streams forever.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
            rotation_degrees: 0,
            frame_limit: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let block = (width.min(height) / 3).max(1);
        let block_x = (self.scene_state as usize * 7) % width.saturating_sub(block).max(1);
        let block_y = height.saturating_sub(block) / 2;

        let mut pixels = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in 0..width {
                let offset = (y * width + x) * 3;
                let in_block =
                    (block_x..block_x + block).contains(&x) && (block_y..block_y + block).contains(&y);
                if in_block {
                    pixels[offset..offset + 3].copy_from_slice(&[230, 190, 160]);
                } else {
                    let shade = ((x + y) as u64 + self.frame_count) % 256;
                    pixels[offset] = shade as u8;
                    pixels[offset + 1] = (shade / 2) as u8;
                    pixels[offset + 2] = 255 - shade as u8;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        pace(self.last_frame_at, self.config.target_fps);
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let pixels = self.generate_pixels();
        let frame = RawFrame::new(
            pixels,
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
            self.config.rotation_degrees,
        )?;
        Ok(Some(frame.with_sequence(self.frame_count)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}
