//! Frame normalizer: raw frame in, 64x64 RGB grid out.
//!
//! Steps, in order: decode the buffer, rotate by the sensor-reported degrees,
//! optionally crop to the guide box, resize to the model input side.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

use crate::frame::{NormalizedFrame, RawFrame};
use crate::ingest::decode_to_rgb;
use crate::overlay::{GuideBox, SQUARE_BOX_FRACTION};
use crate::INPUT_SIDE;

/// Region of the rotated frame kept before resizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Resize the whole frame.
    #[default]
    None,
    /// Square guide box, 90% of the shorter side.
    CenterSquare,
    /// Middle half of each axis.
    Quarter,
}

impl CropMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(CropMode::None),
            "center_square" => Some(CropMode::CenterSquare),
            "quarter" => Some(CropMode::Quarter),
            _ => None,
        }
    }

    pub fn guide_box(&self, width: u32, height: u32) -> Option<GuideBox> {
        match self {
            CropMode::None => None,
            CropMode::CenterSquare => Some(GuideBox::centered_square(
                width,
                height,
                SQUARE_BOX_FRACTION,
            )),
            CropMode::Quarter => Some(GuideBox::centered_quarter(width, height)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameNormalizer {
    crop: CropMode,
    apply_rotation: bool,
    filter: FilterType,
}

impl FrameNormalizer {
    pub fn new(crop: CropMode, apply_rotation: bool) -> Self {
        Self {
            crop,
            apply_rotation,
            // Bilinear, the usual default for camera-to-model resizes.
            filter: FilterType::Triangle,
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn crop(&self) -> CropMode {
        self.crop
    }

    /// Decode, orient and resize one raw frame.
    ///
    /// Decode failures carry `ErrorKind::DecodeError`.
    pub fn normalize(&self, frame: &RawFrame) -> Result<NormalizedFrame> {
        let rgb = decode_to_rgb(frame)?;
        self.normalize_rgb(rgb, frame.rotation_degrees)
    }

    /// Orient and resize an already decoded grid.
    pub fn normalize_rgb(&self, rgb: RgbImage, rotation_degrees: i32) -> Result<NormalizedFrame> {
        let oriented = if self.apply_rotation {
            rotate(rgb, rotation_degrees)
        } else {
            rgb
        };
        let cropped = self.crop_to_guide(oriented);
        let resized = imageops::resize(&cropped, INPUT_SIDE, INPUT_SIDE, self.filter);
        NormalizedFrame::from_image(resized)
    }

    fn crop_to_guide(&self, image: RgbImage) -> RgbImage {
        let Some(guide) = self.crop.guide_box(image.width(), image.height()) else {
            return image;
        };
        match guide.crop_rect(image.width(), image.height()) {
            Some((x, y, w, h)) => imageops::crop_imm(&image, x, y, w, h).to_image(),
            None => image,
        }
    }
}

impl Default for FrameNormalizer {
    fn default() -> Self {
        Self::new(CropMode::None, true)
    }
}

/// Rotate clockwise by a multiple of 90 degrees.
///
/// Other angles leave the grid unrotated; they are logged, never fatal.
pub fn rotate(image: RgbImage, degrees: i32) -> RgbImage {
    match degrees.rem_euclid(360) {
        0 => image,
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        other => {
            log::debug!("ignoring rotation of {} degrees (not a right angle)", other);
            image
        }
    }
}
