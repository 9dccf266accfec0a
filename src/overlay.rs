//! Guide box geometry.
//!
//! The capture screen shows a box the signer keeps their hand inside. Two layouts
//! exist: a centred square covering 90% of the shorter side, and the centred
//! quarter box spanning the middle half of each axis. The same box can be drawn
//! onto a frame and used as the crop region before resizing.

use image::{Rgb, RgbImage};

/// Fraction of the shorter frame side the square guide box covers.
pub const SQUARE_BOX_FRACTION: f32 = 0.9;

/// Outline color of the guide box.
pub const GUIDE_GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Axis-aligned box in frame coordinates (pixels, edges inclusive-exclusive).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GuideBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl GuideBox {
    /// Square centred on the frame with side `fraction * min(width, height)`.
    pub fn centered_square(width: u32, height: u32, fraction: f32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let side = w.min(h) * fraction.clamp(0.0, 1.0);
        let (cx, cy) = (w / 2.0, h / 2.0);
        Self {
            left: cx - side / 2.0,
            top: cy - side / 2.0,
            right: cx + side / 2.0,
            bottom: cy + side / 2.0,
        }
    }

    /// Box from `(w/4, h/4)` to `(3w/4, 3h/4)`.
    pub fn centered_quarter(width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            left: w / 4.0,
            top: h / 4.0,
            right: w * 3.0 / 4.0,
            bottom: h * 3.0 / 4.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Integer crop rectangle `(x, y, width, height)` clamped to the frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn crop_rect(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.left.max(0.0) as u32;
        let y0 = self.top.max(0.0) as u32;
        let x1 = (self.right.max(0.0) as u32).min(frame_width);
        let y1 = (self.bottom.max(0.0) as u32).min(frame_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Draw the box outline onto `image`, `thickness` pixels wide, inside the box edges.
pub fn draw_outline(image: &mut RgbImage, guide: &GuideBox, color: Rgb<u8>, thickness: u32) {
    let Some((x, y, w, h)) = guide.crop_rect(image.width(), image.height()) else {
        return;
    };
    let t = thickness.max(1);
    for py in y..y + h {
        for px in x..x + w {
            let on_edge = px < x + t || px >= (x + w).saturating_sub(t) || py < y + t
                || py >= (y + h).saturating_sub(t);
            if on_edge {
                image.put_pixel(px, py, color);
            }
        }
    }
}
