use anyhow::Result;
use image::{ImageFormat, RgbImage};

use crate::frame::{PixelFormat, RawFrame};
use crate::{fail, ErrorKind};

/// Decode a raw frame into an RGB grid, whatever its plane layout.
pub(crate) fn decode_to_rgb(frame: &RawFrame) -> Result<RgbImage> {
    let pixels = frame.bytes();
    let (width, height) = (frame.width, frame.height);
    match frame.format {
        PixelFormat::Jpeg => decode_still(pixels, ImageFormat::Jpeg),
        PixelFormat::Png => decode_still(pixels, ImageFormat::Png),
        PixelFormat::Rgb24 => {
            check_len(pixels, width, height, frame.format)?;
            rgb_image(width, height, pixels.to_vec())
        }
        PixelFormat::Rgba8888 => {
            check_len(pixels, width, height, frame.format)?;
            let rgb = pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            rgb_image(width, height, rgb)
        }
        PixelFormat::Gray8 => {
            check_len(pixels, width, height, frame.format)?;
            let rgb = pixels.iter().flat_map(|&y| [y, y, y]).collect();
            rgb_image(width, height, rgb)
        }
        PixelFormat::Nv12 => {
            check_len(pixels, width, height, frame.format)?;
            rgb_image(width, height, nv12_to_rgb(pixels, width, height))
        }
    }
}

fn decode_still(bytes: &[u8], format: ImageFormat) -> Result<RgbImage> {
    match image::load_from_memory_with_format(bytes, format) {
        Ok(img) => Ok(img.to_rgb8()),
        Err(e) => fail(
            ErrorKind::DecodeError,
            format!("failed to decode {:?} still: {}", format, e),
        ),
    }
}

fn check_len(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<()> {
    let Some(expected) = format.expected_len(width, height) else {
        return fail(
            ErrorKind::DecodeError,
            format!("{:?} frame dimensions overflow", format),
        );
    };
    if pixels.len() != expected {
        return fail(
            ErrorKind::DecodeError,
            format!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                pixels.len()
            ),
        );
    }
    Ok(())
}

fn rgb_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<RgbImage> {
    match RgbImage::from_raw(width, height, rgb) {
        Some(img) => Ok(img),
        None => fail(
            ErrorKind::ConversionError,
            format!("RGB buffer does not fit {}x{}", width, height),
        ),
    }
}

// Caller has validated the buffer length against the NV12 layout.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    let uv_stride = 2 * w.div_ceil(2);

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * uv_stride + (i / 2) * 2;
            let (u, v) = match (pixels.get(uv_index), pixels.get(uv_index + 1)) {
                (Some(&u), Some(&v)) => (u as f32 - 128.0, v as f32 - 128.0),
                _ => (0.0, 0.0),
            };

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use std::io::Cursor;

    fn frame(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> RawFrame {
        RawFrame::new(data, width, height, format, 0).unwrap()
    }

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let rgb = decode_to_rgb(&frame(nv12, 2, 2, PixelFormat::Nv12))?;
        assert_eq!(rgb.as_raw(), &vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv12_odd_dimensions_round_chroma_up() -> Result<()> {
        // 3x3 luma, 2x2 chroma pairs. Only the bottom-right pair tints red.
        let mut nv12 = vec![100u8; 9];
        nv12.extend_from_slice(&[128, 128, 128, 128, 128, 128, 128, 228]);
        let rgb = decode_to_rgb(&frame(nv12, 3, 3, PixelFormat::Nv12))?;
        assert_eq!(rgb.get_pixel(0, 0).0, [100, 100, 100]);
        assert_eq!(rgb.get_pixel(1, 1).0, [100, 100, 100]);
        assert!(rgb.get_pixel(2, 2).0[0] > 200);

        let ok = decode_to_rgb(&frame(vec![128u8; 10], 3, 2, PixelFormat::Nv12));
        assert!(ok.is_ok());
        let short = decode_to_rgb(&frame(vec![128u8; 9], 3, 2, PixelFormat::Nv12)).unwrap_err();
        assert_eq!(PipelineError::kind_of(&short), Some(ErrorKind::DecodeError));
        Ok(())
    }

    #[test]
    fn gray_plane_is_replicated_across_channels() -> Result<()> {
        let rgb = decode_to_rgb(&frame(vec![10, 20, 30], 3, 1, PixelFormat::Gray8))?;
        assert_eq!(rgb.as_raw(), &vec![10, 10, 10, 20, 20, 20, 30, 30, 30]);
        Ok(())
    }

    #[test]
    fn rgba_drops_alpha() -> Result<()> {
        let rgb = decode_to_rgb(&frame(vec![1, 2, 3, 255, 4, 5, 6, 0], 2, 1, PixelFormat::Rgba8888))?;
        assert_eq!(rgb.as_raw(), &vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[test]
    fn plane_size_mismatch_is_decode_error() {
        let err = decode_to_rgb(&frame(vec![1u8; 10], 2, 2, PixelFormat::Rgb24)).unwrap_err();
        assert_eq!(PipelineError::kind_of(&err), Some(ErrorKind::DecodeError));
    }

    #[test]
    fn malformed_jpeg_is_decode_error() {
        let err = decode_to_rgb(&frame(vec![0xFF, 0xD8, 0x00], 8, 8, PixelFormat::Jpeg)).unwrap_err();
        assert_eq!(PipelineError::kind_of(&err), Some(ErrorKind::DecodeError));
    }

    #[test]
    fn png_still_decodes() -> Result<()> {
        let src = RgbImage::from_pixel(5, 4, image::Rgb([9, 8, 7]));
        let mut bytes = Vec::new();
        src.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        let rgb = decode_to_rgb(&frame(bytes, 5, 4, PixelFormat::Png))?;
        assert_eq!(rgb.dimensions(), (5, 4));
        assert_eq!(rgb.get_pixel(2, 2).0, [9, 8, 7]);
        Ok(())
    }
}
