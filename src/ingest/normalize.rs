use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::frame::RawFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Nv12,
}

/// Convert a backend frame to RGB24 at the target size.
///
/// Frames already at the target size are passed through without resampling.
pub fn normalize_frame(raw: RawFrame, target_width: u32, target_height: u32) -> Result<Vec<u8>> {
    let rgb = match raw.format {
        PixelFormat::Rgb24 => {
            check_rgb_len(&raw.data, raw.width, raw.height)?;
            raw.data
        }
        PixelFormat::Nv12 => nv12_to_rgb(&raw.data, raw.width, raw.height)?,
    };
    if raw.width == target_width && raw.height == target_height {
        return Ok(rgb);
    }
    resize_rgb(rgb, raw.width, raw.height, target_width, target_height)
}

/// Bilinear resize of a packed RGB24 buffer.
pub fn resize_rgb(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<u8>> {
    if target_width == 0 || target_height == 0 {
        return Err(anyhow!("resize target must be non-zero"));
    }
    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
    let resized = imageops::resize(&image, target_width, target_height, FilterType::Triangle);
    Ok(resized.into_raw())
}

fn check_rgb_len(pixels: &[u8], width: u32, height: u32) -> Result<()> {
    let expected = width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
    if pixels.len() != expected {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }
    if expected == 0 {
        return Err(anyhow!("empty RGB frame"));
    }
    Ok(())
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    // Chroma is subsampled 2x2; odd dimensions round up to a full UV pair.
    let uv_stride = w.div_ceil(2) * 2;
    let expected = uv_stride
        .checked_mul(h.div_ceil(2))
        .and_then(|uv_plane| uv_plane.checked_add(y_plane))
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected || y_plane == 0 {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * uv_stride + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
