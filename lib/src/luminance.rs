//! Luminance stage: raw pixels to a contrast-adjusted single-channel buffer
//!
//! Every pixel is independent, so the CPU path splits the frame into rows and
//! hands them to rayon. The GPU path runs the same arithmetic in
//! `shaders/luminance.wgsl`, one invocation per pixel.

use image::{GrayImage, Luma, RgbaImage};
use rayon::prelude::*;

use crate::frame::{Frame, LuminanceBuffer, PixelFormat};

/// Rec. 709 weights scaled to integers, shared with the GPU kernel
pub const BT709_R_WEIGHT: u32 = 2126;
pub const BT709_G_WEIGHT: u32 = 7152;
pub const BT709_B_WEIGHT: u32 = 722;
pub const BT709_WEIGHT_SUM: u32 = 10_000;

/// Grayscale reduction of one RGB pixel
///
/// Formula: L = (2126*R + 7152*G + 722*B) / 10000, truncated
pub fn rgb_luminance(r: u8, g: u8, b: u8) -> u8 {
    let weighted = u32::from(r) * BT709_R_WEIGHT
        + u32::from(g) * BT709_G_WEIGHT
        + u32::from(b) * BT709_B_WEIGHT;
    (weighted / BT709_WEIGHT_SUM) as u8
}

/// Affine contrast around the midpoint
///
/// output = clamp(round(128 + (input - 128) * (1 + coefficient)), 0, 255)
pub fn apply_contrast(value: u8, coefficient: f32) -> u8 {
    let spread = 128.0 + (f32::from(value) - 128.0) * (1.0 + coefficient);
    (spread + 0.5).floor().clamp(0.0, 255.0) as u8
}

/// Contrast mapping for all 256 input levels
pub fn contrast_lut(coefficient: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (value, out) in lut.iter_mut().enumerate() {
        *out = apply_contrast(value as u8, coefficient);
    }
    lut
}

/// Converts a frame to its luminance buffer
///
/// The caller is expected to have checked the frame length
/// (see [`Frame::check_len`]).
pub fn luminance_stage(frame: &Frame<'_>, coefficient: f32) -> LuminanceBuffer {
    let width = frame.size.width as usize;
    let lut = contrast_lut(coefficient);
    let mut data = vec![0u8; frame.size.pixel_count()];

    if width > 0 {
        let row_bytes = width * frame.format.bytes_per_pixel();
        data.par_chunks_mut(width)
            .zip(frame.pixels.par_chunks(row_bytes))
            .for_each(|(out, src)| match frame.format {
                PixelFormat::Rgba => {
                    for (dst, px) in out.iter_mut().zip(src.chunks_exact(4)) {
                        *dst = lut[rgb_luminance(px[0], px[1], px[2]) as usize];
                    }
                }
                PixelFormat::Luma => {
                    for (dst, &value) in out.iter_mut().zip(src) {
                        *dst = lut[value as usize];
                    }
                }
            });
    }

    LuminanceBuffer {
        size: frame.size,
        data,
    }
}

/// Calculate luminance from an RGBA image using the Rec. 709 weights
///
/// Used to read back rasterized glyph canvases with the same reduction the
/// luminance stage applies to video frames.
pub fn calculate_luminance(img: &RgbaImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut output = GrayImage::new(width, height);

    for (x, y, pixel) in img.enumerate_pixels() {
        let lum = rgb_luminance(pixel[0], pixel[1], pixel[2]);
        output.put_pixel(x, y, Luma([lum]));
    }

    output
}
