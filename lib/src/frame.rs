//! Per-frame data: raw input pixels, the luminance buffer between the two
//! stages, and the output grid of character codes.

use std::fmt;

use crate::config::BlockSize;
use crate::error::{Error, Result};

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Output grid dimensions for this frame; trailing partial blocks are dropped
    pub fn grid_for(&self, block: BlockSize) -> (u32, u32) {
        (self.width / block.width, self.height / block.height)
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Layout of the bytes in a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, R G B A
    Rgba,
    /// 1 byte per pixel, already reduced to brightness
    Luma,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Luma => 1,
        }
    }
}

/// A borrowed raw frame, valid for a single pipeline pass
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub pixels: &'a [u8],
    pub size: FrameSize,
    pub format: PixelFormat,
}

impl<'a> Frame<'a> {
    /// Wraps an RGBA buffer, checking its length
    pub fn rgba(pixels: &'a [u8], width: u32, height: u32) -> Result<Self> {
        Self::new(pixels, FrameSize::new(width, height), PixelFormat::Rgba)
    }

    /// Wraps a single-channel buffer, checking its length
    pub fn luma(pixels: &'a [u8], width: u32, height: u32) -> Result<Self> {
        Self::new(pixels, FrameSize::new(width, height), PixelFormat::Luma)
    }

    pub fn new(pixels: &'a [u8], size: FrameSize, format: PixelFormat) -> Result<Self> {
        let frame = Self {
            pixels,
            size,
            format,
        };
        frame.check_len()?;
        Ok(frame)
    }

    /// Verifies the buffer holds exactly one pixel per position
    pub fn check_len(&self) -> Result<()> {
        let expected = self.size.pixel_count() * self.format.bytes_per_pixel();
        if self.pixels.len() != expected {
            return Err(Error::DimensionMismatch {
                expected: format!("{} bytes for {} {:?}", expected, self.size, self.format),
                found: format!("{} bytes", self.pixels.len()),
            });
        }
        Ok(())
    }
}

/// An owned frame, used to move pixels from a frame source into the pipeline
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pub pixels: Vec<u8>,
    pub size: FrameSize,
    pub format: PixelFormat,
}

impl OwnedFrame {
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            pixels: &self.pixels,
            size: self.size,
            format: self.format,
        }
    }
}

/// One brightness byte per source pixel, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuminanceBuffer {
    pub size: FrameSize,
    pub data: Vec<u8>,
}

impl LuminanceBuffer {
    pub fn new(size: FrameSize, data: Vec<u8>) -> Result<Self> {
        if data.len() != size.pixel_count() {
            return Err(Error::DimensionMismatch {
                expected: format!("{} luminance bytes for {}", size.pixel_count(), size),
                found: format!("{} bytes", data.len()),
            });
        }
        Ok(Self { size, data })
    }

    /// Row `y` of the buffer
    pub fn row(&self, y: u32) -> &[u8] {
        let width = self.size.width as usize;
        let start = y as usize * width;
        &self.data[start..start + width]
    }
}

/// Matched character codes, one per output cell
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputGrid {
    pub codes: Vec<u8>,
    pub cols: u32,
    pub rows: u32,
}

impl OutputGrid {
    pub fn code_at(&self, x: u32, y: u32) -> u8 {
        self.codes[(y * self.cols + x) as usize]
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = (y * self.cols) as usize;
        &self.codes[start..start + self.cols as usize]
    }

    /// Decodes the grid as Latin-1 text, one line per grid row
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.codes.len() + self.rows as usize);
        for y in 0..self.rows {
            if y > 0 {
                text.push('\n');
            }
            text.extend(self.row(y).iter().map(|&code| char::from(code)));
        }
        text
    }
}
