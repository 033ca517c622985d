//! ascii-stream - real-time video frames to ASCII art
//!
//! Every character of a configurable set is rendered once into a block-sized
//! canvas to obtain its luminance profile (its "fingerprint"). Each incoming
//! frame is then reduced to a contrast-adjusted luminance buffer and cut into
//! blocks, and every block is replaced by the character whose fingerprint is
//! closest. Both stages are data-parallel and run on rayon or, with the `gpu`
//! feature, on wgpu compute shaders.
//!
//! # Example
//! ```no_run
//! use ascii_stream::{BackendKind, Frame, FrameSize, Pipeline, RenderConfig};
//!
//! let input = image::open("photo.jpg").unwrap().to_rgba8();
//! let (width, height) = input.dimensions();
//!
//! let config = RenderConfig::default();
//! let mut pipeline = Pipeline::new(config, FrameSize::new(width, height), BackendKind::Cpu).unwrap();
//!
//! let frame = Frame::rgba(input.as_raw(), width, height).unwrap();
//! let grid = pipeline.process_frame(&frame).unwrap();
//! println!("{}", grid.to_text());
//! ```

pub mod backend;
pub mod charset;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod frame;
pub mod glyph;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod luminance;
pub mod matching;
pub mod pipeline;
pub mod source;
pub mod stream;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use backend::{BackendKind, ComputeBackend, CpuBackend, create_backend};
pub use config::{BlockSize, FontSpec, RenderConfig};
pub use error::{Error, Result};
pub use fingerprint::{FingerprintTable, build_table};
pub use frame::{Frame, FrameSize, LuminanceBuffer, OutputGrid, OwnedFrame, PixelFormat};
pub use glyph::{GlyphRasterizer, GlyphSource};
pub use pipeline::{Pipeline, SettingsHandle};
pub use source::{FrameSource, ImageSequenceSource, SourceHandle, spawn_source};
pub use stream::{AsciiStream, StreamEvent, StreamHandle};
