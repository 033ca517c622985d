use std::path::PathBuf;

use crate::config::BlockSize;
use crate::frame::FrameSize;

/// Errors produced by the rasterizer, the compute stages and the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The glyph drawing surface (font or canvas) could not be acquired
    #[error("glyph rendering unavailable: {0}")]
    RenderingUnavailable(String),

    /// The fingerprint table was built for a different block size
    #[error("stale fingerprint table: built for {found} blocks, pipeline expects {expected}")]
    StaleFingerprintTable { expected: BlockSize, found: BlockSize },

    /// The frame does not fit the configured compute surface
    #[error("frame dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: String, found: String },

    /// No compute adapter/device could be acquired
    #[error("compute backend unavailable: {0}")]
    ComputeUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The frame source could not produce frames
    #[error("frame source error: {0}")]
    Source(String),
}

impl Error {
    pub(crate) fn surface_mismatch(expected: FrameSize, found: FrameSize) -> Self {
        Error::DimensionMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
