use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::charset;
use crate::error::{Error, Result};

/// Rectangle of source pixels reduced to one output character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct BlockSize {
    pub width: u32,
    pub height: u32,
}

impl BlockSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one block, i.e. the length of a luminance profile
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::new(8, 16)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Where glyph outlines come from
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum FontSpec {
    /// A TrueType/OpenType file on disk
    File { path: PathBuf },
    /// A family name looked up among the installed system fonts.
    /// `monospace`, `serif` and `sans-serif` select the generic families.
    System { family: String },
    /// Font data already in memory
    #[serde(skip)]
    Bytes(Arc<[u8]>),
}

impl Default for FontSpec {
    fn default() -> Self {
        FontSpec::System {
            family: "monospace".to_string(),
        }
    }
}

impl fmt::Debug for FontSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FontSpec::File { path } => f.debug_struct("File").field("path", path).finish(),
            FontSpec::System { family } => {
                f.debug_struct("System").field("family", family).finish()
            }
            FontSpec::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
        }
    }
}

impl PartialEq for FontSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FontSpec::File { path: a }, FontSpec::File { path: b }) => a == b,
            (FontSpec::System { family: a }, FontSpec::System { family: b }) => a == b,
            (FontSpec::Bytes(a), FontSpec::Bytes(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

/// Configuration for converting frames to ASCII
///
/// Values are immutable once handed to a pipeline; changes are made by
/// building a new config and submitting it as a pending update.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Candidate characters, in fingerprint-table order
    pub characters: String,
    pub block: BlockSize,
    /// Contrast spread around the midpoint, -1.0..=1.0, 0.0 is identity
    pub contrast_coefficient: f32,
    pub font: FontSpec,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            characters: charset::default_characters(),
            block: BlockSize::default(),
            contrast_coefficient: 0.0,
            font: FontSpec::default(),
        }
    }
}

impl RenderConfig {
    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.block.width < 1 || self.block.height < 1 {
            return Err(Error::InvalidConfig(format!(
                "block size must be at least 1x1, got {}",
                self.block
            )));
        }
        if !self.contrast_coefficient.is_finite()
            || !(-1.0..=1.0).contains(&self.contrast_coefficient)
        {
            return Err(Error::InvalidConfig(format!(
                "contrast_coefficient must be between -1.0 and 1.0, got {}",
                self.contrast_coefficient
            )));
        }
        charset::validate(&self.characters)
    }

    /// Whether switching from `self` to `next` invalidates the fingerprint table
    pub fn needs_rebuild(&self, next: &RenderConfig) -> bool {
        self.characters != next.characters || self.block != next.block || self.font != next.font
    }

    /// Parses a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Loads and validates a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}
