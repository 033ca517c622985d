//! Fingerprint table: the luminance profile of every candidate character
//!
//! Layout is one row per character, in character-set order:
//!
//! ```text
//! [code, p(0,0), p(1,0), ..., p(w-1,h-1)]   // 1 + w*h bytes
//! ```
//!
//! The table is immutable. Any change to the character set or block size
//! produces a new table.

use std::sync::Arc;

use rayon::prelude::*;

use crate::charset;
use crate::config::{BlockSize, RenderConfig};
use crate::error::{Error, Result};
use crate::glyph::GlyphRasterizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintTable {
    block: BlockSize,
    data: Vec<u8>,
}

impl FingerprintTable {
    /// Rasterizes every character of `characters` at `block` size
    ///
    /// Rows follow the order of `characters`. Duplicates produce duplicate rows.
    /// Fails as a whole if any glyph cannot be rendered.
    pub fn build(characters: &str, block: BlockSize, raster: &GlyphRasterizer) -> Result<Self> {
        charset::validate(characters)?;

        let chars: Vec<char> = characters.chars().collect();
        let rows = chars
            .par_iter()
            .map(|&ch| {
                let code = charset::char_code(ch).ok_or_else(|| {
                    Error::InvalidConfig(format!("character {ch:?} does not fit in one byte"))
                })?;
                Ok((code, raster.profile(ch, block)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_profiles(block, rows)
    }

    /// Builds a table from explicit `(code, profile)` rows
    ///
    /// # Errors
    /// `StaleFingerprintTable` if a profile length differs from the block area.
    pub fn from_profiles<I>(block: BlockSize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u8, Vec<u8>)>,
    {
        let area = block.area();
        let mut data = Vec::new();
        for (code, profile) in rows {
            if profile.len() != area {
                return Err(Error::StaleFingerprintTable {
                    expected: block,
                    found: infer_block(profile.len(), block),
                });
            }
            data.push(code);
            data.extend_from_slice(&profile);
        }
        Ok(Self { block, data })
    }

    pub fn block(&self) -> BlockSize {
        self.block
    }

    /// Number of characters (rows)
    pub fn len(&self) -> usize {
        self.data.len() / self.row_width()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Width of one row: the code byte plus the profile
    pub fn row_width(&self) -> usize {
        1 + self.block.area()
    }

    pub fn row(&self, index: usize) -> &[u8] {
        let width = self.row_width();
        &self.data[index * width..(index + 1) * width]
    }

    pub fn code(&self, index: usize) -> u8 {
        self.row(index)[0]
    }

    pub fn profile(&self, index: usize) -> &[u8] {
        &self.row(index)[1..]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.row_width())
    }

    /// The whole table as one flat byte grid, ready for upload
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Fails fast when the table was built for another block size
    pub fn ensure_block(&self, expected: BlockSize) -> Result<()> {
        if self.block != expected {
            return Err(Error::StaleFingerprintTable {
                expected,
                found: self.block,
            });
        }
        Ok(())
    }
}

/// Best guess at the block a mismatched profile came from, for error messages
fn infer_block(len: usize, expected: BlockSize) -> BlockSize {
    if expected.height > 0 && len % expected.height as usize == 0 {
        BlockSize::new((len / expected.height as usize) as u32, expected.height)
    } else {
        BlockSize::new(len as u32, 1)
    }
}

/// Regenerates the fingerprint table for a configuration
pub fn build_table(config: &RenderConfig, raster: &GlyphRasterizer) -> Result<Arc<FingerprintTable>> {
    config.validate()?;
    let started = std::time::Instant::now();
    let table = FingerprintTable::build(&config.characters, config.block, raster)?;
    log::debug!(
        "built fingerprint table: {} characters at {} in {:.1} ms",
        table.len(),
        table.block(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(Arc::new(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BoxGlyphs;

    fn rasterizer() -> GlyphRasterizer {
        GlyphRasterizer::new(Arc::new(BoxGlyphs))
    }

    #[test]
    fn test_table_shape() {
        let raster = rasterizer();
        for chars in ["A", "AB", " .:-=+*#%@"] {
            for block in [BlockSize::new(1, 1), BlockSize::new(2, 3), BlockSize::new(8, 16)] {
                let table = FingerprintTable::build(chars, block, &raster).unwrap();
                assert_eq!(table.len(), chars.chars().count());
                assert_eq!(table.row_width(), 1 + block.area());
                assert!(table.rows().all(|row| row.len() == 1 + block.area()));
            }
        }
    }

    #[test]
    fn test_rows_follow_character_order() {
        let table = FingerprintTable::build("@.#A÷", BlockSize::new(4, 8), &rasterizer()).unwrap();
        let codes: Vec<u8> = (0..table.len()).map(|r| table.code(r)).collect();
        assert_eq!(codes, vec![b'@', b'.', b'#', b'A', 0xf7]);
    }

    #[test]
    fn test_duplicates_produce_duplicate_rows() {
        let table = FingerprintTable::build("xAx", BlockSize::new(4, 8), &rasterizer()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.row(0), table.row(2));
    }

    #[test]
    fn test_profile_matches_rasterizer() {
        let raster = rasterizer();
        let block = BlockSize::new(6, 10);
        let table = FingerprintTable::build("Qq", block, &raster).unwrap();
        assert_eq!(table.profile(1), raster.profile('q', block).unwrap().as_slice());
    }

    #[test]
    fn test_rebuild_on_block_change() {
        let raster = rasterizer();
        let large = FingerprintTable::build("AB#", BlockSize::new(8, 16), &raster).unwrap();
        assert!(large.rows().all(|row| row.len() - 1 == 128));

        let small = FingerprintTable::build("AB#", BlockSize::new(4, 8), &raster).unwrap();
        assert!(small.rows().all(|row| row.len() - 1 == 32));

        let err = large.ensure_block(BlockSize::new(4, 8)).unwrap_err();
        assert!(matches!(err, Error::StaleFingerprintTable { .. }));
        assert!(small.ensure_block(BlockSize::new(4, 8)).is_ok());
    }

    #[test]
    fn test_independent_builds_do_not_share_rows() {
        let raster = rasterizer();
        let block = BlockSize::new(4, 8);
        let first = FingerprintTable::build("AB", block, &raster).unwrap();
        let second = FingerprintTable::build("#@", block, &raster).unwrap();

        assert_eq!(first.code(0), b'A');
        assert_eq!(second.code(0), b'#');
        assert_ne!(first.as_bytes(), second.as_bytes());

        // Building again yields the same rows as the first time
        let again = FingerprintTable::build("AB", block, &raster).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_from_profiles_rejects_wrong_length() {
        let block = BlockSize::new(2, 2);
        let err = FingerprintTable::from_profiles(block, vec![(b'A', vec![0; 3])]).unwrap_err();
        assert!(matches!(err, Error::StaleFingerprintTable { .. }));

        let table =
            FingerprintTable::from_profiles(block, vec![(b'A', vec![10, 200, 200, 10])]).unwrap();
        assert_eq!(table.row(0), &[b'A', 10, 200, 200, 10]);
    }

    #[test]
    fn test_build_rejects_wide_characters() {
        let err = FingerprintTable::build("A€", BlockSize::new(2, 2), &rasterizer()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_build_table_from_config() {
        let config = RenderConfig {
            characters: "AB".to_string(),
            block: BlockSize::new(2, 2),
            ..RenderConfig::default()
        };
        let table = build_table(&config, &rasterizer()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.block(), BlockSize::new(2, 2));
    }
}
