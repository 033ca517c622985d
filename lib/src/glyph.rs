//! Glyph rasterizer
//!
//! Renders one character into a block-sized canvas and reads back its
//! per-pixel brightness. The canvas is allocated fresh for every glyph, so no
//! drawing state can carry over from one character to the next.

use std::sync::{Arc, OnceLock};

use fontdue::{Font, FontSettings};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::filter::gaussian_blur_f32;

use crate::config::{BlockSize, FontSpec};
use crate::error::{Error, Result};
use crate::luminance::calculate_luminance;

/// Glow radius at the reference block height of 16 pixels
const GLOW_SIGMA_AT_16PX: f32 = 1.5;
const MIN_GLOW_SIGMA: f32 = 0.5;

/// Wide glyphs whose advance bounds the font size horizontally
const WIDTH_REFERENCE: [char; 3] = ['M', 'W', '@'];

static SYSTEM_FONTS: OnceLock<fontdb::Database> = OnceLock::new();

/// Installed fonts, scanned once per process
fn system_fonts() -> &'static fontdb::Database {
    SYSTEM_FONTS.get_or_init(|| {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        log::debug!("indexed {} system font faces", db.len());
        db
    })
}

/// Coverage bitmap of a single glyph, positioned relative to its baseline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    /// Left edge of the bitmap relative to the pen position
    pub xmin: i32,
    /// Bottom edge of the bitmap relative to the baseline, positive up
    pub ymin: i32,
    pub advance_width: f32,
    /// Row-major coverage, 0 = empty, 255 = fully covered
    pub coverage: Vec<u8>,
}

/// Vertical font metrics at a given pixel size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    pub ascent: f32,
    /// Negative below the baseline
    pub descent: f32,
}

/// A provider of glyph outlines rasterized to coverage bitmaps
pub trait GlyphSource: Send + Sync {
    /// Coverage of `ch` at `px` pixels per em. Missing glyphs yield an empty bitmap.
    fn rasterize(&self, ch: char, px: f32) -> GlyphBitmap;

    /// Horizontal advance of `ch` at `px` pixels per em
    fn advance_width(&self, ch: char, px: f32) -> f32 {
        self.rasterize(ch, px).advance_width
    }

    fn line_metrics(&self, px: f32) -> Option<LineMetrics>;
}

/// Glyphs from a TrueType/OpenType font, rasterized with fontdue
pub struct FontGlyphs {
    font: Font,
}

impl FontGlyphs {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_collection(bytes, 0)
    }

    fn from_collection(bytes: &[u8], collection_index: u32) -> Result<Self> {
        let settings = FontSettings {
            collection_index,
            ..FontSettings::default()
        };
        let font = Font::from_bytes(bytes, settings)
            .map_err(|e| Error::RenderingUnavailable(format!("invalid font data: {e}")))?;
        Ok(Self { font })
    }

    /// Resolves a font specification into loaded glyphs
    pub fn load(spec: &FontSpec) -> Result<Self> {
        match spec {
            FontSpec::File { path } => {
                let bytes = std::fs::read(path).map_err(|e| {
                    Error::RenderingUnavailable(format!(
                        "cannot read font file {}: {e}",
                        path.display()
                    ))
                })?;
                Self::from_bytes(&bytes)
            }
            FontSpec::Bytes(bytes) => Self::from_bytes(bytes),
            FontSpec::System { family } => Self::load_system(family),
        }
    }

    fn load_system(family: &str) -> Result<Self> {
        let db = system_fonts();

        let requested = family.to_lowercase();
        let generic = match requested.as_str() {
            "monospace" => Some(fontdb::Family::Monospace),
            "serif" => Some(fontdb::Family::Serif),
            "sans-serif" => Some(fontdb::Family::SansSerif),
            _ => None,
        };
        let families = [generic.unwrap_or(fontdb::Family::Name(family))];
        let query = fontdb::Query {
            families: &families,
            ..fontdb::Query::default()
        };

        // The generic monospace alias names a font that is often not installed;
        // any face flagged as monospaced will do.
        let face_id = db.query(&query).or_else(|| {
            if requested == "monospace" {
                db.faces().find(|face| face.monospaced).map(|face| face.id)
            } else {
                None
            }
        });
        let face_id = face_id.ok_or_else(|| {
            Error::RenderingUnavailable(format!("no installed font matches family {family:?}"))
        })?;

        log::debug!("resolved font family {family:?} to face {face_id:?}");

        db.with_face_data(face_id, |data, index| Self::from_collection(data, index))
            .ok_or_else(|| {
                Error::RenderingUnavailable(format!("font data for {family:?} is unavailable"))
            })?
    }
}

impl GlyphSource for FontGlyphs {
    fn rasterize(&self, ch: char, px: f32) -> GlyphBitmap {
        if self.font.lookup_glyph_index(ch) == 0 {
            return GlyphBitmap::default();
        }
        let (metrics, coverage) = self.font.rasterize(ch, px);
        GlyphBitmap {
            width: metrics.width,
            height: metrics.height,
            xmin: metrics.xmin,
            ymin: metrics.ymin,
            advance_width: metrics.advance_width,
            coverage,
        }
    }

    fn advance_width(&self, ch: char, px: f32) -> f32 {
        if self.font.lookup_glyph_index(ch) == 0 {
            return 0.0;
        }
        self.font.metrics(ch, px).advance_width
    }

    fn line_metrics(&self, px: f32) -> Option<LineMetrics> {
        self.font.horizontal_line_metrics(px).map(|m| LineMetrics {
            ascent: m.ascent,
            descent: m.descent,
        })
    }
}

/// Renders characters into block-sized canvases and extracts luminance profiles
#[derive(Clone)]
pub struct GlyphRasterizer {
    source: Arc<dyn GlyphSource>,
}

impl GlyphRasterizer {
    pub fn new(source: Arc<dyn GlyphSource>) -> Self {
        Self { source }
    }

    /// Loads the font named by `spec`
    ///
    /// # Errors
    /// `RenderingUnavailable` if the font cannot be read or parsed.
    pub fn from_spec(spec: &FontSpec) -> Result<Self> {
        Ok(Self::new(Arc::new(FontGlyphs::load(spec)?)))
    }

    /// Render a character centered in a `block`-sized canvas
    ///
    /// The canvas starts fully black; the glyph is drawn in white over a
    /// blurred copy of itself so anti-aliased edges carry graded brightness.
    /// The glow is blurred from a padded layer, so ink cut off by the block
    /// edge still lights the border.
    pub fn render(&self, ch: char, block: BlockSize) -> Result<RgbaImage> {
        if block.area() == 0 {
            return Err(Error::RenderingUnavailable(format!(
                "cannot create a {block} canvas"
            )));
        }

        let px = self.font_size(block);
        let glyph = self.source.rasterize(ch, px);

        let mut canvas = RgbaImage::from_pixel(block.width, block.height, Rgba([0, 0, 0, 255]));
        if glyph.coverage.iter().all(|&c| c == 0) {
            return Ok(canvas);
        }

        let sigma = glow_sigma(block);
        let pad = (3.0 * sigma).ceil() as u32;
        let layer = self.place_glyph(&glyph, block, px, pad);
        let glow = gaussian_blur_f32(&layer, sigma);

        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            let fill = u32::from(layer.get_pixel(x + pad, y + pad)[0]);
            let shadow = u32::from(glow.get_pixel(x + pad, y + pad)[0]);
            // Glyph over its glow: c + g * (1 - c)
            let value = (fill + (shadow * (255 - fill) + 127) / 255).min(255) as u8;
            *pixel = Rgba([value, value, value, 255]);
        }

        Ok(canvas)
    }

    /// Luminance profile of `ch`: `block.width * block.height` bytes, row-major
    pub fn profile(&self, ch: char, block: BlockSize) -> Result<Vec<u8>> {
        let canvas = self.render(ch, block)?;
        Ok(calculate_luminance(&canvas).into_raw())
    }

    /// Pixels per em at which the font's line box fits the block height and
    /// its widest advance fits the block width
    pub fn font_size(&self, block: BlockSize) -> f32 {
        let (w, h) = (block.width as f32, block.height as f32);
        let mut px = f32::INFINITY;

        if let Some(line) = self.source.line_metrics(h) {
            let line_height = line.ascent - line.descent;
            if line_height > 0.0 {
                px = px.min(h * h / line_height);
            }
        }

        let advance = WIDTH_REFERENCE
            .iter()
            .map(|&ch| self.source.advance_width(ch, h))
            .fold(0.0, f32::max);
        if advance > 0.0 {
            px = px.min(w * h / advance);
        }

        if px.is_finite() { px.max(1.0) } else { h }
    }

    /// Copy the glyph coverage into a layer of `block` plus `pad` pixels on
    /// every side, centered on the block
    ///
    /// Ink that fits the block is kept inside it; larger ink is centered.
    fn place_glyph(&self, glyph: &GlyphBitmap, block: BlockSize, px: f32, pad: u32) -> GrayImage {
        let mut layer = GrayImage::new(block.width + 2 * pad, block.height + 2 * pad);
        let (w, h) = (block.width as f32, block.height as f32);

        let left = if glyph.advance_width > 0.0 {
            ((w - glyph.advance_width) / 2.0 + glyph.xmin as f32).round() as i32
        } else {
            ((w - glyph.width as f32) / 2.0).round() as i32
        };
        let top = match self.source.line_metrics(px) {
            Some(line) => {
                let baseline = (h / 2.0 + (line.ascent + line.descent) / 2.0).round() as i32;
                baseline - glyph.ymin - glyph.height as i32
            }
            None => ((h - glyph.height as f32) / 2.0).round() as i32,
        };
        let left = fit_span(left, glyph.width, block.width) + pad as i32;
        let top = fit_span(top, glyph.height, block.height) + pad as i32;

        for gy in 0..glyph.height {
            let y = top + gy as i32;
            if y < 0 || y >= layer.height() as i32 {
                continue;
            }
            for gx in 0..glyph.width {
                let x = left + gx as i32;
                if x < 0 || x >= layer.width() as i32 {
                    continue;
                }
                let coverage = glyph.coverage[gy * glyph.width + gx];
                layer.put_pixel(x as u32, y as u32, Luma([coverage]));
            }
        }

        layer
    }
}

/// Shifts a span of `size` starting at `start` into `0..extent` when it fits,
/// otherwise centers it
fn fit_span(start: i32, size: usize, extent: u32) -> i32 {
    let (size, extent) = (size as i32, extent as i32);
    if size <= extent {
        start.clamp(0, extent - size)
    } else {
        (extent - size).div_euclid(2)
    }
}

/// Glow blur radius, proportional to the block height
fn glow_sigma(block: BlockSize) -> f32 {
    (block.height as f32 / 16.0 * GLOW_SIGMA_AT_16PX).max(MIN_GLOW_SIGMA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::default_characters;
    use crate::fingerprint::FingerprintTable;
    use crate::testing::BoxGlyphs;
    use std::path::PathBuf;

    fn rasterizer() -> GlyphRasterizer {
        GlyphRasterizer::new(Arc::new(BoxGlyphs))
    }

    fn system_monospace_or_skip() -> Option<GlyphRasterizer> {
        match GlyphRasterizer::from_spec(&FontSpec::default()) {
            Ok(raster) => Some(raster),
            Err(Error::RenderingUnavailable(reason)) => {
                eprintln!("skipping font test: {reason}");
                None
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    /// One-pixel underline hanging below the font's descent
    struct LowRule;

    impl GlyphSource for LowRule {
        fn rasterize(&self, _ch: char, px: f32) -> GlyphBitmap {
            let width = (px / 2.0) as usize;
            GlyphBitmap {
                width,
                height: 1,
                xmin: 0,
                ymin: -(px * 0.3).round() as i32,
                advance_width: px / 2.0,
                coverage: vec![255; width],
            }
        }

        fn line_metrics(&self, px: f32) -> Option<LineMetrics> {
            Some(LineMetrics {
                ascent: px * 0.8,
                descent: -px * 0.2,
            })
        }
    }

    /// Two full-height strokes four pixels wider apart than the advance
    struct WideRails;

    impl GlyphSource for WideRails {
        fn rasterize(&self, _ch: char, px: f32) -> GlyphBitmap {
            let (width, height) = ((px / 2.0) as usize + 4, px as usize);
            let mut coverage = vec![0u8; width * height];
            for row in coverage.chunks_exact_mut(width) {
                row[0] = 255;
                row[width - 1] = 255;
            }
            GlyphBitmap {
                width,
                height,
                xmin: -2,
                ymin: 0,
                advance_width: px / 2.0,
                coverage,
            }
        }

        fn line_metrics(&self, px: f32) -> Option<LineMetrics> {
            Some(LineMetrics {
                ascent: px * 0.8,
                descent: -px * 0.2,
            })
        }
    }

    #[test]
    fn test_profile_length_matches_block() {
        let raster = rasterizer();
        for (w, h) in [(1, 1), (2, 2), (3, 7), (8, 16), (16, 8), (32, 32)] {
            let profile = raster.profile('#', BlockSize::new(w, h)).unwrap();
            assert_eq!(profile.len(), (w * h) as usize, "block {w}x{h}");
        }
    }

    #[test]
    fn test_profile_is_deterministic() {
        let raster = rasterizer();
        let block = BlockSize::new(8, 16);
        for ch in ['A', 'g', '@', '÷'] {
            assert_eq!(
                raster.profile(ch, block).unwrap(),
                raster.profile(ch, block).unwrap()
            );
        }
    }

    #[test]
    fn test_missing_glyph_is_dark() {
        let profile = rasterizer().profile(' ', BlockSize::new(8, 16)).unwrap();
        assert!(profile.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_glow_produces_graded_edges() {
        let profile = rasterizer().profile('M', BlockSize::new(16, 32)).unwrap();
        assert!(profile.contains(&255));
        assert!(profile.iter().any(|&v| v > 0 && v < 255));
    }

    #[test]
    fn test_glyph_is_centered_horizontally() {
        let block = BlockSize::new(16, 16);
        let canvas = rasterizer().render('|', block).unwrap();
        let lum = calculate_luminance(&canvas);

        let column_sum = |x: u32| -> u32 { (0..16).map(|y| u32::from(lum.get_pixel(x, y)[0])).sum() };
        let left: u32 = (0..8).map(column_sum).sum();
        let right: u32 = (8..16).map(column_sum).sum();
        assert!(left > 0);
        assert!(left.abs_diff(right) <= 16, "left {left} right {right}");
    }

    #[test]
    fn test_previous_glyph_does_not_leak() {
        let raster = rasterizer();
        let block = BlockSize::new(8, 16);
        let fresh = raster.profile('.', block).unwrap();
        let _ = raster.profile('@', block).unwrap();
        assert_eq!(raster.profile('.', block).unwrap(), fresh);
    }

    #[test]
    fn test_zero_block_is_unavailable() {
        let err = rasterizer().profile('A', BlockSize::new(0, 16)).unwrap_err();
        assert!(matches!(err, Error::RenderingUnavailable(_)));
    }

    #[test]
    fn test_missing_font_file_is_unavailable() {
        let spec = FontSpec::File {
            path: PathBuf::from("/nonexistent/font.ttf"),
        };
        let err = GlyphRasterizer::from_spec(&spec).err().unwrap();
        assert!(matches!(err, Error::RenderingUnavailable(_)));
    }

    #[test]
    fn test_garbage_font_bytes_are_unavailable() {
        let spec = FontSpec::Bytes(Arc::from(&b"definitely not a font"[..]));
        let err = GlyphRasterizer::from_spec(&spec).err().unwrap();
        assert!(matches!(err, Error::RenderingUnavailable(_)));
    }

    #[test]
    fn test_glow_sigma_scales() {
        assert_eq!(glow_sigma(BlockSize::new(8, 16)), 1.5);
        assert_eq!(glow_sigma(BlockSize::new(8, 32)), 3.0);
        assert_eq!(glow_sigma(BlockSize::new(1, 1)), MIN_GLOW_SIGMA);
    }

    #[test]
    fn test_font_size_fits_block() {
        let raster = rasterizer();
        let size = |w, h| raster.font_size(BlockSize::new(w, h));
        // Line box and advance both fit exactly at em = height
        assert!((size(8, 16) - 16.0).abs() < 1e-3);
        // Narrow blocks shrink the font to the advance
        assert!((size(4, 16) - 8.0).abs() < 1e-3);
        assert!((size(1, 1) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_ink_below_descent_stays_in_block() {
        let raster = GlyphRasterizer::new(Arc::new(LowRule));
        let block = BlockSize::new(8, 16);
        let lum = calculate_luminance(&raster.render('_', block).unwrap());

        let bottom: Vec<u8> = (0..8).map(|x| lum.get_pixel(x, 15)[0]).collect();
        assert!(bottom.contains(&255), "bottom row {bottom:?}");
    }

    #[test]
    fn test_clipped_ink_still_glows_at_edges() {
        let raster = GlyphRasterizer::new(Arc::new(WideRails));
        let block = BlockSize::new(8, 16);
        let lum = calculate_luminance(&raster.render('H', block).unwrap());

        // Both strokes land two pixels outside the block
        assert!(lum.get_pixel(0, 8)[0] > 0);
        assert!(lum.get_pixel(7, 8)[0] > 0);
        assert!(lum.get_pixel(0, 8)[0] < 255);
    }

    #[test]
    fn test_fit_span() {
        assert_eq!(fit_span(-1, 4, 8), 0);
        assert_eq!(fit_span(6, 4, 8), 4);
        assert_eq!(fit_span(2, 4, 8), 2);
        assert_eq!(fit_span(0, 12, 8), -2);
    }

    #[test]
    fn test_system_fonts_are_indexed_once() {
        assert!(std::ptr::eq(system_fonts(), system_fonts()));
    }

    #[test]
    fn test_system_font_glyphs_fit_default_block() {
        let Some(raster) = system_monospace_or_skip() else {
            return;
        };
        let block = BlockSize::new(8, 16);
        let px = raster.font_size(block);
        let advance = raster.source.advance_width('M', px);
        assert!(advance <= 8.0 + 1e-3, "advance {advance} at {px} px");

        let characters: String = default_characters()
            .chars()
            .filter(|&ch| raster.source.advance_width(ch, px) > 0.0)
            .collect();
        let table = FingerprintTable::build(&characters, block, &raster).unwrap();
        let dark: Vec<char> = (0..table.len())
            .filter(|&row| table.profile(row).iter().all(|&v| v == 0))
            .map(|row| char::from(table.code(row)))
            .collect();
        assert!(dark.is_empty(), "all-dark glyphs: {dark:?}");
    }
}
