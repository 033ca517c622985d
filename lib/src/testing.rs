//! Deterministic glyph source for tests, independent of installed fonts

use crate::glyph::{GlyphBitmap, GlyphSource, LineMetrics};

/// Draws every character as a box whose size depends on its code point.
/// Odd code points are hollow, even ones filled; whitespace is empty.
pub(crate) struct BoxGlyphs;

impl GlyphSource for BoxGlyphs {
    fn rasterize(&self, ch: char, px: f32) -> GlyphBitmap {
        let advance = px / 2.0;
        if ch.is_whitespace() {
            return GlyphBitmap {
                advance_width: advance,
                ..GlyphBitmap::default()
            };
        }

        let code = u32::from(ch) as usize;
        let unit_w = ((advance / 4.0) as usize).max(1);
        let unit_h = ((px / 4.0) as usize).max(1);
        let width = (code % 4 + 1) * unit_w;
        let height = (code % 3 + 1) * unit_h;
        let hollow = code % 2 == 1;

        let mut coverage = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                let edge = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
                if !hollow || edge {
                    coverage[y * width + x] = 255;
                }
            }
        }

        GlyphBitmap {
            width,
            height,
            xmin: ((advance - width as f32) / 2.0).floor() as i32,
            ymin: 0,
            advance_width: advance,
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
