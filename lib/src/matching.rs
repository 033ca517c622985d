//! Matching stage: nearest fingerprint for every block of the frame
//!
//! Each output cell compares the luminance under its block against every row
//! of the fingerprint table and keeps the character with the smallest sum of
//! absolute differences. Cells are independent; the CPU path parallelizes over
//! output rows with rayon, the GPU path (`shaders/matching.wgsl`) runs one
//! invocation per cell. Both scan rows in table order and only replace the
//! best candidate on a strictly smaller score, so ties go to the earliest
//! character.

use rayon::prelude::*;

use crate::config::BlockSize;
use crate::error::{Error, Result};
use crate::fingerprint::FingerprintTable;
use crate::frame::{LuminanceBuffer, OutputGrid};

/// Sum of absolute differences between the block at `(origin_x, origin_y)`
/// and `profile`, giving up once the running total reaches `limit`
fn block_score(
    lum: &LuminanceBuffer,
    origin_x: usize,
    origin_y: usize,
    block: BlockSize,
    profile: &[u8],
    limit: u32,
) -> u32 {
    let bw = block.width as usize;
    let mut score = 0u32;
    for (dy, reference) in profile.chunks_exact(bw).enumerate() {
        let row = lum.row((origin_y + dy) as u32);
        let lights = &row[origin_x..origin_x + bw];
        score += lights
            .iter()
            .zip(reference)
            .map(|(&light, &r)| u32::from(light.abs_diff(r)))
            .sum::<u32>();
        if score >= limit {
            break;
        }
    }
    score
}

/// Code of the best-matching table row for output cell `(cell_x, cell_y)`
pub fn best_match(lum: &LuminanceBuffer, cell_x: u32, cell_y: u32, table: &FingerprintTable) -> u8 {
    let block = table.block();
    let origin_x = (cell_x * block.width) as usize;
    let origin_y = (cell_y * block.height) as usize;

    let mut best_score = u32::MAX;
    let mut best_code = 0u8;
    for row in table.rows() {
        let score = block_score(lum, origin_x, origin_y, block, &row[1..], best_score);
        if score < best_score {
            best_score = score;
            best_code = row[0];
        }
    }
    best_code
}

/// Produces the output grid for one luminance buffer
///
/// Frames whose size is not a multiple of the block size are truncated:
/// the trailing partial blocks are never read.
///
/// # Errors
/// * `StaleFingerprintTable` if `table` was built for a block size other than `block`
/// * `InvalidConfig` if the table has no rows
pub fn matching_stage(
    lum: &LuminanceBuffer,
    table: &FingerprintTable,
    block: BlockSize,
) -> Result<OutputGrid> {
    table.ensure_block(block)?;
    if table.is_empty() {
        return Err(Error::InvalidConfig(
            "fingerprint table has no characters".to_string(),
        ));
    }

    let (cols, rows) = lum.size.grid_for(block);
    let mut codes = vec![0u8; cols as usize * rows as usize];

    if cols > 0 {
        codes
            .par_chunks_mut(cols as usize)
            .enumerate()
            .for_each(|(cell_y, out)| {
                for (cell_x, code) in out.iter_mut().enumerate() {
                    *code = best_match(lum, cell_x as u32, cell_y as u32, table);
                }
            });
    }

    Ok(OutputGrid { codes, cols, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameSize;

    fn ab_table() -> FingerprintTable {
        FingerprintTable::from_profiles(
            BlockSize::new(2, 2),
            vec![(b'A', vec![10, 200, 200, 10]), (b'B', vec![250, 250, 250, 250])],
        )
        .unwrap()
    }

    /// Luminance buffer assembled from 2x2 blocks laid out left to right
    fn blocks_2x2(blocks: &[[u8; 4]]) -> LuminanceBuffer {
        let width = blocks.len() * 2;
        let mut data = vec![0u8; width * 2];
        for (i, b) in blocks.iter().enumerate() {
            data[i * 2] = b[0];
            data[i * 2 + 1] = b[1];
            data[width + i * 2] = b[2];
            data[width + i * 2 + 1] = b[3];
        }
        LuminanceBuffer::new(FrameSize::new(width as u32, 2), data).unwrap()
    }

    #[test]
    fn test_bright_block_matches_uniform_profile() {
        let lum = blocks_2x2(&[[240, 255, 248, 252]]);
        let grid = matching_stage(&lum, &ab_table(), BlockSize::new(2, 2)).unwrap();
        assert_eq!(grid.codes, vec![b'B']);
    }

    #[test]
    fn test_exact_match_selects_row() {
        let lum = blocks_2x2(&[[10, 200, 200, 10], [250, 250, 250, 250]]);
        let grid = matching_stage(&lum, &ab_table(), BlockSize::new(2, 2)).unwrap();
        assert_eq!((grid.cols, grid.rows), (2, 1));
        assert_eq!(grid.codes, vec![b'A', b'B']);
    }

    #[test]
    fn test_tie_breaks_to_lowest_row() {
        let profile = vec![90, 90, 90, 90];
        let table = FingerprintTable::from_profiles(
            BlockSize::new(2, 2),
            vec![
                (b'x', vec![0, 0, 0, 0]),
                (b'm', profile.clone()),
                (b'n', profile.clone()),
                (b'o', profile),
            ],
        )
        .unwrap();

        // Exact hit on the duplicated profile, and an equidistant miss
        let lum = blocks_2x2(&[[90, 90, 90, 90], [100, 100, 80, 80]]);
        for _ in 0..10 {
            let grid = matching_stage(&lum, &table, BlockSize::new(2, 2)).unwrap();
            assert_eq!(grid.codes, vec![b'm', b'm']);
        }
    }

    #[test]
    fn test_equal_scores_across_distinct_profiles() {
        let block = BlockSize::new(2, 2);
        let one = (b'1', vec![110, 100, 100, 100]);
        let two = (b'2', vec![90, 100, 100, 80]);
        let table = FingerprintTable::from_profiles(block, vec![one.clone(), two.clone()]).unwrap();
        let swapped = FingerprintTable::from_profiles(block, vec![two, one]).unwrap();

        // 20 vs 20: the first row in table order wins
        let lum = blocks_2x2(&[[100, 100, 100, 90]]);
        assert_eq!(matching_stage(&lum, &table, block).unwrap().codes, vec![b'1']);
        assert_eq!(matching_stage(&lum, &swapped, block).unwrap().codes, vec![b'2']);

        // 20 vs 60
        let lum = blocks_2x2(&[[130, 100, 100, 100]]);
        assert_eq!(matching_stage(&lum, &table, block).unwrap().codes, vec![b'1']);

        // 30 vs 10
        let lum = blocks_2x2(&[[100, 100, 100, 80]]);
        assert_eq!(matching_stage(&lum, &table, block).unwrap().codes, vec![b'2']);
    }

    #[test]
    fn test_truncates_partial_blocks() {
        let block = BlockSize::new(8, 4);
        let table = FingerprintTable::from_profiles(
            block,
            vec![(b'.', vec![0; 32]), (b'#', vec![255; 32])],
        )
        .unwrap();

        let size = FrameSize::new(100, 6);
        let mut data = vec![0u8; size.pixel_count()];
        let clean = LuminanceBuffer::new(size, data.clone()).unwrap();

        // Paint the 4 rightmost columns and the 2 bottom rows bright
        for y in 0..6usize {
            for x in 0..100usize {
                if x >= 96 || y >= 4 {
                    data[y * 100 + x] = 255;
                }
            }
        }
        let dirty = LuminanceBuffer::new(size, data).unwrap();

        let a = matching_stage(&clean, &table, block).unwrap();
        let b = matching_stage(&dirty, &table, block).unwrap();
        assert_eq!((a.cols, a.rows), (12, 1));
        assert_eq!(a, b);
        assert!(b.codes.iter().all(|&c| c == b'.'));
    }

    #[test]
    fn test_cells_are_independent() {
        let block = BlockSize::new(2, 2);
        let table = ab_table();
        let lum = blocks_2x2(&[[250, 250, 250, 250], [10, 200, 200, 10], [255, 255, 255, 255]]);
        let grid = matching_stage(&lum, &table, block).unwrap();
        assert_eq!(grid.to_text(), "BAB");
    }

    #[test]
    fn test_multiple_rows_of_cells() {
        let block = BlockSize::new(1, 1);
        let table = FingerprintTable::from_profiles(
            block,
            vec![(b' ', vec![0]), (b'+', vec![128]), (b'@', vec![255])],
        )
        .unwrap();
        let lum = LuminanceBuffer::new(FrameSize::new(3, 2), vec![0, 120, 250, 255, 60, 70]).unwrap();
        let grid = matching_stage(&lum, &table, block).unwrap();
        assert_eq!(grid.to_text(), " +@\n@ +");
    }

    #[test]
    fn test_stale_table_rejected() {
        let lum = blocks_2x2(&[[0, 0, 0, 0]]);
        let err = matching_stage(&lum, &ab_table(), BlockSize::new(1, 2)).unwrap_err();
        assert!(matches!(err, Error::StaleFingerprintTable { .. }));
    }

    #[test]
    fn test_frame_smaller_than_block() {
        let lum = LuminanceBuffer::new(FrameSize::new(1, 1), vec![42]).unwrap();
        let grid = matching_stage(&lum, &ab_table(), BlockSize::new(2, 2)).unwrap();
        assert_eq!((grid.cols, grid.rows), (0, 0));
        assert!(grid.codes.is_empty());
    }

    #[test]
    fn test_empty_table_rejected() {
        let table = FingerprintTable::from_profiles(BlockSize::new(2, 2), Vec::new()).unwrap();
        let lum = blocks_2x2(&[[0, 0, 0, 0]]);
        assert!(matching_stage(&lum, &table, BlockSize::new(2, 2)).is_err());
    }
}
