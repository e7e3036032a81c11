// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Adaptive block-averaged pixelation.

use image::{Rgb, RgbImage};

use crate::geo::types::PixelRect;

/// Block edge grows with the region's short side
const BLOCK_SCALE_DIVISOR: u32 = 5;

/// Block edge for a region: proportional to the region's short side, never
/// below the configured floor. A fixed absolute edge would under-degrade
/// large regions and over-degrade tiny ones.
pub fn adaptive_block_edge(rect: &PixelRect, min_block_px: u32) -> u32 {
    let short_side = rect.width().min(rect.height());
    (short_side / BLOCK_SCALE_DIVISOR).max(min_block_px).max(1)
}

/// Replace the rectangle with block averages.
///
/// The block grid is anchored at the region origin, so pixelating the same
/// rectangle twice is pixel-identical: the average of an already-averaged
/// block reproduces the block. Overlapping rectangles therefore cannot
/// double-darken or leave seams.
pub fn pixelate_region(img: &mut RgbImage, rect: PixelRect, min_block_px: u32) {
    let block = adaptive_block_edge(&rect, min_block_px);

    let mut y = rect.y0;
    while y < rect.y1 {
        let block_y1 = (y + block).min(rect.y1);
        let mut x = rect.x0;
        while x < rect.x1 {
            let block_x1 = (x + block).min(rect.x1);

            let mut sum = [0u64; 3];
            let mut count = 0u64;
            for yy in y..block_y1 {
                for xx in x..block_x1 {
                    let p = img.get_pixel(xx, yy);
                    sum[0] += p[0] as u64;
                    sum[1] += p[1] as u64;
                    sum[2] += p[2] as u64;
                    count += 1;
                }
            }

            let avg = Rgb([
                ((sum[0] + count / 2) / count) as u8,
                ((sum[1] + count / 2) / count) as u8,
                ((sum[2] + count / 2) / count) as u8,
            ]);
            for yy in y..block_y1 {
                for xx in x..block_x1 {
                    img.put_pixel(xx, yy, avg);
                }
            }

            x += block;
        }
        y += block;
    }
}
