//! A/B seam offset estimate for cephalometric scans.
//!
//! Pairs of small rectangles straddle the seam, one just above it in chip A
//! and one just below it in chip B. The pairs with the smallest pooled
//! variance are the least noisy; the mean difference over those pairs is
//! the step between the two chips.

use crate::analysis::{pooled_variance, region_stats};
use crate::image::{Image, Roi};
use tracing::trace;

/// Side of each square rectangle.
pub const RECT_SIZE: usize = 32;
/// Distance between a rectangle and the seam row.
pub const RECT_OFFSET: usize = 3;
/// Horizontal distance between successive pairs.
pub const RECT_SPACING: usize = 32;
/// Number of candidate pairs.
pub const NUM_RECT_PAIRS: usize = 40;
/// Number of pairs averaged.
pub const BEST_PAIRS: usize = 4;
/// Rows scanned past a seam before its offset can be measured.
pub const SEAM_OVERSHOOT: usize = RECT_SIZE + RECT_OFFSET + 2;

/// Candidate rectangle pairs around `split` that fit a `width`x`height`
/// image. Each pair is `(above, below)`.
pub fn rect_pairs(split: usize, width: usize, height: usize) -> Vec<(Roi, Roi)> {
    let Some(top_row) = split.checked_sub(RECT_SIZE + RECT_OFFSET) else {
        return Vec::new();
    };
    let bottom_row = split + RECT_OFFSET;

    (0..NUM_RECT_PAIRS)
        .map(|k| RECT_SPACING * (k + 1))
        .map(|col| {
            (
                Roi::new(col, top_row, RECT_SIZE, RECT_SIZE),
                Roi::new(col, bottom_row, RECT_SIZE, RECT_SIZE),
            )
        })
        .filter(|(above, below)| above.fits(width, height) && below.fits(width, height))
        .collect()
}

/// Mean step from the rows above `split` to the rows below it, measured on
/// the best matched rectangle pairs. `None` when no pair fits the image.
pub fn tile_difference(image: &Image<u16>, split: usize) -> Option<f64> {
    let mut scored: Vec<(f64, f64)> = rect_pairs(split, image.width(), image.height())
        .into_iter()
        .filter_map(|(above, below)| {
            let a = region_stats(image, above);
            let b = region_stats(image, below);
            pooled_variance(&a, &b).map(|pv| (pv, b.mean - a.mean))
        })
        .collect();
    if scored.is_empty() {
        return None;
    }

    scored.sort_by(|x, y| x.0.total_cmp(&y.0));
    let best = &scored[..scored.len().min(BEST_PAIRS)];
    let diff = best.iter().map(|(_, d)| d).sum::<f64>() / best.len() as f64;
    trace!(split, pairs = scored.len(), diff, "tile difference");
    Some(diff)
}

/// Mean difference between the row just below `split` and the row two above
/// it, across the full width. `None` if either row is outside the image.
pub fn row_difference(image: &Image<u16>, split: usize) -> Option<f64> {
    let above = split.checked_sub(2)?;
    let below = split + 1;
    if below >= image.height() || image.width() == 0 {
        return None;
    }
    let sum: f64 = image
        .row(below)
        .iter()
        .zip(image.row(above))
        .map(|(&b, &a)| f64::from(b) - f64::from(a))
        .sum();
    Some(sum / image.width() as f64)
}
