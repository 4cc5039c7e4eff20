//! Selection of flat columns from a bright reference scan.
//!
//! A bright scan of a line sensor is only uniformly exposed over part of the
//! rotation. Column means (over the sensor rows) are smoothed, and each
//! extraction window is walked from its start column until the smoothed
//! profile starts to climb.

use crate::analysis::{col_means, moving_average};
use crate::capture::SensorFamily;
use crate::image::Image;
use std::ops::Range;
use tracing::debug;

/// Smoothed column-to-column increase that ends a window.
pub const DF_THRESH: f64 = 5.0;
/// Half-width of the column smoothing window.
pub const COLUMN_SMOOTH_SPAN: usize = 5;

/// Left and right extraction windows, in columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrightWindows {
    pub left: Range<usize>,
    pub right: Range<usize>,
}

impl BrightWindows {
    /// Windows for a line-sensor family; `None` for area sensors.
    pub fn for_sensor(family: SensorFamily, horizontal_binning: bool) -> Option<Self> {
        let (left, right) = match family {
            SensorFamily::Pano => (140..740, 2140..2740),
            SensorFamily::Ceph => (600..1100, 1700..2200),
            SensorFamily::Hds15 | SensorFamily::Hds20 => return None,
        };
        if horizontal_binning {
            Some(Self { left, right })
        } else {
            Some(Self {
                left: left.start * 2..left.end * 2,
                right: right.start * 2..right.end * 2,
            })
        }
    }
}

/// Indices of the selected columns of `bright`, left window first.
///
/// Column means are taken over rows `chip_height..height`, which excludes
/// chip A.
pub fn select_bright_columns(
    bright: &Image<u16>,
    chip_height: usize,
    windows: &BrightWindows,
) -> Vec<usize> {
    let width = bright.width();
    if width == 0 {
        return Vec::new();
    }
    let rows = chip_height.min(bright.height())..bright.height();
    let (means, _) = col_means(bright, rows);
    let smoothed = moving_average(&means, COLUMN_SMOOTH_SPAN, 0..width);

    // the edges of the smoothed profile are flat fill, not signal
    let diff: Vec<f64> = (0..width)
        .map(|col| {
            if col <= COLUMN_SMOOTH_SPAN {
                0.0
            } else {
                smoothed[col] - smoothed[col - 1]
            }
        })
        .collect();

    let mut selected = Vec::new();
    for window in [&windows.left, &windows.right] {
        let start = window.start.min(width - 1);
        let end = window.end.min(width - 1);
        let before = selected.len();
        selected.extend((start..end).take_while(|&col| diff[col] <= DF_THRESH));
        debug!(
            start,
            end,
            kept = selected.len() - before,
            "bright column window"
        );
    }
    selected
}

/// New image made of the given columns of `image`, in order.
pub fn extract_columns(image: &Image<u16>, columns: &[usize]) -> Image<u16> {
    let mut out = Image::new(columns.len(), image.height());
    for row in 0..image.height() {
        let src = image.row(row);
        for (dst, &col) in out.row_mut(row).iter_mut().zip(columns) {
            *dst = src[col];
        }
    }
    out
}

/// Convenience wrapper: the flat part of a bright scan as its own image.
pub fn select_bright(bright: &Image<u16>, chip_height: usize, windows: &BrightWindows) -> Image<u16> {
    let columns = select_bright_columns(bright, chip_height, windows);
    extract_columns(bright, &columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_per_family() {
        let pano = BrightWindows::for_sensor(SensorFamily::Pano, true).unwrap();
        assert_eq!(pano.left, 140..740);
        let ceph = BrightWindows::for_sensor(SensorFamily::Ceph, false).unwrap();
        assert_eq!(ceph.right, 3400..4400);
        assert!(BrightWindows::for_sensor(SensorFamily::Hds20, true).is_none());
    }

    #[test]
    fn test_flat_scan_keeps_whole_windows() {
        let bright = Image::filled(100, 6, 3000);
        let windows = BrightWindows {
            left: 10..20,
            right: 50..55,
        };
        let cols = select_bright_columns(&bright, 2, &windows);
        assert_eq!(cols.len(), 15);
        assert_eq!(cols[0], 10);
        assert_eq!(cols[14], 54);
    }

    #[test]
    fn test_ramp_stops_window() {
        // flat until column 30, then rising steeply
        let mut bright = Image::new(100, 4);
        for row in 0..4 {
            for col in 0..100 {
                bright[(row, col)] = if col < 30 { 1000 } else { 1000 + 100 * (col as u16 - 29) };
            }
        }
        let windows = BrightWindows {
            left: 10..60,
            right: 99..120,
        };
        let cols = select_bright_columns(&bright, 0, &windows);
        assert!(!cols.is_empty());
        assert!(*cols.last().unwrap() < 30);
        // right window clipped to width - 1 is empty
        assert!(cols.iter().all(|&c| c < 60));
    }

    #[test]
    fn test_extract_columns() {
        let pixels: Vec<u16> = (0..12).collect();
        let image = Image::from_pixels(pixels, 4, 3).unwrap();
        let out = extract_columns(&image, &[1, 3]);
        assert_eq!(out.width(), 2);
        assert_eq!(out.row(2), &[9, 11]);
    }
}
