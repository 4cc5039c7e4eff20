//! Image statistics used by the calibration engines.
//!
//! Means are accumulated in `f64`. Variances are population variances
//! (divided by the sample count).

use crate::image::{Image, Roi};
use std::ops::Range;

/// Mean of every pixel.
pub fn mean<T: Copy + Into<f64>>(image: &Image<T>) -> f64 {
    if image.pixel_count() == 0 {
        return 0.0;
    }
    image.pixels().iter().map(|&p| p.into()).sum::<f64>() / image.pixel_count() as f64
}

/// Per-row means over the rows in `rows`.
///
/// Returns a vector of `image.height()` entries (rows outside the range
/// are zero) and the mean over the whole range.
pub fn row_means<T: Copy + Into<f64>>(image: &Image<T>, rows: Range<usize>) -> (Vec<f64>, f64) {
    let mut means = vec![0.0; image.height()];
    let width = image.width() as f64;
    let mut total = 0.0;
    for row in rows.clone() {
        let sum: f64 = image.row(row).iter().map(|&p| p.into()).sum();
        means[row] = sum / width;
        total += sum;
    }
    let count = width * rows.len() as f64;
    (means, if count > 0.0 { total / count } else { 0.0 })
}

/// Per-column means over the rows in `rows`, and the mean over the block.
pub fn col_means<T: Copy + Into<f64>>(image: &Image<T>, rows: Range<usize>) -> (Vec<f64>, f64) {
    let mut sums = vec![0.0; image.width()];
    for row in rows.clone() {
        for (sum, &p) in sums.iter_mut().zip(image.row(row)) {
            *sum += p.into();
        }
    }
    let n = rows.len() as f64;
    let total: f64 = sums.iter().sum();
    if n == 0.0 {
        return (sums, 0.0);
    }
    let means = sums.iter().map(|s| s / n).collect();
    let count = n * image.width() as f64;
    (means, if count > 0.0 { total / count } else { 0.0 })
}

/// Mean and variance of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiStats {
    pub mean: f64,
    pub variance: f64,
    pub count: usize,
}

/// Statistics of the image's current region of interest.
pub fn roi_stats<T: Copy + Into<f64>>(image: &Image<T>) -> RoiStats {
    region_stats(image, image.roi())
}

/// Statistics of an explicit region. The region must lie inside the image.
pub fn region_stats<T: Copy + Into<f64>>(image: &Image<T>, roi: Roi) -> RoiStats {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for row in roi.row..roi.row + roi.height {
        for &p in &image.row(row)[roi.col..roi.col + roi.width] {
            let v: f64 = p.into();
            sum += v;
            sum_sq += v * v;
        }
    }
    let count = roi.area();
    if count == 0 {
        return RoiStats {
            mean: 0.0,
            variance: 0.0,
            count,
        };
    }
    let mean = sum / count as f64;
    RoiStats {
        mean,
        variance: (sum_sq / count as f64 - mean * mean).max(0.0),
        count,
    }
}

/// Pooled variance of the difference of two sample means.
///
/// `((n1-1)v1 + (n2-1)v2) / (n1+n2-2) * (1/n1 + 1/n2)`; `None` when either
/// region holds fewer than two samples.
pub fn pooled_variance(a: &RoiStats, b: &RoiStats) -> Option<f64> {
    if a.count < 2 || b.count < 2 {
        return None;
    }
    let (n1, n2) = (a.count as f64, b.count as f64);
    let pooled = ((n1 - 1.0) * a.variance + (n2 - 1.0) * b.variance) / (n1 + n2 - 2.0);
    Some(pooled * (1.0 / n1 + 1.0 / n2))
}

/// Centred moving average of `values[range]` over `2 * span + 1` samples.
///
/// Entries closer than `span` to either end of the range take the nearest
/// fully averaged value; entries outside the range are copied unchanged.
/// A range shorter than the window is returned unsmoothed.
pub fn moving_average(values: &[f64], span: usize, range: Range<usize>) -> Vec<f64> {
    let mut out = values.to_vec();
    let window = 2 * span + 1;
    if range.len() < window {
        return out;
    }
    let (start, end) = (range.start, range.end);

    let mut sum: f64 = values[start..start + window].iter().sum();
    for pos in start + span..end - span {
        if pos > start + span {
            sum += values[pos + span] - values[pos - span - 1];
        }
        out[pos] = sum / window as f64;
    }

    let first = out[start + span];
    let last = out[end - span - 1];
    out[start..start + span].iter_mut().for_each(|v| *v = first);
    out[end - span..end].iter_mut().for_each(|v| *v = last);
    out
}

/// Mean and standard deviation of a sample.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| v * v).sum::<f64>() / n - mean * mean;
    (mean, variance.max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(pixels: Vec<u16>, width: usize) -> Image<u16> {
        let height = pixels.len() / width;
        Image::from_pixels(pixels, width, height).unwrap()
    }

    #[test]
    fn test_mean() {
        let im = image(vec![1, 2, 3, 4, 5, 6], 3);
        assert!((mean(&im) - 3.5).abs() < 1e-12);

        let empty: Image<u16> = Image::new(0, 0);
        assert_eq!(mean(&empty), 0.0);
    }

    #[test]
    fn test_row_means_in_range() {
        let im = image(vec![1, 1, 2, 2, 4, 6], 2);
        let (means, overall) = row_means(&im, 1..3);

        assert_eq!(means, vec![0.0, 2.0, 5.0]);
        assert!((overall - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_col_means() {
        let im = image(vec![1, 10, 3, 20, 5, 30], 2);
        let (means, overall) = col_means(&im, 1..3);

        assert_eq!(means, vec![4.0, 25.0]);
        assert!((overall - 14.5).abs() < 1e-12);
    }

    #[test]
    fn test_roi_stats() {
        let mut im = image(vec![0, 0, 0, 0, 2, 4, 0, 6, 8], 3);
        im.set_roi(Roi::new(1, 1, 2, 2)).unwrap();
        let stats = roi_stats(&im);

        assert_eq!(stats.count, 4);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        // population variance of 2, 4, 6, 8
        assert!((stats.variance - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_pooled_variance() {
        let a = RoiStats {
            mean: 0.0,
            variance: 4.0,
            count: 10,
        };
        let b = RoiStats {
            mean: 0.0,
            variance: 4.0,
            count: 10,
        };
        let pv = pooled_variance(&a, &b).unwrap();
        assert!((pv - 0.8).abs() < 1e-12);

        let tiny = RoiStats { count: 1, ..a };
        assert!(pooled_variance(&a, &tiny).is_none());
    }

    #[test]
    fn test_moving_average_linear_ramp_is_preserved() {
        let values: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let smoothed = moving_average(&values, 2, 0..20);

        for pos in 2..18 {
            assert!((smoothed[pos] - values[pos]).abs() < 1e-9);
        }
        assert_eq!(smoothed[0], smoothed[2]);
        assert_eq!(smoothed[19], smoothed[17]);
    }

    #[test]
    fn test_moving_average_respects_range() {
        let mut values = vec![0.0; 4];
        values.extend([10.0, 20.0, 30.0, 40.0, 50.0]);
        let smoothed = moving_average(&values, 1, 4..9);

        assert_eq!(&smoothed[..4], &[0.0; 4]);
        assert_eq!(&smoothed[4..], &[20.0, 20.0, 30.0, 40.0, 40.0]);
    }

    #[test]
    fn test_mean_std() {
        let (m, s) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((m - 5.0).abs() < 1e-12);
        assert!((s - 2.0).abs() < 1e-12);
    }
}
