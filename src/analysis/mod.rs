//! Image statistics.
//!
//! Row, column and region statistics shared by the line and area
//! calibration engines.

mod statistics;

pub use statistics::{
    col_means, mean, mean_std, moving_average, pooled_variance, region_stats, roi_stats,
    row_means, RoiStats,
};
