//! Prometheus metrics for acquisition monitoring.
//!
//! Exposes decode quality and calibration figures in Prometheus format.
//! The HTTP exporter behind `xray-acq serve` is only built with the
//! `metrics` feature.
//!
//! # Metrics Exposed
//!
//! ## Decode Metrics
//! - `xray_acq_lines_ok_total` - Lines decoded with the expected sample count
//! - `xray_acq_lines_short_total` - Short lines (kept)
//! - `xray_acq_lines_long_total` - Long lines (discarded)
//! - `xray_acq_end_of_data_total` - End-of-data events
//! - `xray_acq_half_index` - Detected half index, -1 until detected
//!
//! ## Calibration Metrics
//! - `xray_acq_images_acquired_total` - Images added to the dataset
//! - `xray_acq_calibration_mean_signal` - Mean signal of the last calibration
//! - `xray_acq_calibration_rejected_rows` - Zero-gain rows (line sensors)
//! - `xray_acq_calibration_bad_pixels` - Masked pixels (area sensors)
//!
//! # Example
//!
//! ```no_run
//! use xray_acquisition::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let snapshot = MetricsSnapshot {
//!     half_index: Some(1440),
//!     images_acquired: 1,
//!     ..MetricsSnapshot::default()
//! };
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, ServerError};
