//! Metrics collection and registry.

use crate::demux::DecodeStats;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of pipeline state for metrics update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Decode counters since the pipeline was created.
    pub decode: DecodeStats,
    /// Latched half index of the current scan.
    pub half_index: Option<usize>,
    /// Images added to the dataset.
    pub images_acquired: u64,
    /// Mean signal of the last calibration.
    pub mean_signal: Option<f64>,
    /// Rows rejected by the last line calibration.
    pub rejected_rows: Option<u64>,
    /// Masked pixels of the area calibration.
    pub bad_pixels: Option<u64>,
}

/// Prometheus metrics registry for acquisition monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    // Decode quality
    lines_ok: IntCounter,
    lines_short: IntCounter,
    lines_long: IntCounter,
    end_of_data: IntCounter,
    half_index: IntGauge,

    // Acquisition
    images_acquired: IntCounter,

    // Calibration
    mean_signal: Gauge,
    rejected_rows: IntGauge,
    bad_pixels: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new registry with all acquisition metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let lines_ok = IntCounter::new(
            "xray_acq_lines_ok_total",
            "Lines decoded with the expected sample count",
        )?;
        let lines_short = IntCounter::new(
            "xray_acq_lines_short_total",
            "Lines whose end-of-line marker arrived early",
        )?;
        let lines_long = IntCounter::new(
            "xray_acq_lines_long_total",
            "Lines discarded after overrunning their buffers",
        )?;
        let end_of_data = IntCounter::new(
            "xray_acq_end_of_data_total",
            "End-of-data events seen by the demultiplexer",
        )?;
        let half_index = IntGauge::new(
            "xray_acq_half_index",
            "Detected half index of the current scan (-1 if not detected)",
        )?;
        let images_acquired = IntCounter::new(
            "xray_acq_images_acquired_total",
            "Images added to the dataset",
        )?;
        let mean_signal = Gauge::new(
            "xray_acq_calibration_mean_signal",
            "Mean bright-minus-dark signal of the last calibration",
        )?;
        let rejected_rows = IntGauge::new(
            "xray_acq_calibration_rejected_rows",
            "Sensor rows with zero gain after the last line calibration",
        )?;
        let bad_pixels = IntGauge::new(
            "xray_acq_calibration_bad_pixels",
            "Masked pixels of the area calibration",
        )?;

        registry.register(Box::new(lines_ok.clone()))?;
        registry.register(Box::new(lines_short.clone()))?;
        registry.register(Box::new(lines_long.clone()))?;
        registry.register(Box::new(end_of_data.clone()))?;
        registry.register(Box::new(half_index.clone()))?;
        registry.register(Box::new(images_acquired.clone()))?;
        registry.register(Box::new(mean_signal.clone()))?;
        registry.register(Box::new(rejected_rows.clone()))?;
        registry.register(Box::new(bad_pixels.clone()))?;

        half_index.set(-1);

        Ok(Self {
            registry,
            lines_ok,
            lines_short,
            lines_long,
            end_of_data,
            half_index,
            images_acquired,
            mean_signal,
            rejected_rows,
            bad_pixels,
        })
    }

    /// Updates all metrics from a snapshot of pipeline state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        // Counters only move forward
        advance(&self.lines_ok, snapshot.decode.ok);
        advance(&self.lines_short, snapshot.decode.short);
        advance(&self.lines_long, snapshot.decode.long);
        advance(&self.end_of_data, snapshot.decode.end_of_data);
        advance(&self.images_acquired, snapshot.images_acquired);

        self.half_index
            .set(snapshot.half_index.map_or(-1, |h| h as i64));

        if let Some(signal) = snapshot.mean_signal {
            self.mean_signal.set(signal);
        }
        if let Some(rows) = snapshot.rejected_rows {
            self.rejected_rows.set(rows as i64);
        }
        if let Some(pixels) = snapshot.bad_pixels {
            self.bad_pixels.set(pixels as i64);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            decode: DecodeStats {
                ok: 120,
                short: 3,
                long: 1,
                end_of_data: 1,
            },
            half_index: Some(1440),
            images_acquired: 1,
            mean_signal: Some(2150.5),
            rejected_rows: Some(4),
            bad_pixels: None,
        };
        registry.update(&snapshot);
        // a repeated snapshot does not double count
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("xray_acq_lines_ok_total 120"));
        assert!(output.contains("xray_acq_lines_short_total 3"));
        assert!(output.contains("xray_acq_half_index 1440"));
        assert!(output.contains("xray_acq_calibration_rejected_rows 4"));
    }

    #[test]
    fn test_metrics_encode() {
        let registry = MetricsRegistry::new().unwrap();
        let output = registry.encode().unwrap();

        assert!(output.contains("xray_acq_lines_long_total"));
        assert!(output.contains("xray_acq_half_index -1"));
        assert!(output.contains("xray_acq_calibration_bad_pixels"));
    }
}
