//! Flat-field calibration engines.
//!
//! Two engines share the error type and the coefficient file helpers:
//!
//! - [`LineCalibration`]: per-row dark/gain correction for the tiled pano
//!   and ceph line sensors, with seam levelling between chips.
//! - [`AreaCalibration`]: per-pixel polynomial correction for the HDS area
//!   sensors, bound to the sensor's [`HardwareIdentity`].

mod area;
mod bright_mask;
mod identity;
mod line;
mod tile_offset;

pub use area::{
    average_frames, poly, AreaCalibration, AreaCalibrationData, AreaFitReport, Poly3, Poly5,
    MIN_BIAS_SETTINGS, MIN_FILTER_SETS,
};
pub use bright_mask::{extract_columns, select_bright, select_bright_columns, BrightWindows, DF_THRESH};
pub use identity::{FixedIdentity, HardwareIdentity, IdentityProvider, IDENTITY_LEN};
pub use line::{clamp_pixel, LineCalibration, LineCoefficients, RecalcSummary, SeamOffsets};
pub use tile_offset::{rect_pairs, row_difference, tile_difference, SEAM_OVERSHOOT};

use crate::capture::SensorFamily;
use std::path::Path;
use thiserror::Error;

/// Errors raised while computing, applying, saving or loading calibration
/// coefficients.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("dark and bright references are degenerate (mean signal {mean_signal})")]
    DegenerateReference { mean_signal: f64 },

    #[error("image dimensions {actual:?} do not match expected {expected:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("calibration coefficients not initialised")]
    NotInitialised,

    #[error(
        "calibration belongs to sensor {stored:08x}, attached sensor is {attached:08x}",
        stored = .found.serial_number,
        attached = .expected.serial_number
    )]
    IdentityMismatch {
        expected: HardwareIdentity,
        found: HardwareIdentity,
    },

    #[error("not enough {what}: need {required}, have {available}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        available: usize,
    },

    #[error("{0:?} sensors are not supported by this calibration")]
    UnsupportedSensor(SensorFamily),

    #[error("coefficient file {path} holds {actual} bytes, expected {expected}")]
    Truncated {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("coefficient file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path, source: std::io::Error) -> CalibrationError {
    CalibrationError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Appends values as little-endian f64.
pub(crate) fn push_f64s(buf: &mut Vec<u8>, values: &[f64]) {
    buf.reserve(values.len() * 8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

/// Decodes little-endian f64 values. Trailing partial values are ignored.
pub(crate) fn parse_f64s(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect()
}

pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CalibrationError> {
    std::fs::write(path, bytes).map_err(|e| io_error(path, e))
}

/// Reads a whole coefficient file, which must be exactly `expected` bytes.
pub(crate) fn read_file(path: &Path, expected: usize) -> Result<Vec<u8>, CalibrationError> {
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
    if bytes.len() != expected {
        return Err(CalibrationError::Truncated {
            path: path.display().to_string(),
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}
