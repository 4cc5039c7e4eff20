//! Flat-field calibration for tiled line sensors (pano and ceph).
//!
//! Coefficients are per sensor row: the dark level, the bright level and a
//! gain that maps each row's signal onto the mean signal of the whole
//! sensor. Applying them scans the image from the last chip upwards and
//! re-levels each chip against the one below it as the scan crosses a seam.

use super::tile_offset::{row_difference, tile_difference, SEAM_OVERSHOOT};
use super::{parse_f64s, push_f64s, read_file, write_file, CalibrationError};
use crate::analysis::{mean_std, moving_average, row_means};
use crate::capture::{CalibrationConfig, SensorFamily};
use crate::image::{Image, MAX_PIXEL_VALUE};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info, warn};

/// Row signal below which a row carries no usable gain.
pub const GAIN_EPSILON: f64 = 1e-6;
/// Rejection threshold on the row-to-row gain difference, in standard
/// deviations.
pub const OUTLIER_SIGMAS: f64 = 3.0;
/// Rows overwritten by the A/B gap fix: from `seam - 2` up to `seam + 7`.
pub const AB_GAP_BEFORE: usize = 2;
pub const AB_GAP_AFTER: usize = 7;
/// Rows scanned past a seam before its offset is measured in dark-only mode.
pub const DARK_ONLY_OVERSHOOT: usize = 10;

/// Per-row coefficient arrays, each `chip_height * num_chips` long.
#[derive(Debug, Clone, PartialEq)]
pub struct LineCoefficients {
    pub dark: Vec<f64>,
    pub bright: Vec<f64>,
    pub gain: Vec<f64>,
}

/// Figures computed by [`LineCalibration::recalc`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecalcSummary {
    pub mean_dark: f64,
    pub mean_bright: f64,
    pub mean_signal: f64,
    /// Active rows whose gain ended up zero.
    pub rejected_rows: usize,
}

/// Seam offsets used by one [`LineCalibration::apply`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeamOffsets {
    pub bc: Option<f64>,
    pub ab: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seam {
    /// Between chips B and C, levelled on the adjacent rows.
    BC,
    /// Between chips A and B, levelled on the tile difference (ceph only).
    AB,
}

/// Line-sensor calibration engine.
#[derive(Debug, Clone)]
pub struct LineCalibration {
    chip_height: usize,
    num_chips: usize,
    family: SensorFamily,
    pedestal: f64,
    max_coef: f64,
    smooth_span: Option<usize>,
    dark_only: bool,
    coefficients: Option<LineCoefficients>,
}

impl LineCalibration {
    /// Creates an engine with no coefficients.
    pub fn new(
        chip_height: usize,
        num_chips: usize,
        family: SensorFamily,
        config: &CalibrationConfig,
    ) -> Result<Self, CalibrationError> {
        if !family.is_line_sensor() {
            return Err(CalibrationError::UnsupportedSensor(family));
        }
        if chip_height == 0 || !(1..=3).contains(&num_chips) {
            return Err(CalibrationError::InsufficientData {
                what: "sensor rows",
                required: 1,
                available: chip_height * num_chips,
            });
        }
        Ok(Self {
            chip_height,
            num_chips,
            family,
            pedestal: config.pedestal,
            max_coef: config.max_coef,
            smooth_span: config.smooth.then_some(config.smooth_span),
            dark_only: config.dark_only,
            coefficients: None,
        })
    }

    /// Number of sensor rows.
    pub fn rows(&self) -> usize {
        self.chip_height * self.num_chips
    }

    /// Rows that carry sensor data. Pano scans leave the chip A slot empty.
    pub fn active_rows(&self) -> Range<usize> {
        match self.family {
            SensorFamily::Pano => self.chip_height..self.rows(),
            _ => 0..self.rows(),
        }
    }

    /// Current coefficients, if computed or loaded.
    pub fn coefficients(&self) -> Option<&LineCoefficients> {
        self.coefficients.as_ref()
    }

    pub fn is_initialised(&self) -> bool {
        self.coefficients.is_some()
    }

    pub fn pedestal(&self) -> f64 {
        self.pedestal
    }

    /// Switches between full gain correction and dark subtraction only.
    pub fn set_dark_only(&mut self, dark_only: bool) {
        self.dark_only = dark_only;
    }

    /// Computes coefficients from a dark and a bright scan.
    ///
    /// Both images must be sensor-high; their widths may differ.
    pub fn recalc(
        &mut self,
        dark: &Image<u16>,
        bright: &Image<u16>,
    ) -> Result<RecalcSummary, CalibrationError> {
        let n = self.rows();
        for image in [dark, bright] {
            if image.height() != n {
                return Err(CalibrationError::DimensionMismatch {
                    expected: (image.width(), n),
                    actual: (image.width(), image.height()),
                });
            }
            if image.width() == 0 {
                return Err(CalibrationError::InsufficientData {
                    what: "reference columns",
                    required: 1,
                    available: 0,
                });
            }
        }

        let rows = self.active_rows();
        let (mut dark_means, mean_dark) = row_means(dark, rows.clone());
        let (mut bright_means, mean_bright) = row_means(bright, rows.clone());

        if let Some(span) = self.smooth_span {
            dark_means = moving_average(&dark_means, span, rows.clone());
            bright_means = moving_average(&bright_means, span, rows.clone());
            for (_, split) in self.seams() {
                patch_seam(&mut dark_means, split, &rows);
                patch_seam(&mut bright_means, split, &rows);
            }
        }

        let mean_signal = mean_bright - mean_dark;
        if mean_signal == 0.0 || !mean_signal.is_finite() {
            return Err(CalibrationError::DegenerateReference { mean_signal });
        }

        let mut gain = vec![0.0; n];
        for row in rows.clone() {
            let diff = bright_means[row] - dark_means[row];
            if diff > GAIN_EPSILON {
                let g = mean_signal / diff;
                gain[row] = if g > self.max_coef { 0.0 } else { g };
            }
        }
        reject_outliers(&mut gain, &dark_means, &bright_means, &rows);

        let rejected_rows = rows.clone().filter(|&r| gain[r] == 0.0).count();
        info!(
            mean_dark,
            mean_bright,
            mean_signal,
            rejected_rows,
            "line calibration computed"
        );

        self.coefficients = Some(LineCoefficients {
            dark: dark_means,
            bright: bright_means,
            gain,
        });
        Ok(RecalcSummary {
            mean_dark,
            mean_bright,
            mean_signal,
            rejected_rows,
        })
    }

    /// Calibrates `input` into `output`.
    ///
    /// Rows are processed from the bottom (chip C) upwards. Once the scan is
    /// far enough past a seam for the rows beyond it to be final, the seam
    /// offset is measured and the scan restarts at the seam with the new
    /// offset. Each seam is crossed once. The seam rows are then spliced by
    /// interpolation.
    pub fn apply(
        &self,
        input: &Image<u16>,
        output: &mut Image<u16>,
    ) -> Result<SeamOffsets, CalibrationError> {
        let coefs = self
            .coefficients
            .as_ref()
            .ok_or(CalibrationError::NotInitialised)?;
        let n = self.rows();
        if input.height() != n {
            return Err(CalibrationError::DimensionMismatch {
                expected: (input.width(), n),
                actual: (input.width(), input.height()),
            });
        }
        if !input.same_shape(output) {
            return Err(CalibrationError::DimensionMismatch {
                expected: (input.width(), input.height()),
                actual: (output.width(), output.height()),
            });
        }

        // highest seam first
        let mut pending: Vec<(Seam, usize)> = self.seams().into_iter().rev().collect();
        let mut offsets = SeamOffsets::default();
        let mut offset = 0.0;
        let overshoot = if self.dark_only {
            DARK_ONLY_OVERSHOOT
        } else {
            SEAM_OVERSHOOT
        };

        let mut row = n;
        while row > 0 {
            row -= 1;
            if let Some(&(seam, split)) = pending.first() {
                if row == split.saturating_sub(overshoot) {
                    pending.remove(0);
                    offset = self.seam_offset(seam, split, offset, output, overshoot);
                    match seam {
                        Seam::BC => offsets.bc = Some(offset),
                        Seam::AB => offsets.ab = Some(offset),
                    }
                    debug!(?seam, split, offset, "seam offset");
                    self.calibrate_row(coefs, input, output, row, offset);
                    row = split;
                    continue;
                }
            }
            self.calibrate_row(coefs, input, output, row, offset);
        }

        for (seam, split) in self.seams() {
            match seam {
                Seam::AB => fix_ab_gap(output, split),
                Seam::BC => fix_bc_gap(output, split),
            }
        }
        Ok(offsets)
    }

    /// Levels the chips without flat-fielding: each pixel becomes its raw
    /// value plus the pedestal and the running seam offset. Seams are
    /// measured [`DARK_ONLY_OVERSHOOT`] rows early, on the adjacent rows.
    pub fn apply_dark_only(
        &self,
        input: &Image<u16>,
        output: &mut Image<u16>,
    ) -> Result<SeamOffsets, CalibrationError> {
        let mut unity = self.clone();
        unity.dark_only = true;
        unity.apply(input, output)
    }

    /// Writes dark, bright and gain arrays in that order.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let coefs = self
            .coefficients
            .as_ref()
            .ok_or(CalibrationError::NotInitialised)?;
        let mut bytes = Vec::new();
        push_f64s(&mut bytes, &coefs.dark);
        push_f64s(&mut bytes, &coefs.bright);
        push_f64s(&mut bytes, &coefs.gain);
        write_file(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), rows = self.rows(), "line coefficients saved");
        Ok(())
    }

    /// Reads a coefficient file written by [`save`](Self::save). The
    /// current coefficients are replaced only if the whole file is valid.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let n = self.rows();
        let values = parse_f64s(&read_file(path.as_ref(), 3 * n * 8)?);
        self.coefficients = Some(LineCoefficients {
            dark: values[..n].to_vec(),
            bright: values[n..2 * n].to_vec(),
            gain: values[2 * n..].to_vec(),
        });
        info!(path = %path.as_ref().display(), rows = n, "line coefficients loaded");
        Ok(())
    }

    /// Seams in ascending row order.
    fn seams(&self) -> Vec<(Seam, usize)> {
        let mut seams = Vec::new();
        if self.num_chips >= 2 {
            seams.push((Seam::AB, self.chip_height));
        }
        if self.num_chips >= 3 {
            seams.push((Seam::BC, 2 * self.chip_height));
        }
        seams
    }

    fn seam_offset(
        &self,
        seam: Seam,
        split: usize,
        current: f64,
        output: &Image<u16>,
        overshoot: usize,
    ) -> f64 {
        match (seam, self.family) {
            (Seam::BC, _) => row_difference(output, split).unwrap_or(current),
            (Seam::AB, SensorFamily::Pano) => 0.0,
            (Seam::AB, _) => {
                // the tile above the seam is only final after a full overshoot
                let tiles = if overshoot >= SEAM_OVERSHOOT {
                    let tiles = tile_difference(output, split);
                    if tiles.is_none() {
                        warn!(split, "no tile pair fits, levelling on adjacent rows");
                    }
                    tiles
                } else {
                    None
                };
                let step = tiles.or_else(|| row_difference(output, split));
                current + step.unwrap_or(0.0)
            }
        }
    }

    fn calibrate_row(
        &self,
        coefs: &LineCoefficients,
        input: &Image<u16>,
        output: &mut Image<u16>,
        row: usize,
        offset: f64,
    ) {
        let bias = self.pedestal + offset;
        let pixels = output.row_mut(row).iter_mut().zip(input.row(row));
        if self.dark_only {
            for (out, &px) in pixels {
                *out = clamp_pixel(f64::from(px) + bias);
            }
            return;
        }
        let dark = coefs.dark[row];
        let gain = coefs.gain[row];
        for (out, &px) in pixels {
            *out = clamp_pixel((f64::from(px) - dark) * gain + bias);
        }
    }
}

/// Truncates a calibrated value into the pixel range.
pub fn clamp_pixel(value: f64) -> u16 {
    if value.is_nan() || value < 0.0 {
        0
    } else if value >= f64::from(MAX_PIXEL_VALUE) {
        MAX_PIXEL_VALUE
    } else {
        value as u16
    }
}

/// Replaces the two rows either side of a seam (`split - 1`, `split`) with a
/// linear interpolation between `split - 2` and `split + 1`.
fn patch_seam(values: &mut [f64], split: usize, rows: &Range<usize>) {
    if split < rows.start + 2 || split + 1 >= rows.end {
        return;
    }
    let lo = values[split - 2];
    let step = (values[split + 1] - lo) / 3.0;
    values[split - 1] = lo + step;
    values[split] = lo + 2.0 * step;
}

/// Zeroes gains whose jump from the previous row is an outlier.
fn reject_outliers(gain: &mut [f64], dark: &[f64], bright: &[f64], rows: &Range<usize>) {
    let jumps: Vec<(usize, f64)> = (rows.start + 1..rows.end)
        .filter(|&r| bright[r] - dark[r] > GAIN_EPSILON)
        .map(|r| (r, (gain[r - 1] - gain[r]).abs()))
        .collect();
    let values: Vec<f64> = jumps.iter().map(|&(_, d)| d).collect();
    let (_, std) = mean_std(&values);
    if std <= f64::EPSILON {
        return;
    }
    let limit = OUTLIER_SIGMAS * std;
    for (row, jump) in jumps {
        if jump > limit {
            gain[row] = 0.0;
        }
    }
}

/// Splices the A/B seam: rows `split - 2 .. split + 7` become a ramp from
/// row `split - 2` to row `split + 7`.
fn fix_ab_gap(image: &mut Image<u16>, split: usize) {
    let Some(first) = split.checked_sub(AB_GAP_BEFORE) else {
        return;
    };
    let last = split + AB_GAP_AFTER;
    if last >= image.height() {
        return;
    }
    let from = image.row(first).to_vec();
    let to = image.row(last).to_vec();
    let steps = (last - first) as f64;
    for (k, row) in (first..last).enumerate() {
        let step = (k + 1) as f64;
        for ((out, &m), &p) in image.row_mut(row).iter_mut().zip(&from).zip(&to) {
            let (m, p) = (f64::from(m), f64::from(p));
            *out = clamp_pixel(m + (p - m) * step / steps);
        }
    }
}

/// Splices the B/C seam: row `split - 1` becomes the midpoint of rows
/// `split - 2` and `split`.
fn fix_bc_gap(image: &mut Image<u16>, split: usize) {
    if split < 2 || split >= image.height() {
        return;
    }
    let above = image.row(split - 2).to_vec();
    let below = image.row(split).to_vec();
    for ((out, &m), &p) in image.row_mut(split - 1).iter_mut().zip(&above).zip(&below) {
        let (m, p) = (f64::from(m), f64::from(p));
        *out = clamp_pixel(m + (p - m) / 2.0);
    }
}
