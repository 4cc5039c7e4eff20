//! Per-pixel polynomial calibration for the HDS area sensors.
//!
//! Each pixel carries two curves. The 5th-order curve maps a raw sample to
//! the equivalent bias setting, which removes the pixel's non-linear dark
//! response. The 3rd-order curve maps the dark-corrected signal onto the
//! sensor-wide mean signal, which flattens the gain.

use super::identity::{HardwareIdentity, IdentityProvider, IDENTITY_LEN};
use super::line::clamp_pixel;
use super::{parse_f64s, push_f64s, read_file, write_file, CalibrationError};
use crate::image::{Dataset, Image, ImageRole};
use nalgebra::{DMatrix, DVector};
use std::path::Path;
use tracing::{debug, info, warn};

/// 5th-order curve; the last slot is unused.
pub type Poly5 = [f64; 6];
/// 3rd-order curve.
pub type Poly3 = [f64; 3];

const ORDER5: usize = 5;
const ORDER3: usize = 3;

/// Bias settings needed to fit the dark curve.
pub const MIN_BIAS_SETTINGS: usize = ORDER5;
/// Filter sets needed to fit the gain curve.
pub const MIN_FILTER_SETS: usize = ORDER3;

/// Evaluates `c[0]x^order + ... + c[order-1]x` by Horner's scheme.
///
/// There is no constant term. `order` must be at least 2.
pub fn poly(x: f64, coefs: &[f64], order: usize) -> f64 {
    let mut val = coefs[1] + coefs[0] * x;
    for &c in &coefs[2..order] {
        val = c + x * val;
    }
    val * x
}

/// Pixel-wise mean of a set of frames.
pub fn average_frames<'a>(
    frames: impl IntoIterator<Item = &'a Image<u16>>,
) -> Result<Image<f64>, CalibrationError> {
    let mut iter = frames.into_iter();
    let first = iter.next().ok_or(CalibrationError::InsufficientData {
        what: "frames",
        required: 1,
        available: 0,
    })?;
    let mut sum = first.map(f64::from);
    let mut count = 1usize;
    for frame in iter {
        if !frame.same_shape(&sum) {
            return Err(CalibrationError::DimensionMismatch {
                expected: (sum.width(), sum.height()),
                actual: (frame.width(), frame.height()),
            });
        }
        for (s, &p) in sum.pixels_mut().iter_mut().zip(frame.pixels()) {
            *s += f64::from(p);
        }
        count += 1;
    }
    let n = count as f64;
    sum.pixels_mut().iter_mut().for_each(|s| *s /= n);
    Ok(sum)
}

/// Averaged captures from one calibration run.
#[derive(Debug, Clone)]
pub struct AreaCalibrationData {
    /// Averaged dark frame for each bias setting.
    pub bias_sweep: Vec<(f64, Image<f64>)>,
    /// Averaged dark frame at the operating bias.
    pub dark: Image<f64>,
    /// Averaged bright frame for each illumination filter.
    pub filter_sweep: Vec<Image<f64>>,
}

/// Outcome of [`AreaCalibration::recalc`].
#[derive(Debug, Clone, PartialEq)]
pub struct AreaFitReport {
    pub bad_pixels: usize,
    /// Sensor-wide mean corrected signal per filter.
    pub filter_targets: Vec<f64>,
}

/// Area-sensor calibration engine.
#[derive(Debug, Clone)]
pub struct AreaCalibration {
    identity: HardwareIdentity,
    cal5: Image<Poly5>,
    cal3: Image<Poly3>,
    mask: Image<u8>,
    dark: Option<Image<f64>>,
    initialised: bool,
}

impl AreaCalibration {
    /// Creates an engine for a `width` x `height` sensor with the given
    /// identity.
    pub fn new(width: usize, height: usize, identity: HardwareIdentity) -> Self {
        Self {
            identity,
            cal5: Image::new(width, height),
            cal3: Image::new(width, height),
            mask: Image::new(width, height),
            dark: None,
            initialised: false,
        }
    }

    pub fn width(&self) -> usize {
        self.cal5.width()
    }

    pub fn height(&self) -> usize {
        self.cal5.height()
    }

    pub fn identity(&self) -> &HardwareIdentity {
        &self.identity
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// Dark curves.
    pub fn cal5(&self) -> &Image<Poly5> {
        &self.cal5
    }

    /// Gain curves.
    pub fn cal3(&self) -> &Image<Poly3> {
        &self.cal3
    }

    /// Bad-pixel mask, 1 for pixels without usable curves.
    pub fn mask(&self) -> &Image<u8> {
        &self.mask
    }

    pub fn bad_pixel_count(&self) -> usize {
        self.mask.pixels().iter().filter(|&&m| m != 0).count()
    }

    /// Sets the dark frame subtracted by [`apply`](Self::apply).
    pub fn set_dark(&mut self, dark: Image<f64>) -> Result<(), CalibrationError> {
        self.check_shape(dark.width(), dark.height())?;
        self.dark = Some(dark);
        Ok(())
    }

    fn check_shape(&self, width: usize, height: usize) -> Result<(), CalibrationError> {
        if (width, height) != (self.width(), self.height()) {
            return Err(CalibrationError::DimensionMismatch {
                expected: (self.width(), self.height()),
                actual: (width, height),
            });
        }
        Ok(())
    }

    /// Fits both curves for every pixel.
    ///
    /// Pixels whose samples do not determine a curve are masked and get
    /// zero coefficients. The gain targets are computed over the pixels
    /// whose dark curve fitted.
    pub fn recalc(&mut self, data: &AreaCalibrationData) -> Result<AreaFitReport, CalibrationError> {
        if data.bias_sweep.len() < MIN_BIAS_SETTINGS {
            return Err(CalibrationError::InsufficientData {
                what: "bias settings",
                required: MIN_BIAS_SETTINGS,
                available: data.bias_sweep.len(),
            });
        }
        if data.filter_sweep.len() < MIN_FILTER_SETS {
            return Err(CalibrationError::InsufficientData {
                what: "filter sets",
                required: MIN_FILTER_SETS,
                available: data.filter_sweep.len(),
            });
        }
        self.check_shape(data.dark.width(), data.dark.height())?;
        for image in data
            .bias_sweep
            .iter()
            .map(|(_, image)| image)
            .chain(&data.filter_sweep)
        {
            self.check_shape(image.width(), image.height())?;
        }

        let n = self.width() * self.height();
        let bias: Vec<f64> = data.bias_sweep.iter().map(|(b, _)| *b).collect();
        let mut cal5 = vec![Poly5::default(); n];
        let mut mask = vec![0u8; n];

        for p in 0..n {
            let samples: Vec<f64> = data.bias_sweep.iter().map(|(_, im)| im.pixels()[p]).collect();
            match fit_through_origin(&samples, &bias, ORDER5) {
                Some(c) => cal5[p][..ORDER5].copy_from_slice(&c),
                None => mask[p] = 1,
            }
        }

        // corrected signal per filter and pixel, and the sensor-wide target
        let signals: Vec<Vec<f64>> = data
            .filter_sweep
            .iter()
            .map(|bright| {
                (0..n)
                    .map(|p| {
                        let dark = poly(data.dark.pixels()[p], &cal5[p], ORDER5);
                        poly(bright.pixels()[p], &cal5[p], ORDER5) - dark
                    })
                    .collect()
            })
            .collect();
        let good = mask.iter().filter(|&&m| m == 0).count();
        if good == 0 {
            return Err(CalibrationError::InsufficientData {
                what: "fitted pixels",
                required: 1,
                available: 0,
            });
        }
        let targets: Vec<f64> = signals
            .iter()
            .map(|s| {
                s.iter()
                    .zip(&mask)
                    .filter(|(_, m)| **m == 0)
                    .map(|(v, _)| v)
                    .sum::<f64>()
                    / good as f64
            })
            .collect();

        let mut cal3 = vec![Poly3::default(); n];
        for p in 0..n {
            if mask[p] != 0 {
                continue;
            }
            let xs: Vec<f64> = signals.iter().map(|s| s[p]).collect();
            match fit_through_origin(&xs, &targets, ORDER3) {
                Some(c) => cal3[p].copy_from_slice(&c),
                None => {
                    mask[p] = 1;
                    cal5[p] = Poly5::default();
                }
            }
        }

        let (w, h) = (self.width(), self.height());
        let cal5 = Image::from_pixels(cal5, w, h).map_err(|_| self.shape_error(n))?;
        let cal3 = Image::from_pixels(cal3, w, h).map_err(|_| self.shape_error(n))?;
        let mask = Image::from_pixels(mask, w, h).map_err(|_| self.shape_error(n))?;
        self.cal5 = cal5;
        self.cal3 = cal3;
        self.mask = mask;
        self.dark = Some(data.dark.clone());
        self.initialised = true;

        let bad_pixels = self.bad_pixel_count();
        if bad_pixels > 0 {
            warn!(bad_pixels, "pixels without usable calibration curves");
        }
        info!(
            bias_settings = bias.len(),
            filters = targets.len(),
            bad_pixels,
            "area calibration computed"
        );
        Ok(AreaFitReport {
            bad_pixels,
            filter_targets: targets,
        })
    }

    fn shape_error(&self, len: usize) -> CalibrationError {
        CalibrationError::DimensionMismatch {
            expected: (self.width(), self.height()),
            actual: (len, 1),
        }
    }

    /// Averages the `num_images` most recent acquired images of `dataset`
    /// through both curves into `output`.
    pub fn apply(
        &self,
        dataset: &Dataset,
        num_images: usize,
        output: &mut Image<u16>,
    ) -> Result<(), CalibrationError> {
        if !self.initialised {
            return Err(CalibrationError::NotInitialised);
        }
        let dark = self.dark.as_ref().ok_or(CalibrationError::NotInitialised)?;
        self.check_shape(output.width(), output.height())?;

        let acquired: Vec<&Image<u16>> = dataset
            .with_role(ImageRole::Acquired)
            .map(|(_, image)| image)
            .collect();
        let images = &acquired[acquired.len().saturating_sub(num_images)..];
        if num_images == 0 || images.len() < num_images {
            return Err(CalibrationError::InsufficientData {
                what: "acquired images",
                required: num_images.max(1),
                available: images.len(),
            });
        }
        for image in images {
            self.check_shape(image.width(), image.height())?;
        }

        let cal5 = self.cal5.pixels();
        let cal3 = self.cal3.pixels();
        for (p, out) in output.pixels_mut().iter_mut().enumerate() {
            let base = poly(dark.pixels()[p], &cal5[p], ORDER5);
            let sum: f64 = images
                .iter()
                .map(|im| poly(f64::from(im.pixels()[p]), &cal5[p], ORDER5) - base)
                .sum();
            let ave = sum / num_images as f64;
            *out = clamp_pixel(poly(ave, &cal3[p], ORDER3));
        }
        debug!(num_images, "area calibration applied");
        Ok(())
    }

    /// Writes the identity record, the dark curves, the gain curves and the
    /// mask, in that order.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        if !self.initialised {
            return Err(CalibrationError::NotInitialised);
        }
        let mut bytes = Vec::with_capacity(self.file_len());
        bytes.extend_from_slice(&self.identity.to_bytes());
        for c in self.cal5.pixels() {
            push_f64s(&mut bytes, c);
        }
        for c in self.cal3.pixels() {
            push_f64s(&mut bytes, c);
        }
        bytes.extend_from_slice(self.mask.pixels());
        write_file(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), serial = self.identity.serial_number, "area coefficients saved");
        Ok(())
    }

    /// Reads a file written by [`save`](Self::save).
    ///
    /// The stored identity must equal the one reported by `provider`;
    /// nothing is modified unless the whole file is accepted.
    pub fn load(
        &mut self,
        path: impl AsRef<Path>,
        provider: &dyn IdentityProvider,
    ) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        let bytes = read_file(path, self.file_len())?;

        let mut raw = [0u8; IDENTITY_LEN];
        raw.copy_from_slice(&bytes[..IDENTITY_LEN]);
        let stored = HardwareIdentity::from_bytes(&raw);
        let attached = provider.identity()?;
        if stored != attached {
            return Err(CalibrationError::IdentityMismatch {
                expected: attached,
                found: stored,
            });
        }

        let n = self.width() * self.height();
        let cal5_end = IDENTITY_LEN + n * 6 * 8;
        let cal3_end = cal5_end + n * 3 * 8;
        let cal5: Vec<Poly5> = parse_f64s(&bytes[IDENTITY_LEN..cal5_end])
            .chunks_exact(6)
            .map(|c| [c[0], c[1], c[2], c[3], c[4], c[5]])
            .collect();
        let cal3: Vec<Poly3> = parse_f64s(&bytes[cal5_end..cal3_end])
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        let mask = bytes[cal3_end..].to_vec();

        let (w, h) = (self.width(), self.height());
        let cal5 = Image::from_pixels(cal5, w, h).map_err(|_| self.shape_error(n))?;
        let cal3 = Image::from_pixels(cal3, w, h).map_err(|_| self.shape_error(n))?;
        let mask = Image::from_pixels(mask, w, h).map_err(|_| self.shape_error(n))?;

        self.identity = attached;
        self.cal5 = cal5;
        self.cal3 = cal3;
        self.mask = mask;
        self.initialised = true;
        info!(path = %path.display(), serial = attached.serial_number, "area coefficients loaded");
        Ok(())
    }

    fn file_len(&self) -> usize {
        let n = self.width() * self.height();
        IDENTITY_LEN + n * (6 + 3) * 8 + n
    }
}

/// Least-squares fit of `y = c[0]x^order + ... + c[order-1]x`.
///
/// `x` is normalised by its largest magnitude before the normal equations
/// are solved. `None` when fewer than `order` distinct samples exist, the
/// system is singular or the result is not finite.
fn fit_through_origin(xs: &[f64], ys: &[f64], order: usize) -> Option<Vec<f64>> {
    let mut distinct = xs.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < order || xs.len() != ys.len() {
        return None;
    }

    let scale = xs.iter().fold(0.0f64, |m, x| m.max(x.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }

    let power = |j: usize| (order - j) as i32;
    let a = DMatrix::from_fn(xs.len(), order, |i, j| (xs[i] / scale).powi(power(j)));
    let b = DVector::from_column_slice(ys);
    let at = a.transpose();
    let normal = &at * &a;
    let d = normal.lu().solve(&(&at * b))?;

    let coefs: Vec<f64> = (0..order).map(|j| d[j] / scale.powi(power(j))).collect();
    coefs.iter().all(|c| c.is_finite()).then_some(coefs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::FixedIdentity;
    use crate::image::DatasetTag;

    fn frame(width: usize, height: usize, value: f64) -> Image<f64> {
        Image::filled(width, height, value)
    }

    /// Dark response `bias = 2 * sample`, filters giving signals 200/400/600.
    fn linear_run(width: usize, height: usize) -> AreaCalibrationData {
        AreaCalibrationData {
            bias_sweep: (1..=5)
                .map(|k| (200.0 * k as f64, frame(width, height, 100.0 * k as f64)))
                .collect(),
            dark: frame(width, height, 50.0),
            filter_sweep: [150.0, 250.0, 350.0]
                .iter()
                .map(|&v| frame(width, height, v))
                .collect(),
        }
    }

    #[test]
    fn test_poly_horner() {
        let c5 = [1.0, 2.0, 3.0, 4.0, 5.0, 99.0];
        // x^5 + 2x^4 + 3x^3 + 4x^2 + 5x at x = 2
        assert_eq!(poly(2.0, &c5, 5), 32.0 + 32.0 + 24.0 + 16.0 + 10.0);
        let c3 = [0.5, 0.0, 1.0];
        assert_eq!(poly(4.0, &c3, 3), 32.0 + 4.0);
    }

    #[test]
    fn test_fit_recovers_polynomial() {
        let xs = [0.5, 1.0, 1.5, 2.0, 3.0];
        let ys: Vec<f64> = xs.iter().map(|&x| 0.25 * x * x * x - x * x + 3.0 * x).collect();
        let c = fit_through_origin(&xs, &ys, 3).unwrap();
        assert!((c[0] - 0.25).abs() < 1e-9);
        assert!((c[1] + 1.0).abs() < 1e-9);
        assert!((c[2] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rejects_repeated_samples() {
        assert!(fit_through_origin(&[7.0; 5], &[1.0, 2.0, 3.0, 4.0, 5.0], 5).is_none());
    }

    #[test]
    fn test_average_frames() {
        let a = Image::filled(2, 2, 10u16);
        let b = Image::filled(2, 2, 20u16);
        let avg = average_frames([&a, &b]).unwrap();
        assert!(avg.pixels().iter().all(|&p| p == 15.0));

        let c = Image::filled(3, 2, 20u16);
        assert!(average_frames([&a, &c]).is_err());
        assert!(average_frames(std::iter::empty()).is_err());
    }

    #[test]
    fn test_recalc_and_apply() {
        let mut cal = AreaCalibration::new(3, 2, HardwareIdentity::default());
        let report = cal.recalc(&linear_run(3, 2)).unwrap();
        assert_eq!(report.bad_pixels, 0);
        assert!((report.filter_targets[1] - 400.0).abs() < 1e-4);
        assert!((poly(300.0, &cal.cal5().pixels()[0], 5) - 600.0).abs() < 1e-3);

        let mut dataset = Dataset::new();
        for _ in 0..2 {
            dataset.push(DatasetTag::new(ImageRole::Acquired), Image::filled(3, 2, 250));
        }
        let mut out = Image::new(3, 2);
        cal.apply(&dataset, 2, &mut out).unwrap();
        assert!(out.pixels().iter().all(|&p| (i32::from(p) - 400).abs() <= 1));
    }

    #[test]
    fn test_apply_uses_most_recent_images() {
        let mut cal = AreaCalibration::new(3, 2, HardwareIdentity::default());
        cal.recalc(&linear_run(3, 2)).unwrap();

        let mut dataset = Dataset::new();
        dataset.push(DatasetTag::new(ImageRole::Acquired), Image::filled(3, 2, 100));
        dataset.push(DatasetTag::new(ImageRole::Output), Image::filled(3, 2, 0));
        for _ in 0..2 {
            dataset.push(DatasetTag::new(ImageRole::Acquired), Image::filled(3, 2, 350));
        }
        let mut out = Image::new(3, 2);
        cal.apply(&dataset, 2, &mut out).unwrap();
        assert!(out.pixels().iter().all(|&p| (i32::from(p) - 600).abs() <= 1));
    }

    #[test]
    fn test_flat_pixel_masked() {
        let mut data = linear_run(2, 2);
        for (_, image) in &mut data.bias_sweep {
            image[(1, 1)] = 100.0;
        }
        let mut cal = AreaCalibration::new(2, 2, HardwareIdentity::default());
        let report = cal.recalc(&data).unwrap();
        assert_eq!(report.bad_pixels, 1);
        assert_eq!(cal.mask()[(1, 1)], 1);
        assert_eq!(cal.cal5()[(1, 1)], Poly5::default());
        assert_eq!(cal.cal3()[(1, 1)], Poly3::default());
    }

    #[test]
    fn test_recalc_needs_enough_settings() {
        let mut data = linear_run(2, 2);
        data.bias_sweep.truncate(4);
        let mut cal = AreaCalibration::new(2, 2, HardwareIdentity::default());
        let err = cal.recalc(&data).unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::InsufficientData { required: 5, available: 4, .. }
        ));
    }

    #[test]
    fn test_apply_requires_images() {
        let mut cal = AreaCalibration::new(2, 2, HardwareIdentity::default());
        cal.recalc(&linear_run(2, 2)).unwrap();
        let mut dataset = Dataset::new();
        dataset.push(DatasetTag::new(ImageRole::Acquired), Image::filled(2, 2, 200));
        let mut out = Image::new(2, 2);
        assert!(cal.apply(&dataset, 3, &mut out).is_err());
        assert!(AreaCalibration::new(2, 2, HardwareIdentity::default())
            .apply(&dataset, 1, &mut out)
            .is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hds.cal");
        let identity = HardwareIdentity::default();

        let mut cal = AreaCalibration::new(3, 2, identity);
        cal.recalc(&linear_run(3, 2)).unwrap();
        cal.save(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), (16 + 6 * 73) as u64);

        let mut loaded = AreaCalibration::new(3, 2, identity);
        loaded.load(&path, &FixedIdentity(identity)).unwrap();
        assert_eq!(loaded.cal5(), cal.cal5());
        assert_eq!(loaded.cal3(), cal.cal3());
        assert_eq!(loaded.mask(), cal.mask());
    }

    #[test]
    fn test_load_identity_mismatch_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hds.cal");
        let identity = HardwareIdentity::default();

        let mut cal = AreaCalibration::new(2, 2, identity);
        cal.recalc(&linear_run(2, 2)).unwrap();
        cal.save(&path).unwrap();

        let other = HardwareIdentity {
            serial_number: 0xdead_beef,
            ..identity
        };
        let mut target = AreaCalibration::new(2, 2, other);
        let err = target.load(&path, &FixedIdentity(other)).unwrap_err();
        assert!(matches!(err, CalibrationError::IdentityMismatch { .. }));
        assert!(!target.is_initialised());
        assert!(target.cal5().pixels().iter().all(|c| *c == Poly5::default()));
    }
}
