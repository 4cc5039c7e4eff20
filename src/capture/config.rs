//! Sensor, calibration and acquisition configuration.
//!
//! Geometry defaults follow the device tables of each sensor family.
//! Pano and ceph sensors run three 768-row chips in 2x2 binning; the
//! intra-oral HDS sensors are single-chip area sensors read out as lines.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest chip height the line sensors support (no vertical binning).
pub const MAX_CHIP_HEIGHT: usize = 1536;

/// Sensor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorFamily {
    /// Panoramic line sensor. Chip A carries no data in pano mode.
    Pano,
    /// Cephalometric line sensor.
    Ceph,
    /// HDS 1.5 intra-oral sensor.
    Hds15,
    /// HDS 2.0 intra-oral sensor.
    Hds20,
}

impl SensorFamily {
    /// Returns true for the tiled multi-chip line sensors.
    pub fn is_line_sensor(self) -> bool {
        matches!(self, SensorFamily::Pano | SensorFamily::Ceph)
    }
}

/// Geometry and framing of the attached sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor family.
    pub family: SensorFamily,
    /// Rows per chip (samples per chip per line).
    pub chip_height: usize,
    /// Number of tiled chips (1..=3).
    pub num_chips: usize,
    /// Output width: centred crop width for pano/ceph, lines per frame for HDS.
    pub out_width: usize,
    /// Frames per dataset (HDS averaging).
    pub dataset_size: usize,
    /// Lines skipped after synchronisation; the first lines of a TDI scan saturate.
    pub skip_lines: usize,
    /// Reverse chip C when transposing raw line files.
    pub invert_c: bool,
    /// Sensor is binned 2x horizontally.
    pub horizontal_binning: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::for_family(SensorFamily::Pano)
    }
}

impl SensorConfig {
    /// Default configuration for a sensor family.
    pub fn for_family(family: SensorFamily) -> Self {
        match family {
            SensorFamily::Pano | SensorFamily::Ceph => Self {
                family,
                chip_height: 768,
                num_chips: 3,
                out_width: if family == SensorFamily::Pano { 2880 } else { 2500 },
                dataset_size: 1,
                skip_lines: 160,
                invert_c: true,
                horizontal_binning: true,
            },
            SensorFamily::Hds15 => Self {
                family,
                chip_height: 342,
                num_chips: 1,
                out_width: 471,
                dataset_size: 10,
                skip_lines: 0,
                invert_c: false,
                horizontal_binning: false,
            },
            SensorFamily::Hds20 => Self {
                family,
                chip_height: 828,
                num_chips: 1,
                out_width: 1028,
                dataset_size: 4,
                skip_lines: 0,
                invert_c: false,
                horizontal_binning: false,
            },
        }
    }

    /// Samples per decoded line across all chips.
    #[inline]
    pub fn line_length(&self) -> usize {
        self.chip_height * self.num_chips
    }

    /// Half index assumed when the scan never reports a half marker.
    pub fn default_half_index(&self) -> usize {
        self.out_width / 2
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chip_height == 0 || self.chip_height > MAX_CHIP_HEIGHT || self.out_width == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if !(1..=3).contains(&self.num_chips) {
            return Err(ConfigError::InvalidChipCount(self.num_chips));
        }
        if !self.family.is_line_sensor() && self.num_chips != 1 {
            return Err(ConfigError::InvalidChipCount(self.num_chips));
        }
        if self.dataset_size == 0 {
            return Err(ConfigError::InvalidDatasetSize);
        }
        Ok(())
    }
}

/// Flat-field calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Output bias added after gain correction.
    pub pedestal: f64,
    /// Gains above this value are rejected.
    pub max_coef: f64,
    /// Smooth the dark/bright row means before deriving gains.
    pub smooth: bool,
    /// Half-width of the smoothing window in rows.
    pub smooth_span: usize,
    /// Level the chips without flat-fielding (raw value plus pedestal).
    pub dark_only: bool,
    /// Coefficient file loaded at start-up.
    pub coefficient_file: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pedestal: 1000.0,
            max_coef: 4.0,
            smooth: false,
            smooth_span: 5,
            dark_only: false,
            coefficient_file: None,
        }
    }
}

impl CalibrationConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_coef.is_nan() || self.max_coef <= 0.0 || !self.pedestal.is_finite() {
            return Err(ConfigError::InvalidCalibration);
        }
        if self.smooth && self.smooth_span == 0 {
            return Err(ConfigError::InvalidCalibration);
        }
        Ok(())
    }
}

/// Acquisition run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Synchronise on the stream before decoding.
    pub sync: bool,
    /// Maximum number of lines decoded per image (0 = until end of data).
    pub max_lines: usize,
    /// Crop pano/ceph images around the half index.
    pub centre: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sync: true,
            max_lines: 0,
            centre: true,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Exporter port of `xray-acq serve` (0 picks a free port).
    pub metrics_port: u16,
    /// Directory `xray-acq serve` writes decoded images to.
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid sensor dimensions")]
    InvalidDimensions,
    #[error("unsupported number of chips: {0}")]
    InvalidChipCount(usize),
    #[error("dataset size must be at least 1")]
    InvalidDatasetSize,
    #[error("invalid calibration settings")]
    InvalidCalibration,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.sensor.validate()?;
        config.calibration.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_valid() {
        for family in [
            SensorFamily::Pano,
            SensorFamily::Ceph,
            SensorFamily::Hds15,
            SensorFamily::Hds20,
        ] {
            assert!(SensorConfig::for_family(family).validate().is_ok());
        }
        assert!(CalibrationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_family_defaults() {
        let pano = SensorConfig::for_family(SensorFamily::Pano);
        assert_eq!(pano.line_length(), 2304);
        assert_eq!(pano.default_half_index(), 1440);

        let ceph = SensorConfig::for_family(SensorFamily::Ceph);
        assert_eq!(ceph.out_width, 2500);

        let hds = SensorConfig::for_family(SensorFamily::Hds20);
        assert_eq!(hds.line_length(), 828);
        assert_eq!(hds.dataset_size, 4);
    }

    #[test]
    fn test_invalid_chip_counts() {
        let mut config = SensorConfig::default();
        config.num_chips = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChipCount(4))
        ));

        let mut hds = SensorConfig::for_family(SensorFamily::Hds15);
        hds.num_chips = 2;
        assert!(matches!(hds.validate(), Err(ConfigError::InvalidChipCount(2))));
    }

    #[test]
    fn test_zero_dimensions_invalid() {
        let mut config = SensorConfig::default();
        config.chip_height = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions)
        ));
    }

    #[test]
    fn test_parse_partial_file() {
        let config = FileConfig::from_toml(
            r#"
            [sensor]
            family = "ceph"
            chip_height = 4
            num_chips = 2
            out_width = 16
            dataset_size = 1
            skip_lines = 0
            invert_c = false
            horizontal_binning = true

            [calibration]
            pedestal = 500.0
            max_coef = 4.0
            smooth = true
            smooth_span = 5
            dark_only = false
            "#,
        )
        .unwrap();

        assert_eq!(config.sensor.family, SensorFamily::Ceph);
        assert_eq!(config.sensor.line_length(), 8);
        assert_eq!(config.calibration.pedestal, 500.0);
        assert!(config.calibration.coefficient_file.is_none());
        assert_eq!(config.output.metrics_port, 9090);
    }

    #[test]
    fn test_parse_rejects_invalid_sensor() {
        let result = FileConfig::from_toml(
            r#"
            [sensor]
            family = "hds15"
            chip_height = 342
            num_chips = 3
            out_width = 471
            dataset_size = 10
            skip_lines = 0
            invert_c = false
            horizontal_binning = false
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidChipCount(3))));
    }
}
