//! Sensor hardware identity.
//!
//! Area-sensor calibration files start with the identity record of the
//! sensor they were computed for; loading checks it against the sensor
//! actually attached.

use super::CalibrationError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Size of the packed identity record.
pub const IDENTITY_LEN: usize = 16;

const DAY_MASK: u16 = 0xf800;
const MONTH_MASK: u16 = 0x0780;
const YEAR_MASK: u16 = 0x007f;
const BASE_YEAR: i32 = 2000;

/// Identity record stored in the sensor's EEPROM.
///
/// Packed big-endian as serial (4), date (2), type (1), rows (2), cols (2),
/// size/location nibbles (1), detector batch (2), asic batch (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareIdentity {
    pub serial_number: u32,
    /// Day (5 bits), month (4 bits), years since 2000 (7 bits).
    pub manufacturing_date: u16,
    pub sensor_type: u8,
    /// Image rows, including all ASICs.
    pub rows: u16,
    /// Image columns, including all ASICs.
    pub cols: u16,
    /// Sensor size code (4 bits).
    pub size: u8,
    /// Manufacturing location code (4 bits).
    pub location: u8,
    pub detector_batch: u16,
    pub asic_batch: u16,
}

impl Default for HardwareIdentity {
    /// Pre-production record programmed into uninitialised sensors.
    fn default() -> Self {
        Self {
            serial_number: 0x1234_5678,
            manufacturing_date: 0xdc8d,
            sensor_type: 0,
            rows: 688,
            cols: 944,
            size: 1,
            location: 0,
            detector_batch: 0,
            asic_batch: 0,
        }
    }
}

impl HardwareIdentity {
    /// Packs the record.
    pub fn to_bytes(&self) -> [u8; IDENTITY_LEN] {
        let mut buf = [0u8; IDENTITY_LEN];
        buf[0..4].copy_from_slice(&self.serial_number.to_be_bytes());
        buf[4..6].copy_from_slice(&self.manufacturing_date.to_be_bytes());
        buf[6] = self.sensor_type;
        buf[7..9].copy_from_slice(&self.rows.to_be_bytes());
        buf[9..11].copy_from_slice(&self.cols.to_be_bytes());
        buf[11] = (self.size & 0x0f) | (self.location & 0x0f) << 4;
        buf[12..14].copy_from_slice(&self.detector_batch.to_be_bytes());
        buf[14..16].copy_from_slice(&self.asic_batch.to_be_bytes());
        buf
    }

    /// Unpacks a record.
    pub fn from_bytes(buf: &[u8; IDENTITY_LEN]) -> Self {
        let be16 = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);
        Self {
            serial_number: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            manufacturing_date: be16(4),
            sensor_type: buf[6],
            rows: be16(7),
            cols: be16(9),
            size: buf[11] & 0x0f,
            location: (buf[11] & 0xf0) >> 4,
            detector_batch: be16(12),
            asic_batch: be16(14),
        }
    }

    /// Day of month field.
    pub fn day(&self) -> u32 {
        u32::from((self.manufacturing_date & DAY_MASK) >> 11)
    }

    /// Month field.
    pub fn month(&self) -> u32 {
        u32::from((self.manufacturing_date & MONTH_MASK) >> 7)
    }

    /// Full year.
    pub fn year(&self) -> i32 {
        BASE_YEAR + i32::from(self.manufacturing_date & YEAR_MASK)
    }

    /// Manufacturing date, `None` if the packed fields are not a valid date.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year(), self.month(), self.day())
    }

    /// Packs a date into the 16-bit field. Years outside 2000..=2127 cannot
    /// be represented.
    pub fn pack_date(date: NaiveDate) -> Option<u16> {
        let years = date.year() - BASE_YEAR;
        if !(0..=i32::from(YEAR_MASK)).contains(&years) {
            return None;
        }
        Some(((date.day() as u16) << 11) | ((date.month() as u16) << 7) | years as u16)
    }
}

/// Reads the identity of the attached sensor.
pub trait IdentityProvider {
    fn identity(&self) -> Result<HardwareIdentity, CalibrationError>;
}

/// Provider returning a fixed record.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedIdentity(pub HardwareIdentity);

impl IdentityProvider for FixedIdentity {
    fn identity(&self) -> Result<HardwareIdentity, CalibrationError> {
        Ok(self.0)
    }
}
