//! Sensor input and configuration.
//!
//! The USB transport is external; the core sees the sensor only as a
//! [`WordStream`] of 16-bit tagged words. [`MockSensor`] stands in for
//! the hardware in tests and simulations.

mod config;
mod mock;
mod stream;

pub use config::{
    AcquisitionConfig, CalibrationConfig, ConfigError, FileConfig, OutputConfig, SensorConfig,
    SensorFamily, MAX_CHIP_HEIGHT,
};
pub use mock::MockSensor;
pub use stream::{ChannelStream, StreamError, VecStream, WordStream};
