//! X-ray Sensor Acquisition Library
//!
//! Decodes the tagged word stream of TDI X-ray line sensors (panoramic and
//! cephalometric, up to three tiled chips) and HDS intra-oral area sensors
//! into images, and flat-field calibrates them.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! capture (WordStream) → demux → assembly → calibration → image::Dataset
//!                          ↓                     ↓
//!                      metrics (decode quality, calibration figures)
//! ```
//!
//! [`pipeline`] wires the stages together per sensor family.
//!
//! # Design Principles
//!
//! - **Status, not exceptions**: short lines, long lines and end of data are
//!   [`demux::LineStatus`] values; only corrupt framing is an error
//! - **Owned buffers**: line buffers are bounds checked and reset on every line
//! - **Explicit context**: configuration and dataset live in a
//!   [`pipeline::PipelineContext`] owned by the caller
//! - **Identity-bound calibration**: area calibration files only load on the
//!   sensor they were computed for
//!
//! # Example
//!
//! ```no_run
//! use xray_acquisition::{
//!     capture::{MockSensor, SensorConfig, SensorFamily, VecStream},
//!     image::Image,
//!     pipeline::{PanoCephPipeline, PipelineContext, SensorPipeline},
//! };
//!
//! let context = PipelineContext::for_family(SensorFamily::Ceph);
//! let mut sensor = MockSensor::new(&context.sensor, 42);
//! let mut stream = VecStream::new(sensor.frame(3000));
//!
//! let mut pipeline = PanoCephPipeline::new(context).unwrap();
//! pipeline.acquire(&mut stream).unwrap();
//!
//! let rows = SensorConfig::for_family(SensorFamily::Ceph).line_length();
//! pipeline
//!     .recalc(&Image::filled(2999, rows, 100), &Image::filled(2999, rows, 3000))
//!     .unwrap();
//! let calibrated = pipeline.process().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod assembly;
pub mod calibration;
pub mod capture;
pub mod demux;
pub mod image;
pub mod metrics;
pub mod pipeline;

// Re-export commonly used types at crate root
pub use calibration::{AreaCalibration, CalibrationError, HardwareIdentity, LineCalibration};
pub use capture::{FileConfig, MockSensor, SensorConfig, SensorFamily, VecStream, WordStream};
pub use demux::{DemuxError, LineDemultiplexer, LineOutcome, LineStatus};
pub use image::{Dataset, Image, ImageRole};
pub use pipeline::{FailureKind, PipelineContext, PipelineError, SensorPipeline};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
