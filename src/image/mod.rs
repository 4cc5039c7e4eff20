//! Image buffers and datasets.
//!
//! Every stage of the pipeline exchanges [`Image`]s: the frame assembler
//! produces them, the calibration engines consume and produce them, and a
//! [`Dataset`] keeps the images that belong to one acquisition together.

mod buffer;
mod dataset;
pub mod raw;

pub use buffer::{Image, Roi};
pub use dataset::{Dataset, DatasetTag, ImageRole};

use thiserror::Error;

/// Largest value a calibrated output pixel may take.
pub const MAX_PIXEL_VALUE: u16 = u16::MAX;

/// Errors raised by image construction and raw file I/O.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("pixel buffer holds {actual} samples, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("region of interest {roi:?} does not fit a {width}x{height} image")]
    RoiOutOfBounds { roi: Roi, width: usize, height: usize },
    #[error("image dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("raw data of {bytes} bytes is not a whole number of {width}-pixel rows")]
    RawSize { bytes: usize, width: usize },
    #[error("raw image file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by dataset bookkeeping.
#[derive(Debug, Clone, Error)]
pub enum DatasetError {
    #[error("dataset is empty")]
    Empty,
    #[error("unexpected dataset entry: expected {expected:?}, found {found:?}")]
    UnexpectedRole { expected: ImageRole, found: ImageRole },
}
