//! Sensor pipelines.
//!
//! A pipeline owns everything needed to turn a word stream into calibrated
//! images for one sensor family: the demultiplexer, the calibration engine
//! and a [`PipelineContext`] holding the configuration and the dataset.
//! Both families implement [`SensorPipeline`], so callers can drive either
//! through a `Box<dyn SensorPipeline>`.

mod intra_oral;
mod pano_ceph;

pub use intra_oral::IntraOralPipeline;
pub use pano_ceph::PanoCephPipeline;

use crate::calibration::{CalibrationError, FixedIdentity, IdentityProvider};
use crate::capture::{
    AcquisitionConfig, CalibrationConfig, ConfigError, FileConfig, SensorConfig, SensorFamily,
    StreamError, WordStream,
};
use crate::assembly::FrameAssembler;
use crate::demux::{DecodeStats, DemuxError, LineDemultiplexer, LineStatus, SyncReport};
use crate::image::{Dataset, DatasetError, Image, ImageError};
use crate::metrics::MetricsSnapshot;
use std::path::Path;
use thiserror::Error;

/// Failure classes an operator can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Corrupt framing in the word stream.
    Protocol,
    /// Reference or coefficient data that cannot be used; a new calibration
    /// run is needed.
    CalibrationData,
    /// A file or the word source could not be read or written.
    Resource,
}

/// Errors raised by a pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Demux(#[from] DemuxError),

    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("image error: {0}")]
    Image(#[from] ImageError),

    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("stream ended before a complete {0} was decoded")]
    NoData(&'static str),
}

impl PipelineError {
    /// Classifies the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Demux(DemuxError::Stream(StreamError::Io { .. })) => {
                FailureKind::Resource
            }
            PipelineError::Demux(_) | PipelineError::Dataset(_) | PipelineError::NoData(_) => {
                FailureKind::Protocol
            }
            PipelineError::Calibration(
                CalibrationError::Io { .. } | CalibrationError::Truncated { .. },
            ) => FailureKind::Resource,
            PipelineError::Calibration(_) => FailureKind::CalibrationData,
            PipelineError::Image(ImageError::Io { .. }) => FailureKind::Resource,
            PipelineError::Image(_) => FailureKind::CalibrationData,
            PipelineError::Config(ConfigError::FileReadError(_)) => FailureKind::Resource,
            PipelineError::Config(_) => FailureKind::CalibrationData,
        }
    }
}

/// State shared by every stage of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub sensor: SensorConfig,
    pub calibration: CalibrationConfig,
    pub acquisition: AcquisitionConfig,
    /// Images produced so far.
    pub dataset: Dataset,
}

impl PipelineContext {
    /// Builds a context from a validated configuration.
    pub fn new(config: FileConfig) -> Result<Self, ConfigError> {
        config.sensor.validate()?;
        config.calibration.validate()?;
        Ok(Self {
            sensor: config.sensor,
            calibration: config.calibration,
            acquisition: config.acquisition,
            dataset: Dataset::new(),
        })
    }

    /// Context with the default settings of a sensor family.
    pub fn for_family(family: SensorFamily) -> Self {
        Self {
            sensor: SensorConfig::for_family(family),
            ..Self::default()
        }
    }
}

/// Summary of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionReport {
    /// Lines stored in the acquired images.
    pub lines: usize,
    /// Images added to the dataset.
    pub images: usize,
    pub sync: Option<SyncReport>,
    /// Decode counters since the pipeline was created.
    pub stats: DecodeStats,
    pub half_index: Option<usize>,
}

/// Operations common to every sensor family.
pub trait SensorPipeline {
    fn family(&self) -> SensorFamily;

    fn context(&self) -> &PipelineContext;

    fn context_mut(&mut self) -> &mut PipelineContext;

    /// Decodes the stream into `Acquired` dataset entries.
    fn acquire(&mut self, stream: &mut dyn WordStream) -> Result<AcquisitionReport, PipelineError>;

    /// Turns the acquired images into a calibrated `Output` entry and
    /// returns a copy of it.
    fn process(&mut self) -> Result<Image<u16>, PipelineError>;

    /// Writes the current calibration coefficients.
    fn save_calibration(&self, path: &Path) -> Result<(), PipelineError>;

    /// Replaces the calibration coefficients with a saved set.
    fn load_calibration(&mut self, path: &Path) -> Result<(), PipelineError>;

    /// Current metrics figures.
    fn snapshot(&self) -> MetricsSnapshot;

    fn dataset(&self) -> &Dataset {
        &self.context().dataset
    }
}

/// Builds the pipeline for the context's sensor family. Area sensors get
/// `identity` as the source of the attached sensor's identity.
pub fn for_context(
    context: PipelineContext,
    identity: Option<Box<dyn IdentityProvider + Send>>,
) -> Result<Box<dyn SensorPipeline + Send>, PipelineError> {
    if context.sensor.family.is_line_sensor() {
        Ok(Box::new(PanoCephPipeline::new(context)?))
    } else {
        let identity = identity.unwrap_or_else(|| Box::new(FixedIdentity::default()));
        Ok(Box::new(IntraOralPipeline::new(context, identity)?))
    }
}

/// Decodes lines into an assembler until `limit` lines are stored (0 for
/// no limit) or the stream ends. The flag is true if the stream ended.
fn collect_lines(
    demux: &mut dyn LineDemultiplexer,
    stream: &mut dyn WordStream,
    limit: usize,
) -> Result<(FrameAssembler, bool), PipelineError> {
    let mut assembler = FrameAssembler::with_capacity(demux.line_length(), limit);
    while limit == 0 || assembler.len() < limit {
        let outcome = demux.next_line(stream)?;
        if outcome.status == LineStatus::EndOfData {
            return Ok((assembler, true));
        }
        if let Some(half_index) = outcome.half_index {
            tracing::info!(half_index, line = ?outcome.line_index, "half marker detected");
        }
        if outcome.has_line() {
            assembler.push_line(demux.line())?;
        }
    }
    Ok((assembler, false))
}
