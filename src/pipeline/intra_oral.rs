//! Pipeline for the HDS intra-oral area sensors.

use super::{collect_lines, AcquisitionReport, PipelineContext, PipelineError, SensorPipeline};
use crate::calibration::{
    average_frames, AreaCalibration, AreaCalibrationData, AreaFitReport, CalibrationError,
    IdentityProvider,
};
use crate::capture::{SensorFamily, WordStream};
use crate::demux::{self, LineDemultiplexer};
use crate::image::{DatasetError, DatasetTag, Image, ImageRole};
use crate::metrics::MetricsSnapshot;
use std::path::Path;
use tracing::{debug, info, warn};

/// HDS acquisition: a dataset of fixed-size frames averaged through the
/// per-pixel calibration curves.
pub struct IntraOralPipeline {
    context: PipelineContext,
    demux: Box<dyn LineDemultiplexer + Send>,
    calibration: AreaCalibration,
    identity: Box<dyn IdentityProvider + Send>,
    last_fit: Option<AreaFitReport>,
    images: u64,
}

impl IntraOralPipeline {
    /// Creates the pipeline for the sensor reported by `identity`, loading
    /// the configured coefficient file if any.
    pub fn new(
        context: PipelineContext,
        identity: Box<dyn IdentityProvider + Send>,
    ) -> Result<Self, PipelineError> {
        context.sensor.validate()?;
        let sensor = &context.sensor;
        if sensor.family.is_line_sensor() {
            return Err(CalibrationError::UnsupportedSensor(sensor.family).into());
        }
        let demux = demux::for_sensor(sensor)?;
        let attached = identity.identity()?;
        let mut calibration =
            AreaCalibration::new(sensor.out_width, sensor.line_length(), attached);
        if let Some(path) = &context.calibration.coefficient_file {
            calibration.load(path, identity.as_ref())?;
        }
        info!(
            family = ?sensor.family,
            serial = attached.serial_number,
            width = sensor.out_width,
            height = sensor.line_length(),
            "area pipeline ready"
        );
        Ok(Self {
            context,
            demux,
            calibration,
            identity,
            last_fit: None,
            images: 0,
        })
    }

    pub fn calibration(&self) -> &AreaCalibration {
        &self.calibration
    }

    /// Fits new calibration curves.
    pub fn recalc(&mut self, data: &AreaCalibrationData) -> Result<AreaFitReport, PipelineError> {
        let report = self.calibration.recalc(data)?;
        self.last_fit = Some(report.clone());
        Ok(report)
    }

    /// Replaces the dark frame taken with the last dataset by the average of
    /// repeated dark captures.
    pub fn set_dark_frames(&mut self, frames: &[Image<u16>]) -> Result<(), PipelineError> {
        let dark = average_frames(frames)?;
        self.calibration.set_dark(dark)?;
        Ok(())
    }
}

impl SensorPipeline for IntraOralPipeline {
    fn family(&self) -> SensorFamily {
        self.context.sensor.family
    }

    fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.context
    }

    /// Decodes one dataset: a leading dark frame followed by up to
    /// `dataset_size` bright frames. The dark frame replaces the one used by
    /// [`process`](SensorPipeline::process) and the bright frames replace the
    /// previous dataset.
    fn acquire(&mut self, stream: &mut dyn WordStream) -> Result<AcquisitionReport, PipelineError> {
        self.demux.reset_scan();
        let sync = if self.context.acquisition.sync {
            Some(self.demux.sync(stream, self.context.sensor.skip_lines)?)
        } else {
            None
        };

        let frame_lines = self.context.sensor.out_width;
        let (mut dark, mut ended) = collect_lines(self.demux.as_mut(), stream, frame_lines)?;
        if dark.len() < frame_lines {
            warn!(lines = dark.len(), expected = frame_lines, "incomplete dark frame");
            return Err(PipelineError::NoData("dark frame"));
        }
        let dark = dark.finish();

        let mut frames = Vec::with_capacity(self.context.sensor.dataset_size);
        while !ended && frames.len() < self.context.sensor.dataset_size {
            let (mut assembler, end) = collect_lines(self.demux.as_mut(), stream, frame_lines)?;
            if assembler.len() == frame_lines {
                frames.push(assembler.finish());
            } else if !assembler.is_empty() {
                warn!(lines = assembler.len(), expected = frame_lines, "partial frame dropped");
            }
            ended = end;
        }
        if frames.is_empty() {
            return Err(PipelineError::NoData("frame"));
        }

        self.calibration.set_dark(average_frames([&dark])?)?;
        let replaced = self.context.dataset.remove_role(ImageRole::Acquired);
        if replaced > 0 {
            debug!(replaced, "previous dataset replaced");
        }
        let images = frames.len();
        for frame in frames {
            self.context
                .dataset
                .push(DatasetTag::new(ImageRole::Acquired), frame);
        }
        self.images += images as u64;
        info!(images, "dataset acquired");

        Ok(AcquisitionReport {
            lines: (images + 1) * frame_lines,
            images,
            sync,
            stats: *self.demux.stats(),
            half_index: None,
        })
    }

    fn process(&mut self) -> Result<Image<u16>, PipelineError> {
        let available = self.context.dataset.with_role(ImageRole::Acquired).count();
        if available == 0 {
            return Err(DatasetError::Empty.into());
        }
        let num_images = available.min(self.context.sensor.dataset_size);
        let mut output = Image::new(self.calibration.width(), self.calibration.height());
        self.calibration
            .apply(&self.context.dataset, num_images, &mut output)?;
        self.context
            .dataset
            .push(DatasetTag::new(ImageRole::Output), output.clone());
        info!(num_images, "frames calibrated");
        Ok(output)
    }

    fn save_calibration(&self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.calibration.save(path)?)
    }

    fn load_calibration(&mut self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.calibration.load(path, self.identity.as_ref())?)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decode: *self.demux.stats(),
            half_index: None,
            images_acquired: self.images,
            mean_signal: self
                .last_fit
                .as_ref()
                .and_then(|fit| fit.filter_targets.last().copied()),
            rejected_rows: None,
            bad_pixels: Some(self.calibration.bad_pixel_count() as u64),
        }
    }
}
