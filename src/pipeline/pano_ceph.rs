//! Pipeline for the rotational line-scan sensors.

use super::{collect_lines, AcquisitionReport, PipelineContext, PipelineError, SensorPipeline};
use crate::assembly::centre;
use crate::calibration::{
    select_bright, BrightWindows, CalibrationError, LineCalibration, RecalcSummary,
};
use crate::capture::{SensorFamily, WordStream};
use crate::demux::{self, LineDemultiplexer};
use crate::image::{DatasetError, DatasetTag, Image, ImageRole};
use crate::metrics::MetricsSnapshot;
use std::path::Path;
use tracing::{debug, info};

/// Pano/ceph acquisition: sync, decode one scan, centre it on the half
/// index and flat-field it.
pub struct PanoCephPipeline {
    context: PipelineContext,
    demux: Box<dyn LineDemultiplexer + Send>,
    calibration: LineCalibration,
    last_recalc: Option<RecalcSummary>,
    images: u64,
}

impl PanoCephPipeline {
    /// Creates the pipeline, loading the configured coefficient file if any.
    pub fn new(context: PipelineContext) -> Result<Self, PipelineError> {
        context.sensor.validate()?;
        let sensor = &context.sensor;
        if !sensor.family.is_line_sensor() {
            return Err(CalibrationError::UnsupportedSensor(sensor.family).into());
        }
        let demux = demux::for_sensor(sensor)?;
        let mut calibration = LineCalibration::new(
            sensor.chip_height,
            sensor.num_chips,
            sensor.family,
            &context.calibration,
        )?;
        if let Some(path) = &context.calibration.coefficient_file {
            calibration.load(path)?;
        }
        info!(
            family = ?sensor.family,
            chip_height = sensor.chip_height,
            num_chips = sensor.num_chips,
            "line-scan pipeline ready"
        );
        Ok(Self {
            context,
            demux,
            calibration,
            last_recalc: None,
            images: 0,
        })
    }

    pub fn calibration(&self) -> &LineCalibration {
        &self.calibration
    }

    /// Recomputes the coefficients from a dark and a bright scan.
    ///
    /// The bright scan is first reduced to its flat columns; if none are
    /// found inside the extraction windows the whole scan is used.
    pub fn recalc(
        &mut self,
        dark: &Image<u16>,
        bright: &Image<u16>,
    ) -> Result<RecalcSummary, PipelineError> {
        let sensor = &self.context.sensor;
        let selected = BrightWindows::for_sensor(sensor.family, sensor.horizontal_binning)
            .map(|windows| select_bright(bright, sensor.chip_height, &windows))
            .filter(|image| image.width() > 0);
        let bright = match &selected {
            Some(image) => {
                debug!(columns = image.width(), "using selected bright columns");
                image
            }
            None => bright,
        };
        let summary = self.calibration.recalc(dark, bright)?;
        self.last_recalc = Some(summary);
        Ok(summary)
    }
}

impl SensorPipeline for PanoCephPipeline {
    fn family(&self) -> SensorFamily {
        self.context.sensor.family
    }

    fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.context
    }

    fn acquire(&mut self, stream: &mut dyn WordStream) -> Result<AcquisitionReport, PipelineError> {
        self.demux.reset_scan();
        let sync = if self.context.acquisition.sync {
            Some(self.demux.sync(stream, self.context.sensor.skip_lines)?)
        } else {
            None
        };

        let (mut assembler, _) =
            collect_lines(self.demux.as_mut(), stream, self.context.acquisition.max_lines)?;
        if assembler.is_empty() {
            return Err(PipelineError::NoData("line"));
        }
        let lines = assembler.len();
        let half_index = self.demux.half_index();
        self.context.dataset.push(
            DatasetTag {
                role: ImageRole::Acquired,
                half_index,
            },
            assembler.finish(),
        );
        self.images += 1;
        info!(lines, ?half_index, "scan acquired");

        Ok(AcquisitionReport {
            lines,
            images: 1,
            sync,
            stats: *self.demux.stats(),
            half_index,
        })
    }

    fn process(&mut self) -> Result<Image<u16>, PipelineError> {
        let sensor = &self.context.sensor;
        let (tag, acquired) = self
            .context
            .dataset
            .with_role(ImageRole::Acquired)
            .last()
            .ok_or(DatasetError::Empty)?;
        let half_index = tag.half_index.unwrap_or_else(|| sensor.default_half_index());

        let centred = if self.context.acquisition.centre {
            centre(acquired, half_index, sensor.out_width)
        } else {
            acquired.clone()
        };
        let mut output = Image::new(centred.width(), centred.height());
        let offsets = self.calibration.apply(&centred, &mut output)?;
        debug!(ab = ?offsets.ab, bc = ?offsets.bc, "seam offsets");

        let dataset = &mut self.context.dataset;
        dataset.push(
            DatasetTag::with_half_index(ImageRole::Centred, half_index),
            centred,
        );
        dataset.push(
            DatasetTag::with_half_index(ImageRole::Output, half_index),
            output.clone(),
        );
        info!(
            width = output.width(),
            height = output.height(),
            half_index,
            "scan calibrated"
        );
        Ok(output)
    }

    fn save_calibration(&self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.calibration.save(path)?)
    }

    fn load_calibration(&mut self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.calibration.load(path)?)
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decode: *self.demux.stats(),
            half_index: self.demux.half_index(),
            images_acquired: self.images,
            mean_signal: self.last_recalc.map(|s| s.mean_signal),
            rejected_rows: self.last_recalc.map(|s| s.rejected_rows as u64),
            bad_pixels: None,
        }
    }
}
