//! Demultiplexer for the single-chip intra-oral sensors.

use super::framing::{fill_line, finish_line, skip_headers, sync_stream, FillOrder, LineBuffer};
use super::{
    Chip, DecodeStats, DemuxError, LineDemultiplexer, LineOutcome, SyncReport, CHIP_SAMPLE_MASK,
};
use crate::capture::WordStream;

/// Decodes header/EOL-framed lines of untagged 12-bit samples.
///
/// There is no chip dispatch and no half marker; otherwise the framing
/// and terminal conditions match [`MultiChipDemux`](super::MultiChipDemux).
#[derive(Debug, Clone)]
pub struct SingleChipDemux {
    buffer: LineBuffer,
    line_index: Option<u16>,
    first_index: u16,
    stats: DecodeStats,
}

impl SingleChipDemux {
    pub fn new(line_length: usize) -> Self {
        Self {
            buffer: LineBuffer::new(line_length, vec![FillOrder::Forward]),
            line_index: None,
            first_index: 0,
            stats: DecodeStats::default(),
        }
    }

    /// Line index latched by the last synchronisation.
    pub fn first_line_index(&self) -> u16 {
        self.first_index
    }
}

impl LineDemultiplexer for SingleChipDemux {
    fn next_line(&mut self, stream: &mut dyn WordStream) -> Result<LineOutcome, DemuxError> {
        self.buffer.reset()?;

        let outcome = match skip_headers(stream)? {
            None => LineOutcome::end_of_data(self.line_index),
            Some(header) => {
                if header.line_index.is_some() {
                    self.line_index = header.line_index;
                }
                let fill = fill_line(stream, &mut self.buffer, CHIP_SAMPLE_MASK, false)?;
                LineOutcome {
                    status: finish_line(stream, &self.buffer, fill)?,
                    line_index: self.line_index,
                    half_index: None,
                }
            }
        };
        self.stats.record(&outcome);
        Ok(outcome)
    }

    fn line(&self) -> &[u16] {
        self.buffer.samples()
    }

    fn chip_line(&self, chip: Chip) -> Option<&[u16]> {
        (chip == Chip::A).then(|| self.buffer.chip(0))
    }

    fn line_length(&self) -> usize {
        self.buffer.chip_len()
    }

    fn sync(
        &mut self,
        stream: &mut dyn WordStream,
        skip_lines: usize,
    ) -> Result<SyncReport, DemuxError> {
        let report = sync_stream(stream, self.line_length(), skip_lines)?;
        self.first_index = report.first_line_index;
        Ok(report)
    }

    fn half_index(&self) -> Option<usize> {
        None
    }

    fn reset_scan(&mut self) {
        self.line_index = None;
        self.first_index = 0;
    }

    fn stats(&self) -> &DecodeStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockSensor, SensorConfig, SensorFamily, VecStream};
    use crate::demux::{LineStatus, TaggedWord};

    fn config(line_length: usize) -> SensorConfig {
        SensorConfig {
            chip_height: line_length,
            ..SensorConfig::for_family(SensorFamily::Hds15)
        }
    }

    #[test]
    fn test_exact_line_is_ok() {
        let mut words = vec![TaggedWord::header(3, false).raw()];
        words.extend(1..=6u16);
        words.push(TaggedWord::end_of_line(3).raw());
        words.push(TaggedWord::header(4, false).raw());

        let mut demux = SingleChipDemux::new(6);
        let outcome = demux.next_line(&mut VecStream::new(words)).unwrap();

        assert_eq!(outcome.status, LineStatus::Ok);
        assert_eq!(outcome.line_index, Some(3));
        assert_eq!(demux.line(), &[1, 2, 3, 4, 5, 6]);
        assert!(demux.chip_line(Chip::B).is_none());
    }

    #[test]
    fn test_samples_masked_to_twelve_bits() {
        let words = vec![
            TaggedWord::header(0, false).raw(),
            0x1fff,
            TaggedWord::end_of_line(0).raw(),
        ];
        let mut demux = SingleChipDemux::new(1);
        demux.next_line(&mut VecStream::new(words)).unwrap();
        assert_eq!(demux.line(), &[0x0fff]);
    }

    #[test]
    fn test_frame_decode_with_errors() {
        let mut sensor = MockSensor::new(&config(16), 21);
        let mut words = sensor.line();
        words.extend(sensor.short_line(9));
        words.extend(sensor.long_line(4));
        words.extend(sensor.line());
        let mut stream = VecStream::new(words);
        let mut demux = SingleChipDemux::new(16);

        let statuses: Vec<LineStatus> = std::iter::from_fn(|| {
            let outcome = demux.next_line(&mut stream).unwrap();
            (outcome.status != LineStatus::EndOfData).then_some(outcome.status)
        })
        .collect();

        assert_eq!(
            statuses,
            vec![
                LineStatus::Ok,
                LineStatus::Short { received: 9 },
                LineStatus::LongRecovered,
                LineStatus::Ok,
            ]
        );
        assert_eq!(demux.stats().ok, 2);
        assert_eq!(demux.stats().short, 1);
        assert_eq!(demux.stats().long, 1);
    }

    #[test]
    fn test_sync_skips_partial_first_line() {
        let mut sensor = MockSensor::new(&config(8), 2).with_first_index(100);
        let mut words = sensor.short_line(3);
        words.extend(sensor.frame(3));
        let mut stream = VecStream::new(words);
        let mut demux = SingleChipDemux::new(8);

        let report = demux.sync(&mut stream, 0).unwrap();
        assert_eq!(report.rejected_lines, 1);
        assert_eq!(report.first_line_index, 102);
        assert_eq!(demux.first_line_index(), 102);

        let outcome = demux.next_line(&mut stream).unwrap();
        assert_eq!(outcome.line_index, Some(102));
        assert_eq!(outcome.status, LineStatus::Ok);
    }
}
