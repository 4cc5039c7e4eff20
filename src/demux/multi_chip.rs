//! Demultiplexer for the tiled pano/ceph line sensors.

use super::framing::{
    fill_line, finish_line, move_word, skip_headers, sync_stream, Fill, FillOrder, HalfTracker,
    LineBuffer,
};
use super::{
    Chip, DecodeStats, DemuxError, LineDemultiplexer, LineOutcome, LineStatus, SyncReport,
    TaggedWord, CHIP_SAMPLE_MASK, WIDE_SAMPLE_MASK,
};
use crate::capture::WordStream;

/// Decodes lines from one to three interleaved chips.
///
/// With more than one chip every data word carries a chip tag and the
/// stream cycles A, B, C. Chip C is mounted inverted, so its buffer is
/// filled back to front.
#[derive(Debug, Clone)]
pub struct MultiChipDemux {
    buffer: LineBuffer,
    mask: u16,
    half: HalfTracker,
    line_index: Option<u16>,
    stats: DecodeStats,
}

impl MultiChipDemux {
    /// Creates a demultiplexer for `num_chips` chips of `chip_height` samples.
    pub fn new(chip_height: usize, num_chips: usize) -> Result<Self, DemuxError> {
        if !(1..=3).contains(&num_chips) {
            return Err(DemuxError::UnsupportedChipCount(num_chips));
        }
        let orders = Chip::ALL[..num_chips]
            .iter()
            .map(|&chip| {
                if chip == Chip::C {
                    FillOrder::Reverse
                } else {
                    FillOrder::Forward
                }
            })
            .collect();
        let mask = if num_chips == 1 {
            WIDE_SAMPLE_MASK
        } else {
            CHIP_SAMPLE_MASK
        };
        Ok(Self {
            buffer: LineBuffer::new(chip_height, orders),
            mask,
            half: HalfTracker::new(chip_height),
            line_index: None,
            stats: DecodeStats::default(),
        })
    }

    /// Number of chips decoded per line.
    pub fn num_chips(&self) -> usize {
        self.buffer.chips()
    }

    /// Line index latched by the last synchronisation.
    pub fn first_line_index(&self) -> u16 {
        self.half.first_index()
    }

    fn record(&mut self, outcome: LineOutcome) -> LineOutcome {
        self.stats.record(&outcome);
        outcome
    }

    /// Realigns the chip cursors when a line does not start on chip A.
    fn align(&mut self, stream: &mut dyn WordStream) -> Result<Option<Fill>, DemuxError> {
        let chips = self.buffer.chips();
        if chips == 1 {
            return Ok(None);
        }
        let word = match stream.peek()? {
            Some(word) => TaggedWord(word),
            None => return Ok(Some(Fill::EndOfData)),
        };
        let catch_up: &[Chip] = match (chips, word.chip()) {
            (_, Some(Chip::A)) => &[],
            (3, Some(Chip::B)) => &[Chip::B, Chip::C],
            (3, Some(Chip::C)) => &[Chip::C],
            (2, Some(Chip::B)) => &[Chip::B],
            _ => {
                return Err(DemuxError::UnknownChipTag {
                    word: word.raw(),
                    position: stream.position(),
                })
            }
        };
        for chip in catch_up {
            if let Some(fill) = move_word(stream, &mut self.buffer, chip.index(), self.mask, true)? {
                return Ok(Some(fill));
            }
        }
        Ok(None)
    }
}

impl LineDemultiplexer for MultiChipDemux {
    fn next_line(&mut self, stream: &mut dyn WordStream) -> Result<LineOutcome, DemuxError> {
        self.buffer.reset()?;

        let header = match skip_headers(stream)? {
            Some(header) => header,
            None => return Ok(self.record(LineOutcome::end_of_data(self.line_index))),
        };
        let mut half_index = None;
        if let Some(index) = header.line_index {
            self.line_index = Some(index);
            if header.half {
                half_index = self.half.observe(index);
                if let Some(half) = half_index {
                    tracing::debug!(line = index, half, "half marker found");
                }
            }
        }

        let tagged = self.buffer.chips() > 1;
        let fill = match self.align(stream)? {
            Some(fill) => fill,
            None => fill_line(stream, &mut self.buffer, self.mask, tagged)?,
        };
        let status = finish_line(stream, &self.buffer, fill)?;

        Ok(self.record(LineOutcome {
            status,
            line_index: self.line_index,
            half_index,
        }))
    }

    fn line(&self) -> &[u16] {
        self.buffer.samples()
    }

    fn chip_line(&self, chip: Chip) -> Option<&[u16]> {
        (chip.index() < self.buffer.chips()).then(|| self.buffer.chip(chip.index()))
    }

    fn line_length(&self) -> usize {
        self.buffer.chip_len() * self.buffer.chips()
    }

    fn sync(
        &mut self,
        stream: &mut dyn WordStream,
        skip_lines: usize,
    ) -> Result<SyncReport, DemuxError> {
        let report = sync_stream(stream, self.line_length(), skip_lines)?;
        self.half = HalfTracker::new(self.buffer.chip_len());
        self.half.set_first_index(report.first_line_index);
        Ok(report)
    }

    fn half_index(&self) -> Option<usize> {
        self.half.half_index()
    }

    fn reset_scan(&mut self) {
        self.half = HalfTracker::new(self.buffer.chip_len());
        self.line_index = None;
    }

    fn stats(&self) -> &DecodeStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockSensor, SensorConfig, SensorFamily, VecStream};

    fn config(chip_height: usize, num_chips: usize) -> SensorConfig {
        SensorConfig {
            chip_height,
            num_chips,
            ..SensorConfig::for_family(SensorFamily::Pano)
        }
    }

    #[test]
    fn test_three_chip_line() {
        let mut sensor = MockSensor::new(&config(4, 3), 7);
        let samples = sensor.sample_line();
        let mut stream = VecStream::new(sensor.encode_line(&samples));
        let mut demux = MultiChipDemux::new(4, 3).unwrap();

        let outcome = demux.next_line(&mut stream).unwrap();
        assert_eq!(outcome.status, LineStatus::Ok);
        assert_eq!(outcome.line_index, Some(0));
        assert_eq!(demux.chip_line(Chip::A).unwrap(), samples[0].as_slice());
        assert_eq!(demux.chip_line(Chip::B).unwrap(), samples[1].as_slice());
        assert_eq!(demux.chip_line(Chip::C).unwrap(), samples[2].as_slice());

        let end = demux.next_line(&mut stream).unwrap();
        assert_eq!(end.status, LineStatus::EndOfData);
        assert_eq!(demux.stats().ok, 1);
        assert_eq!(demux.stats().end_of_data, 1);
    }

    #[test]
    fn test_chip_c_filled_in_reverse() {
        let words = vec![
            TaggedWord::header(0, false).raw(),
            TaggedWord::data(Chip::A, 1).raw(),
            TaggedWord::data(Chip::B, 2).raw(),
            TaggedWord::data(Chip::C, 3).raw(),
            TaggedWord::data(Chip::A, 4).raw(),
            TaggedWord::data(Chip::B, 5).raw(),
            TaggedWord::data(Chip::C, 6).raw(),
            TaggedWord::end_of_line(0).raw(),
        ];
        let mut demux = MultiChipDemux::new(2, 3).unwrap();
        let outcome = demux.next_line(&mut VecStream::new(words)).unwrap();

        assert_eq!(outcome.status, LineStatus::Ok);
        assert_eq!(demux.line(), &[1, 4, 2, 5, 6, 3]);
    }

    #[test]
    fn test_alignment_from_chip_b() {
        // the line starts on chip B: B and C catch up before the A, B, C cycle
        let words = vec![
            TaggedWord::header(0, false).raw(),
            TaggedWord::data(Chip::B, 20).raw(),
            TaggedWord::data(Chip::C, 30).raw(),
            TaggedWord::data(Chip::A, 10).raw(),
            TaggedWord::data(Chip::B, 21).raw(),
            TaggedWord::data(Chip::C, 31).raw(),
            TaggedWord::data(Chip::A, 11).raw(),
            TaggedWord::end_of_line(0).raw(),
        ];
        let mut demux = MultiChipDemux::new(2, 3).unwrap();
        let outcome = demux.next_line(&mut VecStream::new(words)).unwrap();

        assert_eq!(outcome.status, LineStatus::Ok);
        assert_eq!(demux.chip_line(Chip::A).unwrap(), &[10, 11]);
        assert_eq!(demux.chip_line(Chip::B).unwrap(), &[20, 21]);
        assert_eq!(demux.chip_line(Chip::C).unwrap(), &[31, 30]);
    }

    #[test]
    fn test_unknown_chip_tag_is_fatal() {
        let words = vec![TaggedWord::header(0, false).raw(), 0x3001];
        let mut demux = MultiChipDemux::new(2, 3).unwrap();
        assert!(matches!(
            demux.next_line(&mut VecStream::new(words)),
            Err(DemuxError::UnknownChipTag { word: 0x3001, .. })
        ));

        // chip C does not exist on a two-chip sensor
        let words = vec![TaggedWord::header(0, false).raw(), 0x2001];
        let mut demux = MultiChipDemux::new(2, 2).unwrap();
        assert!(demux.next_line(&mut VecStream::new(words)).is_err());
    }

    #[test]
    fn test_short_line() {
        let mut sensor = MockSensor::new(&config(8, 2), 3);
        let mut words = sensor.short_line(5);
        words.extend(sensor.line());
        let mut stream = VecStream::new(words);
        let mut demux = MultiChipDemux::new(8, 2).unwrap();

        let outcome = demux.next_line(&mut stream).unwrap();
        assert_eq!(outcome.status, LineStatus::Short { received: 5 });
        assert!(demux.chip_line(Chip::A).unwrap()[5..].iter().all(|&s| s == 0));

        let outcome = demux.next_line(&mut stream).unwrap();
        assert_eq!(outcome.status, LineStatus::Ok);
        // taken from the short line's end-of-line marker
        assert_eq!(outcome.line_index, Some(0));
        assert_eq!(demux.stats().short, 1);
    }

    #[test]
    fn test_long_line_recovers_at_next_header() {
        let mut sensor = MockSensor::new(&config(4, 3), 5);
        let mut words = sensor.long_line(3);
        let next = sensor.sample_line();
        words.extend(sensor.encode_line(&next));
        let mut stream = VecStream::new(words);
        let mut demux = MultiChipDemux::new(4, 3).unwrap();

        let outcome = demux.next_line(&mut stream).unwrap();
        assert_eq!(outcome.status, LineStatus::LongRecovered);

        let outcome = demux.next_line(&mut stream).unwrap();
        assert_eq!(outcome.status, LineStatus::Ok);
        assert_eq!(outcome.line_index, Some(0));
        assert_eq!(demux.chip_line(Chip::B).unwrap(), next[1].as_slice());
        assert_eq!(demux.stats().long, 1);
    }

    #[test]
    fn test_end_of_data_mid_line() {
        let mut sensor = MockSensor::new(&config(4, 2), 1);
        let mut words = sensor.line();
        words.truncate(5);
        let mut demux = MultiChipDemux::new(4, 2).unwrap();

        let outcome = demux.next_line(&mut VecStream::new(words)).unwrap();
        assert_eq!(outcome.status, LineStatus::EndOfData);
    }

    #[test]
    fn test_sync_then_half_index() {
        let mut sensor = MockSensor::new(&config(4, 3), 11)
            .with_first_index(40)
            .with_half_at(6);
        let mut words = sensor.garbage(17);
        words.extend(sensor.frame(10));
        let mut stream = VecStream::new(words);
        let mut demux = MultiChipDemux::new(4, 3).unwrap();

        // first complete line is line 0 (index 40); skip two more
        let report = demux.sync(&mut stream, 2).unwrap();
        assert_eq!(report.first_line_index, 43);
        assert_eq!(demux.first_line_index(), 43);

        let mut half = None;
        loop {
            let outcome = demux.next_line(&mut stream).unwrap();
            if outcome.status == LineStatus::EndOfData {
                break;
            }
            half = half.or(outcome.half_index);
        }
        // half marker on index 46, chips below full height halve the distance
        assert_eq!(half, Some(1));
        assert_eq!(demux.half_index(), Some(1));
        assert_eq!(demux.stats().ok, 7);
    }

    #[test]
    fn test_sync_not_found() {
        let mut stream = VecStream::new(vec![1, 2, 3]);
        let mut demux = MultiChipDemux::new(4, 3).unwrap();
        assert!(matches!(
            demux.sync(&mut stream, 0),
            Err(DemuxError::SyncNotFound { .. })
        ));
    }

    #[test]
    fn test_remaining_lines() {
        let mut sensor = MockSensor::new(&config(4, 2), 1);
        let words = sensor.frame(3);
        let total = words.len();
        let mut stream = VecStream::new(words);
        let mut demux = MultiChipDemux::new(4, 2).unwrap();

        assert_eq!(demux.remaining_lines(&stream, total), total / 8);
        demux.next_line(&mut stream).unwrap();
        assert_eq!(
            demux.remaining_lines(&stream, total),
            (total - stream.position()) / 8
        );
    }

    #[test]
    fn test_single_chip_uses_wide_samples() {
        let words = vec![
            TaggedWord::header(0, false).raw(),
            0x1abc,
            0x0001,
            TaggedWord::end_of_line(0).raw(),
        ];
        let mut demux = MultiChipDemux::new(2, 1).unwrap();
        let outcome = demux.next_line(&mut VecStream::new(words)).unwrap();

        assert_eq!(outcome.status, LineStatus::Ok);
        assert_eq!(demux.line(), &[0x1abc, 0x0001]);
    }

    #[test]
    fn test_unsupported_chip_count() {
        assert!(matches!(
            MultiChipDemux::new(4, 4),
            Err(DemuxError::UnsupportedChipCount(4))
        ));
    }
}
