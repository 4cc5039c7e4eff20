//! Line demultiplexing.
//!
//! Turns the flat tagged-word stream into one fixed-length scan line per
//! call. Each line is chip-stacked: samples `[0, h)` belong to chip A,
//! `[h, 2h)` to chip B and `[2h, 3h)` to chip C.
//!
//! Short lines, long lines and end of data are reported through
//! [`LineStatus`]; only corrupt framing (an unassigned chip tag, a broken
//! buffer invariant) is an error.

mod framing;
mod multi_chip;
mod single_chip;
mod word;

pub use framing::{FillOrder, TRY_MAX};
pub use multi_chip::MultiChipDemux;
pub use single_chip::SingleChipDemux;
pub use word::{
    Chip, TaggedWord, CHIP_SAMPLE_MASK, CHIP_TAG_MASK, EOL_PATTERN, HALF_FLAG, HEADER_FLAG,
    LINE_INDEX_MASK, SOL_EOL_FLAG, WIDE_SAMPLE_MASK,
};

use crate::capture::{SensorConfig, StreamError, WordStream};
use thiserror::Error;

/// Errors raised while decoding lines.
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("unrecognised chip tag in word {word:#06x} at position {position}")]
    UnknownChipTag { word: u16, position: usize },
    #[error("line buffer invariant violated (len {len}, chip length {chip_len})")]
    BufferInvariant { len: usize, chip_len: usize },
    #[error("unsupported number of chips: {0}")]
    UnsupportedChipCount(usize),
    #[error("no complete line found before position {position}")]
    SyncNotFound { position: usize },
    #[error("word stream failed: {0}")]
    Stream(#[from] StreamError),
}

/// How a decoded line ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Every chip buffer was filled before the end-of-line marker.
    Ok,
    /// The end-of-line marker arrived early. The line is kept; samples
    /// past `received` are zero.
    Short { received: usize },
    /// The line overran its buffers and was discarded; the stream has been
    /// moved to the next header.
    LongRecovered,
    /// The stream has no more words.
    EndOfData,
}

/// Result of one [`LineDemultiplexer::next_line`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineOutcome {
    pub status: LineStatus,
    /// Index carried by the first header before the line's samples: the
    /// start-of-line header after a sync, the previous line's end-of-line
    /// marker otherwise.
    pub line_index: Option<u16>,
    /// Half index, set only on the call that first detected it.
    pub half_index: Option<usize>,
}

impl LineOutcome {
    pub(crate) fn end_of_data(line_index: Option<u16>) -> Self {
        Self {
            status: LineStatus::EndOfData,
            line_index,
            half_index: None,
        }
    }

    /// Returns true if the line holds usable samples.
    pub fn has_line(&self) -> bool {
        matches!(self.status, LineStatus::Ok | LineStatus::Short { .. })
    }
}

/// Decode quality counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub ok: u64,
    pub short: u64,
    pub long: u64,
    pub end_of_data: u64,
}

impl DecodeStats {
    /// Counts a line outcome.
    pub fn record(&mut self, outcome: &LineOutcome) {
        match outcome.status {
            LineStatus::Ok => {
                self.ok += 1;
                tracing::trace!(line = ?outcome.line_index, "line decoded");
            }
            LineStatus::Short { received } => {
                self.short += 1;
                tracing::debug!(line = ?outcome.line_index, received, "short line");
            }
            LineStatus::LongRecovered => {
                self.long += 1;
                tracing::warn!(line = ?outcome.line_index, "long line discarded, resynchronised on next header");
            }
            LineStatus::EndOfData => {
                self.end_of_data += 1;
                tracing::debug!(line = ?outcome.line_index, "end of data");
            }
        }
    }

    /// Lines that produced samples.
    pub fn decoded(&self) -> u64 {
        self.ok + self.short
    }
}

/// Outcome of a stream synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Index of the first line that will be decoded.
    pub first_line_index: u16,
    /// Malformed lines skipped before a complete one was found.
    pub rejected_lines: usize,
    /// Words consumed by the synchronisation.
    pub skipped_words: usize,
}

/// Decodes scan lines from a word stream.
pub trait LineDemultiplexer {
    /// Decodes the next line into the internal line buffer.
    fn next_line(&mut self, stream: &mut dyn WordStream) -> Result<LineOutcome, DemuxError>;

    /// The chip-stacked samples of the last decoded line.
    fn line(&self) -> &[u16];

    /// One chip's samples of the last decoded line.
    fn chip_line(&self, chip: Chip) -> Option<&[u16]>;

    /// Samples per line across all chips.
    fn line_length(&self) -> usize;

    /// Skips leading garbage and `skip_lines` complete lines, then latches
    /// the first line index.
    fn sync(&mut self, stream: &mut dyn WordStream, skip_lines: usize)
        -> Result<SyncReport, DemuxError>;

    /// Half index of the scan, once detected.
    fn half_index(&self) -> Option<usize>;

    /// Forgets the half index and line indices of the previous scan.
    /// Decode statistics are kept.
    fn reset_scan(&mut self);

    fn stats(&self) -> &DecodeStats;

    /// Estimates how many lines are left in a stream of `total_words` words.
    fn remaining_lines(&self, stream: &dyn WordStream, total_words: usize) -> usize {
        total_words
            .saturating_sub(stream.position())
            .checked_div(self.line_length())
            .unwrap_or(0)
    }
}

/// Builds the demultiplexer matching a sensor configuration.
pub fn for_sensor(config: &SensorConfig) -> Result<Box<dyn LineDemultiplexer + Send>, DemuxError> {
    if config.family.is_line_sensor() {
        Ok(Box::new(MultiChipDemux::new(
            config.chip_height,
            config.num_chips,
        )?))
    } else if config.num_chips == 1 {
        Ok(Box::new(SingleChipDemux::new(config.chip_height)))
    } else {
        Err(DemuxError::UnsupportedChipCount(config.num_chips))
    }
}
