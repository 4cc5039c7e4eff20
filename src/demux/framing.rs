//! Framing shared by both demultiplexer variants.
//!
//! A line is decoded in three phases: skip the header run (recording the
//! line index), fill the per-chip buffers until an end-of-line marker, and
//! classify how the line ended. Buffer cursors are reset at the start of
//! every line, so a malformed line never leaks state into the next one.

use super::{DemuxError, LineStatus, SyncReport, TaggedWord, LINE_INDEX_MASK};
use crate::capture::{WordStream, MAX_CHIP_HEIGHT};

/// Maximum number of words searched for a header.
pub const TRY_MAX: usize = 20_000;

/// Order in which a chip's samples are written into its line buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOrder {
    Forward,
    /// Back to front, for an inversion-mounted chip.
    Reverse,
}

/// Fixed-size, chip-stacked line buffer with one write cursor per chip.
#[derive(Debug, Clone)]
pub(crate) struct LineBuffer {
    samples: Vec<u16>,
    chip_len: usize,
    orders: Vec<FillOrder>,
    filled: Vec<usize>,
}

impl LineBuffer {
    pub(crate) fn new(chip_len: usize, orders: Vec<FillOrder>) -> Self {
        let chips = orders.len();
        Self {
            samples: vec![0; chip_len * chips],
            chip_len,
            filled: vec![0; chips],
            orders,
        }
    }

    /// Zeroes the samples and rewinds every cursor.
    pub(crate) fn reset(&mut self) -> Result<(), DemuxError> {
        if self.samples.len() != self.chip_len * self.orders.len()
            || self.filled.iter().any(|&n| n > self.chip_len)
        {
            return Err(DemuxError::BufferInvariant {
                len: self.samples.len(),
                chip_len: self.chip_len,
            });
        }
        self.samples.iter_mut().for_each(|s| *s = 0);
        self.filled.iter_mut().for_each(|n| *n = 0);
        Ok(())
    }

    /// Stores one sample for `chip`. Returns false if the chip is already full.
    #[inline]
    pub(crate) fn push(&mut self, chip: usize, sample: u16) -> bool {
        let n = self.filled[chip];
        if n >= self.chip_len {
            return false;
        }
        let offset = match self.orders[chip] {
            FillOrder::Forward => n,
            FillOrder::Reverse => self.chip_len - 1 - n,
        };
        self.samples[chip * self.chip_len + offset] = sample;
        self.filled[chip] = n + 1;
        true
    }

    #[inline]
    pub(crate) fn chips(&self) -> usize {
        self.orders.len()
    }

    pub(crate) fn chip_len(&self) -> usize {
        self.chip_len
    }

    pub(crate) fn filled(&self, chip: usize) -> usize {
        self.filled[chip]
    }

    pub(crate) fn min_filled(&self) -> usize {
        self.filled.iter().copied().min().unwrap_or(0)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.filled.iter().all(|&n| n == self.chip_len)
    }

    pub(crate) fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub(crate) fn chip(&self, chip: usize) -> &[u16] {
        &self.samples[chip * self.chip_len..(chip + 1) * self.chip_len]
    }
}

/// Latches the scan's half index the first time a half marker is seen.
#[derive(Debug, Clone)]
pub(crate) struct HalfTracker {
    first_index: u16,
    half_index: Option<usize>,
    halve: bool,
}

impl HalfTracker {
    pub(crate) fn new(chip_height: usize) -> Self {
        Self {
            first_index: 0,
            half_index: None,
            halve: chip_height < MAX_CHIP_HEIGHT,
        }
    }

    pub(crate) fn set_first_index(&mut self, index: u16) {
        self.first_index = index;
    }

    pub(crate) fn first_index(&self) -> u16 {
        self.first_index
    }

    pub(crate) fn half_index(&self) -> Option<usize> {
        self.half_index
    }

    /// Records a half marker seen on `line`. Returns the half index if this
    /// is the first marker of the scan.
    pub(crate) fn observe(&mut self, line: u16) -> Option<usize> {
        if self.half_index.is_some() {
            return None;
        }
        let first = usize::from(self.first_index);
        let line = usize::from(line);
        // the line counter wraps at most once per scan
        let mut half = if first > line {
            (usize::from(LINE_INDEX_MASK) - first) + line
        } else {
            line - first
        };
        if self.halve {
            half /= 2;
        }
        self.half_index = Some(half);
        Some(half)
    }
}

/// Result of skipping a run of header words.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeaderRun {
    /// Index carried by the first header of the run. Between lines this is
    /// the previous line's end-of-line marker.
    pub line_index: Option<u16>,
    /// That header carried the half marker.
    pub half: bool,
}

/// Consumes header words up to the first data word. `None` at end of data.
pub(crate) fn skip_headers(
    stream: &mut dyn WordStream,
) -> Result<Option<HeaderRun>, DemuxError> {
    let mut run = HeaderRun::default();
    loop {
        let word = match stream.peek()? {
            Some(word) => TaggedWord(word),
            None => return Ok(None),
        };
        if !word.is_header() {
            return Ok(Some(run));
        }
        if run.line_index.is_none() {
            run.line_index = Some(word.line_index());
            run.half = word.is_half();
        }
        stream.advance();
    }
}

/// Consumes data words up to the next header, which is left in place.
///
/// Returns the number of words consumed, or `None` at end of data. The
/// search stops after [`TRY_MAX`] words.
pub(crate) fn find_header(stream: &mut dyn WordStream) -> Result<Option<usize>, DemuxError> {
    let mut length = 0;
    while length < TRY_MAX {
        match stream.peek()? {
            None => return Ok(None),
            Some(word) if TaggedWord(word).is_header() => return Ok(Some(length)),
            Some(_) => {
                stream.advance();
                length += 1;
            }
        }
    }
    Ok(Some(length))
}

/// How the fill phase stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    EndOfLine,
    Overrun,
    EndOfData,
}

/// Moves the current word into `chip`'s buffer.
///
/// Returns `None` once the word is stored, or how the line ended.
pub(crate) fn move_word(
    stream: &mut dyn WordStream,
    buffer: &mut LineBuffer,
    chip: usize,
    mask: u16,
    tagged: bool,
) -> Result<Option<Fill>, DemuxError> {
    let word = match stream.peek()? {
        Some(word) => TaggedWord(word),
        None => return Ok(Some(Fill::EndOfData)),
    };
    if word.is_header() {
        return Ok(Some(Fill::EndOfLine));
    }
    if tagged && word.chip().is_none() {
        return Err(DemuxError::UnknownChipTag {
            word: word.raw(),
            position: stream.position(),
        });
    }
    if !buffer.push(chip, word.sample(mask)) {
        return Ok(Some(Fill::Overrun));
    }
    stream.advance();
    Ok(None)
}

/// Fills every chip buffer, one word per chip per step, until the line ends.
pub(crate) fn fill_line(
    stream: &mut dyn WordStream,
    buffer: &mut LineBuffer,
    mask: u16,
    tagged: bool,
) -> Result<Fill, DemuxError> {
    loop {
        match stream.peek()? {
            None => return Ok(Fill::EndOfData),
            Some(word) if TaggedWord(word).is_header() => return Ok(Fill::EndOfLine),
            Some(_) => {}
        }
        for chip in 0..buffer.chips() {
            if let Some(fill) = move_word(stream, buffer, chip, mask, tagged)? {
                return Ok(fill);
            }
        }
    }
}

/// Classifies a finished fill, recovering from overruns.
pub(crate) fn finish_line(
    stream: &mut dyn WordStream,
    buffer: &LineBuffer,
    fill: Fill,
) -> Result<LineStatus, DemuxError> {
    match fill {
        Fill::EndOfLine if buffer.is_complete() => Ok(LineStatus::Ok),
        Fill::EndOfLine => Ok(LineStatus::Short {
            received: buffer.min_filled(),
        }),
        Fill::Overrun => match find_header(stream)? {
            Some(_) => Ok(LineStatus::LongRecovered),
            None => Ok(LineStatus::EndOfData),
        },
        Fill::EndOfData => Ok(LineStatus::EndOfData),
    }
}

/// Skips leading garbage until a line of exactly `line_length` data words
/// is bracketed by headers, then skips `skip_lines` further lines.
///
/// On success the stream is left on the start-of-line header of the first
/// line to decode, whose index is returned.
pub(crate) fn sync_stream(
    stream: &mut dyn WordStream,
    line_length: usize,
    skip_lines: usize,
) -> Result<SyncReport, DemuxError> {
    let start = stream.position();
    let mut rejected = 0;
    loop {
        if skip_headers(stream)?.is_none() {
            return Err(DemuxError::SyncNotFound {
                position: stream.position(),
            });
        }
        match find_header(stream)? {
            Some(length) if length == line_length => break,
            Some(_) => rejected += 1,
            None => {
                return Err(DemuxError::SyncNotFound {
                    position: stream.position(),
                })
            }
        }
    }

    for _ in 0..skip_lines {
        if skip_headers(stream)?.is_none() || find_header(stream)?.is_none() {
            return Err(DemuxError::SyncNotFound {
                position: stream.position(),
            });
        }
    }

    // step over the end-of-line marker onto the next start-of-line header
    loop {
        match stream.peek()? {
            Some(word) if TaggedWord(word).is_end_of_line() => stream.advance(),
            Some(word) if TaggedWord(word).is_header() => {
                let first_line_index = TaggedWord(word).line_index();
                tracing::debug!(first_line_index, rejected, "stream synchronised");
                return Ok(SyncReport {
                    first_line_index,
                    rejected_lines: rejected,
                    skipped_words: stream.position() - start,
                });
            }
            _ => {
                return Err(DemuxError::SyncNotFound {
                    position: stream.position(),
                })
            }
        }
    }
}
