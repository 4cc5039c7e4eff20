//! Line accumulation and chip-stacked layout.

use crate::image::{Image, ImageError};

/// Accumulates decoded lines into a 2-D image, one column per line.
///
/// Lines arrive chip-stacked from the demultiplexer, so the finished image
/// has chip A in rows `[0, h)`, chip B in `[h, 2h)` and chip C in `[2h, 3h)`.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    line_length: usize,
    samples: Vec<u16>,
    lines: usize,
}

impl FrameAssembler {
    /// Creates an assembler for lines of `line_length` samples.
    pub fn new(line_length: usize) -> Self {
        Self {
            line_length,
            samples: Vec::new(),
            lines: 0,
        }
    }

    /// Creates an assembler with room for `lines` lines.
    pub fn with_capacity(line_length: usize, lines: usize) -> Self {
        Self {
            line_length,
            samples: Vec::with_capacity(line_length * lines),
            lines: 0,
        }
    }

    /// Appends one line as the next column.
    pub fn push_line(&mut self, line: &[u16]) -> Result<(), ImageError> {
        if line.len() != self.line_length {
            return Err(ImageError::DimensionMismatch {
                left: (self.line_length, 1),
                right: (line.len(), 1),
            });
        }
        self.samples.extend_from_slice(line);
        self.lines += 1;
        Ok(())
    }

    /// Number of lines pushed so far.
    pub fn len(&self) -> usize {
        self.lines
    }

    /// Returns true if no line has been pushed.
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// Builds the image (width = lines, height = line length) and resets
    /// the assembler.
    pub fn finish(&mut self) -> Image<u16> {
        let lines = std::mem::take(&mut self.samples);
        let width = std::mem::replace(&mut self.lines, 0);
        let mut image = Image::new(width, self.line_length);
        for (col, line) in lines.chunks_exact(self.line_length.max(1)).enumerate() {
            for (row, &sample) in line.iter().enumerate() {
                image[(row, col)] = sample;
            }
        }
        tracing::debug!(width, height = self.line_length, "frame assembled");
        image
    }
}

/// Transposes a line file (one row per acquired line) into the
/// chip-stacked layout.
///
/// Each input row holds `num_chips * chip_height` samples, chip by chip.
/// With `invert_c` the third chip's samples are reversed, for line files
/// recorded without the demultiplexer's inversion.
pub fn transpose(
    lines: &Image<u16>,
    chip_height: usize,
    num_chips: usize,
    invert_c: bool,
) -> Result<Image<u16>, ImageError> {
    let line_length = chip_height * num_chips;
    if lines.width() != line_length {
        return Err(ImageError::DimensionMismatch {
            left: (lines.width(), lines.height()),
            right: (line_length, lines.height()),
        });
    }

    let mut image = Image::new(lines.height(), line_length);
    for (col, line) in lines.rows().enumerate() {
        for (chip, samples) in line.chunks_exact(chip_height.max(1)).enumerate() {
            let base = chip * chip_height;
            if chip == 2 && invert_c {
                for (i, &sample) in samples.iter().rev().enumerate() {
                    image[(base + i, col)] = sample;
                }
            } else {
                for (i, &sample) in samples.iter().enumerate() {
                    image[(base + i, col)] = sample;
                }
            }
        }
    }
    Ok(image)
}
