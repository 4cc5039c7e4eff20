//! Tagged word layout.
//!
//! ```text
//! header:  1 E H LLLLLLLLLLLLL   E = end of line, H = half marker, L = line index
//! data:    0 0 TT SSSSSSSSSSSS   T = chip tag (multi-chip), S = sample
//! ```

/// Header-present flag.
pub const HEADER_FLAG: u16 = 0x8000;
/// Start/end-of-line flag (only meaningful with [`HEADER_FLAG`]).
pub const SOL_EOL_FLAG: u16 = 0x4000;
/// Half marker: the header of the scan's geometric centre line.
pub const HALF_FLAG: u16 = 0x2000;
/// Line index carried by headers.
pub const LINE_INDEX_MASK: u16 = 0x1fff;
/// Chip tag bits of a data word.
pub const CHIP_TAG_MASK: u16 = 0x3000;
/// Sample bits of a chip-tagged data word.
pub const CHIP_SAMPLE_MASK: u16 = 0x0fff;
/// Sample bits of an untagged single-chip line-sensor word.
pub const WIDE_SAMPLE_MASK: u16 = 0x1fff;
/// End-of-line pattern.
pub const EOL_PATTERN: u16 = HEADER_FLAG | SOL_EOL_FLAG;

/// Physical chip of a tiled line sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    A,
    B,
    /// Mounted inverted; its samples arrive in reverse row order.
    C,
}

impl Chip {
    /// All chips in stacking order.
    pub const ALL: [Chip; 3] = [Chip::A, Chip::B, Chip::C];

    /// Position of the chip in the stacked line (0 for A).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Chip::A => 0,
            Chip::B => 1,
            Chip::C => 2,
        }
    }

    /// Chip at a stacking position.
    pub fn from_index(index: usize) -> Option<Chip> {
        Chip::ALL.get(index).copied()
    }

    /// Tag bits identifying the chip.
    #[inline]
    pub fn tag(self) -> u16 {
        match self {
            Chip::A => 0x0000,
            Chip::B => 0x1000,
            Chip::C => 0x2000,
        }
    }
}

/// A raw 16-bit word from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedWord(pub u16);

impl TaggedWord {
    /// Start-of-line header.
    pub fn header(line_index: u16, half: bool) -> Self {
        let half = if half { HALF_FLAG } else { 0 };
        TaggedWord(HEADER_FLAG | half | (line_index & LINE_INDEX_MASK))
    }

    /// End-of-line marker.
    pub fn end_of_line(line_index: u16) -> Self {
        TaggedWord(EOL_PATTERN | (line_index & LINE_INDEX_MASK))
    }

    /// Sets or clears the half marker of a header.
    pub fn with_half(self, half: bool) -> Self {
        if half {
            TaggedWord(self.0 | HALF_FLAG)
        } else {
            TaggedWord(self.0 & !HALF_FLAG)
        }
    }

    /// Chip-tagged data word.
    pub fn data(chip: Chip, sample: u16) -> Self {
        TaggedWord(chip.tag() | (sample & CHIP_SAMPLE_MASK))
    }

    /// Data word without a chip tag.
    pub fn untagged(sample: u16) -> Self {
        TaggedWord(sample & !HEADER_FLAG)
    }

    #[inline]
    pub fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn is_header(self) -> bool {
        self.0 & HEADER_FLAG != 0
    }

    #[inline]
    pub fn is_end_of_line(self) -> bool {
        self.0 & EOL_PATTERN == EOL_PATTERN
    }

    #[inline]
    pub fn is_half(self) -> bool {
        self.is_header() && self.0 & HALF_FLAG != 0
    }

    #[inline]
    pub fn line_index(self) -> u16 {
        self.0 & LINE_INDEX_MASK
    }

    /// Chip identified by the tag bits, `None` for the unassigned tag.
    #[inline]
    pub fn chip(self) -> Option<Chip> {
        match self.0 & CHIP_TAG_MASK {
            0x0000 => Some(Chip::A),
            0x1000 => Some(Chip::B),
            0x2000 => Some(Chip::C),
            _ => None,
        }
    }

    #[inline]
    pub fn sample(self, mask: u16) -> u16 {
        self.0 & mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let word = TaggedWord::header(0x1abc, true);
        assert!(word.is_header());
        assert!(word.is_half());
        assert!(!word.is_end_of_line());
        assert_eq!(word.line_index(), 0x1abc);

        let eol = TaggedWord::end_of_line(5);
        assert!(eol.is_header());
        assert!(eol.is_end_of_line());
        assert_eq!(eol.raw(), 0xc005);

        let marked = eol.with_half(true);
        assert!(marked.is_end_of_line());
        assert!(marked.is_half());
        assert_eq!(marked.line_index(), 5);
        assert_eq!(marked.with_half(false), eol);
    }

    #[test]
    fn test_chip_tags() {
        assert_eq!(TaggedWord(0x0123).chip(), Some(Chip::A));
        assert_eq!(TaggedWord(0x1123).chip(), Some(Chip::B));
        assert_eq!(TaggedWord(0x2123).chip(), Some(Chip::C));
        assert_eq!(TaggedWord(0x3123).chip(), None);

        let word = TaggedWord::data(Chip::C, 0xfff);
        assert_eq!(word.raw(), 0x2fff);
        assert_eq!(word.sample(CHIP_SAMPLE_MASK), 0xfff);
    }

    #[test]
    fn test_data_word_never_looks_like_header() {
        assert!(!TaggedWord::untagged(0xffff).is_header());
        assert!(!TaggedWord::data(Chip::B, 0xffff).is_header());
    }
}
