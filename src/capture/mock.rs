//! Synthetic sensor for testing.
//!
//! Generates word streams with the same framing as the hardware: a
//! start-of-line header carrying the line index and the half marker,
//! interleaved chip-tagged samples (chip C emitted in reverse row order),
//! and an end-of-line word repeating the index and the marker. Samples are a fixed level plus seeded noise,
//! so runs are reproducible.

use super::{SensorConfig, SensorFamily};
use crate::demux::{Chip, TaggedWord, CHIP_SAMPLE_MASK, LINE_INDEX_MASK, WIDE_SAMPLE_MASK};
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

/// Deterministic word-stream generator.
#[derive(Debug, Clone)]
pub struct MockSensor {
    rng: ChaCha20Rng,
    chip_height: usize,
    num_chips: usize,
    tagged: bool,
    sample_mask: u16,
    level: u16,
    noise: u16,
    line_index: u16,
    lines_emitted: usize,
    half_at: Option<usize>,
}

impl MockSensor {
    /// Creates a generator matching the sensor geometry.
    pub fn new(config: &SensorConfig, seed: u64) -> Self {
        let tagged = config.family.is_line_sensor() && config.num_chips > 1;
        let sample_mask = if config.family.is_line_sensor() && config.num_chips == 1 {
            WIDE_SAMPLE_MASK
        } else {
            CHIP_SAMPLE_MASK
        };
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            chip_height: config.chip_height,
            num_chips: config.num_chips,
            tagged,
            sample_mask,
            level: 1000,
            noise: 16,
            line_index: 0,
            lines_emitted: 0,
            half_at: None,
        }
    }

    /// Sets the sample level and the noise amplitude.
    pub fn with_signal(mut self, level: u16, noise: u16) -> Self {
        self.set_signal(level, noise);
        self
    }

    /// Changes the signal of the lines generated from now on.
    pub fn set_signal(&mut self, level: u16, noise: u16) {
        self.level = level;
        self.noise = noise;
    }

    /// Sets the first line index written into headers.
    pub fn with_first_index(mut self, index: u16) -> Self {
        self.line_index = index & LINE_INDEX_MASK;
        self
    }

    /// Raises the half marker on the header of the given line (counted from 0).
    pub fn with_half_at(mut self, line: usize) -> Self {
        self.half_at = Some(line);
        self
    }

    /// Number of lines generated so far.
    pub fn lines_emitted(&self) -> usize {
        self.lines_emitted
    }

    /// Random header-free words, as found in the FIFO before the first line.
    pub fn garbage(&mut self, count: usize) -> Vec<u16> {
        (0..count)
            .map(|_| (self.rng.next_u32() as u16) & CHIP_SAMPLE_MASK)
            .collect()
    }

    /// Draws one line of samples per chip.
    pub fn sample_line(&mut self) -> Vec<Vec<u16>> {
        (0..self.num_chips)
            .map(|_| (0..self.chip_height).map(|_| self.sample()).collect())
            .collect()
    }

    /// Frames the given per-chip samples as one complete line.
    pub fn encode_line(&mut self, chips: &[Vec<u16>]) -> Vec<u16> {
        self.encode(chips, self.chip_height)
    }

    /// Generates one complete line of noisy samples.
    pub fn line(&mut self) -> Vec<u16> {
        let samples = self.sample_line();
        self.encode_line(&samples)
    }

    /// Generates a line that ends after `received` samples per chip.
    pub fn short_line(&mut self, received: usize) -> Vec<u16> {
        let samples = self.sample_line();
        self.encode(&samples, received.min(self.chip_height))
    }

    /// Generates a line carrying `extra` surplus samples per chip.
    pub fn long_line(&mut self, extra: usize) -> Vec<u16> {
        let mut samples = self.sample_line();
        for chip in samples.iter_mut() {
            for _ in 0..extra {
                chip.push(self.level & self.sample_mask);
            }
        }
        self.encode(&samples, self.chip_height + extra)
    }

    /// Generates `lines` complete lines back to back.
    pub fn frame(&mut self, lines: usize) -> Vec<u16> {
        let mut words = Vec::with_capacity(lines * (self.chip_height * self.num_chips + 2));
        for _ in 0..lines {
            words.extend(self.line());
        }
        words
    }

    fn sample(&mut self) -> u16 {
        let noise = if self.noise == 0 {
            0
        } else {
            (self.rng.next_u32() % (u32::from(self.noise) + 1)) as u16
        };
        self.level.saturating_add(noise) & self.sample_mask
    }

    fn encode(&mut self, chips: &[Vec<u16>], samples_per_chip: usize) -> Vec<u16> {
        let half = self.half_at == Some(self.lines_emitted);
        let mut words = Vec::with_capacity(samples_per_chip * chips.len() + 2);
        words.push(TaggedWord::header(self.line_index, half).raw());

        for i in 0..samples_per_chip {
            for (c, samples) in chips.iter().enumerate() {
                let chip = Chip::from_index(c);
                // chip C is read back to front
                let value = if chip == Some(Chip::C) {
                    samples[samples_per_chip - 1 - i]
                } else {
                    samples[i]
                };
                let word = match chip {
                    Some(chip) if self.tagged => TaggedWord::data(chip, value),
                    _ => TaggedWord::untagged(value & self.sample_mask),
                };
                words.push(word.raw());
            }
        }
        words.push(TaggedWord::end_of_line(self.line_index).with_half(half).raw());

        self.line_index = (self.line_index + 1) & LINE_INDEX_MASK;
        self.lines_emitted += 1;
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(num_chips: usize) -> SensorConfig {
        SensorConfig {
            chip_height: 4,
            num_chips,
            ..SensorConfig::for_family(SensorFamily::Ceph)
        }
    }

    #[test]
    fn test_line_framing() {
        let mut sensor = MockSensor::new(&small_config(3), 1).with_first_index(7);
        let words = sensor.line();

        assert_eq!(words.len(), 4 * 3 + 2);
        assert!(TaggedWord(words[0]).is_header());
        assert!(!TaggedWord(words[0]).is_end_of_line());
        assert_eq!(TaggedWord(words[0]).line_index(), 7);
        assert!(TaggedWord(words[13]).is_end_of_line());
        assert_eq!(TaggedWord(words[1]).chip(), Some(Chip::A));
        assert_eq!(TaggedWord(words[2]).chip(), Some(Chip::B));
        assert_eq!(TaggedWord(words[3]).chip(), Some(Chip::C));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = MockSensor::new(&small_config(2), 42);
        let mut b = MockSensor::new(&small_config(2), 42);
        assert_eq!(a.frame(5), b.frame(5));
    }

    #[test]
    fn test_half_marker() {
        let mut sensor = MockSensor::new(&small_config(2), 1).with_half_at(1);
        let first = sensor.line();
        let second = sensor.line();

        assert!(!TaggedWord(first[0]).is_half());
        assert!(TaggedWord(second[0]).is_half());
        assert!(TaggedWord(*second.last().unwrap()).is_half());
        assert!(TaggedWord(*second.last().unwrap()).is_end_of_line());
        assert_eq!(sensor.lines_emitted(), 2);
    }

    #[test]
    fn test_short_and_long_lengths() {
        let mut sensor = MockSensor::new(&small_config(2), 3);
        assert_eq!(sensor.short_line(2).len(), 2 * 2 + 2);
        assert_eq!(sensor.long_line(3).len(), 7 * 2 + 2);
    }

    #[test]
    fn test_garbage_has_no_headers() {
        let mut sensor = MockSensor::new(&small_config(3), 9);
        assert!(sensor
            .garbage(1000)
            .iter()
            .all(|&w| !TaggedWord(w).is_header()));
    }
}
