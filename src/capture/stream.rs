//! Word stream abstraction.
//!
//! The demultiplexer pulls 16-bit tagged words one at a time and needs a
//! single word of look-ahead: header detection inspects the current word
//! without consuming it. Every source reports end-of-data as `Ok(None)`,
//! which is a terminal status and never an error.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

/// Errors raised by word sources.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to read word stream {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("word stream holds an odd number of bytes ({0})")]
    OddByteCount(usize),
}

/// A source of 16-bit tagged words.
pub trait WordStream {
    /// Returns the current word without consuming it, or `None` at end of data.
    fn peek(&mut self) -> Result<Option<u16>, StreamError>;

    /// Consumes the current word. Does nothing at end of data.
    fn advance(&mut self);

    /// Number of words consumed so far.
    fn position(&self) -> usize;

    /// Consumes and returns the current word.
    fn next_word(&mut self) -> Result<Option<u16>, StreamError> {
        let word = self.peek()?;
        if word.is_some() {
            self.advance();
        }
        Ok(word)
    }

    /// Returns true once the source has no more words.
    fn at_end(&mut self) -> Result<bool, StreamError> {
        Ok(self.peek()?.is_none())
    }
}

impl<S: WordStream + ?Sized> WordStream for &mut S {
    fn peek(&mut self) -> Result<Option<u16>, StreamError> {
        (**self).peek()
    }

    fn advance(&mut self) {
        (**self).advance()
    }

    fn position(&self) -> usize {
        (**self).position()
    }
}

/// In-memory word stream.
#[derive(Debug, Clone, Default)]
pub struct VecStream {
    words: Vec<u16>,
    pos: usize,
}

impl VecStream {
    /// Wraps a word buffer.
    pub fn new(words: Vec<u16>) -> Self {
        Self { words, pos: 0 }
    }

    /// Decodes little-endian bytes into words.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, StreamError> {
        if bytes.len() % 2 != 0 {
            return Err(StreamError::OddByteCount(bytes.len()));
        }
        let words = bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Self::new(words))
    }

    /// Reads a captured word dump from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| StreamError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_le_bytes(&bytes)
    }

    /// Total number of words in the buffer.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns true if the buffer holds no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl WordStream for VecStream {
    #[inline]
    fn peek(&mut self) -> Result<Option<u16>, StreamError> {
        Ok(self.words.get(self.pos).copied())
    }

    #[inline]
    fn advance(&mut self) {
        if self.pos < self.words.len() {
            self.pos += 1;
        }
    }

    #[inline]
    fn position(&self) -> usize {
        self.pos
    }
}

/// Consumer half of a single producer / single consumer buffer handoff.
///
/// A capture thread sends word buffers through the paired [`Sender`];
/// the stream blocks until the next buffer arrives and reports end of
/// data once the sender is dropped and every buffer has been drained.
#[derive(Debug)]
pub struct ChannelStream {
    rx: Receiver<Vec<u16>>,
    current: Vec<u16>,
    offset: usize,
    pos: usize,
    closed: bool,
}

impl ChannelStream {
    /// Creates a connected sender/stream pair.
    pub fn channel() -> (Sender<Vec<u16>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }

    /// Wraps an existing receiver.
    pub fn new(rx: Receiver<Vec<u16>>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            offset: 0,
            pos: 0,
            closed: false,
        }
    }

    fn fill(&mut self) {
        while self.offset >= self.current.len() && !self.closed {
            match self.rx.recv() {
                Ok(buffer) => {
                    tracing::trace!(words = buffer.len(), "received word buffer");
                    self.current = buffer;
                    self.offset = 0;
                }
                Err(_) => {
                    tracing::debug!(position = self.pos, "producer disconnected");
                    self.closed = true;
                }
            }
        }
    }
}

impl WordStream for ChannelStream {
    fn peek(&mut self) -> Result<Option<u16>, StreamError> {
        self.fill();
        Ok(self.current.get(self.offset).copied())
    }

    fn advance(&mut self) {
        self.fill();
        if self.offset < self.current.len() {
            self.offset += 1;
            self.pos += 1;
        }
    }

    fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_stream_peek_and_advance() {
        let mut stream = VecStream::new(vec![1, 2, 3]);

        assert_eq!(stream.peek().unwrap(), Some(1));
        assert_eq!(stream.peek().unwrap(), Some(1));
        assert_eq!(stream.next_word().unwrap(), Some(1));
        assert_eq!(stream.position(), 1);
        assert_eq!(stream.next_word().unwrap(), Some(2));
        assert_eq!(stream.next_word().unwrap(), Some(3));
        assert!(stream.at_end().unwrap());
        assert_eq!(stream.next_word().unwrap(), None);
        assert_eq!(stream.position(), 3);
    }

    #[test]
    fn test_from_le_bytes() {
        let stream = VecStream::from_le_bytes(&[0x34, 0x12, 0x00, 0x80]).unwrap();
        assert_eq!(stream.words, vec![0x1234, 0x8000]);

        assert!(matches!(
            VecStream::from_le_bytes(&[1, 2, 3]),
            Err(StreamError::OddByteCount(3))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.bin");
        std::fs::write(&path, [0xff, 0x0f, 0x00, 0xc0]).unwrap();

        let mut stream = VecStream::from_file(&path).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.next_word().unwrap(), Some(0x0fff));
        assert_eq!(stream.next_word().unwrap(), Some(0xc000));
    }

    #[test]
    fn test_channel_stream_spans_buffers() {
        let (tx, mut stream) = ChannelStream::channel();

        let producer = std::thread::spawn(move || {
            tx.send(vec![10, 11]).unwrap();
            tx.send(Vec::new()).unwrap();
            tx.send(vec![12]).unwrap();
        });

        let mut words = Vec::new();
        while let Some(word) = stream.next_word().unwrap() {
            words.push(word);
        }
        producer.join().unwrap();

        assert_eq!(words, vec![10, 11, 12]);
        assert_eq!(stream.position(), 3);
        assert!(stream.at_end().unwrap());
    }

    #[test]
    fn test_mut_ref_is_a_stream() {
        fn drain(mut stream: impl WordStream) -> usize {
            let mut n = 0;
            while stream.next_word().unwrap().is_some() {
                n += 1;
            }
            n
        }

        let mut stream = VecStream::new(vec![0; 5]);
        assert_eq!(drain(&mut stream), 5);
        assert_eq!(stream.position(), 5);
    }
}
