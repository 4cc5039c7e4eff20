//! Headerless raw image files.
//!
//! Pixels are little-endian `u16`, row-major. The width has to be known
//! up front; the height follows from the file size.

use super::{Image, ImageError};
use std::io::{Read, Write};
use std::path::Path;

/// Writes an image as raw little-endian `u16` samples.
pub fn write_raw(path: impl AsRef<Path>, image: &Image<u16>) -> Result<(), ImageError> {
    let path = path.as_ref();
    let mut bytes = Vec::with_capacity(image.pixel_count() * 2);
    for &p in image.pixels() {
        bytes.extend_from_slice(&p.to_le_bytes());
    }
    let mut file = std::fs::File::create(path).map_err(|e| ImageError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    file.write_all(&bytes).map_err(|e| ImageError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "wrote raw image");
    Ok(())
}

/// Reads a raw little-endian `u16` image of the given width.
pub fn read_raw(path: impl AsRef<Path>, width: usize) -> Result<Image<u16>, ImageError> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    std::fs::File::open(path)
        .and_then(|mut f| f.read_to_end(&mut bytes))
        .map_err(|e| ImageError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
    decode_raw(&bytes, width)
}

/// Decodes raw little-endian `u16` samples into an image of the given width.
pub fn decode_raw(bytes: &[u8], width: usize) -> Result<Image<u16>, ImageError> {
    let row_bytes = width * 2;
    if width == 0 || bytes.len() % row_bytes != 0 {
        return Err(ImageError::RawSize {
            bytes: bytes.len(),
            width,
        });
    }
    let pixels: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    let height = pixels.len() / width;
    Image::from_pixels(pixels, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.raw");

        let pixels: Vec<u16> = (0..24).map(|v| v * 1000).collect();
        let image = Image::from_pixels(pixels, 6, 4).unwrap();

        write_raw(&path, &image).unwrap();
        let loaded = read_raw(&path, 6).unwrap();

        assert_eq!(loaded, image);
    }

    #[test]
    fn test_decode_rejects_partial_rows() {
        let bytes = vec![0u8; 10];
        assert!(matches!(
            decode_raw(&bytes, 4),
            Err(ImageError::RawSize { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = read_raw("/nonexistent/frame.raw", 4);
        assert!(matches!(result, Err(ImageError::Io { .. })));
    }
}
