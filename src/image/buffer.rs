//! Dense 2-D image buffer with a region of interest.

use super::ImageError;

/// Rectangular region of interest inside an image.
///
/// Columns run along `x`, rows along `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    /// First column of the region.
    pub col: usize,
    /// First row of the region.
    pub row: usize,
    /// Number of columns in the region.
    pub width: usize,
    /// Number of rows in the region.
    pub height: usize,
}

impl Roi {
    /// Creates a region from its origin and size.
    pub fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self {
            col,
            row,
            width,
            height,
        }
    }

    /// Number of pixels covered by the region.
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Returns true if the region lies entirely inside a `width` x `height` grid.
    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.col < width
            && self.row < height
            && self.width > 0
            && self.height > 0
            && self.col + self.width <= width
            && self.row + self.height <= height
    }
}

/// A dense image stored row-major.
///
/// The image owns its pixels; `clone` produces an independent deep copy.
/// The ROI defaults to the full frame and is only used by the localized
/// statistics helpers.
#[derive(Clone, PartialEq)]
pub struct Image<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
    roi: Roi,
}

impl<T: Copy + Default> Image<T> {
    /// Creates a `width` x `height` image filled with `T::default()`.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, T::default())
    }

    /// Creates an image with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
            roi: Roi::new(0, 0, width, height),
        }
    }

    /// Wraps an existing pixel buffer.
    pub fn from_pixels(pixels: Vec<T>, width: usize, height: usize) -> Result<Self, ImageError> {
        if pixels.len() != width * height {
            return Err(ImageError::BufferSize {
                expected: width * height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            roi: Roi::new(0, 0, width, height),
        })
    }

    /// Builds a new image by applying `f` to every pixel.
    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> Image<U> {
        Image {
            pixels: self.pixels.iter().map(|&p| f(p)).collect(),
            width: self.width,
            height: self.height,
            roi: self.roi,
        }
    }

    /// Sets every pixel to `value`.
    pub fn fill(&mut self, value: T) {
        self.pixels.iter_mut().for_each(|p| *p = value);
    }
}

impl<T> Image<T> {
    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Row-major pixel data.
    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    /// Mutable row-major pixel data.
    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    /// Consumes the image and returns its pixel buffer.
    pub fn into_pixels(self) -> Vec<T> {
        self.pixels
    }

    /// Pixels of row `row`.
    #[inline]
    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.width;
        &self.pixels[start..start + self.width]
    }

    /// Mutable pixels of row `row`.
    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [T] {
        let start = row * self.width;
        &mut self.pixels[start..start + self.width]
    }

    /// Iterates over the rows top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        // chunks_exact panics on zero, an empty image simply has no rows
        self.pixels.chunks(self.width.max(1))
    }

    /// Current region of interest.
    #[inline]
    pub fn roi(&self) -> Roi {
        self.roi
    }

    /// Sets the region of interest.
    pub fn set_roi(&mut self, roi: Roi) -> Result<(), ImageError> {
        if !roi.fits(self.width, self.height) {
            return Err(ImageError::RoiOutOfBounds {
                roi,
                width: self.width,
                height: self.height,
            });
        }
        self.roi = roi;
        Ok(())
    }

    /// Resets the region of interest to the full frame.
    pub fn reset_roi(&mut self) {
        self.roi = Roi::new(0, 0, self.width, self.height);
    }

    /// Returns true if both images have the same dimensions.
    pub fn same_shape<U>(&self, other: &Image<U>) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl<T> std::ops::Index<(usize, usize)> for Image<T> {
    type Output = T;

    /// Indexes by `(row, col)`.
    #[inline]
    fn index(&self, (row, col): (usize, usize)) -> &T {
        &self.pixels[row * self.width + col]
    }
}

impl<T> std::ops::IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        &mut self.pixels[row * self.width + col]
    }
}

impl<T> std::fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("roi", &self.roi)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_creation() {
        let image: Image<u16> = Image::new(640, 480);

        assert_eq!(image.width(), 640);
        assert_eq!(image.height(), 480);
        assert_eq!(image.pixel_count(), 640 * 480);
        assert_eq!(image.roi(), Roi::new(0, 0, 640, 480));
    }

    #[test]
    fn test_from_pixels_wrong_size() {
        let result = Image::from_pixels(vec![0u16; 100], 640, 480);
        assert!(matches!(result, Err(ImageError::BufferSize { .. })));
    }

    #[test]
    fn test_row_access_and_index() {
        let pixels: Vec<u16> = (0..12).collect();
        let mut image = Image::from_pixels(pixels, 4, 3).unwrap();

        assert_eq!(image.row(1), &[4, 5, 6, 7]);
        assert_eq!(image[(2, 3)], 11);

        image[(0, 0)] = 99;
        assert_eq!(image.row(0)[0], 99);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut source_image: Image<u16> = Image::filled(4, 4, 7);
        let copy = source_image.clone();

        source_image.fill(0);
        assert!(copy.pixels().iter().all(|&p| p == 7));
    }

    #[test]
    fn test_roi_must_fit() {
        let mut image: Image<u16> = Image::new(10, 10);

        assert!(image.set_roi(Roi::new(2, 2, 8, 8)).is_ok());
        assert!(matches!(
            image.set_roi(Roi::new(2, 2, 9, 8)),
            Err(ImageError::RoiOutOfBounds { .. })
        ));
        assert!(image.set_roi(Roi::new(10, 0, 1, 1)).is_err());
        assert!(image.set_roi(Roi::new(0, 0, 0, 1)).is_err());

        // failed updates leave the previous ROI in place
        assert_eq!(image.roi(), Roi::new(2, 2, 8, 8));
    }
}
