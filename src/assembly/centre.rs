//! Cropping a scan around its half index.

use crate::image::Image;

/// Crops `image` to `out_width` columns centred on `half_index`.
///
/// The crop starts at `half_index - out_width / 2`, clamped to 0. Columns
/// past the source's right edge stay zero.
pub fn centre(image: &Image<u16>, half_index: usize, out_width: usize) -> Image<u16> {
    let start = half_index.saturating_sub(out_width / 2);
    let mut out = Image::new(out_width, image.height());
    let copy = image.width().saturating_sub(start).min(out_width);
    for row in 0..image.height() {
        if copy > 0 {
            out.row_mut(row)[..copy].copy_from_slice(&image.row(row)[start..start + copy]);
        }
    }
    tracing::debug!(half_index, start, out_width, copied = copy, "image centred");
    out
}
