//! Ordered collection of tagged images.

use super::{DatasetError, Image};

/// Role of an image within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRole {
    /// Unprocessed image straight out of the frame assembler.
    Acquired,
    /// Image cropped around the scan's half index (pano/ceph only).
    Centred,
    /// Flat-field calibrated image.
    Calibrated,
    /// Reconstructed image (pano only, reserved).
    Reconstructed,
    /// Final image handed to the caller.
    Output,
}

/// Tag stored alongside every dataset image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetTag {
    /// What the image is.
    pub role: ImageRole,
    /// Detected half index of the scan the image came from (pano/ceph).
    pub half_index: Option<usize>,
}

impl DatasetTag {
    /// Creates a tag without half-index information.
    pub fn new(role: ImageRole) -> Self {
        Self {
            role,
            half_index: None,
        }
    }

    /// Creates a tag carrying a half index.
    pub fn with_half_index(role: ImageRole, half_index: usize) -> Self {
        Self {
            role,
            half_index: Some(half_index),
        }
    }
}

/// An owned sequence of `(tag, image)` pairs.
///
/// Images are dropped together with the dataset or on [`Dataset::clear`].
#[derive(Debug, Default, Clone)]
pub struct Dataset {
    entries: Vec<(DatasetTag, Image<u16>)>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an image.
    pub fn push(&mut self, tag: DatasetTag, image: Image<u16>) {
        tracing::trace!(role = ?tag.role, width = image.width(), height = image.height(), "dataset push");
        self.entries.push((tag, image));
    }

    /// Removes the last entry, which must have the expected role.
    pub fn pop_back(&mut self, role: ImageRole) -> Result<(DatasetTag, Image<u16>), DatasetError> {
        match self.entries.last() {
            None => Err(DatasetError::Empty),
            Some((tag, _)) if tag.role != role => Err(DatasetError::UnexpectedRole {
                expected: role,
                found: tag.role,
            }),
            Some(_) => self.entries.pop().ok_or(DatasetError::Empty),
        }
    }

    /// First entry with the given role.
    pub fn find(&self, role: ImageRole) -> Option<(&DatasetTag, &Image<u16>)> {
        self.entries
            .iter()
            .find(|(tag, _)| tag.role == role)
            .map(|(tag, image)| (tag, image))
    }

    /// All entries with the given role, in insertion order.
    pub fn with_role(&self, role: ImageRole) -> impl Iterator<Item = (&DatasetTag, &Image<u16>)> {
        self.entries
            .iter()
            .filter(move |(tag, _)| tag.role == role)
            .map(|(tag, image)| (tag, image))
    }

    /// Removes every entry with the given role. Returns how many were removed.
    pub fn remove_role(&mut self, role: ImageRole) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(tag, _)| tag.role != role);
        before - self.entries.len()
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&DatasetTag, &Image<u16>)> {
        self.entries.iter().map(|(tag, image)| (tag, image))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every image.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
