//! Frame assembly.
//!
//! Stacks decoded lines into images and crops pano/ceph scans around the
//! detected half index.

mod centre;
mod frame;

pub use centre::centre;
pub use frame::{transpose, FrameAssembler};
