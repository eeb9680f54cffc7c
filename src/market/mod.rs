//! Market data primitives: volume bars and indicator kernels.

pub mod bar;
pub mod indicators;

pub use bar::{VolumeBar, VolumeBarAggregator};
