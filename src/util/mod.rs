//! Utility types shared by the pipeline, devices and kernels.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`Rect2D`] - Half-open pixel rectangles (viewports, clips, guard bands)
//! - Math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
