//! # SAO
//!
//! Scalable Ambient Obscurance as a reusable render-pipeline component.
//!
//! Given a hyperbolic depth buffer and the camera that produced it, the
//! pipeline builds a camera-space depth pyramid, estimates per-pixel
//! obscurance from a sparse spiral of pyramid samples, and smooths the
//! result with a separable depth-aware blur. Output is a single channel in
//! `[0, 1]` (0 fully occluded, 1 unoccluded) for the interior of a guard
//! band.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math re-exports, pixel rectangles
//! - [`device`] - Render device abstraction, software and wgpu backends
//! - [`kernel`] - Per-stage numeric kernels and loaders
//! - [`camera`], [`constants`] - Camera model and per-frame constants
//! - [`settings`], [`config`] - Tunables and JSON configuration
//! - [`pipeline`] - Buffer management and the [`Sao`] driver
//! - [`scene`], [`export`] - Synthetic depth buffers and PNG dumps
//!
//! ## Example
//!
//! ```no_run
//! use sao::prelude::*;
//!
//! let mut device = CpuDevice::new();
//! let camera = Camera::perspective(60.0, 0.1, 100.0);
//! let depth = ScenePreset::Room.build().upload(&mut device, &camera, 640, 480)?;
//!
//! let out = device.create_texture(&TextureDesc::new("ao", 640, 480, TextureFormat::R8))?;
//! let fb = device.create_framebuffer("ao");
//! device.attach(fb, Attachment::Color0, out, 0)?;
//!
//! let mut sao = Sao::cpu(&SaoConfig::default())?;
//! sao.compute(&mut device, depth, &camera, 16, fb)?;
//! # Ok::<(), sao::Error>(())
//! ```

pub mod util;
pub mod device;
pub mod kernel;
pub mod camera;
pub mod constants;
pub mod settings;
pub mod config;
pub mod pipeline;
pub mod scene;
pub mod export;

// Re-export commonly used types
pub use util::{Error, Result};
pub use pipeline::{PassTimings, Sao};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::camera::{Camera, FovDirection};
    pub use crate::config::{DepthPrecision, SaoConfig};
    pub use crate::constants::SaoConstants;
    pub use crate::device::{
        Attachment, CpuDevice, FramebufferId, RenderDevice, TextureDesc, TextureFormat, TextureId,
    };
    pub use crate::kernel::{CpuKernelLoader, KernelLoader, KernelSet};
    pub use crate::pipeline::{BufferSet, PassTimings, Sao};
    pub use crate::scene::{DepthScene, ScenePreset};
    pub use crate::settings::SaoSettings;
    pub use crate::util::{Error, Rect2D, Result};
    #[cfg(feature = "gpu")]
    pub use crate::device::WgpuDevice;
    #[cfg(feature = "gpu")]
    pub use crate::kernel::WgslKernelLoader;
}
