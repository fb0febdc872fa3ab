//! Numeric kernels scheduled by the pipeline.
//!
//! The pipeline treats each stage's per-pixel program as an opaque
//! [`Kernel`] applied to a [`PassState`] with statically typed arguments.
//! A [`KernelLoader`] produces the four kernels of a [`KernelSet`] for a
//! particular device; reloading swaps the whole set at once.
//!
//! Two sets ship with the crate:
//! - [`CpuKernelLoader`] - reference kernels for [`CpuDevice`](crate::device::CpuDevice)
//! - `WgslKernelLoader` - WGSL programs for `WgpuDevice` (feature `gpu`)
//!
//! Both follow the published SAO kernels: rotated-grid minification, an
//! 11-tap spiral with 7 turns and per-tap mip selection, and a 9-tap
//! depth-keyed blur with stride 2.

mod cpu;
#[cfg(feature = "gpu")]
mod shaders;
#[cfg(feature = "gpu")]
mod wgsl;

pub use cpu::CpuKernelLoader;
#[cfg(feature = "gpu")]
pub use wgsl::WgslKernelLoader;

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::device::{PassState, TextureId};
use crate::util::{IVec2, Result, Vec3, Vec4};

/// Spiral taps per pixel.
pub const NUM_SAMPLES: i32 = 11;
/// Turns of the tap spiral.
pub const NUM_SPIRAL_TURNS: i32 = 7;
/// Taps closer than `2^LOG_MAX_OFFSET` pixels read mip 0.
pub const LOG_MAX_OFFSET: i32 = 3;
/// Camera-space z mapped to depth key 1.0.
pub const FAR_PLANE_Z: f32 = -300.0;

/// Blur half-width in taps.
pub const BLUR_RADIUS: i32 = 4;
/// Pixel stride between blur taps.
pub const BLUR_SCALE: i32 = 2;
/// Blur weights by tap distance.
pub const BLUR_GAUSSIAN: [f32; 5] = [0.153170, 0.144893, 0.122649, 0.092902, 0.062970];
/// Key difference that zeroes a blur tap's weight is `1 / (2000 * sharpness)`.
pub const BLUR_EDGE_SHARPNESS: f32 = 1.0;

/// Normalized depth key used by the blur to detect edges.
#[inline]
pub fn csz_to_key(z: f32) -> f32 {
    (z * (1.0 / FAR_PLANE_Z)).clamp(0.0, 1.0)
}

/// Split a key into two 8-bit-representable channels.
#[inline]
pub fn pack_key(key: f32) -> (f32, f32) {
    let temp = (key * 256.0).floor();
    (temp * (1.0 / 256.0), key * 256.0 - temp)
}

/// Inverse of [`pack_key`] up to a constant scale; `(1, 1)` maps to 1.
#[inline]
pub fn unpack_key(hi: f32, lo: f32) -> f32 {
    (hi * 256.0 + lo) / 257.0
}

/// Arguments of the level-0 reconstruction kernel.
#[derive(Clone, Copy, Debug)]
pub struct ReconstructCszArgs {
    pub clip_info: Vec3,
    pub depth_buffer: TextureId,
}

/// Arguments of the minification kernel.
#[derive(Clone, Copy, Debug)]
pub struct MinifyArgs {
    /// Pyramid texture, read at `previous_mip` and written one level below.
    pub texture: TextureId,
    pub previous_mip: u32,
}

/// Arguments of the raw obscurance kernel.
#[derive(Clone, Copy, Debug)]
pub struct RawAoArgs {
    pub radius: f32,
    pub bias: f32,
    pub clip_info: Vec3,
    pub proj_info: Vec4,
    pub proj_scale: f32,
    /// `intensity / radius^6`
    pub intensity_div_r6: f32,
    pub csz_buffer: TextureId,
}

/// Arguments of one blur pass.
#[derive(Clone, Copy, Debug)]
pub struct BlurArgs {
    pub source: TextureId,
    /// `(1, 0)` horizontal, `(0, 1)` vertical
    pub axis: IVec2,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ReconstructCszUniforms {
    pub clip_info: [f32; 4],
}

impl From<&ReconstructCszArgs> for ReconstructCszUniforms {
    fn from(args: &ReconstructCszArgs) -> Self {
        Self {
            clip_info: args.clip_info.extend(0.0).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MinifyUniforms {
    pub previous_mip: i32,
    pub _pad: [i32; 3],
}

impl From<&MinifyArgs> for MinifyUniforms {
    fn from(args: &MinifyArgs) -> Self {
        Self {
            previous_mip: args.previous_mip as i32,
            _pad: [0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct RawAoUniforms {
    pub proj_info: [f32; 4],
    pub clip_info: [f32; 4],
    pub radius: f32,
    pub radius2: f32,
    pub bias: f32,
    pub intensity_div_r6: f32,
    pub proj_scale: f32,
    pub _pad: [f32; 3],
}

impl From<&RawAoArgs> for RawAoUniforms {
    fn from(args: &RawAoArgs) -> Self {
        Self {
            proj_info: args.proj_info.to_array(),
            clip_info: args.clip_info.extend(0.0).to_array(),
            radius: args.radius,
            radius2: args.radius * args.radius,
            bias: args.bias,
            intensity_div_r6: args.intensity_div_r6,
            proj_scale: args.proj_scale,
            _pad: [0.0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BlurUniforms {
    pub axis: [i32; 2],
    pub _pad: [i32; 2],
}

impl From<&BlurArgs> for BlurUniforms {
    fn from(args: &BlurArgs) -> Self {
        Self {
            axis: args.axis.to_array(),
            _pad: [0; 2],
        }
    }
}

/// A per-pixel program applied as one full-screen draw.
pub trait Kernel<D: ?Sized, A> {
    fn name(&self) -> &str;

    /// Draw into `pass.target` with `args`.
    fn apply(&self, device: &mut D, pass: &PassState, args: &A) -> Result<()>;
}

/// The four kernels the pipeline needs, loaded together.
pub struct KernelSet<D: ?Sized> {
    pub reconstruct_csz: Box<dyn Kernel<D, ReconstructCszArgs>>,
    pub minify: Box<dyn Kernel<D, MinifyArgs>>,
    pub raw_ao: Box<dyn Kernel<D, RawAoArgs>>,
    pub blur: Box<dyn Kernel<D, BlurArgs>>,
}

impl<D: ?Sized> fmt::Debug for KernelSet<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSet")
            .field("reconstruct_csz", &self.reconstruct_csz.name())
            .field("minify", &self.minify.name())
            .field("raw_ao", &self.raw_ao.name())
            .field("blur", &self.blur.name())
            .finish()
    }
}

/// Source of kernel sets, consulted on first use and on every reload.
pub trait KernelLoader<D: ?Sized> {
    fn load(&self, device: &mut D) -> Result<KernelSet<D>>;
}
