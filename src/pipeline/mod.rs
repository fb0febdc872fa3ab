//! The SAO pipeline driver.
//!
//! One [`Sao`] instance owns its render targets ([`BufferSet`]) and kernels
//! and runs four stages per frame:
//!
//! 1. depth pyramid (reconstruct level 0, minify the rest)
//! 2. raw obscurance inside the guard band, skipping sky pixels
//! 3. horizontal blur into the intermediate target
//! 4. vertical blur into the caller's output framebuffer
//!
//! Use one instance per output resolution; resizing is supported but
//! reallocates every target.

mod blur;
mod buffers;
mod estimate;
mod pyramid;

pub use buffers::{select_csz_format, BufferSet, BufferState, Buffers};

use std::time::{Duration, Instant};

use tracing::{debug, info_span};

use crate::camera::Camera;
use crate::config::SaoConfig;
use crate::constants::SaoConstants;
use crate::device::{CpuDevice, FramebufferId, RenderDevice, TextureId};
use crate::kernel::{CpuKernelLoader, KernelLoader, KernelSet};
use crate::settings::{check_radius, SaoSettings};
use crate::util::{Error, Rect2D, Result};

/// Wall-clock time of each stage of the last profiled frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassTimings {
    pub pyramid: Duration,
    pub raw_ao: Duration,
    pub blur_horizontal: Duration,
    pub blur_vertical: Duration,
    pub total: Duration,
}

/// Screen-space ambient obscurance over a [`RenderDevice`].
pub struct Sao<D: RenderDevice> {
    settings: SaoSettings,
    buffers: BufferSet,
    loader: Box<dyn KernelLoader<D>>,
    kernels: Option<KernelSet<D>>,
    profiling: bool,
    last_timings: Option<PassTimings>,
}

impl Sao<CpuDevice> {
    /// Pipeline on the software device with the reference kernels.
    pub fn cpu(config: &SaoConfig) -> Result<Self> {
        Self::new(config, CpuKernelLoader)
    }
}

#[cfg(feature = "gpu")]
impl Sao<crate::device::WgpuDevice> {
    /// Pipeline on wgpu with the WGSL kernels, reading overrides from
    /// `config.kernel_dir` when set.
    pub fn gpu(config: &SaoConfig) -> Result<Self> {
        let loader = match &config.kernel_dir {
            Some(dir) => crate::kernel::WgslKernelLoader::with_dir(dir),
            None => crate::kernel::WgslKernelLoader::new(),
        };
        Self::new(config, loader)
    }
}

impl<D: RenderDevice> Sao<D> {
    /// Create an instance. Nothing is allocated or loaded until the first
    /// [`compute`](Self::compute).
    pub fn new(config: &SaoConfig, loader: impl KernelLoader<D> + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            settings: config.settings,
            buffers: BufferSet::new(config.z_bits, config.max_mip_level),
            loader: Box::new(loader),
            kernels: None,
            profiling: false,
            last_timings: None,
        })
    }

    pub fn settings(&self) -> &SaoSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: SaoSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn radius(&self) -> f32 {
        self.settings.radius
    }

    /// Rejects non-positive radii, leaving the current value in place.
    pub fn set_radius(&mut self, radius: f32) -> Result<()> {
        check_radius(radius)?;
        self.settings.radius = radius;
        Ok(())
    }

    pub fn bias(&self) -> f32 {
        self.settings.bias
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.settings.bias = bias;
    }

    pub fn intensity(&self) -> f32 {
        self.settings.intensity
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.settings.intensity = intensity;
    }

    pub fn buffers(&self) -> &BufferSet {
        &self.buffers
    }

    pub fn kernels_loaded(&self) -> bool {
        self.kernels.is_some()
    }

    /// Submit and wait after every stage and record [`PassTimings`].
    pub fn set_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
        if !enabled {
            self.last_timings = None;
        }
    }

    pub fn last_timings(&self) -> Option<PassTimings> {
        self.last_timings
    }

    /// Compute obscurance for `depth` seen through `camera` into `output`.
    ///
    /// Constants are derived over the whole depth buffer, guard band
    /// included.
    pub fn compute(
        &mut self,
        device: &mut D,
        depth: TextureId,
        camera: &Camera,
        guard_band: u32,
        output: FramebufferId,
    ) -> Result<()> {
        let (width, height) = depth_size(device, depth)?;
        let constants = SaoConstants::from_camera(camera, width, height);
        self.compute_with_constants(device, depth, &constants, guard_band, output)
    }

    /// Compute obscurance from precomputed constants.
    ///
    /// Every argument is validated before any buffer, kernel or device state
    /// is touched.
    #[tracing::instrument(skip_all, fields(guard_band = guard_band))]
    pub fn compute_with_constants(
        &mut self,
        device: &mut D,
        depth: TextureId,
        constants: &SaoConstants,
        guard_band: u32,
        output: FramebufferId,
    ) -> Result<()> {
        let (width, height) = depth_size(device, depth)?;
        constants.validate()?;
        let clip = Rect2D::inside_guard_band(width, height, guard_band)?;
        let (out_w, out_h) = device.framebuffer_size(output)?;
        if (out_w, out_h) != (width, height) {
            return Err(Error::TargetSizeMismatch {
                expected_width: width,
                expected_height: height,
                actual_width: out_w,
                actual_height: out_h,
            });
        }

        if self.kernels.is_none() {
            self.reload_kernels(device)?;
        }
        self.buffers.ensure_size(device, width, height)?;

        let (Some(kernels), Some(buffers)) = (self.kernels.as_ref(), self.buffers.buffers()) else {
            return Err(Error::other("pipeline state lost after allocation"));
        };
        let settings = self.settings;
        let profiling = self.profiling;

        let mut stage_timer = StageTimer::new(profiling);
        {
            let _span = info_span!("sao_pyramid").entered();
            pyramid::build_pyramid(device, kernels, buffers, depth, constants.clip_info)?;
        }
        let t_pyramid = stage_timer.lap(device)?;
        {
            let _span = info_span!("sao_raw_ao").entered();
            estimate::estimate_raw_ao(device, kernels, buffers, depth, constants, &settings, clip)?;
        }
        let t_raw_ao = stage_timer.lap(device)?;
        let blur_span = info_span!("sao_blur").entered();
        blur::blur_axis(
            device,
            kernels,
            buffers.raw_ao_buffer,
            blur::HORIZONTAL,
            clip,
            buffers.h_blurred_framebuffer,
        )?;
        let t_blur_h = stage_timer.lap(device)?;
        blur::blur_axis(device, kernels, buffers.h_blurred_buffer, blur::VERTICAL, clip, output)?;
        let t_blur_v = stage_timer.lap(device)?;
        drop(blur_span);

        if profiling {
            let timings = PassTimings {
                pyramid: t_pyramid,
                raw_ao: t_raw_ao,
                blur_horizontal: t_blur_h,
                blur_vertical: t_blur_v,
                total: stage_timer.total(),
            };
            debug!(
                "SAO {}x{}: pyramid {:?}, raw AO {:?}, blur {:?} + {:?}, total {:?}",
                width,
                height,
                timings.pyramid,
                timings.raw_ao,
                timings.blur_horizontal,
                timings.blur_vertical,
                timings.total
            );
            self.last_timings = Some(timings);
        } else {
            device.submit(false)?;
        }
        Ok(())
    }

    /// Re-acquire all four kernels from the loader.
    ///
    /// On failure the previous kernels stay in place. Buffers and their
    /// contents are not touched.
    pub fn reload_kernels(&mut self, device: &mut D) -> Result<()> {
        let kernels = self.loader.load(device)?;
        debug!("loaded kernels {:?}", kernels);
        self.kernels = Some(kernels);
        Ok(())
    }

    /// Regenerate one pyramid level (>= 1) from the current contents of the
    /// level above it.
    pub fn minify_level(&mut self, device: &mut D, level: u32) -> Result<()> {
        let (Some(kernels), Some(buffers)) = (self.kernels.as_ref(), self.buffers.buffers()) else {
            return Err(Error::other("minify_level called before the first compute"));
        };
        pyramid::minify_level(device, kernels, buffers, level)
    }

    /// Free every render target. The next compute allocates again.
    pub fn release(&mut self, device: &mut D) -> Result<()> {
        self.buffers.release(device)
    }
}

fn depth_size<D: RenderDevice + ?Sized>(device: &D, depth: TextureId) -> Result<(u32, u32)> {
    device.texture_size(depth, 0).map_err(|e| match e {
        Error::UnknownTexture(id) => Error::MissingDepthBuffer(id),
        other => other,
    })
}

/// Measures stages when profiling; otherwise a no-op.
struct StageTimer {
    enabled: bool,
    start: Instant,
    last: Instant,
}

impl StageTimer {
    fn new(enabled: bool) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            start: now,
            last: now,
        }
    }

    /// Wait for the device and return the time since the previous lap.
    fn lap<D: RenderDevice + ?Sized>(&mut self, device: &mut D) -> Result<Duration> {
        if !self.enabled {
            return Ok(Duration::ZERO);
        }
        device.submit(true)?;
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        Ok(elapsed)
    }

    fn total(&self) -> Duration {
        self.last - self.start
    }
}

impl<D: RenderDevice> std::fmt::Debug for Sao<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sao")
            .field("settings", &self.settings)
            .field("buffers", &self.buffers)
            .field("kernels", &self.kernels)
            .field("profiling", &self.profiling)
            .finish()
    }
}
