//! Render targets owned by one pipeline instance.

use tracing::debug;

use crate::config::DepthPrecision;
use crate::device::{Attachment, FramebufferId, RenderDevice, TextureDesc, TextureFormat, TextureId, WHITE};
use crate::util::{Error, Result};

/// Targets and framebuffers of an allocated [`BufferSet`].
///
/// All targets share `width x height`.
#[derive(Debug, Clone)]
pub struct Buffers {
    pub width: u32,
    pub height: u32,
    /// Format picked for the camera-space depth pyramid
    pub csz_format: TextureFormat,
    /// Camera-space depth with `max_mip_level + 1` levels
    pub csz_buffer: TextureId,
    /// One framebuffer per pyramid level
    pub csz_framebuffers: Vec<FramebufferId>,
    pub raw_ao_buffer: TextureId,
    pub raw_ao_framebuffer: FramebufferId,
    pub h_blurred_buffer: TextureId,
    pub h_blurred_framebuffer: FramebufferId,
}

impl Buffers {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn textures(&self) -> [TextureId; 3] {
        [self.csz_buffer, self.raw_ao_buffer, self.h_blurred_buffer]
    }

    /// Every framebuffer, pyramid levels first.
    pub fn framebuffers(&self) -> impl Iterator<Item = FramebufferId> + '_ {
        self.csz_framebuffers
            .iter()
            .copied()
            .chain([self.raw_ao_framebuffer, self.h_blurred_framebuffer])
    }
}

#[derive(Debug, Clone, Default)]
pub enum BufferState {
    #[default]
    Unallocated,
    Allocated(Buffers),
}

/// Lazily allocated render targets, resized in place on demand.
#[derive(Debug, Clone)]
pub struct BufferSet {
    precision: DepthPrecision,
    max_mip_level: u32,
    state: BufferState,
}

impl BufferSet {
    pub fn new(precision: DepthPrecision, max_mip_level: u32) -> Self {
        Self {
            precision,
            max_mip_level,
            state: BufferState::Unallocated,
        }
    }

    pub fn precision(&self) -> DepthPrecision {
        self.precision
    }

    pub fn max_mip_level(&self) -> u32 {
        self.max_mip_level
    }

    pub fn state(&self) -> &BufferState {
        &self.state
    }

    pub fn buffers(&self) -> Option<&Buffers> {
        match &self.state {
            BufferState::Allocated(b) => Some(b),
            BufferState::Unallocated => None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self.state, BufferState::Allocated(_))
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.buffers().map(Buffers::size)
    }

    /// Make every target `width x height`.
    ///
    /// Allocates on first use; afterwards resizes in place and rebinds every
    /// framebuffer. Calling with the current size does nothing.
    ///
    /// Fresh raw-AO and horizontal-blur storage is filled white (unoccluded,
    /// key 1) since the stages only write inside the guard band and the blur
    /// reads past it.
    pub fn ensure_size<D: RenderDevice + ?Sized>(&mut self, device: &mut D, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions(width, height));
        }

        match &mut self.state {
            BufferState::Allocated(b) if b.size() == (width, height) => return Ok(()),
            BufferState::Allocated(b) => {
                debug!("resizing SAO buffers {}x{} -> {}x{}", b.width, b.height, width, height);
                for tex in b.textures() {
                    device.resize_texture(tex, width, height)?;
                }
                b.width = width;
                b.height = height;
            }
            BufferState::Unallocated => {
                let buffers = self.allocate(device, width, height)?;
                self.state = BufferState::Allocated(buffers);
            }
        }

        if let BufferState::Allocated(b) = &self.state {
            fill_visibility_targets(device, b)?;
            rebind(device, b)?;
        }
        Ok(())
    }

    fn allocate<D: RenderDevice + ?Sized>(&self, device: &mut D, width: u32, height: u32) -> Result<Buffers> {
        let csz_format = select_csz_format(device, self.precision);
        debug!(
            "allocating SAO buffers {}x{} (csz {}, {} levels)",
            width,
            height,
            csz_format.name(),
            self.max_mip_level + 1
        );

        let raw_ao_buffer = device.create_texture(&TextureDesc::new("rawAOBuffer", width, height, TextureFormat::Rgb8))?;
        let h_blurred_buffer =
            device.create_texture(&TextureDesc::new("hBlurredBuffer", width, height, TextureFormat::Rgb8))?;
        let csz_buffer = device.create_texture(
            &TextureDesc::new("cszBuffer", width, height, csz_format).with_mip_levels(self.max_mip_level + 1),
        )?;

        let csz_framebuffers = (0..=self.max_mip_level)
            .map(|i| device.create_framebuffer(&format!("cszFramebuffers[{i}]")))
            .collect();

        Ok(Buffers {
            width,
            height,
            csz_format,
            csz_buffer,
            csz_framebuffers,
            raw_ao_buffer,
            raw_ao_framebuffer: device.create_framebuffer("rawAOFramebuffer"),
            h_blurred_buffer,
            h_blurred_framebuffer: device.create_framebuffer("hBlurredFramebuffer"),
        })
    }

    /// Destroy every target and return to the unallocated state.
    pub fn release<D: RenderDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        if let BufferState::Allocated(b) = std::mem::take(&mut self.state) {
            debug!("releasing SAO buffers {}x{}", b.width, b.height);
            for tex in b.textures() {
                device.destroy_texture(tex)?;
            }
        }
        Ok(())
    }
}

/// First pyramid format the device can render to; the last candidate is
/// used unconditionally.
pub fn select_csz_format<D: RenderDevice + ?Sized>(device: &D, precision: DepthPrecision) -> TextureFormat {
    let candidates = precision.candidates();
    let (last, preferred) = match candidates.split_last() {
        Some(split) => split,
        None => return TextureFormat::R32F,
    };
    for &format in preferred {
        if device.supports_render_target(format) {
            return format;
        }
        debug!("{} not renderable on {}, trying next format", format.name(), device.name());
    }
    *last
}

fn fill_visibility_targets<D: RenderDevice + ?Sized>(device: &mut D, b: &Buffers) -> Result<()> {
    device.fill_texture(b.raw_ao_buffer, 0, WHITE)?;
    device.fill_texture(b.h_blurred_buffer, 0, WHITE)
}

fn rebind<D: RenderDevice + ?Sized>(device: &mut D, b: &Buffers) -> Result<()> {
    device.attach(b.raw_ao_framebuffer, Attachment::Color0, b.raw_ao_buffer, 0)?;
    device.attach(b.h_blurred_framebuffer, Attachment::Color0, b.h_blurred_buffer, 0)?;
    for (level, fb) in b.csz_framebuffers.iter().enumerate() {
        device.attach(*fb, Attachment::Color0, b.csz_buffer, level as u32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;

    #[test]
    fn test_format_fallback_order() {
        let device = CpuDevice::new();
        assert_eq!(select_csz_format(&device, DepthPrecision::Full), TextureFormat::R32F);
        assert_eq!(select_csz_format(&device, DepthPrecision::Half), TextureFormat::R16F);

        let device = CpuDevice::with_unsupported_formats(&[TextureFormat::R32F]);
        assert_eq!(select_csz_format(&device, DepthPrecision::Full), TextureFormat::L32F);

        let device = CpuDevice::with_unsupported_formats(&[TextureFormat::R32F, TextureFormat::L32F]);
        assert_eq!(select_csz_format(&device, DepthPrecision::Full), TextureFormat::Rg32F);

        let device = CpuDevice::with_unsupported_formats(&[TextureFormat::R16F]);
        assert_eq!(select_csz_format(&device, DepthPrecision::Half), TextureFormat::L16F);
    }

    #[test]
    fn test_zero_size_rejected_without_state_change() {
        let mut device = CpuDevice::new();
        let mut set = BufferSet::new(DepthPrecision::Full, 5);
        assert!(matches!(set.ensure_size(&mut device, 0, 10), Err(Error::InvalidDimensions(0, 10))));
        assert!(!set.is_allocated());
        assert_eq!(device.stats().textures_created, 0);
    }

    #[test]
    fn test_visibility_targets_start_white() {
        let mut device = CpuDevice::new();
        let mut set = BufferSet::new(DepthPrecision::Full, 2);
        set.ensure_size(&mut device, 8, 4).unwrap();
        let b = set.buffers().unwrap().clone();
        for tex in [b.raw_ao_buffer, b.h_blurred_buffer] {
            assert!(device.read_texture(tex, 0).unwrap().iter().all(|&v| v == 1.0));
        }

        // Resizing discards contents, the fill is repeated
        set.ensure_size(&mut device, 12, 6).unwrap();
        for tex in [b.raw_ao_buffer, b.h_blurred_buffer] {
            let data = device.read_texture(tex, 0).unwrap();
            assert_eq!(data.len(), 12 * 6 * 3);
            assert!(data.iter().all(|&v| v == 1.0));
        }
    }

    #[test]
    fn test_release() {
        let mut device = CpuDevice::new();
        let mut set = BufferSet::new(DepthPrecision::Half, 3);
        set.ensure_size(&mut device, 32, 16).unwrap();
        let b = set.buffers().unwrap().clone();
        assert_eq!(b.csz_framebuffers.len(), 4);
        assert_eq!(device.mip_level_count(b.csz_buffer).unwrap(), 4);

        set.release(&mut device).unwrap();
        assert!(!set.is_allocated());
        assert_eq!(device.stats().textures_destroyed, 3);
        assert!(device.texture_size(b.raw_ao_buffer, 0).is_err());
    }
}
