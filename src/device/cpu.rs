//! Software render device.
//!
//! Executes full-screen draws on the CPU. A draw walks the clip region in
//! 2x2 quads (so kernels can take screen-space derivatives the way a GPU
//! does), applies the depth test against the framebuffer's depth
//! attachment, and writes through the target format's quantization. Row
//! pairs are shaded in parallel with rayon; draws themselves run in
//! submission order.

use std::collections::HashSet;

use rayon::prelude::*;

use super::texture::{store, CpuTexture, Plane};
use super::{
    Attachment, DepthTest, DeviceStats, FramebufferId, PassState, RenderDevice, TextureDesc,
    TextureFormat, TextureId,
};
use crate::util::{Error, Rect2D, Result};

/// Largest texture edge accepted by the software device.
const MAX_DIMENSION: u32 = 16384;

/// Read-only view of every texture, handed to shaders during a draw.
#[derive(Debug, Default)]
pub struct TextureStore {
    textures: Vec<Option<CpuTexture>>,
}

impl TextureStore {
    pub fn get(&self, id: TextureId) -> Result<&CpuTexture> {
        self.textures
            .get(id.index())
            .and_then(|t| t.as_ref())
            .ok_or(Error::UnknownTexture(id))
    }

    fn get_mut(&mut self, id: TextureId) -> Result<&mut CpuTexture> {
        self.textures
            .get_mut(id.index())
            .and_then(|t| t.as_mut())
            .ok_or(Error::UnknownTexture(id))
    }

    /// Clamp-to-edge fetch; unknown textures read as opaque black.
    #[inline]
    pub fn fetch(&self, id: TextureId, level: u32, x: i32, y: i32) -> [f32; 4] {
        match self.textures.get(id.index()).and_then(|t| t.as_ref()) {
            Some(tex) => tex.fetch(level, x, y),
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Size of a level, `(1, 1)` for unknown textures or levels.
    #[inline]
    pub fn size(&self, id: TextureId, level: u32) -> (u32, u32) {
        self.textures
            .get(id.index())
            .and_then(|t| t.as_ref())
            .and_then(|t| t.size(level))
            .unwrap_or((1, 1))
    }

    pub fn mip_levels(&self, id: TextureId) -> u32 {
        self.textures
            .get(id.index())
            .and_then(|t| t.as_ref())
            .map(|t| t.mip_levels())
            .unwrap_or(0)
    }
}

/// Per-pixel program run by [`CpuDevice::apply_rect`].
pub trait PixelShader: Sync {
    /// Value for pixel `(x, y)`.
    fn shade(&self, textures: &TextureStore, x: u32, y: u32) -> [f32; 4];

    /// Values for the quad whose top-left pixel is `(x, y)` (both even),
    /// ordered top-left, top-right, bottom-left, bottom-right.
    ///
    /// Override when the program needs derivatives across the quad.
    fn shade_quad(&self, textures: &TextureStore, x: u32, y: u32) -> [[f32; 4]; 4] {
        [
            self.shade(textures, x, y),
            self.shade(textures, x + 1, y),
            self.shade(textures, x, y + 1),
            self.shade(textures, x + 1, y + 1),
        ]
    }
}

#[derive(Clone, Copy, Debug)]
struct Binding {
    texture: TextureId,
    level: u32,
    generation: u64,
}

#[derive(Debug)]
struct Framebuffer {
    label: String,
    color: Option<Binding>,
    depth: Option<Binding>,
}

impl Framebuffer {
    fn slot_mut(&mut self, slot: Attachment) -> &mut Option<Binding> {
        match slot {
            Attachment::Color0 => &mut self.color,
            Attachment::Depth => &mut self.depth,
        }
    }
}

/// CPU implementation of [`RenderDevice`].
#[derive(Debug, Default)]
pub struct CpuDevice {
    store: TextureStore,
    framebuffers: Vec<Framebuffer>,
    unsupported: HashSet<TextureFormat>,
    stats: DeviceStats,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that refuses to render to `formats`, for exercising
    /// capability fallbacks.
    pub fn with_unsupported_formats(formats: &[TextureFormat]) -> Self {
        Self {
            unsupported: formats.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn textures(&self) -> &TextureStore {
        &self.store
    }

    pub fn texture(&self, id: TextureId) -> Result<&CpuTexture> {
        self.store.get(id)
    }

    /// Upload raw channel data into one level (quantized to the format).
    pub fn write_texture(&mut self, id: TextureId, level: u32, data: &[f32]) -> Result<()> {
        let tex = self.store.get_mut(id)?;
        let format = tex.format;
        let count = tex.mip_levels();
        let plane = tex
            .levels
            .get_mut(level as usize)
            .ok_or(Error::MipOutOfRange { level, count })?;
        if data.len() != plane.data.len() {
            return Err(Error::DataLength {
                expected: plane.data.len(),
                actual: data.len(),
            });
        }
        let channels = format.channels();
        for (dst, src) in plane.data.chunks_mut(channels).zip(data.chunks(channels)) {
            let mut value = [0.0, 0.0, 0.0, 1.0];
            value[..channels].copy_from_slice(src);
            store(format, value, dst);
        }
        Ok(())
    }

    /// Copy of one level's stored channels.
    pub fn read_texture(&self, id: TextureId, level: u32) -> Result<Vec<f32>> {
        let tex = self.store.get(id)?;
        tex.level_data(level)
            .map(|d| d.to_vec())
            .ok_or(Error::MipOutOfRange {
                level,
                count: tex.mip_levels(),
            })
    }

    /// One channel of one level, row-major.
    pub fn read_channel(&self, id: TextureId, level: u32, channel: usize) -> Result<Vec<f32>> {
        let tex = self.store.get(id)?;
        let channels = tex.format.channels();
        if channel >= channels {
            return Err(Error::other(format!(
                "channel {channel} out of range for {}",
                tex.format.name()
            )));
        }
        let data = tex.level_data(level).ok_or(Error::MipOutOfRange {
            level,
            count: tex.mip_levels(),
        })?;
        Ok(data.iter().skip(channel).step_by(channels).copied().collect())
    }

    fn framebuffer(&self, fb: FramebufferId) -> Result<&Framebuffer> {
        self.framebuffers
            .get(fb.index())
            .ok_or(Error::UnknownFramebuffer(fb))
    }

    fn check_current(&self, label: &str, binding: &Binding) -> Result<()> {
        let tex = self.store.get(binding.texture)?;
        if tex.generation != binding.generation {
            return Err(Error::StaleFramebuffer(label.to_string()));
        }
        Ok(())
    }

    /// Run `shader` over the pass region of `pass.target`.
    ///
    /// The clear (if any) and the draw are both restricted to the clip
    /// region; pixels outside it keep their previous contents.
    pub fn apply_rect(&mut self, pass: &PassState, shader: &dyn PixelShader) -> Result<()> {
        let fb = self.framebuffer(pass.target)?;
        let color = fb
            .color
            .ok_or_else(|| Error::MissingColorAttachment(fb.label.clone()))?;
        self.check_current(&fb.label, &color)?;
        let depth = match pass.depth_test {
            DepthTest::Disabled => None,
            _ => {
                let binding = fb.depth.ok_or_else(|| {
                    Error::Device(format!("framebuffer '{}' has no depth attachment", fb.label))
                })?;
                self.check_current(&fb.label, &binding)?;
                if binding.texture == color.texture {
                    return Err(Error::Device(format!(
                        "framebuffer '{}' reads and writes the same texture",
                        fb.label
                    )));
                }
                Some(binding)
            }
        };

        let format = self.store.get(color.texture)?.format;
        if format.is_depth() {
            return Err(Error::UnsupportedFormat {
                format,
                usage: "color target",
            });
        }

        // Move the target level out of the store so shaders can read every
        // other level (including siblings in the same mip chain) while it
        // is written.
        let mut plane = {
            let tex = self.store.get_mut(color.texture)?;
            std::mem::take(&mut tex.levels[color.level as usize])
        };
        let result = self.shade_plane(&mut plane, format, pass, depth, shader);
        self.store.get_mut(color.texture)?.levels[color.level as usize] = plane;

        self.stats.draws += 1;
        result
    }

    fn shade_plane(
        &self,
        plane: &mut Plane,
        format: TextureFormat,
        pass: &PassState,
        depth: Option<Binding>,
        shader: &dyn PixelShader,
    ) -> Result<()> {
        let width = plane.width;
        let region = pass.region(Rect2D::from_size(plane.width, plane.height));
        if region.is_empty() {
            return Ok(());
        }

        let depth_plane = match depth {
            Some(binding) => {
                let tex = self.store.get(binding.texture)?;
                let level = &tex.levels[binding.level as usize];
                if (level.width, level.height) != (plane.width, plane.height) {
                    return Err(Error::Device(format!(
                        "depth attachment is {}x{}, color target is {}x{}",
                        level.width, level.height, plane.width, plane.height
                    )));
                }
                Some((level, tex.format.channels()))
            }
            None => None,
        };

        let channels = format.channels();
        let row_len = width as usize * channels;
        let clear = pass.clear_color;
        let depth_test = pass.depth_test;
        let rect_depth = pass.rect_depth;
        let textures = &self.store;

        plane
            .data
            .par_chunks_mut(row_len * 2)
            .enumerate()
            .for_each(|(pair, rows)| {
                let y0 = pair as u32 * 2;
                let rows_here = (rows.len() / row_len) as u32;
                if y0 + rows_here <= region.y0 || y0 >= region.y1 {
                    return;
                }

                if let Some(color) = clear {
                    for dy in 0..rows_here {
                        if !(region.y0..region.y1).contains(&(y0 + dy)) {
                            continue;
                        }
                        let row = &mut rows[dy as usize * row_len..(dy as usize + 1) * row_len];
                        for x in region.x0..region.x1 {
                            let i = x as usize * channels;
                            store(format, color, &mut row[i..i + channels]);
                        }
                    }
                }

                let passes = |x: u32, y: u32| -> bool {
                    if y - y0 >= rows_here || !region.contains(x, y) {
                        return false;
                    }
                    match depth_plane {
                        Some((level, depth_channels)) => {
                            let stored = level.data[(y as usize * width as usize + x as usize) * depth_channels];
                            depth_test.passes(rect_depth, stored)
                        }
                        None => true,
                    }
                };

                let mut qx = region.x0 & !1;
                while qx < region.x1 {
                    let mut mask = [false; 4];
                    for (i, m) in mask.iter_mut().enumerate() {
                        *m = passes(qx + (i as u32 & 1), y0 + (i as u32 >> 1));
                    }
                    if mask.iter().any(|&m| m) {
                        let out = shader.shade_quad(textures, qx, y0);
                        for (i, value) in out.iter().enumerate() {
                            if !mask[i] {
                                continue;
                            }
                            let x = (qx + (i as u32 & 1)) as usize;
                            let dy = i >> 1;
                            let at = dy * row_len + x * channels;
                            store(format, *value, &mut rows[at..at + channels]);
                        }
                    }
                    qx += 2;
                }
            });
        Ok(())
    }
}

impl RenderDevice for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn supports_render_target(&self, format: TextureFormat) -> bool {
        !format.is_depth() && !self.unsupported.contains(&format)
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 || desc.width > MAX_DIMENSION || desc.height > MAX_DIMENSION {
            return Err(Error::InvalidDimensions(desc.width, desc.height));
        }
        let id = TextureId(self.store.textures.len() as u32);
        self.store.textures.push(Some(CpuTexture::new(
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels,
        )));
        self.stats.textures_created += 1;
        Ok(id)
    }

    fn resize_texture(&mut self, id: TextureId, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(Error::InvalidDimensions(width, height));
        }
        self.store.get_mut(id)?.resize(width, height);
        self.stats.textures_resized += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        let slot = self
            .store
            .textures
            .get_mut(id.index())
            .ok_or(Error::UnknownTexture(id))?;
        if slot.take().is_none() {
            return Err(Error::UnknownTexture(id));
        }
        self.stats.textures_destroyed += 1;
        Ok(())
    }

    fn texture_size(&self, id: TextureId, level: u32) -> Result<(u32, u32)> {
        let tex = self.store.get(id)?;
        tex.size(level).ok_or(Error::MipOutOfRange {
            level,
            count: tex.mip_levels(),
        })
    }

    fn texture_format(&self, id: TextureId) -> Result<TextureFormat> {
        Ok(self.store.get(id)?.format)
    }

    fn mip_level_count(&self, id: TextureId) -> Result<u32> {
        Ok(self.store.get(id)?.mip_levels())
    }

    fn fill_texture(&mut self, id: TextureId, level: u32, value: [f32; 4]) -> Result<()> {
        let tex = self.store.get_mut(id)?;
        let format = tex.format;
        let count = tex.mip_levels();
        let plane = tex
            .levels
            .get_mut(level as usize)
            .ok_or(Error::MipOutOfRange { level, count })?;
        for dst in plane.data.chunks_mut(format.channels()) {
            store(format, value, dst);
        }
        Ok(())
    }

    fn create_framebuffer(&mut self, label: &str) -> FramebufferId {
        let id = FramebufferId(self.framebuffers.len() as u32);
        self.framebuffers.push(Framebuffer {
            label: label.to_string(),
            color: None,
            depth: None,
        });
        self.stats.framebuffers_created += 1;
        id
    }

    fn attach(&mut self, fb: FramebufferId, slot: Attachment, texture: TextureId, level: u32) -> Result<()> {
        let tex = self.store.get(texture)?;
        if level >= tex.mip_levels() {
            return Err(Error::MipOutOfRange {
                level,
                count: tex.mip_levels(),
            });
        }
        match slot {
            Attachment::Color0 if tex.format.is_depth() => {
                return Err(Error::UnsupportedFormat {
                    format: tex.format,
                    usage: "color attachment",
                })
            }
            Attachment::Depth if tex.format.channels() != 1 => {
                return Err(Error::UnsupportedFormat {
                    format: tex.format,
                    usage: "depth attachment",
                })
            }
            _ => {}
        }
        let binding = Binding {
            texture,
            level,
            generation: tex.generation,
        };
        let framebuffer = self
            .framebuffers
            .get_mut(fb.index())
            .ok_or(Error::UnknownFramebuffer(fb))?;
        *framebuffer.slot_mut(slot) = Some(binding);
        self.stats.attachment_binds += 1;
        Ok(())
    }

    fn detach(&mut self, fb: FramebufferId, slot: Attachment) -> Result<()> {
        let framebuffer = self
            .framebuffers
            .get_mut(fb.index())
            .ok_or(Error::UnknownFramebuffer(fb))?;
        *framebuffer.slot_mut(slot) = None;
        Ok(())
    }

    fn framebuffer_size(&self, fb: FramebufferId) -> Result<(u32, u32)> {
        let framebuffer = self.framebuffer(fb)?;
        let color = framebuffer
            .color
            .ok_or_else(|| Error::MissingColorAttachment(framebuffer.label.clone()))?;
        self.texture_size(color.texture, color.level)
    }

    fn framebuffer_is_current(&self, fb: FramebufferId) -> Result<bool> {
        let framebuffer = self.framebuffer(fb)?;
        let current = [framebuffer.color, framebuffer.depth]
            .iter()
            .flatten()
            .all(|b| {
                self.store
                    .get(b.texture)
                    .map(|t| t.generation == b.generation)
                    .unwrap_or(false)
            });
        Ok(current)
    }

    fn submit(&mut self, _wait: bool) -> Result<()> {
        // Draws execute eagerly
        self.stats.submits += 1;
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::WHITE;

    struct Constant([f32; 4]);

    impl PixelShader for Constant {
        fn shade(&self, _: &TextureStore, _: u32, _: u32) -> [f32; 4] {
            self.0
        }
    }

    /// Writes the pixel coordinate so quad ordering is observable.
    struct Coords;

    impl PixelShader for Coords {
        fn shade(&self, _: &TextureStore, x: u32, y: u32) -> [f32; 4] {
            [x as f32, y as f32, 0.0, 1.0]
        }
    }

    fn target(device: &mut CpuDevice, w: u32, h: u32, format: TextureFormat) -> (TextureId, FramebufferId) {
        let tex = device
            .create_texture(&TextureDesc::new("target", w, h, format))
            .unwrap();
        let fb = device.create_framebuffer("fb");
        device.attach(fb, Attachment::Color0, tex, 0).unwrap();
        (tex, fb)
    }

    #[test]
    fn test_clip_restricts_clear_and_draw() {
        let mut device = CpuDevice::new();
        let (tex, fb) = target(&mut device, 6, 5, TextureFormat::R32F);
        device.fill_texture(tex, 0, [0.25; 4]).unwrap();

        let pass = PassState::new(fb)
            .with_clear(WHITE)
            .with_clip(Rect2D::xyxy(1, 1, 5, 4));
        device.apply_rect(&pass, &Constant([0.5; 4])).unwrap();

        let data = device.read_channel(tex, 0, 0).unwrap();
        for y in 0..5 {
            for x in 0..6 {
                let v = data[y * 6 + x];
                let inside = (1..5).contains(&x) && (1..4).contains(&y);
                assert_eq!(v, if inside { 0.5 } else { 0.25 }, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_quad_order_matches_coordinates() {
        let mut device = CpuDevice::new();
        let (tex, fb) = target(&mut device, 5, 3, TextureFormat::Rg32F);
        device.apply_rect(&PassState::new(fb), &Coords).unwrap();
        let data = device.read_texture(tex, 0).unwrap();
        for y in 0..3 {
            for x in 0..5 {
                let i = (y * 5 + x) * 2;
                assert_eq!((data[i], data[i + 1]), (x as f32, y as f32));
            }
        }
    }

    #[test]
    fn test_depth_test_skips_far_pixels() {
        let mut device = CpuDevice::new();
        let (tex, fb) = target(&mut device, 4, 1, TextureFormat::R32F);
        let depth = device
            .create_texture(&TextureDesc::new("depth", 4, 1, TextureFormat::Depth32F))
            .unwrap();
        device.write_texture(depth, 0, &[0.5, 1.0, 0.99, 1.0]).unwrap();
        device.attach(fb, Attachment::Depth, depth, 0).unwrap();

        let pass = PassState::new(fb)
            .with_clear(WHITE)
            .with_depth_test(DepthTest::Greater, 1.0);
        device.apply_rect(&pass, &Constant([0.0; 4])).unwrap();
        assert_eq!(device.read_channel(tex, 0, 0).unwrap(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_resize_makes_bindings_stale() {
        let mut device = CpuDevice::new();
        let (tex, fb) = target(&mut device, 4, 4, TextureFormat::R8);
        assert!(device.framebuffer_is_current(fb).unwrap());

        device.resize_texture(tex, 8, 8).unwrap();
        assert!(!device.framebuffer_is_current(fb).unwrap());
        let err = device.apply_rect(&PassState::new(fb), &Constant(WHITE)).unwrap_err();
        assert!(matches!(err, Error::StaleFramebuffer(_)));

        device.attach(fb, Attachment::Color0, tex, 0).unwrap();
        assert!(device.framebuffer_is_current(fb).unwrap());
        assert_eq!(device.framebuffer_size(fb).unwrap(), (8, 8));
    }

    #[test]
    fn test_unsupported_formats() {
        let device = CpuDevice::with_unsupported_formats(&[TextureFormat::R32F]);
        assert!(!device.supports_render_target(TextureFormat::R32F));
        assert!(device.supports_render_target(TextureFormat::L32F));
        assert!(!device.supports_render_target(TextureFormat::Depth32F));
    }

    #[test]
    fn test_destroy_texture() {
        let mut device = CpuDevice::new();
        let tex = device
            .create_texture(&TextureDesc::new("t", 2, 2, TextureFormat::R8))
            .unwrap();
        device.destroy_texture(tex).unwrap();
        assert!(matches!(device.texture_size(tex, 0), Err(Error::UnknownTexture(_))));
        assert!(device.destroy_texture(tex).is_err());
        assert_eq!(device.stats().textures_destroyed, 1);
    }
}
