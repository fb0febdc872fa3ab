//! Software texture storage.
//!
//! Every level is kept as tightly packed `f32` channels. Writes go through
//! [`TextureFormat`] quantization so that 8-bit and half-float targets hold
//! exactly what the corresponding GPU format would.

use half::f16;

use super::{mip_extent, TextureFormat};

/// One mip level.
#[derive(Clone, Debug, Default)]
pub(crate) struct Plane {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl Plane {
    fn new(width: u32, height: u32, channels: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * channels],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// CPU-side texture with a full mip chain.
#[derive(Clone, Debug)]
pub struct CpuTexture {
    pub(crate) label: String,
    pub(crate) format: TextureFormat,
    pub(crate) levels: Vec<Plane>,
    /// Bumped on every resize; framebuffers remember the value they bound.
    pub(crate) generation: u64,
}

impl CpuTexture {
    pub(crate) fn new(label: &str, width: u32, height: u32, format: TextureFormat, mip_levels: u32) -> Self {
        let mut tex = Self {
            label: label.to_string(),
            format,
            levels: Vec::new(),
            generation: 0,
        };
        tex.allocate(width, height, mip_levels.max(1));
        tex
    }

    fn allocate(&mut self, width: u32, height: u32, mip_levels: u32) {
        let channels = self.format.channels();
        self.levels = (0..mip_levels)
            .map(|level| {
                let (w, h) = mip_extent(width, height, level);
                Plane::new(w, h, channels)
            })
            .collect();
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        let count = self.levels.len() as u32;
        self.allocate(width, height, count);
        self.generation += 1;
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn size(&self, level: u32) -> Option<(u32, u32)> {
        self.levels
            .get(level as usize)
            .map(|p| (p.width, p.height))
    }

    /// Clamp-to-edge texel fetch, RGBA expanded.
    ///
    /// Missing channels read as `(0, 0, 1)`; luminance formats replicate.
    #[inline]
    pub fn fetch(&self, level: u32, x: i32, y: i32) -> [f32; 4] {
        let Some(plane) = self.levels.get(level as usize) else {
            return [0.0, 0.0, 0.0, 1.0];
        };
        if plane.is_empty() {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let x = x.clamp(0, plane.width as i32 - 1) as usize;
        let y = y.clamp(0, plane.height as i32 - 1) as usize;
        let channels = self.format.channels();
        let base = (y * plane.width as usize + x) * channels;
        expand(self.format, &plane.data[base..base + channels])
    }

    /// Raw channel data of one level.
    pub fn level_data(&self, level: u32) -> Option<&[f32]> {
        self.levels.get(level as usize).map(|p| p.data.as_slice())
    }
}

/// Expand stored channels to RGBA.
#[inline]
pub(crate) fn expand(format: TextureFormat, texel: &[f32]) -> [f32; 4] {
    match texel.len() {
        1 if format.is_luminance() => [texel[0], texel[0], texel[0], 1.0],
        1 => [texel[0], 0.0, 0.0, 1.0],
        2 => [texel[0], texel[1], 0.0, 1.0],
        _ => [texel[0], texel[1], texel[2], 1.0],
    }
}

/// Write an RGBA value into stored channels with format quantization.
#[inline]
pub(crate) fn store(format: TextureFormat, value: [f32; 4], dst: &mut [f32]) {
    for (c, out) in dst.iter_mut().enumerate() {
        *out = quantize(format, value[c]);
    }
}

#[inline]
pub(crate) fn quantize(format: TextureFormat, v: f32) -> f32 {
    match format {
        TextureFormat::R8 | TextureFormat::Rgb8 => unorm8(v),
        TextureFormat::R16F | TextureFormat::L16F => f16::from_f32(v).to_f32(),
        TextureFormat::R32F | TextureFormat::L32F | TextureFormat::Rg32F | TextureFormat::Depth32F => v,
    }
}

#[inline]
fn unorm8(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() / 255.0
}
