//! Render device abstraction.
//!
//! The pipeline only needs a small slice of a graphics API: 2D textures with
//! mip chains, framebuffers that bind one texture mip as color target and
//! optionally a depth texture, capability probing and submission. Drawing
//! itself is backend specific and lives with the kernels, which receive a
//! [`PassState`] describing the target, clear, clip and depth test.
//!
//! Backends:
//! - [`CpuDevice`] - software device, always available
//! - `WgpuDevice` - wgpu device (feature `gpu`)

mod cpu;
mod texture;
#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::{CpuDevice, PixelShader, TextureStore};
pub use texture::CpuTexture;
#[cfg(feature = "gpu")]
pub use gpu::{FullscreenProgram, GpuBinding, MipRange, WgpuDevice};

use crate::util::{Rect2D, Result};

/// Clear color meaning "no occlusion".
pub const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Clear color for depth pyramid levels.
pub const BLACK: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

/// Handle to a texture owned by (or imported into) a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u32);

/// Handle to a framebuffer (a set of attachment bindings).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub(crate) u32);

impl TextureId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl FramebufferId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage formats understood by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit unorm, one channel (final occlusion surfaces)
    R8,
    /// 8-bit unorm, three channels (occlusion + packed depth key)
    Rgb8,
    /// Half float, red channel
    R16F,
    /// Half float, luminance
    L16F,
    /// Float, red channel
    R32F,
    /// Float, luminance
    L32F,
    /// Float, two channels
    Rg32F,
    /// 32-bit float depth (stencil, if any, is ignored)
    Depth32F,
}

impl TextureFormat {
    /// Number of stored channels.
    pub fn channels(self) -> usize {
        match self {
            Self::R8 | Self::R16F | Self::L16F | Self::R32F | Self::L32F | Self::Depth32F => 1,
            Self::Rg32F => 2,
            Self::Rgb8 => 3,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32F)
    }

    /// Luminance formats replicate their single channel into RGB on read.
    pub fn is_luminance(self) -> bool {
        matches!(self, Self::L16F | Self::L32F)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::R8 => "R8",
            Self::Rgb8 => "RGB8",
            Self::R16F => "R16F",
            Self::L16F => "L16F",
            Self::R32F => "R32F",
            Self::L32F => "L32F",
            Self::Rg32F => "RG32F",
            Self::Depth32F => "DEPTH32F",
        }
    }
}

/// Texture creation parameters.
#[derive(Clone, Debug)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Total number of levels (1 = no mip chain)
    pub mip_levels: u32,
}

impl<'a> TextureDesc<'a> {
    /// Single-level texture.
    pub fn new(label: &'a str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            mip_levels: 1,
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }
}

/// Size of mip `level` for a base size, never below one texel.
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let w = width.checked_shr(level).unwrap_or(0).max(1);
    let h = height.checked_shr(level).unwrap_or(0).max(1);
    (w, h)
}

/// Framebuffer attachment slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attachment {
    Color0,
    Depth,
}

/// Depth comparison applied to a full-screen rect at [`PassState::rect_depth`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DepthTest {
    /// No depth attachment consulted
    #[default]
    Disabled,
    /// Pass where `rect_depth > stored`
    Greater,
    /// Pass where `rect_depth >= stored`
    GreaterEqual,
}

impl DepthTest {
    #[inline]
    pub fn passes(self, rect_depth: f32, stored: f32) -> bool {
        match self {
            Self::Disabled => true,
            Self::Greater => rect_depth > stored,
            Self::GreaterEqual => rect_depth >= stored,
        }
    }
}

/// Fixed-function state of one full-screen draw.
#[derive(Clone, Copy, Debug)]
pub struct PassState {
    pub target: FramebufferId,
    /// Clear value applied to the clip region before drawing
    pub clear_color: Option<[f32; 4]>,
    /// Scissor region; `None` covers the whole viewport
    pub clip: Option<Rect2D>,
    pub depth_test: DepthTest,
    /// Window-space depth of the full-screen rect
    pub rect_depth: f32,
}

impl PassState {
    /// Plain full-viewport draw with no clear and no depth test.
    pub fn new(target: FramebufferId) -> Self {
        Self {
            target,
            clear_color: None,
            clip: None,
            depth_test: DepthTest::Disabled,
            rect_depth: 1.0,
        }
    }

    pub fn with_clear(mut self, color: [f32; 4]) -> Self {
        self.clear_color = Some(color);
        self
    }

    pub fn with_clip(mut self, clip: Rect2D) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn with_depth_test(mut self, test: DepthTest, rect_depth: f32) -> Self {
        self.depth_test = test;
        self.rect_depth = rect_depth;
        self
    }

    /// Region actually written inside a viewport.
    pub fn region(&self, viewport: Rect2D) -> Rect2D {
        match self.clip {
            Some(clip) => clip.intersect(&viewport),
            None => viewport,
        }
    }
}

/// Allocation and draw counters, used to observe resource churn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub textures_created: u64,
    pub textures_resized: u64,
    pub textures_destroyed: u64,
    pub framebuffers_created: u64,
    pub attachment_binds: u64,
    pub draws: u64,
    pub submits: u64,
}

/// Resource lifecycle and capability surface shared by all backends.
pub trait RenderDevice {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Whether `format` can be rendered to.
    fn supports_render_target(&self, format: TextureFormat) -> bool;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId>;

    /// Resize all levels of a texture, discarding its contents.
    ///
    /// Framebuffers bound to the texture become stale until rebound.
    fn resize_texture(&mut self, id: TextureId, width: u32, height: u32) -> Result<()>;

    fn destroy_texture(&mut self, id: TextureId) -> Result<()>;

    /// Size of mip `level`.
    fn texture_size(&self, id: TextureId, level: u32) -> Result<(u32, u32)>;

    fn texture_format(&self, id: TextureId) -> Result<TextureFormat>;

    fn mip_level_count(&self, id: TextureId) -> Result<u32>;

    /// Set every texel of one level to `value`, outside any pass.
    fn fill_texture(&mut self, id: TextureId, level: u32, value: [f32; 4]) -> Result<()>;

    fn create_framebuffer(&mut self, label: &str) -> FramebufferId;

    /// Bind `texture` (at mip `level`) to `slot`.
    fn attach(&mut self, fb: FramebufferId, slot: Attachment, texture: TextureId, level: u32) -> Result<()>;

    fn detach(&mut self, fb: FramebufferId, slot: Attachment) -> Result<()>;

    /// Size of the color attachment's bound level.
    fn framebuffer_size(&self, fb: FramebufferId) -> Result<(u32, u32)>;

    /// True when every attachment refers to current texture storage.
    fn framebuffer_is_current(&self, fb: FramebufferId) -> Result<bool>;

    /// Flush recorded work; `wait` blocks until the work has executed where
    /// the backend can observe that.
    fn submit(&mut self, wait: bool) -> Result<()>;

    fn stats(&self) -> DeviceStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent() {
        assert_eq!(mip_extent(512, 256, 0), (512, 256));
        assert_eq!(mip_extent(512, 256, 5), (16, 8));
        assert_eq!(mip_extent(33, 7, 3), (4, 1));
        assert_eq!(mip_extent(4, 4, 40), (1, 1));
    }

    #[test]
    fn test_depth_test_modes() {
        assert!(DepthTest::Disabled.passes(0.0, 1.0));
        assert!(!DepthTest::Greater.passes(1.0, 1.0));
        assert!(DepthTest::Greater.passes(1.0, 0.5));
        assert!(DepthTest::GreaterEqual.passes(1.0, 1.0));
    }

    #[test]
    fn test_pass_region_clips_to_viewport() {
        let pass = PassState::new(FramebufferId(0)).with_clip(Rect2D::xyxy(4, 4, 100, 100));
        assert_eq!(pass.region(Rect2D::from_size(64, 32)), Rect2D::xyxy(4, 4, 64, 32));
        let full = PassState::new(FramebufferId(0));
        assert_eq!(full.region(Rect2D::from_size(8, 8)), Rect2D::from_size(8, 8));
    }
}
