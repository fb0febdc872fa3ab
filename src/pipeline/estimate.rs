//! Raw obscurance estimation.

use crate::constants::SaoConstants;
use crate::device::{Attachment, DepthTest, PassState, RenderDevice, TextureId, WHITE};
use crate::kernel::{KernelSet, RawAoArgs};
use crate::settings::SaoSettings;
use crate::util::{Rect2D, Result};

use super::buffers::Buffers;

/// Window depth of the full-screen rect; pixels whose stored depth is not
/// strictly smaller (the sky) are skipped.
pub(crate) const SKY_RECT_DEPTH: f32 = 1.0;

/// Estimate obscurance into the raw-AO target.
///
/// `depth` is bound as the depth attachment only for the duration of the
/// draw. Pixels skipped by the depth test or inside the guard band keep the
/// white clear value or their previous contents respectively.
pub(crate) fn estimate_raw_ao<D: RenderDevice + ?Sized>(
    device: &mut D,
    kernels: &KernelSet<D>,
    buffers: &Buffers,
    depth: TextureId,
    constants: &SaoConstants,
    settings: &SaoSettings,
    clip: Rect2D,
) -> Result<()> {
    let args = RawAoArgs {
        radius: settings.radius,
        bias: settings.bias,
        clip_info: constants.clip_info,
        proj_info: constants.proj_info,
        proj_scale: constants.proj_scale,
        intensity_div_r6: settings.intensity_div_r6(),
        csz_buffer: buffers.csz_buffer,
    };
    let pass = PassState::new(buffers.raw_ao_framebuffer)
        .with_clear(WHITE)
        .with_clip(clip)
        .with_depth_test(DepthTest::Greater, SKY_RECT_DEPTH);

    device.attach(buffers.raw_ao_framebuffer, Attachment::Depth, depth, 0)?;
    let result = kernels.raw_ao.apply(device, &pass, &args);
    device.detach(buffers.raw_ao_framebuffer, Attachment::Depth)?;
    result
}
