//! Separable depth-aware blur.

use crate::device::{FramebufferId, PassState, RenderDevice, TextureId, WHITE};
use crate::kernel::{BlurArgs, KernelSet};
use crate::util::{IVec2, Rect2D, Result};

pub(crate) const HORIZONTAL: IVec2 = IVec2::new(1, 0);
pub(crate) const VERTICAL: IVec2 = IVec2::new(0, 1);

/// Blur `source` along `axis` into `target`, inside `clip` only.
pub(crate) fn blur_axis<D: RenderDevice + ?Sized>(
    device: &mut D,
    kernels: &KernelSet<D>,
    source: TextureId,
    axis: IVec2,
    clip: Rect2D,
    target: FramebufferId,
) -> Result<()> {
    let pass = PassState::new(target).with_clear(WHITE).with_clip(clip);
    kernels.blur.apply(device, &pass, &BlurArgs { source, axis })
}
