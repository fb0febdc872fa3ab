//! Camera-space depth pyramid.

use tracing::trace;

use crate::device::{PassState, RenderDevice, TextureId, BLACK};
use crate::kernel::{KernelSet, MinifyArgs, ReconstructCszArgs};
use crate::util::{Error, Result, Vec3};

use super::buffers::Buffers;

/// Reconstruct level 0 from `depth`, then minify every further level from
/// its predecessor.
pub(crate) fn build_pyramid<D: RenderDevice + ?Sized>(
    device: &mut D,
    kernels: &KernelSet<D>,
    buffers: &Buffers,
    depth: TextureId,
    clip_info: Vec3,
) -> Result<()> {
    let pass = PassState::new(buffers.csz_framebuffers[0]).with_clear(BLACK);
    kernels.reconstruct_csz.apply(
        device,
        &pass,
        &ReconstructCszArgs {
            clip_info,
            depth_buffer: depth,
        },
    )?;

    for level in 1..buffers.csz_framebuffers.len() as u32 {
        minify_level(device, kernels, buffers, level)?;
    }
    Ok(())
}

/// Regenerate pyramid `level` (>= 1) from `level - 1`.
pub(crate) fn minify_level<D: RenderDevice + ?Sized>(
    device: &mut D,
    kernels: &KernelSet<D>,
    buffers: &Buffers,
    level: u32,
) -> Result<()> {
    let count = buffers.csz_framebuffers.len() as u32;
    if level == 0 || level >= count {
        return Err(Error::MipOutOfRange { level, count });
    }
    trace!("minify level {}", level);
    let pass = PassState::new(buffers.csz_framebuffers[level as usize]).with_clear(BLACK);
    kernels.minify.apply(
        device,
        &pass,
        &MinifyArgs {
            texture: buffers.csz_buffer,
            previous_mip: level - 1,
        },
    )
}
