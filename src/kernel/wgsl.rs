//! WGSL kernel set for [`WgpuDevice`].

use std::path::PathBuf;

use tracing::debug;

use crate::device::{FullscreenProgram, GpuBinding, MipRange, PassState, WgpuDevice};
use crate::util::{Error, Result};

use super::shaders::{BLUR_SHADER, MINIFY_SHADER, RAW_AO_SHADER, RECONSTRUCT_CSZ_SHADER};
use super::{
    BlurArgs, BlurUniforms, Kernel, KernelLoader, KernelSet, MinifyArgs, MinifyUniforms, RawAoArgs,
    RawAoUniforms, ReconstructCszArgs, ReconstructCszUniforms,
};

/// Compiles the four WGSL kernels.
///
/// With a directory set, `sao_reconstruct_csz.wgsl`, `sao_minify.wgsl`,
/// `sao_ao.wgsl` and `sao_blur.wgsl` found there replace the embedded
/// sources, so edited shaders are picked up by
/// [`Sao::reload_kernels`](crate::Sao::reload_kernels).
#[derive(Clone, Debug, Default)]
pub struct WgslKernelLoader {
    dir: Option<PathBuf>,
}

impl WgslKernelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    fn source(&self, file: &str, embedded: &'static str) -> Result<String> {
        let Some(dir) = &self.dir else {
            return Ok(embedded.to_string());
        };
        let path = dir.join(file);
        if !path.exists() {
            debug!("{} not found, using embedded source", path.display());
            return Ok(embedded.to_string());
        }
        std::fs::read_to_string(&path).map_err(|e| Error::kernel_load(file, e.to_string()))
    }

    fn program(&self, device: &WgpuDevice, name: &str, file: &str, embedded: &'static str) -> Result<FullscreenProgram> {
        let source = self.source(file, embedded)?;
        device.create_program(name, &source, 1)
    }
}

impl KernelLoader<WgpuDevice> for WgslKernelLoader {
    fn load(&self, device: &mut WgpuDevice) -> Result<KernelSet<WgpuDevice>> {
        Ok(KernelSet {
            reconstruct_csz: Box::new(WgslKernel(self.program(
                device,
                "reconstruct_csz",
                "sao_reconstruct_csz.wgsl",
                RECONSTRUCT_CSZ_SHADER,
            )?)),
            minify: Box::new(WgslKernel(self.program(device, "minify", "sao_minify.wgsl", MINIFY_SHADER)?)),
            raw_ao: Box::new(WgslKernel(self.program(device, "raw_ao", "sao_ao.wgsl", RAW_AO_SHADER)?)),
            blur: Box::new(WgslKernel(self.program(device, "blur", "sao_blur.wgsl", BLUR_SHADER)?)),
        })
    }
}

struct WgslKernel(FullscreenProgram);

impl Kernel<WgpuDevice, ReconstructCszArgs> for WgslKernel {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn apply(&self, device: &mut WgpuDevice, pass: &PassState, args: &ReconstructCszArgs) -> Result<()> {
        let uniforms = ReconstructCszUniforms::from(args);
        device.draw(
            pass,
            &self.0,
            &[
                GpuBinding::Uniform(bytemuck::bytes_of(&uniforms)),
                GpuBinding::Texture {
                    id: args.depth_buffer,
                    mips: MipRange::Single(0),
                },
            ],
        )
    }
}

impl Kernel<WgpuDevice, MinifyArgs> for WgslKernel {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn apply(&self, device: &mut WgpuDevice, pass: &PassState, args: &MinifyArgs) -> Result<()> {
        let uniforms = MinifyUniforms::from(args);
        device.draw(
            pass,
            &self.0,
            &[
                GpuBinding::Uniform(bytemuck::bytes_of(&uniforms)),
                GpuBinding::Texture {
                    id: args.texture,
                    mips: MipRange::Single(args.previous_mip),
                },
            ],
        )
    }
}

impl Kernel<WgpuDevice, RawAoArgs> for WgslKernel {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn apply(&self, device: &mut WgpuDevice, pass: &PassState, args: &RawAoArgs) -> Result<()> {
        let uniforms = RawAoUniforms::from(args);
        device.draw(
            pass,
            &self.0,
            &[
                GpuBinding::Uniform(bytemuck::bytes_of(&uniforms)),
                GpuBinding::Texture {
                    id: args.csz_buffer,
                    mips: MipRange::All,
                },
            ],
        )
    }
}

impl Kernel<WgpuDevice, BlurArgs> for WgslKernel {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn apply(&self, device: &mut WgpuDevice, pass: &PassState, args: &BlurArgs) -> Result<()> {
        let uniforms = BlurUniforms::from(args);
        device.draw(
            pass,
            &self.0,
            &[
                GpuBinding::Uniform(bytemuck::bytes_of(&uniforms)),
                GpuBinding::Texture {
                    id: args.source,
                    mips: MipRange::Single(0),
                },
            ],
        )
    }
}
