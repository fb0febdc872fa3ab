//! wgpu render device.
//!
//! Draws are recorded into one command encoder and flushed by
//! [`RenderDevice::submit`]. Every draw is a single full-screen triangle; the
//! scissor rect implements the pass clip and the viewport depth range places
//! the triangle at [`PassState::rect_depth`] for the early depth test.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;
use wgpu::util::DeviceExt;

use super::{
    mip_extent, Attachment, DepthTest, DeviceStats, FramebufferId, PassState, RenderDevice,
    TextureDesc, TextureFormat, TextureId,
};
use crate::util::{Error, Rect2D, Result};

/// Fills the bound target with the blend constant.
const FILL_SHADER: &str = r#"
@vertex
fn vs_fullscreen(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vid << 1u) & 2u), f32(vid & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

/// Which levels of a texture a binding exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipRange {
    All,
    Single(u32),
}

/// One bind group entry of a full-screen draw, in binding order.
#[derive(Clone, Copy, Debug)]
pub enum GpuBinding<'a> {
    Uniform(&'a [u8]),
    Texture { id: TextureId, mips: MipRange },
}

type PipelineKey = (wgpu::TextureFormat, Option<wgpu::CompareFunction>);

/// Compiled full-screen fragment program.
///
/// Render pipelines are created on first use per target format and depth
/// state.
pub struct FullscreenProgram {
    name: String,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    blend: wgpu::BlendState,
    pipelines: Mutex<HashMap<PipelineKey, wgpu::RenderPipeline>>,
}

impl FullscreenProgram {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn pipeline(&self, device: &wgpu::Device, key: PipelineKey) -> wgpu::RenderPipeline {
        let mut cache = self.pipelines.lock();
        cache
            .entry(key)
            .or_insert_with(|| {
                let (format, compare) = key;
                debug!("creating pipeline {} for {:?} depth {:?}", self.name, format, compare);
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(&self.name),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &self.module,
                        entry_point: Some("vs_fullscreen"),
                        compilation_options: Default::default(),
                        buffers: &[],
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.module,
                        entry_point: Some("fs_main"),
                        compilation_options: Default::default(),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(self.blend),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: compare.map(|depth_compare| wgpu::DepthStencilState {
                        format: wgpu::TextureFormat::Depth32Float,
                        depth_write_enabled: false,
                        depth_compare,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            })
            .clone()
    }
}

struct GpuTexture {
    label: String,
    texture: wgpu::Texture,
    format: TextureFormat,
    width: u32,
    height: u32,
    mip_levels: u32,
    generation: u64,
    imported: bool,
}

impl GpuTexture {
    fn view(&self, mips: MipRange) -> wgpu::TextureView {
        let (base_mip_level, mip_level_count) = match mips {
            MipRange::All => (0, None),
            MipRange::Single(level) => (level, Some(1)),
        };
        let aspect = if self.format.is_depth() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&self.label),
            base_mip_level,
            mip_level_count,
            aspect,
            ..Default::default()
        })
    }
}

#[derive(Clone, Copy)]
struct Binding {
    texture: TextureId,
    level: u32,
    generation: u64,
}

struct GpuFramebuffer {
    label: String,
    color: Option<Binding>,
    depth: Option<Binding>,
}

/// GPU implementation of [`RenderDevice`].
pub struct WgpuDevice {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: Vec<Option<GpuTexture>>,
    framebuffers: Vec<GpuFramebuffer>,
    encoder: Option<wgpu::CommandEncoder>,
    fill: FullscreenProgram,
    stats: DeviceStats,
}

fn wgpu_format(format: TextureFormat) -> Option<wgpu::TextureFormat> {
    match format {
        TextureFormat::R8 => Some(wgpu::TextureFormat::R8Unorm),
        // No three-channel 8-bit format in wgpu; alpha is ignored
        TextureFormat::Rgb8 => Some(wgpu::TextureFormat::Rgba8Unorm),
        TextureFormat::R16F => Some(wgpu::TextureFormat::R16Float),
        TextureFormat::R32F => Some(wgpu::TextureFormat::R32Float),
        TextureFormat::Rg32F => Some(wgpu::TextureFormat::Rg32Float),
        TextureFormat::Depth32F => Some(wgpu::TextureFormat::Depth32Float),
        TextureFormat::L16F | TextureFormat::L32F => None,
    }
}

fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::R8Unorm => Some(TextureFormat::R8),
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgb8),
        wgpu::TextureFormat::R16Float => Some(TextureFormat::R16F),
        wgpu::TextureFormat::R32Float => Some(TextureFormat::R32F),
        wgpu::TextureFormat::Rg32Float => Some(TextureFormat::Rg32F),
        wgpu::TextureFormat::Depth32Float => Some(TextureFormat::Depth32F),
        _ => None,
    }
}

/// Bytes per texel as stored on the GPU.
fn texel_size(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::R8 => 1,
        TextureFormat::R16F | TextureFormat::L16F => 2,
        TextureFormat::Rgb8 | TextureFormat::R32F | TextureFormat::L32F | TextureFormat::Depth32F => 4,
        TextureFormat::Rg32F => 8,
    }
}

fn encode_texels(format: TextureFormat, data: &[f32]) -> Vec<u8> {
    match format {
        TextureFormat::R8 => data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
        TextureFormat::Rgb8 => data
            .chunks(3)
            .flat_map(|c| {
                let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                [q(c[0]), q(c[1]), q(c[2]), 255]
            })
            .collect(),
        TextureFormat::R16F | TextureFormat::L16F => data
            .iter()
            .flat_map(|v| half::f16::from_f32(*v).to_le_bytes())
            .collect(),
        _ => bytemuck::cast_slice(data).to_vec(),
    }
}

fn decode_texels(format: TextureFormat, bytes: &[u8]) -> Vec<f32> {
    match format {
        TextureFormat::R8 => bytes.iter().map(|b| *b as f32 / 255.0).collect(),
        TextureFormat::Rgb8 => bytes
            .chunks(4)
            .flat_map(|c| [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0])
            .collect(),
        TextureFormat::R16F | TextureFormat::L16F => bytes
            .chunks(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        _ => bytes
            .chunks(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

impl WgpuDevice {
    /// Open the default high-performance adapter.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| Error::Device(format!("no suitable adapter: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("sao device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }))
        .map_err(|e| Error::Device(format!("request_device failed: {e}")))?;
        Self::with_device(adapter, device, queue)
    }

    /// Wrap an existing device, e.g. the one owned by an application.
    pub fn with_device(adapter: wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Result<Self> {
        let fill_blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Constant,
                dst_factor: wgpu::BlendFactor::Zero,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::Constant,
                dst_factor: wgpu::BlendFactor::Zero,
                operation: wgpu::BlendOperation::Add,
            },
        };
        let fill = build_program(&device, "sao_fill", FILL_SHADER, &[], fill_blend)?;
        debug!("wgpu device: {}", adapter.get_info().name);
        Ok(Self {
            adapter,
            device,
            queue,
            textures: Vec::new(),
            framebuffers: Vec::new(),
            encoder: None,
            fill,
            stats: DeviceStats::default(),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compile a full-screen program.
    ///
    /// The module must export `vs_fullscreen` and `fs_main`. Binding 0 is
    /// the uniform block; `textures` texture bindings follow in order and
    /// are bound as unfilterable float textures.
    pub fn create_program(&self, name: &str, source: &str, textures: usize) -> Result<FullscreenProgram> {
        let mut entries = vec![BindingKind::Uniform];
        entries.extend(std::iter::repeat(BindingKind::Texture).take(textures));
        build_program(&self.device, name, source, &entries, wgpu::BlendState::REPLACE)
    }

    /// Register a caller-owned texture (typically the scene depth buffer).
    ///
    /// Imported textures can be bound and read but never resized or
    /// destroyed through the device.
    pub fn import_texture(&mut self, label: &str, texture: wgpu::Texture) -> Result<TextureId> {
        let format = from_wgpu_format(texture.format()).ok_or_else(|| {
            Error::Device(format!("cannot import {label}: format {:?}", texture.format()))
        })?;
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(Some(GpuTexture {
            label: label.to_string(),
            width: texture.width(),
            height: texture.height(),
            mip_levels: texture.mip_level_count(),
            texture,
            format,
            generation: 0,
            imported: true,
        }));
        Ok(id)
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture> {
        self.textures
            .get(id.index())
            .and_then(|t| t.as_ref())
            .ok_or(Error::UnknownTexture(id))
    }

    fn owned_texture_mut(&mut self, id: TextureId) -> Result<&mut GpuTexture> {
        let tex = self
            .textures
            .get_mut(id.index())
            .and_then(|t| t.as_mut())
            .ok_or(Error::UnknownTexture(id))?;
        if tex.imported {
            return Err(Error::ImportedTexture(tex.label.clone()));
        }
        Ok(tex)
    }

    fn allocate(&self, label: &str, width: u32, height: u32, format: TextureFormat, mip_levels: u32) -> Result<wgpu::Texture> {
        let wgpu_format = wgpu_format(format).ok_or(Error::UnsupportedFormat {
            format,
            usage: "wgpu texture",
        })?;
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(Error::InvalidDimensions(width, height));
        }
        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        }))
    }

    /// Upload channel data into one level. Depth formats cannot be written.
    pub fn write_texture(&mut self, id: TextureId, level: u32, data: &[f32]) -> Result<()> {
        let tex = self.texture(id)?;
        if tex.format.is_depth() {
            return Err(Error::UnsupportedFormat {
                format: tex.format,
                usage: "copy destination",
            });
        }
        if level >= tex.mip_levels {
            return Err(Error::MipOutOfRange {
                level,
                count: tex.mip_levels,
            });
        }
        let (w, h) = mip_extent(tex.width, tex.height, level);
        let expected = (w * h) as usize * tex.format.channels();
        if data.len() != expected {
            return Err(Error::DataLength {
                expected,
                actual: data.len(),
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &encode_texels(tex.format, data),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(w * texel_size(tex.format)),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    /// Read one level back to the host, flushing pending work first.
    pub fn read_texture(&mut self, id: TextureId, level: u32) -> Result<Vec<f32>> {
        self.submit(false)?;
        let tex = self.texture(id)?;
        if level >= tex.mip_levels {
            return Err(Error::MipOutOfRange {
                level,
                count: tex.mip_levels,
            });
        }
        let format = tex.format;
        let (w, h) = mip_extent(tex.width, tex.height, level);
        let unpadded = w * texel_size(format);
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let bytes_per_row = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sao_readback"),
            size: (bytes_per_row * h) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sao_readback") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &tex.texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(h),
                },
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        slice.map_async(wgpu::MapMode::Read, |_| {});
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        let mut out = Vec::with_capacity((w * h) as usize * format.channels());
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(bytes_per_row as usize) {
                out.extend(decode_texels(format, &row[..unpadded as usize]));
            }
        }
        buffer.unmap();
        Ok(out)
    }

    /// Record one full-screen draw of `program` into `pass.target`.
    pub fn draw(&mut self, pass: &PassState, program: &FullscreenProgram, bindings: &[GpuBinding<'_>]) -> Result<()> {
        let fb = self
            .framebuffers
            .get(pass.target.index())
            .ok_or(Error::UnknownFramebuffer(pass.target))?;
        let color = fb
            .color
            .ok_or_else(|| Error::MissingColorAttachment(fb.label.clone()))?;
        let color_tex = self.texture(color.texture)?;
        if color_tex.generation != color.generation {
            return Err(Error::StaleFramebuffer(fb.label.clone()));
        }
        let color_format = wgpu_format(color_tex.format).ok_or(Error::UnsupportedFormat {
            format: color_tex.format,
            usage: "color target",
        })?;
        let (width, height) = mip_extent(color_tex.width, color_tex.height, color.level);
        let color_view = color_tex.view(MipRange::Single(color.level));

        let (depth_view, compare) = match pass.depth_test {
            DepthTest::Disabled => (None, None),
            test => {
                let binding = fb.depth.ok_or_else(|| {
                    Error::Device(format!("framebuffer '{}' has no depth attachment", fb.label))
                })?;
                let tex = self.texture(binding.texture)?;
                if tex.generation != binding.generation {
                    return Err(Error::StaleFramebuffer(fb.label.clone()));
                }
                if !tex.format.is_depth() {
                    return Err(Error::UnsupportedFormat {
                        format: tex.format,
                        usage: "wgpu depth attachment",
                    });
                }
                let compare = match test {
                    DepthTest::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
                    _ => wgpu::CompareFunction::Greater,
                };
                (Some(tex.view(MipRange::Single(binding.level))), Some(compare))
            }
        };

        let region = pass.region(Rect2D::from_size(width, height));
        if region.is_empty() {
            return Ok(());
        }

        let mut uniform_buffers = Vec::new();
        let mut views = Vec::new();
        for binding in bindings {
            match binding {
                GpuBinding::Uniform(bytes) => {
                    uniform_buffers.push(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(program.name()),
                        contents: bytes,
                        usage: wgpu::BufferUsages::UNIFORM,
                    }));
                }
                GpuBinding::Texture { id, mips } => views.push(self.texture(*id)?.view(*mips)),
            }
        }
        let (mut next_buffer, mut next_view) = (uniform_buffers.iter(), views.iter());
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .enumerate()
            .filter_map(|(i, binding)| {
                let resource = match binding {
                    GpuBinding::Uniform(_) => next_buffer.next()?.as_entire_binding(),
                    GpuBinding::Texture { .. } => wgpu::BindingResource::TextureView(next_view.next()?),
                };
                Some(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource,
                })
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.name()),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let fill_pipeline = self.fill.pipeline(&self.device, (color_format, compare.map(|_| wgpu::CompareFunction::Always)));
        let pipeline = program.pipeline(&self.device, (color_format, compare));
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sao") })
        });

        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(program.name()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth_view.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_scissor_rect(region.x0, region.y0, region.width(), region.height());

            // LoadOp::Clear ignores the scissor
            if let Some([r, g, b, a]) = pass.clear_color {
                rpass.set_pipeline(&fill_pipeline);
                rpass.set_blend_constant(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                });
                rpass.draw(0..3, 0..1);
            }

            rpass.set_viewport(0.0, 0.0, width as f32, height as f32, pass.rect_depth, pass.rect_depth);
            rpass.set_pipeline(&pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }

        self.stats.draws += 1;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum BindingKind {
    Uniform,
    Texture,
}

fn build_program(
    device: &wgpu::Device,
    name: &str,
    source: &str,
    entries: &[BindingKind],
    blend: wgpu::BlendState,
) -> Result<FullscreenProgram> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(Error::kernel_load(name, err.to_string()));
    }

    let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
        .iter()
        .enumerate()
        .map(|(i, kind)| wgpu::BindGroupLayoutEntry {
            binding: i as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: match kind {
                BindingKind::Uniform => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingKind::Texture => wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                },
            },
            count: None,
        })
        .collect();
    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(name),
        entries: &layout_entries,
    });
    let bind_group_layouts: &[&wgpu::BindGroupLayout] = if entries.is_empty() {
        &[]
    } else {
        &[&bind_group_layout]
    };
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(name),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    Ok(FullscreenProgram {
        name: name.to_string(),
        module,
        bind_group_layout,
        pipeline_layout,
        blend,
        pipelines: Mutex::new(HashMap::new()),
    })
}

impl RenderDevice for WgpuDevice {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn supports_render_target(&self, format: TextureFormat) -> bool {
        if format.is_depth() {
            return false;
        }
        match wgpu_format(format) {
            Some(f) => self
                .adapter
                .get_texture_format_features(f)
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT),
            None => false,
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId> {
        let texture = self.allocate(desc.label, desc.width, desc.height, desc.format, desc.mip_levels)?;
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(Some(GpuTexture {
            label: desc.label.to_string(),
            texture,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels,
            generation: 0,
            imported: false,
        }));
        self.stats.textures_created += 1;
        Ok(id)
    }

    fn resize_texture(&mut self, id: TextureId, width: u32, height: u32) -> Result<()> {
        let (label, format, mip_levels) = {
            let tex = self.owned_texture_mut(id)?;
            (tex.label.clone(), tex.format, tex.mip_levels)
        };
        let texture = self.allocate(&label, width, height, format, mip_levels)?;
        let tex = self.owned_texture_mut(id)?;
        tex.texture.destroy();
        tex.texture = texture;
        tex.width = width;
        tex.height = height;
        tex.generation += 1;
        self.stats.textures_resized += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) -> Result<()> {
        self.owned_texture_mut(id)?.texture.destroy();
        self.textures[id.index()] = None;
        self.stats.textures_destroyed += 1;
        Ok(())
    }

    fn texture_size(&self, id: TextureId, level: u32) -> Result<(u32, u32)> {
        let tex = self.texture(id)?;
        if level >= tex.mip_levels {
            return Err(Error::MipOutOfRange {
                level,
                count: tex.mip_levels,
            });
        }
        Ok(mip_extent(tex.width, tex.height, level))
    }

    fn texture_format(&self, id: TextureId) -> Result<TextureFormat> {
        Ok(self.texture(id)?.format)
    }

    fn mip_level_count(&self, id: TextureId) -> Result<u32> {
        Ok(self.texture(id)?.mip_levels)
    }

    fn fill_texture(&mut self, id: TextureId, level: u32, value: [f32; 4]) -> Result<()> {
        let tex = self.texture(id)?;
        if level >= tex.mip_levels {
            return Err(Error::MipOutOfRange {
                level,
                count: tex.mip_levels,
            });
        }
        let view = tex.view(MipRange::Single(level));
        let is_depth = tex.format.is_depth();
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sao") })
        });

        // Whole level, no scissor
        let [r, g, b, a] = value;
        let color_attachment = (!is_depth).then(|| wgpu::RenderPassColorAttachment {
            view: &view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        });
        let _ = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("sao_fill"),
            color_attachments: &[color_attachment],
            depth_stencil_attachment: is_depth.then(|| wgpu::RenderPassDepthStencilAttachment {
                view: &view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(r),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        Ok(())
    }

    fn create_framebuffer(&mut self, label: &str) -> FramebufferId {
        let id = FramebufferId(self.framebuffers.len() as u32);
        self.framebuffers.push(GpuFramebuffer {
            label: label.to_string(),
            color: None,
            depth: None,
        });
        self.stats.framebuffers_created += 1;
        id
    }

    fn attach(&mut self, fb: FramebufferId, slot: Attachment, texture: TextureId, level: u32) -> Result<()> {
        let tex = self.texture(texture)?;
        if level >= tex.mip_levels {
            return Err(Error::MipOutOfRange {
                level,
                count: tex.mip_levels,
            });
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
        match slot {
            Attachment::Color0 => framebuffer.color = Some(binding),
            Attachment::Depth => framebuffer.depth = Some(binding),
        }
        self.stats.attachment_binds += 1;
        Ok(())
    }

    fn detach(&mut self, fb: FramebufferId, slot: Attachment) -> Result<()> {
        let framebuffer = self
            .framebuffers
            .get_mut(fb.index())
            .ok_or(Error::UnknownFramebuffer(fb))?;
        match slot {
            Attachment::Color0 => framebuffer.color = None,
            Attachment::Depth => framebuffer.depth = None,
        }
        Ok(())
    }

    fn framebuffer_size(&self, fb: FramebufferId) -> Result<(u32, u32)> {
        let framebuffer = self
            .framebuffers
            .get(fb.index())
            .ok_or(Error::UnknownFramebuffer(fb))?;
        let color = framebuffer
            .color
            .ok_or_else(|| Error::MissingColorAttachment(framebuffer.label.clone()))?;
        self.texture_size(color.texture, color.level)
    }

    fn framebuffer_is_current(&self, fb: FramebufferId) -> Result<bool> {
        let framebuffer = self
            .framebuffers
            .get(fb.index())
            .ok_or(Error::UnknownFramebuffer(fb))?;
        Ok([framebuffer.color, framebuffer.depth]
            .iter()
            .flatten()
            .all(|b| {
                self.texture(b.texture)
                    .map(|t| t.generation == b.generation)
                    .unwrap_or(false)
            }))
    }

    fn submit(&mut self, wait: bool) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
        if wait {
            let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        }
        self.stats.submits += 1;
        Ok(())
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}
