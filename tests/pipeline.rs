//! End-to-end pipeline runs on the software device.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sao::camera::Camera;
use sao::config::SaoConfig;
use sao::constants::SaoConstants;
use sao::device::{
    mip_extent, Attachment, CpuDevice, FramebufferId, PassState, RenderDevice, TextureDesc, TextureFormat,
    TextureId,
};
use sao::kernel::{CpuKernelLoader, Kernel, KernelLoader, KernelSet};
use sao::scene::{DepthScene, ScenePreset, SKY_DEPTH};
use sao::{Error, Result, Sao};

struct Frame {
    device: CpuDevice,
    camera: Camera,
    depth: TextureId,
    out: TextureId,
    out_fb: FramebufferId,
}

fn output_target(device: &mut CpuDevice, width: u32, height: u32) -> (TextureId, FramebufferId) {
    let out = device
        .create_texture(&TextureDesc::new("ao", width, height, TextureFormat::R8))
        .expect("output texture");
    let fb = device.create_framebuffer("ao");
    device.attach(fb, Attachment::Color0, out, 0).expect("attach output");
    (out, fb)
}

fn frame(scene: &DepthScene, width: u32, height: u32) -> Frame {
    let mut device = CpuDevice::new();
    let camera = Camera::perspective(60.0, 0.1, 100.0);
    let depth = scene.upload(&mut device, &camera, width, height).expect("depth upload");
    let (out, out_fb) = output_target(&mut device, width, height);
    Frame {
        device,
        camera,
        depth,
        out,
        out_fb,
    }
}

/// Depth buffer where every pixel sits at camera-space `z`.
fn uniform_frame(z: f32, width: u32, height: u32) -> Frame {
    let mut device = CpuDevice::new();
    let camera = Camera::perspective(60.0, 0.1, 100.0);
    let depth = device
        .create_texture(&TextureDesc::new("depth", width, height, TextureFormat::Depth32F))
        .unwrap();
    device
        .fill_texture(depth, 0, [camera.encode_depth(z), 0.0, 0.0, 1.0])
        .unwrap();
    let (out, out_fb) = output_target(&mut device, width, height);
    Frame {
        device,
        camera,
        depth,
        out,
        out_fb,
    }
}

fn in_guard_band(i: usize, width: u32, height: u32, guard: u32) -> bool {
    let (x, y) = ((i % width as usize) as u32, (i / width as usize) as u32);
    x < guard || y < guard || x >= width - guard || y >= height - guard
}

#[test]
fn test_flat_wall_is_unoccluded() {
    let mut f = uniform_frame(-5.0, 512, 512);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();

    let buffers = sao.buffers().buffers().unwrap();
    let raw = f.device.read_channel(buffers.raw_ao_buffer, 0, 0).unwrap();
    assert!(raw.iter().all(|&a| a == 1.0), "raw AO must be 1.0 on a flat wall");

    let out = f.device.read_channel(f.out, 0, 0).unwrap();
    assert!(out.iter().all(|&a| a == 1.0), "blurred AO must be 1.0 on a flat wall");
}

#[test]
fn test_near_wall_with_guard_band_is_unoccluded() {
    // Keys this close to the camera are within the blur's depth tolerance of
    // a zero key, so unfilled guard texels would bleed in
    let (w, h, guard) = (64, 64, 8);
    let mut f = uniform_frame(-0.12, w, h);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, guard, f.out_fb).unwrap();

    let out = f.device.read_channel(f.out, 0, 0).unwrap();
    for (i, a) in out.iter().enumerate() {
        if !in_guard_band(i, w, h, guard) {
            assert_eq!(*a, 1.0, "interior pixel {i} darkened");
        }
    }

    // Same after the targets are resized in place
    let (w, h) = (80, 48);
    let depth = f
        .device
        .create_texture(&TextureDesc::new("depth", w, h, TextureFormat::Depth32F))
        .unwrap();
    f.device
        .fill_texture(depth, 0, [f.camera.encode_depth(-0.12), 0.0, 0.0, 1.0])
        .unwrap();
    let (out, out_fb) = output_target(&mut f.device, w, h);
    sao.compute(&mut f.device, depth, &f.camera, guard, out_fb).unwrap();
    assert_eq!(f.device.stats().textures_resized, 3);
    let out = f.device.read_channel(out, 0, 0).unwrap();
    for (i, a) in out.iter().enumerate() {
        if !in_guard_band(i, w, h, guard) {
            assert_eq!(*a, 1.0, "interior pixel {i} darkened after resize");
        }
    }
}

#[test]
fn test_folded_quad_on_sky() {
    let scene = ScenePreset::Quad.build();
    let mut f = frame(&scene, 64, 64);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();

    let depth = f.device.read_texture(f.depth, 0).unwrap();
    let out = f.device.read_channel(f.out, 0, 0).unwrap();
    let sky = depth.iter().filter(|&&d| d == SKY_DEPTH).count();
    assert!(sky > 0 && sky < depth.len());

    for (d, a) in depth.iter().zip(&out) {
        if *d == SKY_DEPTH {
            assert_eq!(*a, 1.0, "sky pixels are never occluded");
        }
    }
    let darkest = depth
        .iter()
        .zip(&out)
        .filter(|(d, _)| **d < SKY_DEPTH)
        .map(|(_, a)| *a)
        .fold(1.0f32, f32::min);
    assert!(darkest < 1.0, "the crease should be occluded");
}

#[test]
fn test_guard_band_untouched() {
    let (w, h, guard) = (64, 48, 6);
    let mut f = frame(&ScenePreset::Room.build(), w, h);
    let marker = [0.5, 0.5, 0.5, 1.0];
    f.device.fill_texture(f.out, 0, marker).unwrap();
    let marked = f.device.read_channel(f.out, 0, 0).unwrap()[0];

    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, guard, f.out_fb).unwrap();

    // Mark the intermediate targets too and run a second frame
    let buffers = sao.buffers().buffers().unwrap().clone();
    f.device.fill_texture(buffers.raw_ao_buffer, 0, marker).unwrap();
    f.device.fill_texture(buffers.h_blurred_buffer, 0, marker).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, guard, f.out_fb).unwrap();

    for tex in [f.out, buffers.raw_ao_buffer, buffers.h_blurred_buffer] {
        let values = f.device.read_channel(tex, 0, 0).unwrap();
        for (i, v) in values.iter().enumerate() {
            if in_guard_band(i, w, h, guard) {
                assert_eq!(*v, marked, "guard pixel {i} of {tex:?} was written");
            }
        }
        let interior_written = values
            .iter()
            .enumerate()
            .any(|(i, v)| !in_guard_band(i, w, h, guard) && *v != marked);
        assert!(interior_written, "{tex:?} interior was not written");
    }
}

#[test]
fn test_uniform_depth_gives_uniform_pyramid() {
    let mut f = uniform_frame(-7.5, 96, 64);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();

    let buffers = sao.buffers().buffers().unwrap();
    assert_eq!(buffers.csz_format, TextureFormat::R32F);
    let level0 = f.device.read_texture(buffers.csz_buffer, 0).unwrap();
    let z = level0[0];
    assert!((z + 7.5).abs() < 1e-3);

    for level in 0..=5 {
        let values = f.device.read_texture(buffers.csz_buffer, level).unwrap();
        let (w, h) = mip_extent(96, 64, level);
        assert_eq!(values.len(), (w * h) as usize);
        assert!(values.iter().all(|&v| v == z), "level {level} is not uniform");
    }
}

#[test]
fn test_minify_level_reads_only_previous_level() {
    let mut f = frame(&ScenePreset::Room.build(), 64, 64);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    let csz = sao.buffers().buffers().unwrap().csz_buffer;

    // Level 2 is 16x16; replace it with distinct values
    let pattern: Vec<f32> = (0..16 * 16).map(|i| -(i as f32) - 1.0).collect();
    f.device.write_texture(csz, 2, &pattern).unwrap();
    let level4_before = f.device.read_texture(csz, 4).unwrap();

    sao.minify_level(&mut f.device, 3).unwrap();

    let level3 = f.device.read_texture(csz, 3).unwrap();
    for y in 0..8usize {
        for x in 0..8usize {
            let sx = 2 * x + (y & 1);
            let sy = 2 * y + (x & 1);
            assert_eq!(level3[y * 8 + x], pattern[sy * 16 + sx], "texel ({x}, {y})");
        }
    }
    assert_eq!(f.device.read_texture(csz, 4).unwrap(), level4_before);

    assert!(matches!(
        sao.minify_level(&mut f.device, 0),
        Err(Error::MipOutOfRange { level: 0, count: 6 })
    ));
    assert!(sao.minify_level(&mut f.device, 6).is_err());
}

#[test]
fn test_non_positive_proj_scale_rejected_then_recovers() {
    let mut f = frame(&ScenePreset::Room.build(), 32, 32);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();

    let mut constants = SaoConstants::from_camera(&f.camera, 32, 32);
    constants.proj_scale = 0.0;
    let err = sao
        .compute_with_constants(&mut f.device, f.depth, &constants, 0, f.out_fb)
        .unwrap_err();
    assert!(matches!(err, Error::NonPositiveProjScale(_)));
    assert!(!sao.buffers().is_allocated());
    assert!(!sao.kernels_loaded());
    assert_eq!(f.device.stats().draws, 0);

    constants.proj_scale = -4.0;
    assert!(sao
        .compute_with_constants(&mut f.device, f.depth, &constants, 0, f.out_fb)
        .is_err());

    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    assert!(sao.buffers().is_allocated());
}

#[test]
fn test_reload_keeps_buffers_and_output() {
    let mut f = frame(&ScenePreset::Room.build(), 48, 32);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 2, f.out_fb).unwrap();

    let buffers = sao.buffers().buffers().unwrap().clone();
    let snapshot = |device: &CpuDevice| {
        buffers
            .textures()
            .iter()
            .map(|&t| device.read_texture(t, 0).unwrap())
            .collect::<Vec<_>>()
    };
    let before = snapshot(&f.device);
    let out_before = f.device.read_texture(f.out, 0).unwrap();
    let stats_before = f.device.stats();

    sao.reload_kernels(&mut f.device).unwrap();
    assert!(sao.kernels_loaded());
    assert_eq!(snapshot(&f.device), before);
    assert_eq!(f.device.stats(), stats_before);

    sao.compute(&mut f.device, f.depth, &f.camera, 2, f.out_fb).unwrap();
    assert_eq!(f.device.read_texture(f.out, 0).unwrap(), out_before);
}

#[test]
fn test_settings_apply_on_next_compute() {
    let mut f = frame(&ScenePreset::Room.build(), 48, 48);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    let base = f.device.read_channel(f.out, 0, 0).unwrap();

    sao.set_intensity(0.0);
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    let none = f.device.read_channel(f.out, 0, 0).unwrap();
    assert!(none.iter().all(|&a| a == 1.0), "zero intensity means no occlusion");
    assert_ne!(base, none);
}

#[test]
fn test_resize_between_frames() {
    let mut device = CpuDevice::new();
    let camera = Camera::perspective(60.0, 0.1, 100.0);
    let scene = ScenePreset::Room.build();
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();

    let depth = scene.upload(&mut device, &camera, 32, 32).unwrap();
    let (_, fb) = output_target(&mut device, 32, 32);
    sao.compute(&mut device, depth, &camera, 0, fb).unwrap();
    let created = device.stats().textures_created;

    let depth = scene.upload(&mut device, &camera, 40, 24).unwrap();
    let (_, fb) = output_target(&mut device, 40, 24);
    sao.compute(&mut device, depth, &camera, 0, fb).unwrap();

    // Only the two caller textures are new; pipeline targets were resized
    assert_eq!(device.stats().textures_created, created + 2);
    assert_eq!(device.stats().textures_resized, 3);
    assert_eq!(sao.buffers().size(), Some((40, 24)));
    for fb in sao.buffers().buffers().unwrap().framebuffers() {
        assert!(device.framebuffer_is_current(fb).unwrap());
    }
}

#[test]
fn test_profiling_records_timings() {
    let mut f = frame(&ScenePreset::Room.build(), 32, 32);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    assert!(sao.last_timings().is_none());
    let submits = f.device.stats().submits;

    sao.set_profiling(true);
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    let t = sao.last_timings().unwrap();
    assert!(t.total >= t.pyramid + t.raw_ao);
    // One wait per stage
    assert_eq!(f.device.stats().submits, submits + 4);

    sao.set_profiling(false);
    assert!(sao.last_timings().is_none());
}

type Log = Arc<Mutex<Vec<String>>>;

struct Recording<A> {
    inner: Box<dyn Kernel<CpuDevice, A>>,
    log: Log,
}

impl<A> Kernel<CpuDevice, A> for Recording<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn apply(&self, device: &mut CpuDevice, pass: &PassState, args: &A) -> Result<()> {
        self.log.lock().unwrap().push(self.inner.name().to_string());
        self.inner.apply(device, pass, args)
    }
}

fn record<A: 'static>(inner: Box<dyn Kernel<CpuDevice, A>>, log: &Log) -> Box<dyn Kernel<CpuDevice, A>> {
    Box::new(Recording {
        inner,
        log: log.clone(),
    })
}

/// Wraps the reference kernels, counting loads and logging every draw.
#[derive(Default, Clone)]
struct RecordingLoader {
    loads: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    log: Log,
}

impl KernelLoader<CpuDevice> for RecordingLoader {
    fn load(&self, device: &mut CpuDevice) -> Result<KernelSet<CpuDevice>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::kernel_load("sao_ao", "file vanished"));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        let base = CpuKernelLoader.load(device)?;
        Ok(KernelSet {
            reconstruct_csz: record(base.reconstruct_csz, &self.log),
            minify: record(base.minify, &self.log),
            raw_ao: record(base.raw_ao, &self.log),
            blur: record(base.blur, &self.log),
        })
    }
}

#[test]
fn test_stage_order() {
    let loader = RecordingLoader::default();
    let log = loader.log.clone();
    let mut f = frame(&ScenePreset::Room.build(), 32, 32);
    let mut sao = Sao::new(&SaoConfig::default(), loader).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();

    let mut expected = vec!["reconstruct_csz".to_string()];
    expected.extend((1..=5).map(|_| "minify".to_string()));
    expected.extend(["raw_ao", "blur", "blur"].map(String::from));
    assert_eq!(*log.lock().unwrap(), expected);
}

#[test]
fn test_kernels_loaded_lazily_once() {
    let loader = RecordingLoader::default();
    let loads = loader.loads.clone();
    let mut f = frame(&ScenePreset::Flat.build(), 16, 16);
    let mut sao = Sao::new(&SaoConfig::default(), loader).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 0);

    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    sao.reload_kernels(&mut f.device).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_reload_keeps_previous_kernels() {
    let loader = RecordingLoader::default();
    let fail = loader.fail.clone();
    let mut f = frame(&ScenePreset::Room.build(), 16, 16);
    let mut sao = Sao::new(&SaoConfig::default(), loader).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();

    fail.store(true, Ordering::SeqCst);
    let err = sao.reload_kernels(&mut f.device).unwrap_err();
    assert!(matches!(err, Error::KernelLoad { .. }));
    assert!(sao.kernels_loaded());
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
}

#[test]
fn test_half_precision_pyramid() {
    let config = SaoConfig::from_json(r#"{ "z_bits": 16 }"#).unwrap();
    let mut f = frame(&ScenePreset::Room.build(), 32, 32);
    let mut sao = Sao::cpu(&config).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    assert_eq!(sao.buffers().buffers().unwrap().csz_format, TextureFormat::R16F);
}

#[test]
fn test_release_then_compute_reallocates() {
    let mut f = frame(&ScenePreset::Room.build(), 16, 16);
    let mut sao = Sao::cpu(&SaoConfig::default()).unwrap();
    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    sao.release(&mut f.device).unwrap();
    assert!(!sao.buffers().is_allocated());
    assert_eq!(f.device.stats().textures_destroyed, 3);

    sao.compute(&mut f.device, f.depth, &f.camera, 0, f.out_fb).unwrap();
    assert!(sao.buffers().is_allocated());
}
