//! Synthetic depth buffers.
//!
//! [`DepthScene`] ray-casts a handful of camera-space primitives through the
//! same projection the pipeline reconstructs with, so a rendered buffer
//! round-trips exactly through `reconstruct_z`. Used by the CLI and tests.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;

use crate::camera::Camera;
use crate::constants::SaoConstants;
use crate::device::{CpuDevice, RenderDevice, TextureDesc, TextureFormat, TextureId};
use crate::util::{Error, Result, Vec3};

/// Window depth written where no primitive is hit.
pub const SKY_DEPTH: f32 = 1.0;

/// Axis-aligned box in camera space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Entry distance of a ray from the origin (slab test).
    #[inline]
    fn intersect(&self, inv_dir: Vec3) -> Option<f32> {
        let t0 = self.min * inv_dir;
        let t1 = self.max * inv_dir;
        let t_near = t0.min(t1).max_element();
        let t_far = t0.max(t1).min_element();
        (t_near <= t_far && t_near > 0.0).then_some(t_near)
    }
}

/// Surface a ray can hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    /// Infinite plane through `point`
    Plane { point: Vec3, normal: Vec3 },
    /// Parallelogram `center + s*u + t*v` for `s, t` in `[-1, 1]`
    Rect { center: Vec3, u: Vec3, v: Vec3 },
    Box(Aabb),
}

impl Primitive {
    /// Ray parameter of the nearest hit along `dir` from the camera.
    fn intersect(&self, dir: Vec3, inv_dir: Vec3) -> Option<f32> {
        match *self {
            Primitive::Plane { point, normal } => plane_hit(point, normal, dir),
            Primitive::Rect { center, u, v } => {
                let t = plane_hit(center, u.cross(v), dir)?;
                let local = dir * t - center;
                let s = local.dot(u) / u.length_squared();
                let r = local.dot(v) / v.length_squared();
                (s.abs() <= 1.0 && r.abs() <= 1.0).then_some(t)
            }
            Primitive::Box(aabb) => aabb.intersect(inv_dir),
        }
    }
}

#[inline]
fn plane_hit(point: Vec3, normal: Vec3, dir: Vec3) -> Option<f32> {
    let denom = normal.dot(dir);
    if denom.abs() < 1e-8 {
        return None;
    }
    let t = point.dot(normal) / denom;
    (t > 0.0).then_some(t)
}

/// Built-in scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScenePreset {
    /// Wall facing the camera at `z = -5`
    #[default]
    Flat,
    /// 2x2 card folded away from the camera in front of empty sky
    Quad,
    /// Box-shaped room with a crate on the floor
    Room,
}

impl ScenePreset {
    pub const ALL: [ScenePreset; 3] = [ScenePreset::Flat, ScenePreset::Quad, ScenePreset::Room];

    pub fn name(self) -> &'static str {
        match self {
            ScenePreset::Flat => "flat",
            ScenePreset::Quad => "quad",
            ScenePreset::Room => "room",
        }
    }

    pub fn build(self) -> DepthScene {
        match self {
            ScenePreset::Flat => DepthScene::flat(-5.0),
            ScenePreset::Quad => DepthScene::folded_quad_on_sky(-5.0, 1.0),
            ScenePreset::Room => DepthScene::room(),
        }
    }
}

impl FromStr for ScenePreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown scene '{s}' (expected flat, quad or room)")))
    }
}

impl fmt::Display for ScenePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primitives in camera space, camera at the origin looking down `-z`.
#[derive(Debug, Clone, Default)]
pub struct DepthScene {
    primitives: Vec<Primitive>,
}

impl DepthScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }

    pub fn push(&mut self, primitive: Primitive) {
        self.primitives.push(primitive);
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    /// Plane facing the camera at camera-space `z`.
    pub fn flat(z: f32) -> Self {
        Self::new().with(Primitive::Plane {
            point: Vec3::new(0.0, 0.0, z),
            normal: Vec3::Z,
        })
    }

    /// Square of half-extent `half` at camera-space `z`, nothing behind it.
    pub fn quad_on_sky(z: f32, half: f32) -> Self {
        Self::new().with(Primitive::Rect {
            center: Vec3::new(0.0, 0.0, z),
            u: Vec3::X * half,
            v: Vec3::Y * half,
        })
    }

    /// Two panels of half-height `half` meeting at a crease `half` behind
    /// their outer edges at camera-space `z`, like a book opened toward the
    /// camera. Nothing behind it.
    pub fn folded_quad_on_sky(z: f32, half: f32) -> Self {
        let h = half * 0.5;
        let panel = |side: f32| Primitive::Rect {
            center: Vec3::new(side * h, 0.0, z - h),
            u: Vec3::new(side * h, 0.0, h),
            v: Vec3::Y * half,
        };
        Self::new().with(panel(-1.0)).with(panel(1.0))
    }

    pub fn room() -> Self {
        let plane = |point: Vec3, normal: Vec3| Primitive::Plane { point, normal };
        Self::new()
            .with(plane(Vec3::new(0.0, -1.5, 0.0), Vec3::Y))
            .with(plane(Vec3::new(0.0, 2.5, 0.0), Vec3::NEG_Y))
            .with(plane(Vec3::new(-3.0, 0.0, 0.0), Vec3::X))
            .with(plane(Vec3::new(3.0, 0.0, 0.0), Vec3::NEG_X))
            .with(plane(Vec3::new(0.0, 0.0, -9.0), Vec3::Z))
            .with(Primitive::Box(Aabb::new(
                Vec3::new(-1.6, -1.5, -6.5),
                Vec3::new(-0.4, -0.5, -5.0),
            )))
            .with(Primitive::Box(Aabb::new(
                Vec3::new(1.0, -1.5, -8.0),
                Vec3::new(2.2, 1.0, -7.0),
            )))
    }

    /// Camera-space z of the nearest visible surface along `dir`, if any.
    pub fn trace(&self, dir: Vec3) -> Option<f32> {
        let inv_dir = dir.recip();
        self.primitives
            .iter()
            .filter_map(|p| p.intersect(dir, inv_dir))
            .min_by(f32::total_cmp)
            .map(|t| t * dir.z)
    }

    /// Hyperbolic window depth, row-major with row 0 at the top.
    ///
    /// Surfaces nearer than the near plane are clipped; misses and surfaces
    /// beyond the far plane read [`SKY_DEPTH`].
    pub fn render_depth(&self, camera: &Camera, width: u32, height: u32) -> Vec<f32> {
        let constants = SaoConstants::from_camera(camera, width, height);
        let mut depth = vec![SKY_DEPTH; width as usize * height as usize];
        depth
            .par_chunks_mut(width.max(1) as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    // Position at z = -1 is the view direction
                    let dir = constants.reconstruct_position(x as f32, y as f32, -1.0);
                    *out = self
                        .trace(dir)
                        .and_then(|z| visible_depth(camera, z))
                        .unwrap_or(SKY_DEPTH);
                }
            });
        depth
    }

    /// Render into a new `Depth32F` texture on `device`.
    pub fn upload(&self, device: &mut CpuDevice, camera: &Camera, width: u32, height: u32) -> Result<TextureId> {
        let depth = self.render_depth(camera, width, height);
        let id = device.create_texture(&TextureDesc::new("depthBuffer", width, height, TextureFormat::Depth32F))?;
        device.write_texture(id, 0, &depth)?;
        Ok(id)
    }
}

fn visible_depth(camera: &Camera, z: f32) -> Option<f32> {
    if z > camera.near_z || z < camera.far_z {
        return None;
    }
    let d = camera.encode_depth(z);
    // Strictly below the sky value so the depth test keeps the pixel
    (d < SKY_DEPTH).then_some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_round_trip() {
        let camera = Camera::perspective(60.0, 0.1, 100.0);
        let depth = DepthScene::flat(-5.0).render_depth(&camera, 16, 8);
        let constants = SaoConstants::from_camera(&camera, 16, 8);
        for d in depth {
            assert!((constants.reconstruct_z(d) + 5.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_quad_on_sky_has_both() {
        let camera = Camera::perspective(60.0, 0.1, 100.0);
        let depth = DepthScene::quad_on_sky(-5.0, 1.0).render_depth(&camera, 33, 33);
        // Center pixel hits the quad, corner pixel is sky
        assert!(depth[16 * 33 + 16] < SKY_DEPTH);
        assert_eq!(depth[0], SKY_DEPTH);
    }

    #[test]
    fn test_folded_quad_crease_is_farthest() {
        let scene = DepthScene::folded_quad_on_sky(-5.0, 1.0);
        let crease = scene.trace(Vec3::new(0.0, 0.0, -1.0)).unwrap();
        assert!((crease + 6.0).abs() < 1e-5);
        let edge = scene.trace(Vec3::new(0.19, 0.0, -1.0)).unwrap();
        assert!(edge > crease && edge < -5.0);
        assert!(scene.trace(Vec3::new(0.5, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_box_slab() {
        let aabb = Aabb::new(Vec3::new(1.0, 1.0, -4.0), Vec3::new(-1.0, -1.0, -2.0));
        let dir = Vec3::new(0.0, 0.0, -1.0);
        assert_eq!(aabb.intersect(dir.recip()), Some(2.0));
        let miss = Vec3::new(1.0, 0.0, -0.1);
        assert_eq!(aabb.intersect(miss.recip()), None);
    }

    #[test]
    fn test_nearest_primitive_wins() {
        let scene = DepthScene::flat(-10.0).with(Primitive::Plane {
            point: Vec3::new(0.0, 0.0, -3.0),
            normal: Vec3::Z,
        });
        let z = scene.trace(Vec3::new(0.0, 0.0, -1.0)).unwrap();
        assert!((z + 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_beyond_far_is_sky() {
        let camera = Camera::perspective(60.0, 0.1, 4.0);
        let depth = DepthScene::flat(-5.0).render_depth(&camera, 4, 4);
        assert!(depth.iter().all(|&d| d == SKY_DEPTH));
    }

    #[test]
    fn test_preset_parse() {
        assert_eq!("Room".parse::<ScenePreset>().unwrap(), ScenePreset::Room);
        assert!("cave".parse::<ScenePreset>().is_err());
        assert_eq!(ScenePreset::Quad.to_string(), "quad");
    }
}
