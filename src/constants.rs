//! Per-frame constants derived from the camera.

use crate::camera::Camera;
use crate::util::{Error, Mat4, Result, Vec3, Vec4};

/// Coefficients `(c0, c1, c2)` of `z = c0 / (c1 * d + c2)`.
///
/// `near_z`/`far_z` are signed plane depths; `far_z = -inf` selects the
/// infinite-far-plane form `(near, -1, 1)`.
pub fn clip_constant(near_z: f32, far_z: f32) -> Vec3 {
    if far_z == f32::NEG_INFINITY {
        Vec3::new(near_z, -1.0, 1.0)
    } else {
        let (n, f) = (near_z as f64, far_z as f64);
        Vec3::new((n * f) as f32, (n - f) as f32, f as f32)
    }
}

/// Coefficients mapping pixel coordinates and z to camera-space x/y.
///
/// `P` is the unit projection for a `width x height` raster.
pub fn proj_constant(p: &Mat4, width: u32, height: u32) -> Vec4 {
    let (w, h) = (width as f64, height as f64);
    let p00 = p.col(0)[0] as f64;
    let p11 = p.col(1)[1] as f64;
    let p02 = p.col(2)[0] as f64;
    let p12 = p.col(2)[1] as f64;
    Vec4::new(
        (-2.0 / (w * p00)) as f32,
        (-2.0 / (h * p11)) as f32,
        ((1.0 - p02) / p00) as f32,
        ((1.0 + p12) / p11) as f32,
    )
}

/// Everything the pipeline needs from the camera for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaoConstants {
    pub clip_info: Vec3,
    pub proj_info: Vec4,
    /// Pixels per world unit at `z = -1`
    pub proj_scale: f32,
}

impl SaoConstants {
    /// Constants for a camera rendering a `width x height` buffer (guard
    /// band included).
    pub fn from_camera(camera: &Camera, width: u32, height: u32) -> Self {
        let p = camera.project_unit_matrix(width, height);
        Self {
            clip_info: clip_constant(camera.near_z, camera.far_z),
            proj_info: proj_constant(&p, width, height),
            proj_scale: camera.image_plane_pixels_per_meter(width, height).abs(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.proj_scale > 0.0 && self.proj_scale.is_finite()) {
            return Err(Error::NonPositiveProjScale(self.proj_scale));
        }
        Ok(())
    }

    /// Camera-space position of pixel center `(x + 0.5, y + 0.5)` at depth `z`.
    pub fn reconstruct_position(&self, x: f32, y: f32, z: f32) -> Vec3 {
        let p = self.proj_info;
        Vec3::new(((x + 0.5) * p.x + p.z) * z, ((y + 0.5) * p.y + p.w) * z, z)
    }

    /// Camera-space z of window depth `d`.
    pub fn reconstruct_z(&self, d: f32) -> f32 {
        let c = self.clip_info;
        c.x / (c.y * d + c.z)
    }
}
