//! Pinhole camera model used to derive per-frame constants.
//!
//! Camera space is right handed with the camera looking down `-z`; the near
//! and far planes are stored as signed (negative) z values. Rasters have
//! row 0 at the top.

use crate::util::{Mat4, Vec2};

/// Axis the field of view is measured along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FovDirection {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Full field of view in radians
    pub fov: f32,
    pub fov_direction: FovDirection,
    /// Signed z of the near plane (< 0)
    pub near_z: f32,
    /// Signed z of the far plane (< near_z), may be `-inf`
    pub far_z: f32,
    /// Sub-pixel shift of the raster, in pixels
    pub pixel_offset: Vec2,
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(60.0, 0.1, 100.0)
    }
}

impl Camera {
    /// Vertical-FOV camera from positive near/far distances.
    ///
    /// Pass `f32::INFINITY` as `far` for an infinite far plane.
    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            fov: fov_y_degrees.to_radians(),
            fov_direction: FovDirection::Vertical,
            near_z: -near.abs(),
            far_z: -far.abs(),
            pixel_offset: Vec2::ZERO,
        }
    }

    pub fn with_fov_direction(mut self, direction: FovDirection) -> Self {
        self.fov_direction = direction;
        self
    }

    pub fn with_pixel_offset(mut self, offset: Vec2) -> Self {
        self.pixel_offset = offset;
        self
    }

    pub fn far_is_infinite(&self) -> bool {
        self.far_z == f32::NEG_INFINITY
    }

    /// Half extents of the frustum on the near plane.
    fn near_extents(&self, width: f32, height: f32) -> (f64, f64) {
        let t = (-self.near_z as f64) * (self.fov as f64 * 0.5).tan();
        match self.fov_direction {
            FovDirection::Vertical => (t * width as f64 / height as f64, t),
            FovDirection::Horizontal => (t, t * height as f64 / width as f64),
        }
    }

    /// Projection from camera space to normalized device coordinates for a
    /// `width x height` raster, with y flipped so row 0 is the top row.
    ///
    /// NDC z follows the GL convention (`-1..1`).
    pub fn project_unit_matrix(&self, width: u32, height: u32) -> Mat4 {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let (x, y) = self.near_extents(w, h);
        let dx = self.pixel_offset.x as f64 * 2.0 * x / w as f64;
        let dy = self.pixel_offset.y as f64 * 2.0 * y / h as f64;
        let (l, r) = (-x - dx, x - dx);
        let (b, t) = (-y + dy, y + dy);
        let n = -self.near_z as f64;

        let (p22, p23) = if self.far_is_infinite() {
            (-1.0, -2.0 * n)
        } else {
            let f = -self.far_z as f64;
            (-(f + n) / (f - n), -2.0 * f * n / (f - n))
        };

        let p00 = 2.0 * n / (r - l);
        let p02 = (r + l) / (r - l);
        let p11 = 2.0 * n / (t - b);
        let p12 = (t + b) / (t - b);

        // Columns; row 1 negated for the top-down raster
        Mat4::from_cols_array(&[
            p00 as f32, 0.0, 0.0, 0.0,
            0.0, -p11 as f32, 0.0, 0.0,
            p02 as f32, -p12 as f32, p22 as f32, -1.0,
            0.0, 0.0, p23 as f32, 0.0,
        ])
    }

    /// Pixels per world unit on the image plane at `z = -1`.
    ///
    /// Negative by convention; callers take the absolute value.
    pub fn image_plane_pixels_per_meter(&self, width: u32, height: u32) -> f32 {
        let scale = -2.0 * (self.fov * 0.5).tan();
        match self.fov_direction {
            FovDirection::Vertical => height as f32 / scale,
            FovDirection::Horizontal => width as f32 / scale,
        }
    }

    /// Window-space depth in `[0, 1]` of camera-space `z`.
    ///
    /// Inverse of the reconstruction `z = c0 / (c1 * d + c2)`.
    pub fn encode_depth(&self, z: f32) -> f32 {
        let (n, z) = (self.near_z as f64, z as f64);
        let d = if self.far_is_infinite() {
            1.0 - n / z
        } else {
            let f = self.far_z as f64;
            (f / (f - n)) * (1.0 - n / z)
        };
        d as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec4;

    #[test]
    fn test_perspective_signs() {
        let cam = Camera::perspective(60.0, 0.5, 200.0);
        assert_eq!(cam.near_z, -0.5);
        assert_eq!(cam.far_z, -200.0);
        assert!(!cam.far_is_infinite());
        assert!(Camera::perspective(60.0, 0.5, f32::INFINITY).far_is_infinite());
    }

    #[test]
    fn test_unit_matrix_flips_y() {
        let cam = Camera::perspective(90.0, 1.0, 100.0);
        let p = cam.project_unit_matrix(200, 100);
        assert!(p.col(1)[1] < 0.0);
        // 90 degree vertical fov: P11 = -1, P00 = 1/aspect
        assert!((p.col(1)[1] + 1.0).abs() < 1e-6);
        assert!((p.col(0)[0] - 0.5).abs() < 1e-6);

        // A point above the axis lands in the upper half of the raster
        let clip = p * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_unit_matrix_depth_range() {
        let cam = Camera::perspective(60.0, 1.0, 10.0);
        let p = cam.project_unit_matrix(64, 64);
        let near = p * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -10.0, 1.0);
        assert!((near.z / near.w + 1.0).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_encode_depth_endpoints() {
        let cam = Camera::perspective(60.0, 0.1, 100.0);
        assert!(cam.encode_depth(-0.1).abs() < 1e-6);
        assert!((cam.encode_depth(-100.0) - 1.0).abs() < 1e-6);
        let inf = Camera::perspective(60.0, 0.1, f32::INFINITY);
        assert!(inf.encode_depth(-1e9) < 1.0);
        assert!((inf.encode_depth(-0.2) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pixels_per_meter() {
        let cam = Camera::perspective(90.0, 1.0, 10.0);
        assert!((cam.image_plane_pixels_per_meter(640, 480) + 240.0).abs() < 1e-3);
        let h = cam.with_fov_direction(FovDirection::Horizontal);
        assert!((h.image_plane_pixels_per_meter(640, 480) + 320.0).abs() < 1e-3);
    }
}
