//! Math type re-exports and raster-space helpers.
//!
//! This module re-exports the `glam` types used across the pipeline and
//! provides [`Rect2D`], the half-open pixel rectangle used for viewports,
//! scissor clips and guard bands.

pub use glam::{IVec2, Mat4, UVec2, Vec2, Vec3, Vec4};

use std::fmt;

use super::error::{Error, Result};

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect2D {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect2D {
    /// Rectangle from two corners. Inverted corners produce an empty rect.
    pub const fn xyxy(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Rectangle from origin and extent.
    pub const fn xywh(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + width,
            y1: y + height,
        }
    }

    /// Full viewport of a `width x height` target.
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::xywh(0, 0, width, height)
    }

    /// The region outside a symmetric guard band.
    ///
    /// Fails when the band would leave an empty or inverted region.
    pub fn inside_guard_band(width: u32, height: u32, guard_band: u32) -> Result<Self> {
        let fits = guard_band
            .checked_mul(2)
            .map(|g2| g2 < width && g2 < height)
            .unwrap_or(false);
        if !fits {
            return Err(Error::InvalidGuardBand {
                guard_band,
                width,
                height,
            });
        }
        Ok(Self::xyxy(
            guard_band,
            guard_band,
            width - guard_band,
            height - guard_band,
        ))
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Overlap of two rectangles (empty if disjoint).
    pub fn intersect(&self, other: &Rect2D) -> Rect2D {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1).max(x0);
        let y1 = self.y1.min(other.y1).max(y0);
        Rect2D { x0, y0, x1, y1 }
    }
}

impl fmt::Debug for Rect2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rect2D[({}, {})..({}, {})]", self.x0, self.y0, self.x1, self.y1)
    }
}
