//! Obscurance tunables.

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};

/// Radius, bias and intensity of the obscurance estimate.
///
/// Read once per [`Sao::compute`](crate::Sao::compute); changes apply to the
/// next frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaoSettings {
    /// World-space sampling radius (> 0)
    pub radius: f32,
    /// Bias against self-occlusion on flat surfaces
    pub bias: f32,
    /// Darkening multiplier
    pub intensity: f32,
}

impl Default for SaoSettings {
    fn default() -> Self {
        Self {
            radius: 1.0,
            bias: 0.012,
            intensity: 1.0,
        }
    }
}

impl SaoSettings {
    pub fn validate(&self) -> Result<()> {
        check_radius(self.radius)
    }

    /// `intensity / radius^6`, the falloff normalization fed to the kernel.
    pub fn intensity_div_r6(&self) -> f32 {
        self.intensity / self.radius.powi(6)
    }
}

pub(crate) fn check_radius(radius: f32) -> Result<()> {
    if radius > 0.0 && radius.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidRadius(radius))
    }
}
