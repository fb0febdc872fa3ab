//! Pipeline configuration persisted as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::TextureFormat;
use crate::settings::SaoSettings;
use crate::util::{Error, Result};

/// Default number of pyramid levels below level 0.
pub const DEFAULT_MAX_MIP_LEVEL: u32 = 5;

/// Storage precision of the camera-space depth pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum DepthPrecision {
    Half,
    #[default]
    Full,
}

impl DepthPrecision {
    pub fn bits(self) -> u32 {
        match self {
            Self::Half => 16,
            Self::Full => 32,
        }
    }

    /// Pyramid formats in order of preference.
    pub fn candidates(self) -> &'static [TextureFormat] {
        match self {
            Self::Half => &[TextureFormat::R16F, TextureFormat::L16F],
            Self::Full => &[TextureFormat::R32F, TextureFormat::L32F, TextureFormat::Rg32F],
        }
    }
}

impl TryFrom<u32> for DepthPrecision {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            16 => Ok(Self::Half),
            32 => Ok(Self::Full),
            other => Err(Error::UnsupportedPrecision(other)),
        }
    }
}

impl From<DepthPrecision> for u32 {
    fn from(p: DepthPrecision) -> u32 {
        p.bits()
    }
}

/// Construction-time configuration of a [`Sao`](crate::Sao) instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaoConfig {
    /// Bits per camera-space depth sample (16 or 32)
    pub z_bits: DepthPrecision,
    /// Deepest pyramid level
    pub max_mip_level: u32,
    pub settings: SaoSettings,
    /// Margin excluded from obscurance computation, in pixels
    pub guard_band: u32,
    /// Directory searched for kernel source overrides
    pub kernel_dir: Option<PathBuf>,
}

impl Default for SaoConfig {
    fn default() -> Self {
        Self {
            z_bits: DepthPrecision::Full,
            max_mip_level: DEFAULT_MAX_MIP_LEVEL,
            settings: SaoSettings::default(),
            guard_band: 0,
            kernel_dir: None,
        }
    }
}

impl SaoConfig {
    /// `<config dir>/sao/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("sao");
            p.push("config.json");
            p
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if self.max_mip_level > 15 {
            return Err(Error::Config(format!(
                "max_mip_level {} exceeds 15",
                self.max_mip_level
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!("loading config from {}", path.display());
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("{} not found, using default config", path.display());
            Ok(Self::default())
        }
    }

    /// Load from [`default_path`](Self::default_path), falling back to
    /// defaults when the file is missing.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_from_bits() {
        assert_eq!(DepthPrecision::try_from(16).unwrap(), DepthPrecision::Half);
        assert_eq!(DepthPrecision::try_from(32).unwrap(), DepthPrecision::Full);
        assert!(matches!(DepthPrecision::try_from(24), Err(Error::UnsupportedPrecision(24))));
    }

    #[test]
    fn test_precision_candidates() {
        assert_eq!(DepthPrecision::Half.candidates()[0], TextureFormat::R16F);
        assert_eq!(DepthPrecision::Full.candidates().last(), Some(&TextureFormat::Rg32F));
    }

    #[test]
    fn test_bad_z_bits_rejected_at_parse() {
        let err = SaoConfig::from_json(r#"{"z_bits": 8}"#).unwrap_err();
        assert!(err.to_string().contains('8'));
    }

    #[test]
    fn test_json_defaults() {
        let config = SaoConfig::from_json(r#"{"z_bits": 16, "guard_band": 32}"#).unwrap();
        assert_eq!(config.z_bits, DepthPrecision::Half);
        assert_eq!(config.guard_band, 32);
        assert_eq!(config.max_mip_level, DEFAULT_MAX_MIP_LEVEL);
        assert_eq!(config.settings, SaoSettings::default());
    }

    #[test]
    fn test_invalid_radius_rejected() {
        let err = SaoConfig::from_json(r#"{"settings": {"radius": -2.0}}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidRadius(_)));
    }

    #[test]
    fn test_z_bits_serialized_as_number() {
        let json = SaoConfig::default().to_json().unwrap();
        assert!(json.contains("\"z_bits\": 32"));
    }
}
