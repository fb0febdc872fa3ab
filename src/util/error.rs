//! Error types for the SAO pipeline.

use thiserror::Error;

use crate::device::{FramebufferId, TextureFormat, TextureId};

/// Main error type for pipeline, device and configuration operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The depth buffer handle does not name a live texture
    #[error("Depth buffer is required (texture {0:?} does not exist)")]
    MissingDepthBuffer(TextureId),

    /// Projection scale must be strictly positive
    #[error("Projection scale must be positive and finite, got {0}")]
    NonPositiveProjScale(f32),

    /// Obscurance radius must be strictly positive
    #[error("Radius must be positive, got {0}")]
    InvalidRadius(f32),

    /// Only 16- and 32-bit camera-space depth are supported
    #[error("Only 16- and 32-bit camera-space depth are supported, got {0} bits")]
    UnsupportedPrecision(u32),

    /// Guard band leaves an empty or inverted compute region
    #[error("Guard band {guard_band} does not fit a {width}x{height} buffer")]
    InvalidGuardBand { guard_band: u32, width: u32, height: u32 },

    /// Output framebuffer does not match the depth buffer
    #[error("Output target is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    TargetSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Texture or framebuffer dimensions are zero or too large
    #[error("Invalid dimensions {0}x{1}")]
    InvalidDimensions(u32, u32),

    /// Texture handle not known to the device
    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureId),

    /// Framebuffer handle not known to the device
    #[error("Unknown framebuffer {0:?}")]
    UnknownFramebuffer(FramebufferId),

    /// Framebuffer has nothing bound to its color slot
    #[error("Framebuffer '{0}' has no color attachment")]
    MissingColorAttachment(String),

    /// Framebuffer references storage that was resized after binding
    #[error("Framebuffer '{0}' is bound to stale texture storage")]
    StaleFramebuffer(String),

    /// Format cannot be used for the requested purpose
    #[error("Texture format {format:?} cannot be used as {usage}")]
    UnsupportedFormat { format: TextureFormat, usage: &'static str },

    /// Mip level outside the texture's chain
    #[error("Mip level {level} out of range (levels: {count})")]
    MipOutOfRange { level: u32, count: u32 },

    /// Pixel data does not match the texture layout
    #[error("Pixel data length {actual} does not match expected {expected}")]
    DataLength { expected: usize, actual: usize },

    /// Imported textures are owned by the caller and cannot be resized
    #[error("Texture '{0}' is imported and cannot be resized or destroyed")]
    ImportedTexture(String),

    /// A numeric kernel could not be (re)acquired
    #[error("Kernel '{name}' failed to load: {reason}")]
    KernelLoad { name: String, reason: String },

    /// Device-level failure reported by a backend
    #[error("Device error: {0}")]
    Device(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a kernel load error.
    pub fn kernel_load(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KernelLoad {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for caller misuse that aborts the current frame.
    ///
    /// These are never retried; the caller decides whether to continue with
    /// the next frame.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingDepthBuffer(_)
                | Self::NonPositiveProjScale(_)
                | Self::InvalidRadius(_)
                | Self::UnsupportedPrecision(_)
                | Self::InvalidGuardBand { .. }
                | Self::TargetSizeMismatch { .. }
                | Self::InvalidDimensions(..)
        )
    }
}

/// Result type alias for SAO operations.
pub type Result<T> = std::result::Result<T, Error>;
