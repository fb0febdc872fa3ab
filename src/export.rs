//! PNG dumps of pipeline targets on the software device.

use std::path::Path;

use image::GrayImage;
use tracing::info;

use crate::device::{CpuDevice, RenderDevice, TextureId};
use crate::util::{Error, Result};

/// Write channel 0 of `texture` level 0 as 8-bit grey (0 black, 1 white).
pub fn save_occlusion_png(device: &CpuDevice, texture: TextureId, path: &Path) -> Result<()> {
    let (width, height) = device.texture_size(texture, 0)?;
    let values = device.read_channel(texture, 0, 0)?;
    write_grey(path, width, height, values.iter().copied())?;
    info!("wrote occlusion {}x{} to {}", width, height, path.display());
    Ok(())
}

/// Write one camera-space depth pyramid level, linearly mapping distances
/// `near..far` (positive) to white..black.
pub fn save_csz_level_png(
    device: &CpuDevice,
    csz: TextureId,
    level: u32,
    near: f32,
    far: f32,
    path: &Path,
) -> Result<()> {
    if !(far > near) {
        return Err(Error::Config(format!("csz range {near}..{far} is empty")));
    }
    let (width, height) = device.texture_size(csz, level)?;
    let values = device.read_channel(csz, level, 0)?;
    let range = far - near;
    write_grey(
        path,
        width,
        height,
        values.iter().map(|&z| 1.0 - (-z - near) / range),
    )?;
    info!("wrote csz level {} ({}x{}) to {}", level, width, height, path.display());
    Ok(())
}

fn write_grey(path: &Path, width: u32, height: u32, values: impl Iterator<Item = f32>) -> Result<()> {
    let bytes: Vec<u8> = values.map(to_u8).collect();
    let img = GrayImage::from_raw(width, height, bytes)
        .ok_or_else(|| Error::other(format!("pixel buffer does not match {width}x{height}")))?;
    img.save(path)?;
    Ok(())
}

#[inline]
fn to_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{TextureDesc, TextureFormat};

    #[test]
    fn test_occlusion_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ao.png");
        let mut device = CpuDevice::new();
        let tex = device
            .create_texture(&TextureDesc::new("ao", 4, 2, TextureFormat::Rgb8))
            .unwrap();
        device.fill_texture(tex, 0, [0.5, 0.0, 0.0, 1.0]).unwrap();
        save_occlusion_png(&device, tex, &path).unwrap();

        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (4, 2));
        assert!(img.pixels().all(|p| p.0[0] == 128));
    }

    #[test]
    fn test_csz_png_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut device = CpuDevice::new();
        let tex = device
            .create_texture(&TextureDesc::new("csz", 2, 1, TextureFormat::R32F))
            .unwrap();
        device.write_texture(tex, 0, &[-1.0, -11.0]).unwrap();
        let path = dir.path().join("csz.png");
        save_csz_level_png(&device, tex, 0, 1.0, 11.0, &path).unwrap();

        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert_eq!(img.get_pixel(1, 0).0[0], 0);

        assert!(save_csz_level_png(&device, tex, 0, 5.0, 5.0, &path).is_err());
    }

    #[test]
    fn test_to_u8() {
        assert_eq!(to_u8(f32::NAN), 0);
        assert_eq!(to_u8(2.0), 255);
        assert_eq!(to_u8(-1.0), 0);
    }
}
