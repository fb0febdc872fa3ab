//! Reference kernels for the software device.

use crate::device::{CpuDevice, PassState, PixelShader, TextureStore};
use crate::util::{Result, Vec2, Vec3};

use super::{
    csz_to_key, pack_key, unpack_key, BlurArgs, Kernel, KernelLoader, KernelSet, MinifyArgs,
    RawAoArgs, ReconstructCszArgs, BLUR_EDGE_SHARPNESS, BLUR_GAUSSIAN, BLUR_RADIUS, BLUR_SCALE,
    LOG_MAX_OFFSET, NUM_SAMPLES, NUM_SPIRAL_TURNS,
};

/// Highest pyramid level the obscurance kernel reads.
const MAX_MIP_LEVEL: i32 = 5;

/// Guards the tap falloff against division by zero.
const AO_EPSILON: f32 = 0.01;

/// Guards the blur normalization.
const BLUR_EPSILON: f32 = 0.0001;

/// Loads the CPU reference kernels. Never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuKernelLoader;

impl KernelLoader<CpuDevice> for CpuKernelLoader {
    fn load(&self, _device: &mut CpuDevice) -> Result<KernelSet<CpuDevice>> {
        Ok(KernelSet {
            reconstruct_csz: Box::new(ReconstructCsz),
            minify: Box::new(Minify),
            raw_ao: Box::new(RawAo),
            blur: Box::new(Blur),
        })
    }
}

struct ReconstructCsz;

struct ReconstructShader<'a>(&'a ReconstructCszArgs);

impl PixelShader for ReconstructShader<'_> {
    fn shade(&self, textures: &TextureStore, x: u32, y: u32) -> [f32; 4] {
        let c = self.0.clip_info;
        let d = textures.fetch(self.0.depth_buffer, 0, x as i32, y as i32)[0];
        [c.x / (c.y * d + c.z), 0.0, 0.0, 1.0]
    }
}

impl Kernel<CpuDevice, ReconstructCszArgs> for ReconstructCsz {
    fn name(&self) -> &str {
        "reconstruct_csz"
    }

    fn apply(&self, device: &mut CpuDevice, pass: &PassState, args: &ReconstructCszArgs) -> Result<()> {
        device.apply_rect(pass, &ReconstructShader(args))
    }
}

struct Minify;

struct MinifyShader<'a>(&'a MinifyArgs);

impl PixelShader for MinifyShader<'_> {
    fn shade(&self, textures: &TextureStore, x: u32, y: u32) -> [f32; 4] {
        let (x, y) = (x as i32, y as i32);
        // Rotated grid: alternate which texel of each 2x2 block survives
        let sx = 2 * x + (y & 1);
        let sy = 2 * y + (x & 1);
        let z = textures.fetch(self.0.texture, self.0.previous_mip, sx, sy)[0];
        [z, 0.0, 0.0, 1.0]
    }
}

impl Kernel<CpuDevice, MinifyArgs> for Minify {
    fn name(&self) -> &str {
        "minify"
    }

    fn apply(&self, device: &mut CpuDevice, pass: &PassState, args: &MinifyArgs) -> Result<()> {
        device.apply_rect(pass, &MinifyShader(args))
    }
}

struct RawAo;

struct RawAoShader<'a> {
    args: &'a RawAoArgs,
    radius2: f32,
    max_mip: i32,
}

impl RawAoShader<'_> {
    #[inline]
    fn position(&self, s: Vec2, z: f32) -> Vec3 {
        let p = self.args.proj_info;
        let xy = (s * Vec2::new(p.x, p.y) + Vec2::new(p.z, p.w)) * z;
        xy.extend(z)
    }

    #[inline]
    fn csz(&self, textures: &TextureStore, level: u32, x: i32, y: i32) -> f32 {
        textures.fetch(self.args.csz_buffer, level, x, y)[0]
    }

    /// Sum of tap contributions around camera-space point `c`.
    fn occlusion(&self, textures: &TextureStore, ss_c: (i32, i32), c: Vec3, n_c: Vec3) -> f32 {
        let (x, y) = ss_c;
        let spin = ((3i32.wrapping_mul(x)) ^ (y.wrapping_add(x.wrapping_mul(y)))).wrapping_mul(10) as f32;
        let disk_radius = -self.args.proj_scale * self.args.radius / c.z;

        let mut sum = 0.0;
        for i in 0..NUM_SAMPLES {
            let alpha = (i as f32 + 0.5) * (1.0 / NUM_SAMPLES as f32);
            let angle = alpha * (NUM_SPIRAL_TURNS as f32 * 6.28) + spin;
            let ss_r = alpha * disk_radius;
            let mip = (find_msb(ss_r as i32) - LOG_MAX_OFFSET).clamp(0, self.max_mip);

            let px = (ss_r * angle.cos()) as i32 + x;
            let py = (ss_r * angle.sin()) as i32 + y;
            let z = self.csz(textures, mip as u32, px >> mip, py >> mip);
            if !z.is_finite() {
                continue;
            }
            let q = self.position(Vec2::new(px as f32 + 0.5, py as f32 + 0.5), z);

            let v = q - c;
            let vv = v.dot(v);
            let vn = v.dot(n_c);
            let f = (self.radius2 - vv).max(0.0);
            sum += f * f * f * ((vn - self.args.bias) / (AO_EPSILON + vv)).max(0.0);
        }
        sum
    }
}

/// Index of the highest set bit, `-1` for non-positive input.
#[inline]
fn find_msb(v: i32) -> i32 {
    if v <= 0 {
        -1
    } else {
        31 - v.leading_zeros() as i32
    }
}

impl PixelShader for RawAoShader<'_> {
    fn shade(&self, textures: &TextureStore, x: u32, y: u32) -> [f32; 4] {
        // Single pixels only occur for odd-sized clips; shade the whole quad
        let (qx, qy) = (x & !1, y & !1);
        self.shade_quad(textures, qx, qy)[(((y - qy) << 1) | (x - qx)) as usize]
    }

    fn shade_quad(&self, textures: &TextureStore, x: u32, y: u32) -> [[f32; 4]; 4] {
        let pixel = |i: usize| (x as i32 + (i & 1) as i32, y as i32 + (i >> 1) as i32);

        let mut c = [Vec3::ZERO; 4];
        for (i, ci) in c.iter_mut().enumerate() {
            let (px, py) = pixel(i);
            let z = self.csz(textures, 0, px, py);
            *ci = self.position(Vec2::new(px as f32 + 0.5, py as f32 + 0.5), z);
        }

        // Fine derivatives: along the pixel's own row / column of the quad
        let ddx = |v: &[Vec3; 4], i: usize| if i < 2 { v[1] - v[0] } else { v[3] - v[2] };
        let ddy = |v: &[Vec3; 4], i: usize| if i & 1 == 0 { v[2] - v[0] } else { v[3] - v[1] };

        let mut a = [0.0f32; 4];
        for i in 0..4 {
            let n_c = ddy(&c, i).cross(ddx(&c, i)).normalize();
            let sum = self.occlusion(textures, pixel(i), c[i], n_c);
            a[i] = (1.0 - sum * self.args.intensity_div_r6 * (5.0 / NUM_SAMPLES as f32)).max(0.0);
        }

        // Bilinear smoothing across the quad where depth is continuous
        let row_dz = [c[1].z - c[0].z, c[3].z - c[2].z];
        let row_da = [a[1] - a[0], a[3] - a[2]];
        for i in 0..4 {
            if row_dz[i >> 1].abs() < 0.02 {
                a[i] -= row_da[i >> 1] * ((i & 1) as f32 - 0.5);
            }
        }
        let col_dz = [c[2].z - c[0].z, c[3].z - c[1].z];
        let col_da = [a[2] - a[0], a[3] - a[1]];
        for i in 0..4 {
            if col_dz[i & 1].abs() < 0.02 {
                a[i] -= col_da[i & 1] * ((i >> 1) as f32 - 0.5);
            }
        }

        let mut out = [[0.0; 4]; 4];
        for i in 0..4 {
            let (hi, lo) = pack_key(csz_to_key(c[i].z));
            out[i] = [a[i], hi, lo, 1.0];
        }
        out
    }
}

impl Kernel<CpuDevice, RawAoArgs> for RawAo {
    fn name(&self) -> &str {
        "raw_ao"
    }

    fn apply(&self, device: &mut CpuDevice, pass: &PassState, args: &RawAoArgs) -> Result<()> {
        let levels = device.textures().mip_levels(args.csz_buffer) as i32;
        let shader = RawAoShader {
            args,
            radius2: args.radius * args.radius,
            max_mip: MAX_MIP_LEVEL.min(levels - 1).max(0),
        };
        device.apply_rect(pass, &shader)
    }
}

struct Blur;

struct BlurShader<'a>(&'a BlurArgs);

impl PixelShader for BlurShader<'_> {
    fn shade(&self, textures: &TextureStore, x: u32, y: u32) -> [f32; 4] {
        let (x, y) = (x as i32, y as i32);
        let center = textures.fetch(self.0.source, 0, x, y);
        let key = unpack_key(center[1], center[2]);
        if key == 1.0 {
            // Sky: nothing to blur against
            return [center[0], center[1], center[2], 1.0];
        }

        let mut total = BLUR_GAUSSIAN[0];
        let mut sum = center[0] * total;
        for r in -BLUR_RADIUS..=BLUR_RADIUS {
            if r == 0 {
                continue;
            }
            let offset = self.0.axis * (r * BLUR_SCALE);
            let tap = textures.fetch(self.0.source, 0, x + offset.x, y + offset.y);
            let tap_key = unpack_key(tap[1], tap[2]);

            let mut weight = 0.3 + BLUR_GAUSSIAN[r.unsigned_abs() as usize];
            weight *= (1.0 - BLUR_EDGE_SHARPNESS * 2000.0 * (tap_key - key).abs()).max(0.0);
            sum += tap[0] * weight;
            total += weight;
        }
        [sum / (total + BLUR_EPSILON), center[1], center[2], 1.0]
    }
}

impl Kernel<CpuDevice, BlurArgs> for Blur {
    fn name(&self) -> &str {
        "blur"
    }

    fn apply(&self, device: &mut CpuDevice, pass: &PassState, args: &BlurArgs) -> Result<()> {
        device.apply_rect(pass, &BlurShader(args))
    }
}
