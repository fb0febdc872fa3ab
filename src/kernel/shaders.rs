//! Embedded WGSL sources for the wgpu kernel set.
//!
//! Every module draws one full-screen triangle (`vs_fullscreen`) and writes
//! from `fs_main`. Binding 0 is the stage's uniform block, binding 1 its
//! input texture.

pub const RECONSTRUCT_CSZ_SHADER: &str = r#"
struct Params {
    clip_info: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var depth_buffer: texture_2d<f32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vid << 1u) & 2u), f32(vid & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let d = textureLoad(depth_buffer, vec2<i32>(frag.xy), 0).r;
    let z = params.clip_info.x / (params.clip_info.y * d + params.clip_info.z);
    return vec4<f32>(z, 0.0, 0.0, 1.0);
}
"#;

/// Reads the previous level through a single-level view.
pub const MINIFY_SHADER: &str = r#"
@group(0) @binding(1) var previous: texture_2d<f32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vid << 1u) & 2u), f32(vid & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(frag.xy);
    let size = vec2<i32>(textureDimensions(previous, 0));
    let src = clamp(p * 2 + vec2<i32>(p.y & 1, p.x & 1), vec2<i32>(0), size - vec2<i32>(1));
    return vec4<f32>(textureLoad(previous, src, 0).r, 0.0, 0.0, 1.0);
}
"#;

pub const RAW_AO_SHADER: &str = r#"
const NUM_SAMPLES: i32 = 11;
const NUM_SPIRAL_TURNS: f32 = 7.0;
const LOG_MAX_OFFSET: i32 = 3;
const MAX_MIP_LEVEL: i32 = 5;
const FAR_PLANE_Z: f32 = -300.0;
const EPSILON: f32 = 0.01;

struct Params {
    proj_info: vec4<f32>,
    clip_info: vec4<f32>,
    radius: f32,
    radius2: f32,
    bias: f32,
    intensity_div_r6: f32,
    proj_scale: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var csz: texture_2d<f32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vid << 1u) & 2u), f32(vid & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

fn reconstruct_cs_position(s: vec2<f32>, z: f32) -> vec3<f32> {
    return vec3<f32>((s * params.proj_info.xy + params.proj_info.zw) * z, z);
}

fn csz_to_key(z: f32) -> f32 {
    return clamp(z * (1.0 / FAR_PLANE_Z), 0.0, 1.0);
}

fn pack_key(key: f32) -> vec2<f32> {
    let temp = floor(key * 256.0);
    return vec2<f32>(temp * (1.0 / 256.0), key * 256.0 - temp);
}

fn is_finite(v: f32) -> bool {
    return v == v && abs(v) <= 3.4e38;
}

fn sample_ao(ss_c: vec2<i32>, c: vec3<f32>, n_c: vec3<f32>, disk_radius: f32, tap: i32, spin: f32) -> f32 {
    let alpha = (f32(tap) + 0.5) * (1.0 / f32(NUM_SAMPLES));
    let angle = alpha * (NUM_SPIRAL_TURNS * 6.28) + spin;
    let ss_r = alpha * disk_radius;

    let levels = i32(textureNumLevels(csz));
    let mip = clamp(firstLeadingBit(i32(ss_r)) - LOG_MAX_OFFSET, 0, min(MAX_MIP_LEVEL, levels - 1));

    let ss_p = vec2<i32>(ss_r * vec2<f32>(cos(angle), sin(angle))) + ss_c;
    let size = vec2<i32>(textureDimensions(csz, mip));
    let texel = clamp(ss_p >> vec2<u32>(u32(mip)), vec2<i32>(0), size - vec2<i32>(1));
    let z = textureLoad(csz, texel, mip).r;
    let q = reconstruct_cs_position(vec2<f32>(ss_p) + vec2<f32>(0.5), z);

    let v = q - c;
    let vv = dot(v, v);
    let vn = dot(v, n_c);
    let f = max(params.radius2 - vv, 0.0);
    let ao = f * f * f * max((vn - params.bias) / (EPSILON + vv), 0.0);
    return select(0.0, ao, is_finite(z));
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let ss_c = vec2<i32>(frag.xy);
    let c = reconstruct_cs_position(vec2<f32>(ss_c) + vec2<f32>(0.5), textureLoad(csz, ss_c, 0).r);
    let key = pack_key(csz_to_key(c.z));

    let n_c = normalize(cross(dpdyFine(c), dpdxFine(c)));
    let spin = f32(((3 * ss_c.x) ^ (ss_c.y + ss_c.x * ss_c.y)) * 10);
    let disk_radius = -params.proj_scale * params.radius / c.z;

    var sum = 0.0;
    for (var i = 0; i < NUM_SAMPLES; i++) {
        sum += sample_ao(ss_c, c, n_c, disk_radius, i, spin);
    }
    var a = max(0.0, 1.0 - sum * params.intensity_div_r6 * (5.0 / f32(NUM_SAMPLES)));

    let dx_z = dpdxFine(c.z);
    let dx_a = dpdxFine(a);
    a = select(a, a - dx_a * (f32(ss_c.x & 1) - 0.5), abs(dx_z) < 0.02);
    let dy_z = dpdyFine(c.z);
    let dy_a = dpdyFine(a);
    a = select(a, a - dy_a * (f32(ss_c.y & 1) - 0.5), abs(dy_z) < 0.02);

    return vec4<f32>(a, key.x, key.y, 1.0);
}
"#;

pub const BLUR_SHADER: &str = r#"
const R: i32 = 4;
const SCALE: i32 = 2;
const EDGE_SHARPNESS: f32 = 1.0;
const EPSILON: f32 = 0.0001;

var<private> GAUSSIAN: array<f32, 5> = array<f32, 5>(0.153170, 0.144893, 0.122649, 0.092902, 0.062970);

struct Params {
    axis: vec2<i32>,
    _pad: vec2<i32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var source: texture_2d<f32>;

@vertex
fn vs_fullscreen(@builtin(vertex_index) vid: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vid << 1u) & 2u), f32(vid & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

fn unpack_key(p: vec2<f32>) -> f32 {
    return (p.x * 256.0 + p.y) / 257.0;
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let ss_c = vec2<i32>(frag.xy);
    let size = vec2<i32>(textureDimensions(source, 0));
    let center = textureLoad(source, ss_c, 0);
    let key = unpack_key(center.gb);
    if (key == 1.0) {
        return vec4<f32>(center.rgb, 1.0);
    }

    var total = GAUSSIAN[0];
    var sum = center.r * total;
    for (var r = -R; r <= R; r++) {
        if (r != 0) {
            let p = clamp(ss_c + params.axis * (r * SCALE), vec2<i32>(0), size - vec2<i32>(1));
            let tap = textureLoad(source, p, 0);
            let tap_key = unpack_key(tap.gb);
            var weight = 0.3 + GAUSSIAN[abs(r)];
            weight *= max(0.0, 1.0 - (EDGE_SHARPNESS * 2000.0) * abs(tap_key - key));
            sum += tap.r * weight;
            total += weight;
        }
    }
    return vec4<f32>(sum / (total + EPSILON), center.g, center.b, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use naga::valid::{Capabilities, ValidationFlags, Validator};

    use super::*;
    use crate::kernel::{BlurUniforms, RawAoUniforms, ReconstructCszUniforms};

    const SHADERS: [(&str, &str); 4] = [
        ("reconstruct_csz", RECONSTRUCT_CSZ_SHADER),
        ("minify", MINIFY_SHADER),
        ("raw_ao", RAW_AO_SHADER),
        ("blur", BLUR_SHADER),
    ];

    fn validated(name: &str, source: &str) -> naga::Module {
        let module = naga::front::wgsl::parse_str(source)
            .unwrap_or_else(|e| panic!("{name}: {}", e.emit_to_string(source)));
        Validator::new(ValidationFlags::all(), Capabilities::default())
            .validate(&module)
            .unwrap_or_else(|e| panic!("{name}: {e:?}"));
        module
    }

    /// Member offsets and size of the module's `Params` block.
    fn params_layout(module: &naga::Module) -> Option<(Vec<(String, u32)>, u32)> {
        module.types.iter().find_map(|(_, ty)| match (&ty.name, &ty.inner) {
            (Some(name), naga::TypeInner::Struct { members, span }) if name == "Params" => Some((
                members
                    .iter()
                    .map(|m| (m.name.clone().unwrap_or_default(), m.offset))
                    .collect(),
                *span,
            )),
            _ => None,
        })
    }

    fn bindings(module: &naga::Module) -> Vec<u32> {
        let mut out: Vec<u32> = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| var.binding.as_ref())
            .map(|b| {
                assert_eq!(b.group, 0);
                b.binding
            })
            .collect();
        out.sort_unstable();
        out
    }

    fn assert_offsets(module: &naga::Module, size: usize, expected: &[(&str, usize)]) {
        let (members, span) = params_layout(module).expect("Params block");
        assert_eq!(span as usize, size, "Params size");
        for (name, offset) in expected {
            let member = members
                .iter()
                .find(|(n, _)| n == name)
                .unwrap_or_else(|| panic!("Params has no member {name}"));
            assert_eq!(member.1 as usize, *offset, "offset of {name}");
        }
    }

    #[test]
    fn test_embedded_shaders_validate() {
        for (name, source) in SHADERS {
            let module = validated(name, source);
            let stages: Vec<_> = module.entry_points.iter().map(|ep| (ep.name.as_str(), ep.stage)).collect();
            assert!(stages.contains(&("vs_fullscreen", naga::ShaderStage::Vertex)), "{name}");
            assert!(stages.contains(&("fs_main", naga::ShaderStage::Fragment)), "{name}");
        }
    }

    #[test]
    fn test_binding_slots() {
        for (name, source) in SHADERS {
            let module = validated(name, source);
            let expected: &[u32] = if name == "minify" { &[1] } else { &[0, 1] };
            assert_eq!(bindings(&module), expected, "{name}");
        }
    }

    #[test]
    fn test_reconstruct_params_layout() {
        let module = validated("reconstruct_csz", RECONSTRUCT_CSZ_SHADER);
        assert_offsets(
            &module,
            size_of::<ReconstructCszUniforms>(),
            &[("clip_info", offset_of!(ReconstructCszUniforms, clip_info))],
        );
    }

    #[test]
    fn test_raw_ao_params_layout() {
        let module = validated("raw_ao", RAW_AO_SHADER);
        assert_offsets(
            &module,
            size_of::<RawAoUniforms>(),
            &[
                ("proj_info", offset_of!(RawAoUniforms, proj_info)),
                ("clip_info", offset_of!(RawAoUniforms, clip_info)),
                ("radius", offset_of!(RawAoUniforms, radius)),
                ("radius2", offset_of!(RawAoUniforms, radius2)),
                ("bias", offset_of!(RawAoUniforms, bias)),
                ("intensity_div_r6", offset_of!(RawAoUniforms, intensity_div_r6)),
                ("proj_scale", offset_of!(RawAoUniforms, proj_scale)),
            ],
        );
    }

    #[test]
    fn test_blur_params_layout() {
        let module = validated("blur", BLUR_SHADER);
        assert_offsets(
            &module,
            size_of::<BlurUniforms>(),
            &[("axis", offset_of!(BlurUniforms, axis))],
        );
    }

    #[test]
    fn test_minify_has_no_params() {
        assert!(params_layout(&validated("minify", MINIFY_SHADER)).is_none());
    }
}
