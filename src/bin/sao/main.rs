//! SAO CLI - render ambient obscurance for synthetic depth scenes.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use sao::camera::{Camera, FovDirection};
use sao::config::SaoConfig;
use sao::constants::SaoConstants;
use sao::device::{Attachment, CpuDevice, RenderDevice, TextureDesc, TextureFormat};
use sao::export::{save_csz_level_png, save_occlusion_png};
use sao::scene::ScenePreset;
use sao::Sao;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    // Global flags
    let mut level = "info";
    let mut filtered: Vec<&str> = Vec::new();
    for arg in &args {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered.push(arg),
        }
    }
    let _guard = init_tracing(level);

    let Some(&command) = filtered.first() else {
        print_help();
        return;
    };

    let result = match command {
        "render" | "r" => cmd_render(&filtered[1..]),
        "constants" | "c" => cmd_constants(&filtered[1..]),
        "config" => cmd_config(filtered.get(1).copied()),
        "--version" | "version" => {
            println!("{}", version_string());
            Ok(())
        }
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => Err(anyhow!("unknown command '{other}' (try 'sao-cli help')")),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Stderr logging filtered by `RUST_LOG` or the verbosity flags, plus a
/// chrome trace in `trace.json` when `SAO_TRACE=1`.
fn init_tracing(default_level: &str) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if env::var("SAO_TRACE").ok().as_deref() == Some("1") {
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .file("trace.json")
            .build();
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(chrome_layer);
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return None;
        }
        return Some(guard);
    }

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
    None
}

fn version_string() -> String {
    let date = option_env!("SAO_BUILD_DATE").unwrap_or("unknown");
    let time = option_env!("SAO_BUILD_TIME").unwrap_or("unknown");
    format!("sao-cli {} (built {} {})", env!("CARGO_PKG_VERSION"), date, time)
}

fn print_help() {
    println!("sao-cli - Scalable Ambient Obscurance on synthetic depth buffers");
    println!();
    println!("USAGE:");
    println!("    sao-cli [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    r, render     Render a scene and write the obscurance PNG");
    println!("    c, constants  Print per-frame constants for a camera");
    println!("    config [path] Print the default config, or write it to <path>");
    println!("    --version     Show version and build date");
    println!("    h, help       Show this help");
    println!();
    println!("RENDER / CONSTANTS ARGS:");
    println!("    --scene <flat|quad|room>   Scene preset (default room)");
    println!("    --size <WxH>               Interior resolution (default 640x480)");
    println!("    --guard <px>               Guard band on every side (config value)");
    println!("    --fov <deg>                Field of view (default 60)");
    println!("    --horizontal               FOV is measured horizontally");
    println!("    --near <d> --far <d|inf>   Clip distances (default 0.1, 100)");
    println!("    --radius/--bias/--intensity <x>  Override tunables");
    println!("    --config <file>            Load settings from JSON");
    println!("    -o, --out <file.png>       Output path (default ao.png)");
    println!("    --dump-csz <dir>           Also write every pyramid level");
    println!("    --profile                  Time each pass");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Errors only");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG         Overrides the verbosity flags");
    println!("    SAO_TRACE=1      Write a chrome trace to trace.json");
}

/// Arguments shared by `render` and `constants`.
struct RenderArgs {
    scene: ScenePreset,
    width: u32,
    height: u32,
    guard: Option<u32>,
    fov: f32,
    horizontal: bool,
    near: f32,
    far: f32,
    radius: Option<f32>,
    bias: Option<f32>,
    intensity: Option<f32>,
    config: Option<PathBuf>,
    out: PathBuf,
    dump_csz: Option<PathBuf>,
    profile: bool,
}

impl Default for RenderArgs {
    fn default() -> Self {
        Self {
            scene: ScenePreset::Room,
            width: 640,
            height: 480,
            guard: None,
            fov: 60.0,
            horizontal: false,
            near: 0.1,
            far: 100.0,
            radius: None,
            bias: None,
            intensity: None,
            config: None,
            out: PathBuf::from("ao.png"),
            dump_csz: None,
            profile: false,
        }
    }
}

impl RenderArgs {
    fn parse(args: &[&str]) -> anyhow::Result<Self> {
        let mut parsed = Self::default();
        let mut it = args.iter().copied();
        while let Some(arg) = it.next() {
            let mut value = || it.next().ok_or_else(|| anyhow!("missing value for {arg}"));
            match arg {
                "--scene" => parsed.scene = value()?.parse()?,
                "--size" => (parsed.width, parsed.height) = parse_size(value()?)?,
                "--guard" => parsed.guard = Some(parse_num(arg, value()?)?),
                "--fov" => parsed.fov = parse_num(arg, value()?)?,
                "--horizontal" => parsed.horizontal = true,
                "--near" => parsed.near = parse_num(arg, value()?)?,
                "--far" => {
                    let v = value()?;
                    parsed.far = if v.eq_ignore_ascii_case("inf") {
                        f32::INFINITY
                    } else {
                        parse_num(arg, v)?
                    };
                }
                "--radius" => parsed.radius = Some(parse_num(arg, value()?)?),
                "--bias" => parsed.bias = Some(parse_num(arg, value()?)?),
                "--intensity" => parsed.intensity = Some(parse_num(arg, value()?)?),
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "-o" | "--out" => parsed.out = PathBuf::from(value()?),
                "--dump-csz" => parsed.dump_csz = Some(PathBuf::from(value()?)),
                "--profile" => parsed.profile = true,
                other => bail!("unknown argument '{other}'"),
            }
        }
        if !(parsed.near > 0.0 && parsed.far > parsed.near) {
            bail!("need 0 < near < far, got near {} far {}", parsed.near, parsed.far);
        }
        Ok(parsed)
    }

    fn camera(&self) -> Camera {
        let direction = if self.horizontal {
            FovDirection::Horizontal
        } else {
            FovDirection::Vertical
        };
        Camera::perspective(self.fov, self.near, self.far).with_fov_direction(direction)
    }

    fn config(&self) -> anyhow::Result<SaoConfig> {
        let mut config = match &self.config {
            Some(path) => SaoConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => SaoConfig::load_default().context("loading default config")?,
        };
        if let Some(g) = self.guard {
            config.guard_band = g;
        }
        if let Some(r) = self.radius {
            config.settings.radius = r;
        }
        if let Some(b) = self.bias {
            config.settings.bias = b;
        }
        if let Some(i) = self.intensity {
            config.settings.intensity = i;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, s: &str) -> anyhow::Result<T> {
    s.parse().map_err(|_| anyhow!("invalid value '{s}' for {name}"))
}

fn parse_size(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size must look like 640x480, got '{s}'"))?;
    Ok((parse_num("--size", w)?, parse_num("--size", h)?))
}

/// Image size plus the guard band on every side.
fn padded_size(width: u32, height: u32, guard: u32) -> anyhow::Result<(u32, u32)> {
    let pad = |extent: u32| guard.checked_mul(2).and_then(|g| extent.checked_add(g));
    match (pad(width), pad(height)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => bail!("guard band {guard} is too large for a {width}x{height} image"),
    }
}

fn cmd_render(args: &[&str]) -> anyhow::Result<()> {
    let args = RenderArgs::parse(args)?;
    let config = args.config()?;
    let camera = args.camera();
    let guard = config.guard_band;
    let (width, height) = padded_size(args.width, args.height, guard)?;

    info!("rendering '{}' at {}x{} (guard band {})", args.scene, width, height, guard);
    let mut device = CpuDevice::new();
    let depth = args.scene.build().upload(&mut device, &camera, width, height)?;

    let ao = device.create_texture(&TextureDesc::new("ao", width, height, TextureFormat::R8))?;
    let ao_fb = device.create_framebuffer("ao");
    device.attach(ao_fb, Attachment::Color0, ao, 0)?;
    // Guard band reads as unoccluded in the written image
    device.fill_texture(ao, 0, sao::device::WHITE)?;

    let mut sao = Sao::cpu(&config)?;
    sao.set_profiling(args.profile);
    sao.compute(&mut device, depth, &camera, guard, ao_fb)?;

    if let Some(t) = sao.last_timings() {
        println!(
            "pyramid {:?} | raw AO {:?} | blur {:?} + {:?} | total {:?}",
            t.pyramid, t.raw_ao, t.blur_horizontal, t.blur_vertical, t.total
        );
    }

    save_occlusion_png(&device, ao, &args.out)?;
    println!("Wrote {}", args.out.display());

    if let Some(dir) = &args.dump_csz {
        dump_pyramid(&device, &sao, &args, dir)?;
    }
    Ok(())
}

fn dump_pyramid(device: &CpuDevice, sao: &Sao<CpuDevice>, args: &RenderArgs, dir: &Path) -> anyhow::Result<()> {
    let buffers = sao
        .buffers()
        .buffers()
        .ok_or_else(|| anyhow!("no pyramid was built"))?;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    // Keep the greyscale range useful for infinite far planes
    let far = if args.far.is_finite() { args.far } else { args.near * 1000.0 };
    for level in 0..buffers.csz_framebuffers.len() as u32 {
        let path = dir.join(format!("csz_{level}.png"));
        save_csz_level_png(device, buffers.csz_buffer, level, args.near, far, &path)?;
        debug!("wrote {}", path.display());
    }
    println!("Wrote {} pyramid levels to {}", buffers.csz_framebuffers.len(), dir.display());
    Ok(())
}

fn cmd_constants(args: &[&str]) -> anyhow::Result<()> {
    let args = RenderArgs::parse(args)?;
    let camera = args.camera();
    let c = SaoConstants::from_camera(&camera, args.width, args.height);
    println!("Camera: fov {} deg, near {}, far {}", args.fov, args.near, args.far);
    println!("Size:   {}x{}", args.width, args.height);
    println!("clipInfo:  ({}, {}, {})", c.clip_info.x, c.clip_info.y, c.clip_info.z);
    println!(
        "projInfo:  ({}, {}, {}, {})",
        c.proj_info.x, c.proj_info.y, c.proj_info.z, c.proj_info.w
    );
    println!("projScale: {}", c.proj_scale);
    c.validate()?;
    Ok(())
}

fn cmd_config(path: Option<&str>) -> anyhow::Result<()> {
    let config = SaoConfig::default();
    match path {
        Some(p) => {
            config.save(Path::new(p))?;
            println!("Wrote {}", p);
        }
        None => {
            println!("{}", config.to_json()?);
            if let Some(default) = SaoConfig::default_path() {
                println!();
                println!("Default location: {}", default.display());
            }
        }
    }
    Ok(())
}
