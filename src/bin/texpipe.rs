use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "texpipe", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a program and print its bytecode.
    Disasm(DisasmArgs),
    /// Bake a program into a PNG.
    Bake(BakeArgs),
    /// Bake programs through the pipeline cache into a headless atlas and dump layer 0.
    Atlas(AtlasArgs),
}

#[derive(Parser, Debug)]
struct DisasmArgs {
    /// Program source, e.g. `stone |> overlay(tex(moss) |> opacity(128))`.
    program: String,
}

#[derive(Parser, Debug)]
struct BakeArgs {
    /// Program source.
    program: String,

    /// Raw texture as `name=path.png`. Repeatable.
    #[arg(long = "tex", value_parser = parse_tex_arg)]
    textures: Vec<(String, PathBuf)>,

    /// Time in seconds, for animations.
    #[arg(long, default_value_t = 0.0)]
    time: f64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct AtlasArgs {
    /// Program sources, one atlas entry each.
    #[arg(required = true)]
    programs: Vec<String>,

    /// Raw texture as `name=path.png`. Repeatable.
    #[arg(long = "tex", value_parser = parse_tex_arg)]
    textures: Vec<(String, PathBuf)>,

    /// Atlas configuration JSON. Defaults apply to missing fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Time in seconds, for animations.
    #[arg(long, default_value_t = 0.0)]
    time: f64,

    /// Output PNG path for layer 0.
    #[arg(long)]
    out: PathBuf,
}

fn parse_tex_arg(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got '{s}'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected name=path, got '{s}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Disasm(args) => cmd_disasm(args),
        Command::Bake(args) => cmd_bake(args),
        Command::Atlas(args) => cmd_atlas(args),
    }
}

fn cmd_disasm(args: DisasmArgs) -> anyhow::Result<()> {
    let prog = texpipe::TextureProgram::compile(&args.program)?;
    print!("{}", prog.disassemble());
    let unresolved = prog.unresolved_names();
    if !unresolved.is_empty() {
        println!("unresolved: {}", unresolved.join(", "));
    }
    Ok(())
}

/// Raw textures in ARGB, with ids assigned in command-line order.
struct RawTextures {
    ids: HashMap<String, u32>,
    images: Vec<texpipe::StoredTexture>,
}

impl RawTextures {
    fn load(textures: &[(String, PathBuf)]) -> anyhow::Result<Self> {
        let mut ids = HashMap::new();
        let mut images = Vec::with_capacity(textures.len());
        for (name, path) in textures {
            let img = image::open(path)
                .with_context(|| format!("read texture '{}'", path.display()))?
                .to_rgba8();
            let width = u16::try_from(img.width())
                .with_context(|| format!("texture '{}' is too wide", path.display()))?;
            let height = u16::try_from(img.height())
                .with_context(|| format!("texture '{}' is too tall", path.display()))?;
            let pixels = img
                .as_raw()
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes([c[3], c[0], c[1], c[2]]))
                .collect();
            let id = u32::try_from(images.len()).context("too many textures")?;
            if ids.insert(name.clone(), id).is_some() {
                anyhow::bail!("texture name '{name}' given twice");
            }
            images.push(texpipe::StoredTexture::new(width, height, pixels));
        }
        Ok(Self { ids, images })
    }

    fn compile(&self, src: &str) -> anyhow::Result<texpipe::TextureProgram> {
        let mut prog = texpipe::TextureProgram::compile(src)?;
        prog.link(|name| self.ids.get(name).copied())?;
        Ok(prog)
    }

    fn view(&self, id: u32) -> Option<texpipe::TextureView<'_>> {
        let t = self.images.get(id as usize)?;
        Some(texpipe::TextureView {
            width: u32::from(t.width),
            height: u32::from(t.height),
            pixels: &t.pixels,
        })
    }
}

fn argb_to_rgba(pixels: &[u32]) -> Vec<u8> {
    pixels
        .iter()
        .flat_map(|&p| {
            let [a, r, g, b] = p.to_be_bytes();
            [r, g, b, a]
        })
        .collect()
}

fn write_png(out: &Path, rgba: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    if let Some(parent) = out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        out,
        rgba,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", out.display()))?;
    eprintln!("wrote {}", out.display());
    Ok(())
}

fn cmd_bake(args: BakeArgs) -> anyhow::Result<()> {
    let raw = RawTextures::load(&args.textures)?;
    let prog = raw.compile(&args.program)?;
    let img = prog.bake(|id| raw.view(id), args.time)?;
    write_png(&args.out, &argb_to_rgba(&img.pixels), img.width, img.height)
}

fn cmd_atlas(args: AtlasArgs) -> anyhow::Result<()> {
    let cfg = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("read config '{}'", path.display()))?;
            texpipe::AtlasConfig::from_json_str(&json)?
        }
        None => texpipe::AtlasConfig::default(),
    };
    let raw = RawTextures::load(&args.textures)?;

    let device = texpipe::HeadlessDevice::new();
    let atlas = texpipe::TextureAtlas::new(cfg, Box::new(device.clone()), None)?
        .with_event_callback(|event| eprintln!("atlas event: {event:?}"));
    let mut cache = texpipe::PipelineCache::new(atlas);
    for (id, tex) in (0u32..).zip(&raw.images) {
        cache.update_texture(id, tex.clone());
    }

    let mut ids = Vec::with_capacity(args.programs.len());
    for src in &args.programs {
        let hashed = raw.compile(src)?.hashed()?;
        ids.push((src, cache.get_by_pipeline(&hashed)));
    }
    cache.update_animated_pipelines(args.time);
    cache.flush_new_pipelines();

    let mut list = texpipe::CommandList::new();
    let out = cache.flush_uploads_and_barriers(&mut list);
    device
        .submit(&list, &cache.atlas().staging().borrow())
        .context("replay atlas commands")?;
    cache.notify_gpu_finished();

    for (src, id) in &ids {
        match cache.atlas().placement(*id) {
            Some(p) => println!(
                "{id}\tlayer {} at {},{} ({}x{} padded)\t{src}",
                p.layer, p.x, p.y, p.padded_width, p.padded_height
            ),
            None => println!("{id}\tnot placed\t{src}"),
        }
    }

    let side = out.atlas_side;
    let mut rgba = Vec::with_capacity(side as usize * side as usize * 4);
    for y in 0..side {
        for x in 0..side {
            let texel = device
                .read_texel(out.atlas_image, 0, x, y)
                .context("atlas image vanished during readback")?;
            rgba.extend_from_slice(&texel);
        }
    }
    write_png(&args.out, &rgba, side, side)
}
