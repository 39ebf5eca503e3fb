//! cif - Command-line encoder/decoder for CIF heightmap files
//!
//! Reads and writes raw, little-endian `u16` pixel grids (row-major, no
//! header) on either side of the CIF container.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// Returns the default log file path (next to the binary).
fn get_default_log_path() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        let mut log_path = exe_path;
        log_path.set_extension("log");
        log_path
    } else {
        PathBuf::from("cif.log")
    }
}

/// Initializes tracing based on verbosity level and an optional log file.
fn init_tracing(verbose: u8, log_path: Option<&PathBuf>) {
    let filter = match verbose {
        0 => "warn",
        1 => "cif=info",
        2 => "cif=debug",
        _ => "cif=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if let Some(path) = log_path {
        let log_dir = path.parent().unwrap_or(Path::new("."));
        let log_filename = path.file_name().unwrap_or(std::ffi::OsStr::new("cif.log"));
        let file_appender = tracing_appender::rolling::never(log_dir, log_filename);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .with_ansi(false)
            .with_writer(file_appender)
            .init();
    } else if verbose > 0 {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .init();
    }
}

#[derive(Parser)]
#[command(name = "cif")]
#[command(author, version, about = "Encoder/decoder for tiled wavelet+rANS heightmap files")]
#[command(long_about = "
Encodes and decodes CIF heightmap files: a hierarchical wavelet pyramid,
a grouped rANS entropy codec, and a tiled container supporting random
access at any level of detail.

Input/output pixel grids are raw, little-endian u16, row-major, with no
header - pair this tool with a format conversion step if your source data
isn't already in that shape.

Examples:
  cif encode heights.raw out.cif -w 4096 -H 4096
  cif decode out.cif decoded.raw
  cif info out.cif
  cif probe out.cif -x 100 -y 200
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write log to file (-l default, -l path.log custom)
    #[arg(short = 'l', long = "log", global = true)]
    log: Option<Option<PathBuf>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a raw u16 pixel grid into a CIF file
    #[command(visible_alias = "e")]
    Encode(EncodeArgs),

    /// Decode a CIF file to a raw u16 pixel grid
    #[command(visible_alias = "d")]
    Decode(DecodeArgs),

    /// Print a CIF file's header and tile-cache stats
    Info(InfoArgs),

    /// Read a single pixel without decoding the whole image
    Probe(ProbeArgs),
}

#[derive(Args)]
struct EncodeArgs {
    /// Input raw u16 pixel grid
    input: PathBuf,

    /// Output CIF file
    output: PathBuf,

    /// Image width in pixels
    #[arg(short, long)]
    width: u32,

    /// Image height in pixels
    #[arg(short = 'H', long)]
    height: u32,

    /// Tile edge length: a power of two, at least 4
    #[arg(short, long, default_value = "256")]
    block_size: u32,
}

#[derive(Args)]
struct DecodeArgs {
    /// Input CIF file
    input: PathBuf,

    /// Output raw u16 pixel grid
    output: PathBuf,
}

#[derive(Args)]
struct InfoArgs {
    /// Input CIF file
    input: PathBuf,
}

#[derive(Args)]
struct ProbeArgs {
    /// Input CIF file
    input: PathBuf,

    /// Pixel X coordinate
    #[arg(short, long)]
    x: u32,

    /// Pixel Y coordinate
    #[arg(short = 'y', long)]
    y: u32,
}

fn read_u16_grid(path: &Path, pixel_count: usize) -> Result<Vec<u16>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() != pixel_count * 2 {
        bail!(
            "{} has {} bytes, expected {} for a {}-pixel u16 grid",
            path.display(),
            bytes.len(),
            pixel_count * 2,
            pixel_count
        );
    }
    Ok(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect())
}

fn write_u16_grid(path: &Path, pixels: &[u16]) -> Result<()> {
    let mut file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut bytes = Vec::with_capacity(pixels.len() * 2);
    for &p in pixels {
        bytes.extend_from_slice(&p.to_le_bytes());
    }
    file.write_all(&bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let pixels = read_u16_grid(&args.input, (args.width as usize) * (args.height as usize))?;
    let bytes = cif_codec::encode(&pixels, args.width, args.height, args.block_size)
        .context("encoding CIF stream")?;
    fs::write(&args.output, &bytes).with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!(bytes = bytes.len(), "wrote {}", args.output.display());
    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let bytes = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let image = cif_codec::Image::open(bytes).context("opening CIF stream")?;
    let pixels = image.get_bottom_level_pixels().context("decoding pixels")?;
    write_u16_grid(&args.output, &pixels)?;
    tracing::info!(pixels = pixels.len(), "wrote {}", args.output.display());
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let bytes = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let image = cif_codec::Image::open(bytes).context("opening CIF stream")?;
    println!("width:          {}", image.width());
    println!("height:         {}", image.height());
    println!("tiles:          {} x {}", image.width_in_blocks(), image.height_in_blocks());
    println!("top LOD:        {}", image.top_lod());
    println!("memory usage:   {} bytes", image.memory_usage());
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let bytes = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    let image = cif_codec::Image::open(bytes).context("opening CIF stream")?;
    let value = image.get_pixel(args.x, args.y).context("reading pixel")?;
    println!("{value}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = match &cli.log {
        Some(Some(path)) => Some(path.clone()),
        Some(None) => Some(get_default_log_path()),
        None => None,
    };
    init_tracing(cli.verbose, log_path.as_ref());

    match cli.command {
        Commands::Encode(args) => run_encode(args),
        Commands::Decode(args) => run_decode(args),
        Commands::Info(args) => run_info(args),
        Commands::Probe(args) => run_probe(args),
    }
}
