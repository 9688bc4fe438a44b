//! Command-line front end for the retro handheld filter.
//!
//! Usage:
//!   retroframe <INPUT> <OUTPUT> [OPTIONS]
//!
//! Still images are filtered once and saved in the format implied by the
//! output extension. Animated GIFs are filtered frame by frame into a new
//! looping GIF.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use retroframe_io::{GifFrameSink, GifFrameSource};
use retroframe_pipeline::{DitherGrid, FilterConfig, FrameSequencer, StagedResult};

/// Turn photos and GIFs into dithered, limited-palette retro frames.
#[derive(Parser)]
#[command(name = "retroframe", version)]
struct Cli {
    /// Input image (PNG, JPEG, BMP, WebP) or animated GIF.
    input: PathBuf,

    /// Output path. The extension picks the still-image format.
    output: PathBuf,

    /// Still image or animated GIF processing.
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    mode: Mode,

    /// Width of the low-resolution working image.
    #[arg(long, default_value_t = FilterConfig::DEFAULT_TARGET_WIDTH, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    target_width: u32,

    /// Number of palette colors.
    #[arg(long, default_value_t = FilterConfig::DEFAULT_PALETTE_COLORS, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(2..))]
    palette_colors: u32,

    /// Ordered dither strength (0 disables dithering).
    #[arg(long, default_value_t = FilterConfig::DEFAULT_DITHER_STRENGTH)]
    dither_strength: u32,

    /// Skip edge darkening.
    #[arg(long)]
    no_edge_hint: bool,

    /// Dither worker grid as COLSxROWS.
    #[arg(long, default_value_t = DitherGrid::QUADRANTS)]
    dither_grid: DitherGrid,

    /// Palette clustering seed.
    #[arg(long, default_value_t = FilterConfig::DEFAULT_SEED, conflicts_with = "random_seed")]
    seed: u64,

    /// Seed palette clustering from OS entropy (output varies run to run).
    #[arg(long)]
    random_seed: bool,

    /// Full filter config as a JSON string.
    ///
    /// When provided, all other filter flags are ignored.
    /// The JSON must be a valid `FilterConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Stop after this many GIF frames.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    max_frames: Option<usize>,

    /// Also write every intermediate stage of a still image into this
    /// directory as PNG.
    #[arg(long)]
    save_stages: Option<PathBuf>,

    /// Log per-stage details.
    #[arg(short, long)]
    verbose: bool,
}

/// Processing mode selection.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Animated GIF if the input has a `.gif` extension, else still.
    Auto,
    /// Filter a single image.
    Still,
    /// Filter every frame of an animated GIF.
    Gif,
}

impl Mode {
    fn resolve(self, input: &Path) -> Self {
        match self {
            Self::Auto => {
                let is_gif = input
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"));
                if is_gif { Self::Gif } else { Self::Still }
            }
            other => other,
        }
    }
}

/// Build a [`FilterConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual filter flags are ignored. Otherwise, a config is assembled
/// from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<FilterConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        FilterConfig {
            target_width: cli.target_width,
            palette_colors: cli.palette_colors,
            dither_strength: cli.dither_strength,
            edge_hint: !cli.no_edge_hint,
            dither_grid: cli.dither_grid,
            seed: if cli.random_seed { None } else { Some(cli.seed) },
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn save_stages(staged: &StagedResult, dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    let stages = [
        ("1-contrasted", &staged.contrasted),
        ("2-downscaled", &staged.downscaled),
        ("3-edge-hinted", &staged.edge_hinted),
        ("4-dithered", &staged.dithered),
        ("5-quantized", &staged.quantized),
        ("6-upscaled", &staged.upscaled),
        ("7-sharpened", &staged.sharpened),
    ];
    for (name, image) in stages {
        retroframe_io::save_image(image, dir.join(format!("{name}.png")))
            .map_err(|e| e.to_string())?;
    }
    if let Some(mask) = &staged.edge_mask {
        let path = dir.join("3-edge-mask.png");
        mask.save(&path)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    }
    tracing::info!(dir = %dir.display(), "intermediate stages written");
    Ok(())
}

fn run_still(cli: &Cli, config: &FilterConfig) -> Result<(), String> {
    let image = retroframe_io::load_image(&cli.input).map_err(|e| e.to_string())?;
    let staged =
        retroframe_pipeline::process_staged(&image, config).map_err(|e| format!("Filter error: {e}"))?;
    tracing::debug!(palette = ?staged.palette, outcome = ?staged.dither_outcome, "still image filtered");
    if let Some(dir) = &cli.save_stages {
        save_stages(&staged, dir)?;
    }
    retroframe_io::save_image(staged.output(), &cli.output).map_err(|e| e.to_string())?;
    tracing::info!(
        output = %cli.output.display(),
        width = image.width(),
        height = image.height(),
        "saved"
    );
    Ok(())
}

fn run_gif(cli: &Cli, config: FilterConfig) -> Result<(), String> {
    if cli.save_stages.is_some() {
        tracing::warn!("--save-stages only applies to still images, ignoring");
    }
    let sequencer = FrameSequencer::new(config).map_err(|e| e.to_string())?;
    let mut source = GifFrameSource::open(&cli.input).map_err(|e| e.to_string())?;
    let mut sink = GifFrameSink::new(&cli.output);
    let limit = cli.max_frames;

    let summary = sequencer
        .run_with(&mut source, &mut sink, |index, _| {
            tracing::debug!(frame = index, "frame filtered");
            if limit.is_some_and(|max| index + 1 >= max) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .map_err(|e| {
            let mut msg = e.to_string();
            if let Some(cause) = std::error::Error::source(&e) {
                msg = format!("{msg}: {cause}");
            }
            msg
        })?;

    tracing::info!(
        frames = summary.frames,
        stopped_early = summary.stopped_early,
        output = %cli.output.display(),
        "animation saved"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            tracing::error!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "filter configuration");

    let result = match cli.mode.resolve(&cli.input) {
        Mode::Gif => run_gif(&cli, config),
        Mode::Still | Mode::Auto => run_still(&cli, &config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            tracing::error!("{msg}");
            ExitCode::FAILURE
        }
    }
}
