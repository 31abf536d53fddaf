use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use image::Rgb;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use micetrack_core::{
    config::AnalysisConfig,
    detection::CropMargins,
    pipeline::{Analysis, Analyzer, FrameSource, Stage},
    rendering::{draw_axis, to_rgb_image},
    report::write_report,
    selection::FrameSelector,
    video::VideoSource,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "micetrack",
    version,
    about = "Track a single animal in a fixed-camera video",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track the animal and write the trajectory as CSV.
    Analyze {
        /// Input video path
        video: PathBuf,

        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Report path [default: <video>.csv]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Do not echo the command line at the top of the report
        #[arg(long)]
        no_echo: bool,

        /// Also save the effective configuration as YAML
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Estimate the background only and save it as an image.
    Background {
        /// Input video path
        video: PathBuf,

        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Output image path
        #[arg(short, long, default_value = "background.png")]
        output: PathBuf,
    },

    /// Track the animal and save every frame with the overlay drawn.
    Overlay {
        /// Input video path
        video: PathBuf,

        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Directory receiving one PNG per frame
        #[arg(short, long, default_value = "overlay")]
        output: PathBuf,

        /// Also draw the tail-to-head axis
        #[arg(long)]
        axis: bool,
    },

    /// Turn two opposite corners of the region of interest into a --crop value.
    Crop {
        /// Input video path
        video: PathBuf,

        /// First corner as X,Y
        #[arg(value_parser = parse_point)]
        from: (u32, u32),

        /// Opposite corner as X,Y
        #[arg(value_parser = parse_point)]
        to: (u32, u32),
    },
}

/// Analysis parameters; command-line values override the configuration file.
#[derive(Args)]
struct AnalysisArgs {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Margins ignored by detection, as LEFT:RIGHT:TOP:BOTTOM
    #[arg(long)]
    crop: Option<CropMargins>,

    /// Foreground threshold, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_threshold)]
    threshold: Option<u8>,

    /// Minimum major/minor ratio for a trusted detection
    #[arg(long)]
    elongation: Option<f64>,

    /// Background frames: N (first N), A-B (range) or A/B (keep A, skip B)
    #[arg(long)]
    bgframes: Option<FrameSelector>,

    /// Stop after this many frames
    #[arg(long)]
    stop: Option<u64>,

    /// Drop detections far from the median body length (true/false)
    #[arg(long, action = ArgAction::Set)]
    sound_size: Option<bool>,

    /// Highlight foreground pixels in overlays
    #[arg(long)]
    hilite: bool,
}

impl AnalysisArgs {
    fn resolve(&self) -> Result<AnalysisConfig> {
        let mut config = match (&self.config, self.sound_size) {
            (Some(path), _) => AnalysisConfig::from_file(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?,
            (None, Some(sound_size)) => AnalysisConfig::new(sound_size),
            (None, None) => bail!("--sound-size <true|false> is required without --config"),
        };

        if let Some(sound_size) = self.sound_size {
            config.sound_size = sound_size;
        }
        if let Some(crop) = self.crop {
            config.crop = crop;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(elongation) = self.elongation {
            config.min_elongation = elongation;
        }
        if let Some(selector) = self.bgframes {
            config.background = selector;
        }
        config.hilite |= self.hilite;

        config.validate()?;
        Ok(config)
    }

    fn open(&self, video: &Path) -> Result<VideoSource> {
        Ok(VideoSource::open(video)?.with_limit(self.stop))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            video,
            analysis,
            output,
            no_echo,
            save_config,
        } => cmd_analyze(video, analysis, output, no_echo, save_config),
        Commands::Background {
            video,
            analysis,
            output,
        } => cmd_background(video, analysis, output),
        Commands::Overlay {
            video,
            analysis,
            output,
            axis,
        } => cmd_overlay(video, analysis, output, axis),
        Commands::Crop { video, from, to } => cmd_crop(video, from, to),
    }
}

// ── Analyze ───────────────────────────────────────────────────────────────────

fn cmd_analyze(
    video: PathBuf,
    args: AnalysisArgs,
    output: Option<PathBuf>,
    no_echo: bool,
    save_config: Option<PathBuf>,
) -> Result<()> {
    let config = args.resolve()?;
    let output = output.unwrap_or_else(|| video.with_extension("csv"));
    info!("Trajectory analysis");
    info!("  video  : {}", video.display());
    info!("  report : {}", output.display());
    log_config(&config);

    if let Some(path) = &save_config {
        config
            .to_file(path)
            .with_context(|| format!("failed to save config: {}", path.display()))?;
    }

    let mut source = args.open(&video)?;
    let analyzer = Analyzer::new(config)?;
    let analysis = analyze(&analyzer, &mut source)?;

    let command = (!no_echo).then(|| std::env::args().skip(1).collect::<Vec<_>>().join(" "));
    let header = analyzer.report_header(&analysis, command);
    let file = File::create(&output)
        .with_context(|| format!("could not create report: {}", output.display()))?;
    write_report(&mut BufWriter::new(file), &header, &analysis.trajectory.records)
        .context("failed to write report")?;

    info!(
        frames = analysis.trajectory.len(),
        valid = analysis.trajectory.valid_count(),
        "report saved"
    );
    Ok(())
}

// ── Background ────────────────────────────────────────────────────────────────

fn cmd_background(video: PathBuf, args: AnalysisArgs, output: PathBuf) -> Result<()> {
    let config = args.resolve()?;
    info!("Background estimation");
    info!("  video  : {}", video.display());
    info!("  output : {}", output.display());

    let mut source = args.open(&video)?;
    let analyzer = Analyzer::new(config)?;
    let mut progress = StageProgress::new(source.len_hint())?;
    let background =
        analyzer.estimate_background(&mut source, &mut |stage, n| progress.update(stage, n))?;
    progress.finish();

    to_rgb_image(background.frame())?
        .save(&output)
        .with_context(|| format!("could not save background: {}", output.display()))?;
    info!(records = background.records(), "background saved");
    Ok(())
}

// ── Overlay ───────────────────────────────────────────────────────────────────

fn cmd_overlay(video: PathBuf, args: AnalysisArgs, output: PathBuf, axis: bool) -> Result<()> {
    let config = args.resolve()?;
    info!("Overlay rendering");
    info!("  video  : {}", video.display());
    info!("  output : {}", output.display());
    log_config(&config);

    std::fs::create_dir_all(&output)
        .with_context(|| format!("could not create directory: {}", output.display()))?;

    let mut source = args.open(&video)?;
    let analyzer = Analyzer::new(config)?;
    let analysis = analyze(&analyzer, &mut source)?;

    let records = &analysis.trajectory.records;
    let mut progress = StageProgress::new(source.len_hint())?;
    analyzer.render_overlays(
        &mut source,
        &analysis,
        &mut |stage, n| progress.update(stage, n),
        &mut |index, frame| {
            let mut image = to_rgb_image(frame)?;
            if axis {
                if let Some(record) = records.get(index as usize) {
                    draw_axis(&mut image, record, Rgb([255, 255, 255]));
                }
            }
            let path = output.join(format!("frame_{index:06}.png"));
            image
                .save(&path)
                .with_context(|| format!("could not save overlay: {}", path.display()))
        },
    )?;
    progress.finish();

    info!(frames = records.len(), "overlay saved");
    Ok(())
}

// ── Crop ──────────────────────────────────────────────────────────────────────

fn cmd_crop(video: PathBuf, from: (u32, u32), to: (u32, u32)) -> Result<()> {
    let mut source = VideoSource::open(&video)?.with_limit(Some(1));
    let mut size = None;
    source.replay(&mut |_, frame| {
        size = Some((frame.width, frame.height));
        Ok(())
    })?;
    let Some((width, height)) = size else {
        bail!("{} holds no frame", video.display());
    };

    let crop = CropMargins::from_corners(width, height, from, to);
    crop.validate(width, height)?;
    info!(width, height, %crop, "crop selected");
    // Changing the crop means rerunning the analysis with this value
    println!("--crop {crop}");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn analyze(analyzer: &Analyzer, source: &mut VideoSource) -> Result<Analysis> {
    let mut progress = StageProgress::new(source.len_hint())?;
    let analysis = analyzer
        .run_with_progress(source, &mut |stage, n| progress.update(stage, n))
        .context("analysis failed")?;
    progress.finish();
    info!(median = analysis.trajectory.median_length, "median body length");
    Ok(analysis)
}

fn log_config(config: &AnalysisConfig) {
    info!("  crop       : {}", config.crop);
    info!("  threshold  : {}", config.threshold);
    info!("  elongation : {}", config.min_elongation);
    info!("  bgframes   : {}", config.background);
    info!("  sound size : {}", config.sound_size);
}

fn parse_threshold(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid threshold {s:?}: {e}"))
}

fn parse_point(s: &str) -> Result<(u32, u32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
    let coord = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid coordinate {v:?}: {e}"))
    };
    Ok((coord(x)?, coord(y)?))
}

/// One progress bar per pipeline pass; a bar with a known length when the
/// frame count is available, a spinner otherwise.
struct StageProgress {
    total: Option<u64>,
    bar_style: ProgressStyle,
    spinner_style: ProgressStyle,
    current: Option<(Stage, ProgressBar)>,
}

impl StageProgress {
    fn new(total: Option<u64>) -> Result<Self> {
        let bar_style = ProgressStyle::with_template(
            "{msg:>10} [{bar:40.cyan/blue}] {pos}/{len} frames [{elapsed_precise}]",
        )?
        .progress_chars("=> ");
        let spinner_style =
            ProgressStyle::with_template("{spinner:.cyan} {msg:>10} {pos} frames [{elapsed_precise}]")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        Ok(Self {
            total,
            bar_style,
            spinner_style,
            current: None,
        })
    }

    fn update(&mut self, stage: Stage, frames: u64) {
        let switched = !matches!(&self.current, Some((current, _)) if *current == stage);
        if switched {
            self.finish();
            let pb = match self.total {
                Some(total) => ProgressBar::new(total).with_style(self.bar_style.clone()),
                None => ProgressBar::new_spinner().with_style(self.spinner_style.clone()),
            };
            pb.set_message(stage.to_string());
            self.current = Some((stage, pb));
        }
        if let Some((_, pb)) = &self.current {
            pb.set_position(frames);
        }
    }

    fn finish(&mut self) {
        if let Some((_, pb)) = self.current.take() {
            pb.finish();
        }
    }
}
