use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{ArgGroup, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framecut::{
    CancellationToken, CropExportSettings, CropRegion, DisplayTransform, ExportOptions,
    ExportPipeline, FfmpegLogLevel, FrameSource, JobOutcome, OutputLayout, Point,
    ProgressCallback, ProgressInfo, SamplingPolicy, VideoCodec, VideoFile, has_video_extension,
    normalize_rect,
};
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

#[cfg(feature = "hardware")]
use framecut::{HardwareAccelerationMode, HardwareDeviceProvider, available_hardware_devices};

const CLI_AFTER_HELP: &str = "Examples:\n  framecut probe input.mp4 --json\n  framecut extract input.mp4 --every 2 --progress\n  framecut crop input.mp4 --region 100,50,640,360 --codec h265 --crf 20\n  framecut crop input.mp4 --from 120,80 --to 520,380 --canvas 800x600\n  framecut completions zsh > _framecut";

#[derive(Debug, Parser)]
#[command(
    name = "framecut",
    version,
    about = "Sample frames from a video or export a cropped copy of it",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Root directory for outputs.
    #[arg(long, global = true, default_value = OutputLayout::DEFAULT_ROOT)]
    root: PathBuf,

    /// Report progress every N frames.
    #[arg(long, global = true, default_value_t = 1)]
    batch_size: u64,

    /// Compute device for crop exports (auto, software, cuda, vaapi, dxva2, d3d11va, videotoolbox, qsv, vulkan).
    #[arg(long, global = true)]
    hardware: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print video metadata.
    #[command(
        about = "Print video metadata",
        visible_alias = "info",
        after_help = "Examples:\n  framecut probe input.mp4\n  framecut probe input.mp4 --json"
    )]
    Probe {
        /// Input video path.
        input: PathBuf,

        /// Output metadata as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Save a single frame.
    #[command(
        about = "Save one frame as an image",
        after_help = "Examples:\n  framecut frame input.mp4 --index 120 --out preview.png"
    )]
    Frame {
        /// Input video path.
        input: PathBuf,
        /// Zero-based frame index.
        #[arg(long, default_value_t = 0)]
        index: u64,
        /// Output image path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Extract frames into `<root>/<stem>/`.
    #[command(
        about = "Extract video frames",
        group(ArgGroup::new("policy").required(true).args(["every", "all"])),
        after_help = "Examples:\n  framecut extract input.mp4 --every 2\n  framecut extract input.mp4 --all --ext jpg"
    )]
    Extract {
        /// Input video path.
        input: PathBuf,
        /// Keep one frame every SECONDS of video.
        #[arg(long, value_name = "SECONDS")]
        every: Option<f64>,
        /// Keep every frame.
        #[arg(long)]
        all: bool,
        /// Output image extension (png, jpg, bmp, tiff).
        #[arg(long, default_value = "png")]
        ext: String,
    },

    /// Export a cropped copy to `<root>/framed_<name>`.
    #[command(
        about = "Crop every frame and re-encode",
        group(ArgGroup::new("selection").args(["region", "from"]).multiple(false)),
        after_help = "Examples:\n  framecut crop input.mp4 --region 0,0,640,360\n  framecut crop input.mp4 --from 120,80 --to 520,380 --canvas 800x600 --crf 18"
    )]
    Crop {
        /// Input video path.
        input: PathBuf,
        /// Region in source pixels: x,y,width,height.
        #[arg(long, value_parser = parse_region)]
        region: Option<CropRegion>,
        /// First corner of a dragged selection: x,y.
        #[arg(long, value_parser = parse_point, requires = "to")]
        from: Option<Point>,
        /// Opposite corner of a dragged selection: x,y.
        #[arg(long, value_parser = parse_point, requires = "from")]
        to: Option<Point>,
        /// Size of the preview the corners were picked on: WxH.
        /// Without it the corners are source pixels.
        #[arg(long, value_parser = parse_size, requires = "from")]
        canvas: Option<(u32, u32)>,
        /// Output codec: h264 | h265.
        #[arg(long, default_value = "h264")]
        codec: VideoCodec,
        /// Constant rate factor, 0-51 (lower is better).
        #[arg(long, default_value_t = framecut::DEFAULT_QUALITY)]
        crf: u32,
    },

    /// Generate shell completions.
    #[command(about = "Generate shell completions")]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_numbers<T: std::str::FromStr>(value: &str, separator: char, count: usize) -> Option<Vec<T>> {
    let parts: Vec<T> = value
        .split(separator)
        .map(|part| part.trim().parse::<T>())
        .collect::<Result<_, _>>()
        .ok()?;
    (parts.len() == count).then_some(parts)
}

fn parse_region(value: &str) -> Result<CropRegion, String> {
    parse_numbers::<u32>(value, ',', 4)
        .map(|parts| CropRegion::new(parts[0], parts[1], parts[2], parts[3]))
        .ok_or_else(|| format!("expected x,y,width,height, got {value:?}"))
}

fn parse_point(value: &str) -> Result<Point, String> {
    parse_numbers::<f64>(value, ',', 2)
        .map(|parts| Point::new(parts[0], parts[1]))
        .ok_or_else(|| format!("expected x,y, got {value:?}"))
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    parse_numbers::<u32>(&value.to_ascii_lowercase(), 'x', 2)
        .map(|parts| (parts[0], parts[1]))
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))
}

fn warn(message: String) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
}

fn open_input(input: &Path) -> Result<VideoFile, Box<dyn std::error::Error>> {
    if !has_video_extension(input) {
        warn(format!(
            "{} does not have a known video extension",
            input.display()
        ));
    }
    Ok(VideoFile::open(input)?)
}

fn init_logging(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let ffmpeg_level = match &global.log_level {
        Some(level) => level
            .parse::<FfmpegLogLevel>()
            .map_err(|error| format!("unsupported --log-level: {error}"))?,
        None => FfmpegLogLevel::from_log_filter(log::max_level()),
    };
    framecut::set_ffmpeg_log_level(ffmpeg_level);
    Ok(())
}

/// Drives an indicatif bar from job progress.
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg} ({eta})",
        )?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.bar.set_length(info.total.max(info.current));
        self.bar.set_position(info.current);
        self.bar.set_message(info.operation.to_string());
    }
}

fn export_options(
    global: &GlobalOptions,
    token: CancellationToken,
    bar: Option<Arc<TerminalProgress>>,
) -> Result<ExportOptions, Box<dyn std::error::Error>> {
    let mut options = ExportOptions::new()
        .with_cancellation(token)
        .with_batch_size(global.batch_size);

    if let Some(bar) = bar {
        options = options.with_progress(bar);
    }

    #[cfg(feature = "hardware")]
    if let Some(hardware) = &global.hardware {
        let mode = hardware
            .parse::<HardwareAccelerationMode>()
            .map_err(|error| format!("unsupported --hardware mode: {error}"))?;
        options = options.with_accelerator(Arc::new(HardwareDeviceProvider::new(mode)));
    }

    #[cfg(not(feature = "hardware"))]
    if global.hardware.is_some() {
        warn("--hardware requires building with the `hardware` feature".to_string());
    }

    Ok(options)
}

/// Cancel the running job on Ctrl-C instead of killing the process.
fn install_interrupt_handler(token: &CancellationToken) {
    let token = token.clone();
    let result = ctrlc::set_handler(move || {
        token.cancel();
        eprintln!("\n{}", "interrupted, stopping after the current frame...".yellow());
    });
    if let Err(error) = result {
        warn(format!("cannot install Ctrl-C handler: {error}"));
    }
}

/// Run a started job to completion and report its outcome.
fn finish_job(
    mut pipeline: ExportPipeline,
    bar: Option<Arc<TerminalProgress>>,
    success: impl FnOnce(u64) -> String,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = pipeline.wait().ok_or("export job did not start")?;
    if let Some(bar) = bar {
        bar.bar.finish_and_clear();
    }

    match outcome {
        JobOutcome::Completed { processed } => {
            println!("{} {}", "success:".green().bold(), success(processed).green());
            Ok(())
        }
        JobOutcome::Cancelled { processed } => {
            warn(format!("cancelled after {processed} frame(s)"));
            Ok(())
        }
        JobOutcome::Failed { kind, message } => Err(format!("[{kind}] {message}").into()),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global)?;

    let layout = OutputLayout::new(&cli.global.root);

    match cli.command {
        Commands::Probe { input, json } => {
            let source = open_input(&input)?;
            let metadata = source.metadata();

            #[cfg(feature = "hardware")]
            let devices: Vec<String> = available_hardware_devices()
                .into_iter()
                .map(|device| device.to_string())
                .collect();
            #[cfg(not(feature = "hardware"))]
            let devices: Vec<String> = Vec::new();

            if json {
                let payload = json!({
                    "path": input.display().to_string(),
                    "width": metadata.width,
                    "height": metadata.height,
                    "fps": metadata.frames_per_second,
                    "frame_count": metadata.frame_count,
                    "duration_seconds": metadata.duration.as_secs_f64(),
                    "codec": metadata.codec,
                    "hardware_devices": devices,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "Video: {}x{} @ {:.3} fps [{}]",
                    metadata.width, metadata.height, metadata.frames_per_second, metadata.codec,
                );
                println!("Frames: {}", metadata.frame_count);
                println!("Duration: {:.3}s", metadata.duration.as_secs_f64());
                if devices.is_empty() {
                    println!("Hardware devices: none");
                } else {
                    println!("Hardware devices: {}", devices.join(", "));
                }
            }
        }

        Commands::Frame { input, index, out } => {
            let mut source = open_input(&input)?;
            let frame = source
                .read_frame_at(index)?
                .ok_or_else(|| format!("frame {index} is past the end of the stream"))?;
            frame.save(&out)?;
            println!(
                "{} {}",
                "saved".green().bold(),
                format!("frame {index} -> {}", out.display())
            );
        }

        Commands::Extract {
            input,
            every,
            all,
            ext,
        } => {
            let ext_clean = ext.trim_start_matches('.').to_ascii_lowercase();
            let format = ImageFormat::from_extension(&ext_clean)
                .ok_or_else(|| format!("unsupported --ext: {ext}"))?;
            let policy = match (every, all) {
                (Some(seconds), _) => SamplingPolicy::Interval(seconds),
                (None, true) => SamplingPolicy::All,
                (None, false) => return Err("pass --every SECONDS or --all".into()),
            };

            let source = open_input(&input)?;
            let token = CancellationToken::new();
            install_interrupt_handler(&token);
            let bar = if cli.global.progress {
                Some(Arc::new(TerminalProgress::new()?))
            } else {
                None
            };

            let options = export_options(&cli.global, token, bar.clone())?.with_image_format(format);
            let output_dir = layout.extraction_dir(&input);
            let stem = OutputLayout::source_stem(&input);

            let mut pipeline = ExportPipeline::new(options);
            pipeline.start_frame_extraction(source, policy, &output_dir, &stem)?;

            finish_job(pipeline, bar, |processed| {
                format!("Extracted {processed} frame(s) to {}", output_dir.display())
            })?;
        }

        Commands::Crop {
            input,
            region,
            from,
            to,
            canvas,
            codec,
            crf,
        } => {
            let source = open_input(&input)?;
            let (width, height) = (source.metadata().width, source.metadata().height);

            let region = match (region, from, to) {
                (Some(region), _, _) => region,
                (None, Some(first), Some(second)) => {
                    let (first, second) = match canvas {
                        Some((canvas_width, canvas_height)) => {
                            let transform =
                                DisplayTransform::new(width, height, canvas_width, canvas_height)?;
                            (
                                transform.canvas_to_source(first),
                                transform.canvas_to_source(second),
                            )
                        }
                        None => (first, second),
                    };
                    normalize_rect(first, second, width, height)
                }
                _ => CropRegion::full_frame(width, height),
            };
            log::debug!("Selected crop region {region}");

            let settings = CropExportSettings::new()
                .with_codec(codec)
                .with_quality(crf);

            let token = CancellationToken::new();
            install_interrupt_handler(&token);
            let bar = if cli.global.progress {
                Some(Arc::new(TerminalProgress::new()?))
            } else {
                None
            };

            let options = export_options(&cli.global, token, bar.clone())?;
            let output_path = layout.crop_output_path(&input);

            let mut pipeline = ExportPipeline::new(options);
            pipeline.start_crop_export(source, region, settings, &output_path)?;

            finish_job(pipeline, bar, |processed| {
                format!("Wrote {processed} frame(s) to {}", output_path.display())
            })?;
        }

        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framecut", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
