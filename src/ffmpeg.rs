//! FFmpeg initialisation and log level configuration.
//!
//! FFmpeg has its own console logging, separate from the Rust
//! [`log`](https://crates.io/crates/log) facade used by this crate. By default
//! it prints warnings and errors to stderr, which interleaves badly with a
//! progress bar. [`set_ffmpeg_log_level`] tunes that output without importing
//! `ffmpeg-next` directly.
//!
//! # Example
//!
//! ```no_run
//! use framecut::{FfmpegLogLevel, VideoFile};
//!
//! framecut::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! let source = VideoFile::open("input.mp4").unwrap();
//! ```

use std::str::FromStr;

use ffmpeg_next::util::log::Level;

/// FFmpeg internal log verbosity level, from quietest to noisiest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Only unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }

    /// The FFmpeg level matching a Rust-side `log` filter, so `--verbose`
    /// raises both together.
    pub fn from_log_filter(filter: log::LevelFilter) -> Self {
        match filter {
            log::LevelFilter::Off => FfmpegLogLevel::Quiet,
            log::LevelFilter::Error => FfmpegLogLevel::Error,
            log::LevelFilter::Warn => FfmpegLogLevel::Warning,
            log::LevelFilter::Info => FfmpegLogLevel::Info,
            log::LevelFilter::Debug | log::LevelFilter::Trace => FfmpegLogLevel::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            other => Err(format!("unknown FFmpeg log level: {other}")),
        }
    }
}

/// Set the FFmpeg internal log verbosity level.
///
/// Affects FFmpeg's stderr output only, not the `log` facade.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Initialise FFmpeg. Safe to call any number of times.
pub(crate) fn initialize() -> Result<(), ffmpeg_next::Error> {
    ffmpeg_next::init()
}
