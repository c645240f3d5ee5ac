//! Export configuration.
//!
//! [`ExportOptions`] is a builder that threads callbacks, cancellation, and
//! tuning settings into an [`ExportPipeline`](crate::ExportPipeline) without
//! polluting every start method. [`CropExportSettings`] carries the encoder
//! choice for one crop export, and [`OutputLayout`] decides where results go.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecut::{CancellationToken, ExportOptions, ProgressCallback, ProgressInfo};
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {} done", info.operation, info.current);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = ExportOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_cancellation(token.clone())
//!     .with_batch_size(10);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;

use crate::acceleration::{DEFAULT_RELEASE_INTERVAL, DeviceProvider};
use crate::encode::{FfmpegSinkFactory, MAX_QUALITY, SinkFactory, VideoCodec};
use crate::error::FramecutError;
use crate::progress::{CancellationToken, CompletionCallback, NoOpProgress, ProgressCallback};

/// Default constant rate factor for crop exports.
pub const DEFAULT_QUALITY: u32 = 23;

/// Encoder settings for a crop export.
///
/// # Example
///
/// ```
/// use framecut::{CropExportSettings, VideoCodec};
///
/// let settings = CropExportSettings::new()
///     .with_codec(VideoCodec::H265)
///     .with_quality(18);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropExportSettings {
    /// Output codec.
    pub codec: VideoCodec,
    /// Constant rate factor, `0..=51`; lower is better.
    pub quality: u32,
}

impl Default for CropExportSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl CropExportSettings {
    /// H.264 at CRF 23.
    pub fn new() -> Self {
        Self {
            codec: VideoCodec::H264,
            quality: DEFAULT_QUALITY,
        }
    }

    /// Set the output codec.
    #[must_use]
    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the constant rate factor.
    #[must_use]
    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// Reject quality values outside `0..=51`.
    ///
    /// # Errors
    ///
    /// Returns [`FramecutError::InvalidQuality`].
    pub fn validate(&self) -> Result<(), FramecutError> {
        if self.quality > MAX_QUALITY {
            return Err(FramecutError::InvalidQuality(self.quality));
        }
        Ok(())
    }
}

/// Where export results are written.
///
/// Frames extracted from `clip.mp4` go to `<root>/clip/clip_000001.png`, ...;
/// a crop export of the same file goes to `<root>/framed_clip.mp4`.
///
/// # Example
///
/// ```
/// use std::path::Path;
///
/// use framecut::OutputLayout;
///
/// let layout = OutputLayout::default();
/// assert_eq!(
///     layout.crop_output_path("videos/clip.mov"),
///     Path::new("Extraction/framed_clip.mov")
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ROOT)
    }
}

impl OutputLayout {
    /// Root directory used when none is given.
    pub const DEFAULT_ROOT: &'static str = "Extraction";

    /// Extension used for crop outputs when the source has none.
    const FALLBACK_EXTENSION: &'static str = "mp4";

    /// Lay results out under `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of `source` without its extension, used to name outputs.
    pub fn source_stem<P: AsRef<Path>>(source: P) -> String {
        source
            .as_ref()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .unwrap_or_else(|| "video".to_string())
    }

    /// Directory that receives the frames extracted from `source`.
    pub fn extraction_dir<P: AsRef<Path>>(&self, source: P) -> PathBuf {
        self.root.join(Self::source_stem(source))
    }

    /// Output file for a crop export of `source`, keeping its container.
    pub fn crop_output_path<P: AsRef<Path>>(&self, source: P) -> PathBuf {
        let source = source.as_ref();
        let extension = source
            .extension()
            .map(|extension| extension.to_string_lossy().into_owned())
            .unwrap_or_else(|| Self::FALLBACK_EXTENSION.to_string());
        self.root
            .join(format!("framed_{}.{extension}", Self::source_stem(source)))
    }
}

/// File name of the `number`th extracted image, counting from 1.
///
/// ```
/// assert_eq!(framecut::frame_file_name("clip", 7, "png"), "clip_000007.png");
/// ```
pub fn frame_file_name(stem: &str, number: u64, extension: &str) -> String {
    format!("{stem}_{number:06}.{extension}")
}

/// Configuration for export jobs.
///
/// Carries optional progress, completion, cancellation, and tuning settings.
/// All fields have sensible defaults: a default-constructed value reports
/// nothing, is never cancelled, writes PNG frames, and encodes through
/// FFmpeg without acceleration.
#[derive(Clone)]
pub struct ExportOptions {
    /// Progress callback. Defaults to a no-op.
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// Completion callback. Defaults to a no-op.
    pub(crate) completion: Arc<dyn CompletionCallback>,
    /// Cancellation token. Each job watches a child of it, or a fresh token
    /// when `None`.
    pub(crate) cancellation: Option<CancellationToken>,
    /// How often to fire the progress callback (every N frames).
    pub(crate) batch_size: u64,
    /// Still image format for frame extraction.
    pub(crate) image_format: ImageFormat,
    /// Compute device provider for crop exports.
    pub(crate) accelerator: Option<Arc<dyn DeviceProvider>>,
    /// Frames between device memory releases.
    pub(crate) release_interval: u32,
    /// Creates the crop export's output sink.
    pub(crate) sink_factory: Arc<dyn SinkFactory>,
}

impl Debug for ExportOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExportOptions")
            .field("has_progress", &true)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .field("image_format", &self.image_format)
            .field("has_accelerator", &self.accelerator.is_some())
            .field("release_interval", &self.release_interval)
            .finish()
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportOptions {
    /// Create options with default settings.
    ///
    /// Defaults: no callbacks, no cancellation, batch size 1, PNG frames,
    /// no accelerator, release every 10 frames, FFmpeg output.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            completion: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
            image_format: ImageFormat::Png,
            accelerator: None,
            release_interval: DEFAULT_RELEASE_INTERVAL,
            sink_factory: Arc::new(FfmpegSinkFactory),
        }
    }

    /// Attach a progress callback.
    ///
    /// The callback is invoked every [`batch_size`](ExportOptions::with_batch_size)
    /// frames and once more with the final count.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a completion callback, invoked once per job with its outcome.
    #[must_use]
    pub fn with_completion(mut self, callback: Arc<dyn CompletionCallback>) -> Self {
        self.completion = callback;
        self
    }

    /// Attach a cancellation token watched by every job started with these
    /// options.
    ///
    /// Each job runs on a [`child`](CancellationToken::child) of the token.
    /// Cancelling the token itself stops the current job and every later
    /// one; [`ExportPipeline::cancel`](crate::ExportPipeline::cancel) and
    /// [`JobHandle::cancel`](crate::JobHandle::cancel) stop only their job.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires.
    ///
    /// A value of 1 means every frame; 10 means every 10th frame.
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the still image format for frame extraction. Defaults to PNG.
    #[must_use]
    pub fn with_image_format(mut self, format: ImageFormat) -> Self {
        self.image_format = format;
        self
    }

    /// Route crop exports through devices opened by `provider`.
    #[must_use]
    pub fn with_accelerator(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.accelerator = Some(provider);
        self
    }

    /// Release device memory every `frames` frames. Clamped to at least 1.
    #[must_use]
    pub fn with_release_interval(mut self, frames: u32) -> Self {
        self.release_interval = frames.max(1);
        self
    }

    /// Replace the output sink factory used by crop exports.
    #[must_use]
    pub fn with_sink_factory(mut self, factory: Arc<dyn SinkFactory>) -> Self {
        self.sink_factory = factory;
        self
    }

    /// The configured batch size.
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// The configured still image format.
    pub fn image_format(&self) -> ImageFormat {
        self.image_format
    }

    /// File extension matching [`image_format`](ExportOptions::image_format).
    pub(crate) fn image_extension(&self) -> &'static str {
        self.image_format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("png")
    }
}
