//! # framecut
//!
//! Sample still frames from a video, or crop a region out of every frame and
//! re-encode it, on a background worker with progress, cancellation, and an
//! optional hardware round trip.
//!
//! Decoding and encoding are powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate; frames are
//! handled as [`image::RgbImage`] buffers.
//!
//! ## Quick Start
//!
//! ### Extract One Frame Every Two Seconds
//!
//! ```no_run
//! use framecut::{ExportOptions, ExportPipeline, OutputLayout, SamplingPolicy, VideoFile};
//!
//! let layout = OutputLayout::default();
//! let source = VideoFile::open("clip.mp4").unwrap();
//! let mut pipeline = ExportPipeline::new(ExportOptions::new());
//! pipeline
//!     .start_frame_extraction(
//!         source,
//!         SamplingPolicy::Interval(2.0),
//!         layout.extraction_dir("clip.mp4"),
//!         &OutputLayout::source_stem("clip.mp4"),
//!     )
//!     .unwrap();
//! println!("{:?}", pipeline.wait());
//! ```
//!
//! ### Crop a Region Selected on a Preview
//!
//! ```no_run
//! use framecut::{
//!     CropExportSettings, DisplayTransform, ExportOptions, ExportPipeline, FrameSource,
//!     OutputLayout, Point, VideoFile, normalize_rect,
//! };
//!
//! let source = VideoFile::open("clip.mp4").unwrap();
//! let (width, height) = (source.metadata().width, source.metadata().height);
//!
//! // The user dragged from (100, 80) to (500, 380) on an 800x600 preview.
//! let transform = DisplayTransform::new(width, height, 800, 600).unwrap();
//! let region = normalize_rect(
//!     transform.canvas_to_source(Point::new(100.0, 80.0)),
//!     transform.canvas_to_source(Point::new(500.0, 380.0)),
//!     width,
//!     height,
//! );
//!
//! let mut pipeline = ExportPipeline::new(ExportOptions::new());
//! pipeline
//!     .start_crop_export(
//!         source,
//!         region,
//!         CropExportSettings::new(),
//!         OutputLayout::default().crop_output_path("clip.mp4"),
//!     )
//!     .unwrap();
//! println!("{:?}", pipeline.wait());
//! ```
//!
//! ## Features
//!
//! - **Frame sampling**: every frame, or one frame per time interval
//! - **Crop export**: H.264 or H.265 at a chosen CRF, even-sized output
//! - **Display mapping**: letterboxed preview coordinates to source pixels
//! - **Background jobs**: one worker thread, progress callbacks,
//!   cooperative `CancellationToken`, exactly one terminal outcome
//! - **Accelerated round trip**: optional compute device with per-frame
//!   fallback, so output never depends on the device
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `ExportPipeline::wait_async` and `ProgressStream` via Tokio |
//! | `hardware` | FFmpeg hwcontext compute devices (CUDA, VAAPI, VideoToolbox, ...) |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod acceleration;
pub mod config;
mod conversion;
pub mod encode;
pub mod error;
pub mod ffmpeg;
pub mod geometry;
#[cfg(feature = "hardware")]
pub mod hardware_acceleration;
pub mod job;
pub mod metadata;
pub mod pipeline;
pub mod progress;
pub mod selection;
pub mod source;
#[cfg(feature = "async")]
pub mod stream;

pub use acceleration::{
    AcceleratedProcessor, ComputeDevice, DEFAULT_RELEASE_INTERVAL, DeviceProvider, FrameProcessor,
    Passthrough,
};
pub use config::{
    CropExportSettings, DEFAULT_QUALITY, ExportOptions, OutputLayout, frame_file_name,
};
pub use encode::{
    FfmpegSinkFactory, FrameSink, MAX_QUALITY, SinkFactory, SinkSpec, VideoCodec, VideoEncoder,
};
pub use error::{ErrorKind, FramecutError};
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use geometry::{CanvasRect, CropRegion, DisplayTransform, Point, normalize_rect};
#[cfg(feature = "hardware")]
pub use hardware_acceleration::{
    HardwareAccelerationMode, HardwareDevice, HardwareDeviceProvider, HardwareDeviceType,
    available_hardware_devices,
};
pub use job::{JobHandle, JobOutcome, JobState};
pub use metadata::VideoMetadata;
pub use pipeline::ExportPipeline;
pub use progress::{
    CancellationToken, CompletionCallback, OperationType, ProgressCallback, ProgressInfo,
};
pub use selection::{FrameIndices, SamplingPolicy, compute_indices, interval_step};
pub use source::{FrameSource, VIDEO_EXTENSIONS, VideoFile, has_video_extension};
#[cfg(feature = "async")]
pub use stream::{EventForwarder, JobEvent, ProgressStream};
