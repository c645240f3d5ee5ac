//! Error types for the `framecut` crate.
//!
//! This module defines [`FramecutError`], the unified error type returned by
//! every fallible operation, and [`ErrorKind`], the coarse classification
//! reported to completion observers when a background job fails.

use std::{fmt, io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `framecut` operations.
///
/// Variants carry enough context to diagnose the problem without needing
/// additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramecutError {
    /// The video file could not be opened or probed.
    #[error("Failed to open video file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::VideoFile::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// The source was read after [`close`](crate::FrameSource::close).
    #[error("Video source is closed")]
    SourceClosed,

    /// A sampling interval was zero, negative, or not a finite number.
    #[error("Sampling interval must be a positive number of seconds (got {seconds})")]
    InvalidInterval {
        /// The rejected interval, in seconds.
        seconds: f64,
    },

    /// Interval sampling was requested on a stream that cannot be sampled.
    #[error("Cannot sample a stream with {frame_count} frames at {frames_per_second} fps")]
    InvalidStreamParameters {
        /// Frame count reported by the source.
        frame_count: u64,
        /// Frame rate reported by the source.
        frames_per_second: f64,
    },

    /// The crop region is empty or does not fit inside the frame.
    #[error("Invalid crop region {region}: {reason}")]
    InvalidCropRegion {
        /// The rejected region, formatted as `WxH+X+Y`.
        region: String,
        /// Why the region was rejected.
        reason: String,
    },

    /// The encoder quality parameter is outside `0..=51`.
    #[error("Quality must be between 0 and 51 (got {0})")]
    InvalidQuality(u32),

    /// A zero-sized video or display surface was passed to the mapper.
    #[error("Invalid dimensions: video {video_width}x{video_height}, canvas {canvas_width}x{canvas_height}")]
    InvalidDimensions {
        /// Source width.
        video_width: u32,
        /// Source height.
        video_height: u32,
        /// Display surface width.
        canvas_width: u32,
        /// Display surface height.
        canvas_height: u32,
    },

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// The output encoder could not be created or rejected a frame.
    #[error("Video encoding error: {0}")]
    VideoEncodeError(String),

    /// The output container could not be written.
    #[error("Video write error: {0}")]
    VideoWriteError(String),

    /// A single accelerated round trip failed. Recovered by falling back to
    /// the unmodified buffer; never reported as a job outcome.
    #[error("Accelerator error: {0}")]
    AcceleratorError(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while writing a still frame.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// A job was started while another one is still running.
    #[error("An export job is already running")]
    JobAlreadyRunning,

    /// The worker thread panicked.
    #[error("Export worker panicked: {0}")]
    WorkerPanicked(String),
}

impl From<FfmpegError> for FramecutError {
    fn from(error: FfmpegError) -> Self {
        FramecutError::FfmpegError(error.to_string())
    }
}

/// Coarse classification of a [`FramecutError`].
///
/// This is the `kind` half of a failed job outcome; the message half is the
/// error's `Display` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The source could not be opened.
    Open,
    /// Invalid parameters, rejected before any work started.
    Configuration,
    /// The output sink could not be created or written.
    Encode,
    /// Decoding failed.
    Decode,
    /// An accelerated pass failed.
    Accelerator,
    /// Filesystem failure.
    Io,
    /// Still image encoding failed.
    Image,
    /// Another job is running.
    Busy,
    /// Unexpected worker failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Open => "open",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Encode => "encode",
            ErrorKind::Decode => "decode",
            ErrorKind::Accelerator => "accelerator",
            ErrorKind::Io => "io",
            ErrorKind::Image => "image",
            ErrorKind::Busy => "busy",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl FramecutError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FramecutError::FileOpen { .. } | FramecutError::NoVideoStream => ErrorKind::Open,
            FramecutError::InvalidInterval { .. }
            | FramecutError::InvalidStreamParameters { .. }
            | FramecutError::InvalidCropRegion { .. }
            | FramecutError::InvalidQuality(_)
            | FramecutError::InvalidDimensions { .. } => ErrorKind::Configuration,
            FramecutError::VideoEncodeError(_) | FramecutError::VideoWriteError(_) => {
                ErrorKind::Encode
            }
            FramecutError::SourceClosed
            | FramecutError::VideoDecodeError(_)
            | FramecutError::FfmpegError(_) => ErrorKind::Decode,
            FramecutError::AcceleratorError(_) => ErrorKind::Accelerator,
            FramecutError::IoError(_) => ErrorKind::Io,
            FramecutError::ImageError(_) => ErrorKind::Image,
            FramecutError::JobAlreadyRunning => ErrorKind::Busy,
            FramecutError::WorkerPanicked(_) => ErrorKind::Internal,
        }
    }
}
