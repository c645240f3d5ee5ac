//! Video stream metadata.
//!
//! [`VideoMetadata`] is read once when a [`VideoFile`](crate::VideoFile) is
//! opened and cached for the lifetime of the source.

use std::time::Duration;

/// Metadata for the video stream of an opened source.
///
/// # Example
///
/// ```no_run
/// use framecut::{FrameSource, VideoFile};
///
/// let source = VideoFile::open("input.mp4").unwrap();
/// let metadata = source.metadata();
/// println!("{}x{} @ {:.2} fps", metadata.width, metadata.height, metadata.frames_per_second);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second (may be approximate for variable-frame-rate content).
    pub frames_per_second: f64,
    /// Total number of frames. Taken from the container when it records one,
    /// otherwise estimated from duration and frame rate.
    pub frame_count: u64,
    /// Stream duration.
    pub duration: Duration,
    /// Codec name (e.g. `"h264"`, `"vp9"`, `"av1"`).
    pub codec: String,
}
