//! Frame sources.
//!
//! [`FrameSource`] is the reader interface the export pipeline drives, and
//! [`VideoFile`] is its FFmpeg-backed implementation. Sources are
//! sequential first: [`next_frame`](FrameSource::next_frame) is cheap, while
//! [`read_frame_at`](FrameSource::read_frame_at) decodes forward from the
//! current position and rewinds to the start for backward targets.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    time::Duration,
};

use ffmpeg_next::{
    Error as FfmpegError, Packet,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::error::EAGAIN,
};
use image::RgbImage;

use crate::{conversion, error::FramecutError, metadata::VideoMetadata};

/// File extensions recognised as video containers.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Returns `true` if `path` has one of the [`VIDEO_EXTENSIONS`].
pub fn has_video_extension<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension))
        })
}

/// A readable stream of decoded video frames.
///
/// Sources move into the export worker, hence the [`Send`] bound. Frames are
/// returned as tightly-packed RGB8 buffers.
pub trait FrameSource: Send {
    /// Stream properties cached at open time.
    fn metadata(&self) -> &VideoMetadata;

    /// Index of the frame the next call to
    /// [`next_frame`](FrameSource::next_frame) will return.
    fn position(&self) -> u64;

    /// Decode the next frame in presentation order.
    ///
    /// Returns `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FramecutError>;

    /// Reposition the source at frame 0.
    fn rewind(&mut self) -> Result<(), FramecutError>;

    /// Position the stream at `index` and decode that frame.
    ///
    /// Forward targets are reached by decoding and discarding; backward
    /// targets rewind first. Returns `Ok(None)` if the stream ends before
    /// `index`.
    fn read_frame_at(&mut self, index: u64) -> Result<Option<RgbImage>, FramecutError> {
        if index < self.position() {
            self.rewind()?;
        }
        while self.position() < index {
            if self.next_frame()?.is_none() {
                return Ok(None);
            }
        }
        self.next_frame()
    }

    /// Release decoder resources. Calling it again is a no-op.
    fn close(&mut self);
}

/// `ScalingContext` wraps a raw `SwsContext` pointer, which FFmpeg allows to
/// move between threads as long as it is used from one thread at a time.
struct SendScaler(ScalingContext);

// SAFETY: the context is owned by a single `DecodeState` and never shared.
unsafe impl Send for SendScaler {}

/// Decoder-side state of an open [`VideoFile`].
struct DecodeState {
    decoder: VideoDecoder,
    scaler: Option<SendScaler>,
    decoded: VideoFrame,
    rgb: VideoFrame,
    eof_sent: bool,
    end_of_stream: bool,
}

impl DecodeState {
    /// Pull one decoded frame out of the decoder, if it has one ready.
    fn receive(&mut self, width: u32, height: u32) -> Result<Option<RgbImage>, FramecutError> {
        if !frame_ready(self.decoder.receive_frame(&mut self.decoded))? {
            return Ok(None);
        }

        if self.scaler.is_none() {
            let scaler = ScalingContext::get(
                self.decoded.format(),
                self.decoded.width(),
                self.decoded.height(),
                Pixel::RGB24,
                width,
                height,
                ScalingFlags::BILINEAR,
            )
            .map_err(|error| {
                FramecutError::VideoDecodeError(format!("cannot create scaler: {error}"))
            })?;
            self.scaler = Some(SendScaler(scaler));
        }

        if let Some(SendScaler(scaler)) = self.scaler.as_mut() {
            scaler.run(&self.decoded, &mut self.rgb).map_err(|error| {
                FramecutError::VideoDecodeError(format!("scaling failed: {error}"))
            })?;
        }
        conversion::rgb_frame_to_image(&self.rgb, width, height).map(Some)
    }

    /// Feed the next video packet to the decoder, or signal end of input.
    fn feed(&mut self, input: &mut Input, stream_index: usize) -> Result<(), FramecutError> {
        if self.eof_sent {
            self.end_of_stream = true;
            return Ok(());
        }

        match next_packet(input, stream_index) {
            Some(packet) => {
                if let Err(error) = self.decoder.send_packet(&packet) {
                    log::warn!("Skipping undecodable packet: {error}");
                }
            }
            None => {
                self.decoder.send_eof().map_err(|error| {
                    FramecutError::VideoDecodeError(format!("cannot flush decoder: {error}"))
                })?;
                self.eof_sent = true;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.eof_sent = false;
        self.end_of_stream = false;
    }
}

/// Interpret the result of `receive_frame`: `Ok(true)` when a frame was
/// decoded, `Ok(false)` when the decoder needs more input or is drained.
fn frame_ready(result: Result<(), FfmpegError>) -> Result<bool, FramecutError> {
    match result {
        Ok(()) => Ok(true),
        Err(FfmpegError::Eof) => Ok(false),
        Err(FfmpegError::Other { errno }) if errno == EAGAIN => Ok(false),
        Err(error) => Err(FramecutError::VideoDecodeError(error.to_string())),
    }
}

fn next_packet(input: &mut Input, stream_index: usize) -> Option<Packet> {
    input
        .packets()
        .find(|(stream, _)| stream.index() == stream_index)
        .map(|(_, packet)| packet)
}

/// An opened video file.
///
/// Created via [`VideoFile::open`]. Holds the demuxer and a decoder for the
/// best video stream; both are released by [`close`](FrameSource::close) or
/// when the value is dropped.
///
/// # Example
///
/// ```no_run
/// use framecut::{FrameSource, VideoFile};
///
/// let mut source = VideoFile::open("input.mp4")?;
/// if let Some(frame) = source.read_frame_at(100)? {
///     frame.save("frame_100.png")?;
/// }
/// # Ok::<(), framecut::FramecutError>(())
/// ```
pub struct VideoFile {
    input: Option<Input>,
    state: Option<DecodeState>,
    stream_index: usize,
    metadata: VideoMetadata,
    position: u64,
    path: PathBuf,
}

impl Debug for VideoFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoFile")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .field("position", &self.position)
            .field("closed", &self.input.is_none())
            .finish_non_exhaustive()
    }
}

impl VideoFile {
    /// Open a video file for reading.
    ///
    /// Initializes FFmpeg (idempotent), opens the container, selects the best
    /// video stream and creates its decoder.
    ///
    /// # Errors
    ///
    /// - [`FramecutError::FileOpen`] if the file is missing or cannot be
    ///   demuxed or decoded.
    /// - [`FramecutError::NoVideoStream`] if it has no video stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FramecutError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |reason: String| FramecutError::FileOpen {
            path: path.clone(),
            reason,
        };

        log::debug!("Opening video file: {}", path.display());

        crate::ffmpeg::initialize()
            .map_err(|error| open_error(format!("FFmpeg initialisation failed: {error}")))?;

        let input =
            ffmpeg_next::format::input(&path).map_err(|error| open_error(error.to_string()))?;

        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or(FramecutError::NoVideoStream)?;
        let stream_index = stream.index();

        let decoder_context = CodecContext::from_parameters(stream.parameters())
            .map_err(|error| open_error(format!("Failed to read codec parameters: {error}")))?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|error| open_error(format!("Failed to create video decoder: {error}")))?;

        let frame_rate = stream.avg_frame_rate();
        let frames_per_second = if frame_rate.denominator() != 0 && frame_rate.numerator() > 0 {
            f64::from(frame_rate)
        } else {
            let rate = stream.rate();
            if rate.denominator() != 0 {
                f64::from(rate)
            } else {
                0.0
            }
        };

        let duration_microseconds = input.duration();
        let duration = if duration_microseconds > 0 {
            Duration::from_micros(duration_microseconds as u64)
        } else {
            Duration::ZERO
        };

        let frame_count = match stream.frames() {
            count if count > 0 => count as u64,
            _ if frames_per_second > 0.0 => (duration.as_secs_f64() * frames_per_second) as u64,
            _ => 0,
        };

        let codec = decoder
            .codec()
            .map(|codec| codec.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            frames_per_second,
            frame_count,
            duration,
            codec,
        };

        log::info!(
            "Opened {}: {}x{} @ {:.3} fps, {} frames [{}]",
            path.display(),
            metadata.width,
            metadata.height,
            metadata.frames_per_second,
            metadata.frame_count,
            metadata.codec,
        );

        Ok(Self {
            input: Some(input),
            state: Some(DecodeState {
                decoder,
                scaler: None,
                decoded: VideoFrame::empty(),
                rgb: VideoFrame::empty(),
                eof_sent: false,
                end_of_stream: false,
            }),
            stream_index,
            metadata,
            position: 0,
            path,
        })
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` once [`close`](FrameSource::close) has run.
    pub fn is_closed(&self) -> bool {
        self.input.is_none()
    }
}

impl FrameSource for VideoFile {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, FramecutError> {
        let (Some(input), Some(state)) = (self.input.as_mut(), self.state.as_mut()) else {
            return Err(FramecutError::SourceClosed);
        };
        let (width, height) = (self.metadata.width, self.metadata.height);

        loop {
            if let Some(image) = state.receive(width, height)? {
                self.position += 1;
                return Ok(Some(image));
            }
            if state.end_of_stream {
                return Ok(None);
            }
            state.feed(input, self.stream_index)?;
        }
    }

    fn rewind(&mut self) -> Result<(), FramecutError> {
        let (Some(input), Some(state)) = (self.input.as_mut(), self.state.as_mut()) else {
            return Err(FramecutError::SourceClosed);
        };
        log::debug!("Rewinding {} from frame {}", self.path.display(), self.position);
        input.seek(0, ..0)?;
        state.reset();
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        if self.input.is_some() {
            log::debug!("Closing video file: {}", self.path.display());
        }
        self.state = None;
        self.input = None;
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        self.close();
    }
}
