//! Video output sinks.
//!
//! The crop export writes frames one at a time into a [`FrameSink`] created
//! by a [`SinkFactory`]. [`FfmpegSinkFactory`] is the default factory; it
//! opens a [`VideoEncoder`] that scales RGB frames to YUV 4:2:0 and muxes
//! them into a container chosen by the output file extension.

use std::path::{Path, PathBuf};

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::encoder::Video as OpenedVideoEncoder;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Dictionary, Packet, Rational};
use image::RgbImage;

use crate::{conversion, error::FramecutError};

/// Highest accepted quality value (CRF scale).
pub const MAX_QUALITY: u32 = 51;

/// Supported output video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    /// H.264 / AVC.
    #[default]
    H264,
    /// H.265 / HEVC.
    H265,
}

impl VideoCodec {
    fn to_codec_id(self) -> Id {
        match self {
            VideoCodec::H264 => Id::H264,
            VideoCodec::H265 => Id::HEVC,
        }
    }

    /// Short lowercase name, as accepted by the CLI.
    pub fn name(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(VideoCodec::H264),
            "h265" | "hevc" => Ok(VideoCodec::H265),
            other => Err(format!("unsupported codec: {other} (expected h264 or h265)")),
        }
    }
}

/// Everything a sink needs to know before the first frame arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    /// Frame width; even.
    pub width: u32,
    /// Frame height; even.
    pub height: u32,
    /// Output frame rate, normally the source's.
    pub frames_per_second: f64,
    /// Output codec.
    pub codec: VideoCodec,
    /// Constant rate factor, `0..=51`, lower is better.
    pub quality: u32,
}

/// A destination that accepts frames of one fixed size.
pub trait FrameSink {
    /// Encode and write one frame.
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), FramecutError>;

    /// Flush buffered frames and finalize the container.
    fn finish(self: Box<Self>) -> Result<(), FramecutError>;
}

/// Creates sinks on the export worker thread.
pub trait SinkFactory: Send + Sync {
    /// Open a sink writing to `path`.
    ///
    /// # Errors
    ///
    /// Should return [`FramecutError::VideoEncodeError`] when the codec,
    /// container, or dimensions are not supported.
    fn create(&self, path: &Path, spec: &SinkSpec) -> Result<Box<dyn FrameSink>, FramecutError>;
}

/// The default [`SinkFactory`], backed by FFmpeg.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSinkFactory;

impl SinkFactory for FfmpegSinkFactory {
    fn create(&self, path: &Path, spec: &SinkSpec) -> Result<Box<dyn FrameSink>, FramecutError> {
        Ok(Box::new(VideoEncoder::create(path, spec)?))
    }
}

/// Streams RGB frames into an encoded video file.
pub struct VideoEncoder {
    output: Output,
    encoder: OpenedVideoEncoder,
    scaler: ScalingContext,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    path: PathBuf,
}

impl VideoEncoder {
    /// Open the output file and the encoder and write the container header.
    ///
    /// The container format is inferred from the file extension.
    ///
    /// # Errors
    ///
    /// - [`FramecutError::VideoEncodeError`] if the codec is unavailable or
    ///   rejects the configuration.
    /// - [`FramecutError::VideoWriteError`] if the container cannot be
    ///   created or its header written.
    pub fn create(path: &Path, spec: &SinkSpec) -> Result<Self, FramecutError> {
        log::info!(
            "Opening encoder for {} ({}x{}, codec={:?}, fps={:.3}, crf={})",
            path.display(),
            spec.width,
            spec.height,
            spec.codec,
            spec.frames_per_second,
            spec.quality,
        );

        crate::ffmpeg::initialize()
            .map_err(|e| FramecutError::VideoEncodeError(format!("FFmpeg init failed: {e}")))?;

        let codec_id = spec.codec.to_codec_id();
        let target_pixel = Pixel::YUV420P;

        let frame_rate = if spec.frames_per_second.is_finite() && spec.frames_per_second > 0.0 {
            Rational::from(spec.frames_per_second)
        } else {
            Rational::new(30, 1)
        };
        let encoder_time_base = frame_rate.invert();

        let mut output = ffmpeg_next::format::output(path)
            .map_err(|e| FramecutError::VideoWriteError(format!("cannot open output: {e}")))?;

        // Read before add_stream, which borrows the output mutably.
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let encoder_codec = ffmpeg_next::encoder::find(codec_id).ok_or_else(|| {
            FramecutError::VideoEncodeError(format!("codec {codec_id:?} not available"))
        })?;

        let mut stream = output
            .add_stream(encoder_codec)
            .map_err(|e| FramecutError::VideoEncodeError(format!("cannot add stream: {e}")))?;
        let stream_index = stream.index();

        let mut encoder = CodecContext::from_parameters(stream.parameters())
            .map_err(|e| {
                FramecutError::VideoEncodeError(format!("cannot create codec context: {e}"))
            })?
            .encoder()
            .video()
            .map_err(|e| {
                FramecutError::VideoEncodeError(format!("cannot open video encoder: {e}"))
            })?;

        encoder.set_width(spec.width);
        encoder.set_height(spec.height);
        encoder.set_format(target_pixel);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(frame_rate));

        if needs_global_header {
            // SAFETY: the context is exclusively owned here and not yet opened.
            unsafe {
                (*encoder.as_mut_ptr()).flags |=
                    ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let mut options = Dictionary::new();
        options.set("crf", &spec.quality.to_string());

        let opened = encoder
            .open_as_with(encoder_codec, options)
            .map_err(|e| FramecutError::VideoEncodeError(format!("cannot open encoder: {e}")))?;

        stream.set_parameters(&opened);

        output
            .write_header()
            .map_err(|e| FramecutError::VideoWriteError(format!("cannot write header: {e}")))?;

        // The muxer may change the stream time base while writing the header.
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| {
                FramecutError::VideoWriteError("output stream disappeared".to_string())
            })?;

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            spec.width,
            spec.height,
            target_pixel,
            spec.width,
            spec.height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| FramecutError::VideoEncodeError(format!("cannot create scaler: {e}")))?;

        Ok(Self {
            output,
            encoder: opened,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width: spec.width,
            height: spec.height,
            next_pts: 0,
            path: path.to_path_buf(),
        })
    }

    /// Number of frames accepted so far.
    pub fn frames_written(&self) -> u64 {
        self.next_pts as u64
    }

    /// Write every packet the encoder has ready.
    fn drain_packets(&mut self) -> Result<(), FramecutError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.output).map_err(|e| {
                FramecutError::VideoWriteError(format!("write packet failed: {e}"))
            })?;
        }
        Ok(())
    }
}

impl FrameSink for VideoEncoder {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), FramecutError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(FramecutError::VideoEncodeError(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height,
            )));
        }

        let source = conversion::image_to_rgb_frame(frame);
        let mut converted = VideoFrame::empty();
        self.scaler
            .run(&source, &mut converted)
            .map_err(|e| FramecutError::VideoEncodeError(format!("scaling failed: {e}")))?;

        converted.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&converted)
            .map_err(|e| FramecutError::VideoEncodeError(format!("send_frame failed: {e}")))?;
        self.drain_packets()
    }

    fn finish(mut self: Box<Self>) -> Result<(), FramecutError> {
        self.encoder
            .send_eof()
            .map_err(|e| FramecutError::VideoEncodeError(format!("send_eof failed: {e}")))?;
        self.drain_packets()?;

        self.output
            .write_trailer()
            .map_err(|e| FramecutError::VideoWriteError(format!("cannot write trailer: {e}")))?;

        log::info!(
            "Finished {} ({} frames)",
            self.path.display(),
            self.frames_written()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names_round_trip_through_from_str() {
        for codec in [VideoCodec::H264, VideoCodec::H265] {
            assert_eq!(codec.name().parse::<VideoCodec>(), Ok(codec));
        }
        assert_eq!("HEVC".parse::<VideoCodec>(), Ok(VideoCodec::H265));
        assert!("vp9".parse::<VideoCodec>().is_err());
    }
}
