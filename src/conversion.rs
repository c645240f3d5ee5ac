//! Pixel-buffer conversion between FFmpeg frames and `image` buffers.
//!
//! FFmpeg frames carry a per-row stride that may exceed the visible width;
//! `image` buffers are tightly packed. These helpers copy row by row when the
//! two layouts differ.

use ffmpeg_next::{format::Pixel, frame::Video as VideoFrame};
use image::RgbImage;

use crate::error::FramecutError;

/// Copy pixel data from plane 0 of an FFmpeg video frame into a
/// tightly-packed buffer.
///
/// `bytes_per_pixel` is the number of bytes per pixel for the frame's format
/// (3 for RGB24, 4 for RGBA).
pub(crate) fn frame_to_buffer(
    video_frame: &VideoFrame,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Vec<u8> {
    let stride = video_frame.stride(0);
    let row_length = (width as usize) * bytes_per_pixel;
    let data = video_frame.data(0);

    if stride == row_length {
        data[..row_length * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_length * (height as usize));
        for row in 0..(height as usize) {
            let row_start = row * stride;
            buffer.extend_from_slice(&data[row_start..row_start + row_length]);
        }
        buffer
    }
}

/// Build an RGB image from a decoded RGB24 frame.
pub(crate) fn rgb_frame_to_image(
    rgb_frame: &VideoFrame,
    width: u32,
    height: u32,
) -> Result<RgbImage, FramecutError> {
    let buffer = frame_to_buffer(rgb_frame, width, height, 3);
    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        FramecutError::VideoDecodeError(
            "Failed to construct RGB image from decoded frame data".to_string(),
        )
    })
}

/// Copy an RGB image into a freshly allocated RGB24 FFmpeg frame.
pub(crate) fn image_to_rgb_frame(image: &RgbImage) -> VideoFrame {
    let (width, height) = image.dimensions();
    let mut frame = VideoFrame::new(Pixel::RGB24, width, height);
    let stride = frame.stride(0);
    let row_length = (width as usize) * 3;
    let source = image.as_raw();
    let destination = frame.data_mut(0);

    for row in 0..(height as usize) {
        let src_start = row * row_length;
        let dst_start = row * stride;
        destination[dst_start..dst_start + row_length]
            .copy_from_slice(&source[src_start..src_start + row_length]);
    }

    frame
}
