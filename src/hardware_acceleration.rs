//! FFmpeg hardware compute devices.
//!
//! When the `hardware` feature is enabled, this module provides
//! [`HardwareDevice`], a [`ComputeDevice`] backed by an FFmpeg hardware
//! device context, and [`HardwareDeviceProvider`], which opens one according
//! to a [`HardwareAccelerationMode`].
//!
//! Each round trip uploads the frame into a hardware surface with
//! `av_hwframe_transfer_data` and downloads it again. The surface pool is
//! created lazily for the frame size and dropped by
//! [`release_memory`](ComputeDevice::release_memory).
//!
//! # Platform Support
//!
//! Availability depends on both the FFmpeg build and the host's GPU drivers.
//! When no device can be opened the export runs unaccelerated.

use std::{fmt, ptr, str::FromStr};

use ffmpeg_next::{format::Pixel, frame::Video as VideoFrame};
use ffmpeg_sys_next::{AVBufferRef, AVHWDeviceType, AVHWFramesContext, AVPixelFormat};
use image::RgbImage;

use crate::{
    acceleration::{ComputeDevice, DeviceProvider},
    conversion,
    error::FramecutError,
};

/// Software formats a frame can be staged in, in order of preference.
const STAGING_FORMATS: [AVPixelFormat; 4] = [
    AVPixelFormat::AV_PIX_FMT_RGBA,
    AVPixelFormat::AV_PIX_FMT_RGB0,
    AVPixelFormat::AV_PIX_FMT_BGRA,
    AVPixelFormat::AV_PIX_FMT_BGR0,
];

/// Surfaces preallocated per pool. Some backends cannot grow a pool.
const POOL_SIZE: i32 = 2;

/// How the hardware device for an export is chosen.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use framecut::{ExportOptions, HardwareAccelerationMode, HardwareDeviceProvider};
///
/// let options = ExportOptions::new()
///     .with_accelerator(Arc::new(HardwareDeviceProvider::new(HardwareAccelerationMode::Auto)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareAccelerationMode {
    /// Try every device type the FFmpeg build supports, in order.
    #[default]
    Auto,
    /// Never open a device.
    Software,
    /// Use one device type only.
    Specific(HardwareDeviceType),
}

impl FromStr for HardwareAccelerationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(HardwareAccelerationMode::Auto),
            "software" | "none" | "off" => Ok(HardwareAccelerationMode::Software),
            other => other
                .parse::<HardwareDeviceType>()
                .map(HardwareAccelerationMode::Specific),
        }
    }
}

/// Supported hardware device types.
///
/// Not all types are available on all platforms; see
/// [`available_hardware_devices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareDeviceType {
    /// NVIDIA CUDA (Linux, Windows).
    Cuda,
    /// Video Acceleration API (Linux).
    Vaapi,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Apple VideoToolbox (macOS, iOS).
    VideoToolbox,
    /// Intel Quick Sync Video (cross-platform).
    Qsv,
    /// Vulkan (cross-platform).
    Vulkan,
}

impl HardwareDeviceType {
    fn to_av_hw_device_type(self) -> AVHWDeviceType {
        match self {
            HardwareDeviceType::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HardwareDeviceType::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HardwareDeviceType::Dxva2 => AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HardwareDeviceType::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HardwareDeviceType::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            HardwareDeviceType::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
            HardwareDeviceType::Vulkan => AVHWDeviceType::AV_HWDEVICE_TYPE_VULKAN,
        }
    }

    fn from_av_hw_device_type(device_type: AVHWDeviceType) -> Option<Self> {
        match device_type {
            AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA => Some(HardwareDeviceType::Cuda),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI => Some(HardwareDeviceType::Vaapi),
            AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2 => Some(HardwareDeviceType::Dxva2),
            AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA => Some(HardwareDeviceType::D3d11va),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX => Some(HardwareDeviceType::VideoToolbox),
            AVHWDeviceType::AV_HWDEVICE_TYPE_QSV => Some(HardwareDeviceType::Qsv),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VULKAN => Some(HardwareDeviceType::Vulkan),
            _ => None,
        }
    }

    /// FFmpeg's name for the device type.
    pub fn name(self) -> &'static str {
        match self {
            HardwareDeviceType::Cuda => "cuda",
            HardwareDeviceType::Vaapi => "vaapi",
            HardwareDeviceType::Dxva2 => "dxva2",
            HardwareDeviceType::D3d11va => "d3d11va",
            HardwareDeviceType::VideoToolbox => "videotoolbox",
            HardwareDeviceType::Qsv => "qsv",
            HardwareDeviceType::Vulkan => "vulkan",
        }
    }
}

impl fmt::Display for HardwareDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareDeviceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cuda" => Ok(HardwareDeviceType::Cuda),
            "vaapi" => Ok(HardwareDeviceType::Vaapi),
            "dxva2" => Ok(HardwareDeviceType::Dxva2),
            "d3d11va" => Ok(HardwareDeviceType::D3d11va),
            "videotoolbox" => Ok(HardwareDeviceType::VideoToolbox),
            "qsv" => Ok(HardwareDeviceType::Qsv),
            "vulkan" => Ok(HardwareDeviceType::Vulkan),
            other => Err(format!("unknown hardware device type: {other}")),
        }
    }
}

/// List all hardware device types supported by the FFmpeg build.
pub fn available_hardware_devices() -> Vec<HardwareDeviceType> {
    let mut devices = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;

    loop {
        device_type = unsafe { ffmpeg_sys_next::av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        if let Some(device) = HardwareDeviceType::from_av_hw_device_type(device_type) {
            devices.push(device);
        }
    }

    devices
}

/// Opens [`HardwareDevice`]s according to a [`HardwareAccelerationMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareDeviceProvider {
    mode: HardwareAccelerationMode,
}

impl HardwareDeviceProvider {
    /// Create a provider for `mode`.
    pub fn new(mode: HardwareAccelerationMode) -> Self {
        Self { mode }
    }

    /// The configured mode.
    pub fn mode(&self) -> HardwareAccelerationMode {
        self.mode
    }
}

impl DeviceProvider for HardwareDeviceProvider {
    fn open_device(&self) -> Result<Box<dyn ComputeDevice>, FramecutError> {
        let candidates = match self.mode {
            HardwareAccelerationMode::Software => {
                return Err(FramecutError::AcceleratorError(
                    "hardware acceleration disabled".to_string(),
                ));
            }
            HardwareAccelerationMode::Specific(device) => vec![device],
            HardwareAccelerationMode::Auto => available_hardware_devices(),
        };

        let mut last_error = None;
        for device_type in candidates {
            match HardwareDevice::open(device_type) {
                Ok(device) => return Ok(Box::new(device)),
                Err(error) => {
                    log::debug!("Cannot open {device_type} device: {error}");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            FramecutError::AcceleratorError("FFmpeg supports no hardware devices".to_string())
        }))
    }
}

/// A surface pool for one frame size.
struct SurfacePool {
    frames_context: *mut AVBufferRef,
    staging_format: AVPixelFormat,
    width: u32,
    height: u32,
}

impl Drop for SurfacePool {
    fn drop(&mut self) {
        unsafe { ffmpeg_sys_next::av_buffer_unref(&mut self.frames_context) };
    }
}

/// An FFmpeg hardware device context used as a [`ComputeDevice`].
pub struct HardwareDevice {
    device_type: HardwareDeviceType,
    device_context: *mut AVBufferRef,
    pool: Option<SurfacePool>,
}

impl fmt::Debug for HardwareDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareDevice")
            .field("device_type", &self.device_type)
            .field("pool_allocated", &self.pool.is_some())
            .finish()
    }
}

impl HardwareDevice {
    /// Create a device context of the given type on its default device.
    ///
    /// # Errors
    ///
    /// Returns [`FramecutError::AcceleratorError`] if FFmpeg cannot create
    /// the context.
    pub fn open(device_type: HardwareDeviceType) -> Result<Self, FramecutError> {
        crate::ffmpeg::initialize()
            .map_err(|e| FramecutError::AcceleratorError(format!("FFmpeg init failed: {e}")))?;

        let mut device_context: *mut AVBufferRef = ptr::null_mut();
        let result = unsafe {
            ffmpeg_sys_next::av_hwdevice_ctx_create(
                &mut device_context,
                device_type.to_av_hw_device_type(),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };

        if result < 0 {
            return Err(FramecutError::AcceleratorError(format!(
                "Failed to create {device_type} device context (result={result})"
            )));
        }

        log::debug!("Opened {device_type} device context");
        Ok(Self {
            device_type,
            device_context,
            pool: None,
        })
    }

    /// The device type backing this context.
    pub fn device_type(&self) -> HardwareDeviceType {
        self.device_type
    }

    fn pool_for(&mut self, width: u32, height: u32) -> Result<&SurfacePool, FramecutError> {
        let reusable = self
            .pool
            .as_ref()
            .is_some_and(|pool| pool.width == width && pool.height == height);
        if !reusable {
            self.pool = None;
            self.pool = Some(self.create_pool(width, height)?);
        }
        self.pool
            .as_ref()
            .ok_or_else(|| FramecutError::AcceleratorError("surface pool missing".to_string()))
    }

    fn create_pool(&self, width: u32, height: u32) -> Result<SurfacePool, FramecutError> {
        let (hardware_format, staging_format) = self.negotiate_formats(width, height)?;

        let frames_context = unsafe { ffmpeg_sys_next::av_hwframe_ctx_alloc(self.device_context) };
        if frames_context.is_null() {
            return Err(FramecutError::AcceleratorError(
                "av_hwframe_ctx_alloc failed".to_string(),
            ));
        }
        let pool = SurfacePool {
            frames_context,
            staging_format,
            width,
            height,
        };

        let result = unsafe {
            let frames = (*pool.frames_context).data as *mut AVHWFramesContext;
            (*frames).format = hardware_format;
            (*frames).sw_format = staging_format;
            (*frames).width = width as i32;
            (*frames).height = height as i32;
            (*frames).initial_pool_size = POOL_SIZE;
            ffmpeg_sys_next::av_hwframe_ctx_init(pool.frames_context)
        };
        if result < 0 {
            return Err(FramecutError::AcceleratorError(format!(
                "Failed to initialise {} surface pool (result={result})",
                self.device_type
            )));
        }

        log::debug!(
            "Allocated {width}x{height} {} surface pool ({:?})",
            self.device_type,
            pool.staging_format
        );
        Ok(pool)
    }

    /// Pick the device surface format and an RGB staging format the device
    /// accepts for `width` x `height` frames.
    fn negotiate_formats(
        &self,
        width: u32,
        height: u32,
    ) -> Result<(AVPixelFormat, AVPixelFormat), FramecutError> {
        let mut constraints = unsafe {
            ffmpeg_sys_next::av_hwdevice_get_hwframe_constraints(self.device_context, ptr::null())
        };
        if constraints.is_null() {
            return Err(FramecutError::AcceleratorError(format!(
                "{} reports no frame constraints",
                self.device_type
            )));
        }

        let negotiated = unsafe {
            let limits = &*constraints;
            let size_ok = (limits.max_width <= 0 || width as i32 <= limits.max_width)
                && (limits.max_height <= 0 || height as i32 <= limits.max_height)
                && width as i32 >= limits.min_width
                && height as i32 >= limits.min_height;

            let hardware_format = first_format(limits.valid_hw_formats);
            let software_formats = format_list(limits.valid_sw_formats);
            let staging_format = STAGING_FORMATS
                .iter()
                .copied()
                .find(|format| software_formats.contains(format));

            match (size_ok, hardware_format, staging_format) {
                (false, _, _) => Err(format!("{width}x{height} is outside the device limits")),
                (_, None, _) => Err("no hardware surface format".to_string()),
                (_, _, None) => Err("no RGB staging format".to_string()),
                (true, Some(hardware), Some(staging)) => Ok((hardware, staging)),
            }
        };

        unsafe { ffmpeg_sys_next::av_hwframe_constraints_free(&mut constraints) };

        negotiated
            .map_err(|reason| FramecutError::AcceleratorError(format!("{}: {reason}", self.device_type)))
    }
}

impl ComputeDevice for HardwareDevice {
    fn name(&self) -> &str {
        self.device_type.name()
    }

    fn round_trip(&mut self, frame: &RgbImage) -> Result<RgbImage, FramecutError> {
        let (width, height) = frame.dimensions();
        let pool = self.pool_for(width, height)?;
        let staging_pixel = Pixel::from(pool.staging_format);

        let upload = pack_staging_frame(frame, staging_pixel);

        let mut surface = VideoFrame::empty();
        let result = unsafe {
            ffmpeg_sys_next::av_hwframe_get_buffer(pool.frames_context, surface.as_mut_ptr(), 0)
        };
        if result < 0 {
            return Err(FramecutError::AcceleratorError(format!(
                "av_hwframe_get_buffer failed (result={result})"
            )));
        }

        let result = unsafe {
            ffmpeg_sys_next::av_hwframe_transfer_data(surface.as_mut_ptr(), upload.as_ptr(), 0)
        };
        if result < 0 {
            return Err(FramecutError::AcceleratorError(format!(
                "upload failed (result={result})"
            )));
        }

        let mut download = VideoFrame::new(staging_pixel, width, height);
        let result = unsafe {
            ffmpeg_sys_next::av_hwframe_transfer_data(download.as_mut_ptr(), surface.as_ptr(), 0)
        };
        if result < 0 {
            return Err(FramecutError::AcceleratorError(format!(
                "download failed (result={result})"
            )));
        }

        unpack_staging_frame(&download, staging_pixel, width, height)
    }

    fn release_memory(&mut self) {
        if self.pool.take().is_some() {
            log::trace!("Released {} surface pool", self.device_type);
        }
    }
}

impl Drop for HardwareDevice {
    fn drop(&mut self) {
        self.pool = None;
        unsafe { ffmpeg_sys_next::av_buffer_unref(&mut self.device_context) };
    }
}

unsafe fn first_format(list: *const AVPixelFormat) -> Option<AVPixelFormat> {
    if list.is_null() {
        return None;
    }
    let format = unsafe { *list };
    (format != AVPixelFormat::AV_PIX_FMT_NONE).then_some(format)
}

unsafe fn format_list(list: *const AVPixelFormat) -> Vec<AVPixelFormat> {
    let mut formats = Vec::new();
    if list.is_null() {
        return formats;
    }
    let mut cursor = list;
    loop {
        let format = unsafe { *cursor };
        if format == AVPixelFormat::AV_PIX_FMT_NONE {
            break;
        }
        formats.push(format);
        cursor = unsafe { cursor.add(1) };
    }
    formats
}

fn is_bgr_order(pixel: Pixel) -> bool {
    matches!(pixel, Pixel::BGRA | Pixel::BGRZ)
}

/// Expand an RGB image into a 4-byte staging frame.
fn pack_staging_frame(image: &RgbImage, pixel: Pixel) -> VideoFrame {
    let (width, height) = image.dimensions();
    let mut frame = VideoFrame::new(pixel, width, height);
    let stride = frame.stride(0);
    let bgr = is_bgr_order(pixel);
    let data = frame.data_mut(0);

    for (y, row) in image.rows().enumerate() {
        let line = &mut data[y * stride..y * stride + width as usize * 4];
        for (target, source) in line.chunks_exact_mut(4).zip(row) {
            let [r, g, b] = source.0;
            let (first, third) = if bgr { (b, r) } else { (r, b) };
            target.copy_from_slice(&[first, g, third, u8::MAX]);
        }
    }

    frame
}

/// Collapse a downloaded 4-byte staging frame back into RGB.
fn unpack_staging_frame(
    frame: &VideoFrame,
    pixel: Pixel,
    width: u32,
    height: u32,
) -> Result<RgbImage, FramecutError> {
    let packed = conversion::frame_to_buffer(frame, width, height, 4);
    let bgr = is_bgr_order(pixel);
    let rgb = packed
        .chunks_exact(4)
        .flat_map(|px| if bgr { [px[2], px[1], px[0]] } else { [px[0], px[1], px[2]] })
        .collect();

    RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        FramecutError::AcceleratorError("downloaded surface has the wrong size".to_string())
    })
}
