//! Optional accelerated frame processing.
//!
//! Crop exports can route every frame through a [`FrameProcessor`] before it
//! reaches the encoder. The processor is chosen once per job:
//!
//! - [`Passthrough`] returns frames untouched. It is used when no
//!   [`DeviceProvider`] is configured or the provider cannot open a device.
//! - [`AcceleratedProcessor`] uploads each frame to a [`ComputeDevice`] and
//!   downloads it again. The result must be byte-identical to the input; any
//!   failure or mismatch falls back to the original buffer for that frame.
//!
//! Output is therefore identical with or without acceleration.

use std::sync::Arc;

use image::RgbImage;

use crate::error::FramecutError;

/// Frames between two device memory releases, unless configured otherwise.
pub const DEFAULT_RELEASE_INTERVAL: u32 = 10;

/// A device able to hold a frame in its own memory.
///
/// Devices are opened on the export worker and never leave it, so they need
/// not be [`Send`].
pub trait ComputeDevice {
    /// Short device name for logs, e.g. `"cuda"`.
    fn name(&self) -> &str;

    /// Upload `frame` to device memory and download it again.
    fn round_trip(&mut self, frame: &RgbImage) -> Result<RgbImage, FramecutError>;

    /// Free device-side buffers and pools.
    fn release_memory(&mut self);
}

/// Opens [`ComputeDevice`]s for export jobs.
///
/// Configured with
/// [`ExportOptions::with_accelerator`](crate::ExportOptions::with_accelerator).
pub trait DeviceProvider: Send + Sync {
    /// Open a device for one job.
    ///
    /// # Errors
    ///
    /// Should return [`FramecutError::AcceleratorError`] when no usable
    /// device exists. The job then continues without acceleration.
    fn open_device(&self) -> Result<Box<dyn ComputeDevice>, FramecutError>;
}

/// Per-frame processing applied between cropping and encoding.
pub trait FrameProcessor {
    /// Called once before the first frame.
    fn begin(&mut self) {}

    /// Process one frame. Never fails; implementations recover internally.
    fn process_frame(&mut self, frame: RgbImage) -> RgbImage;

    /// Called once after the last frame, on every exit path.
    fn release(&mut self) {}

    /// Whether frames go through a device.
    fn is_accelerated(&self) -> bool {
        false
    }

    /// Frames for which the device result was discarded.
    fn fallback_count(&self) -> u64 {
        0
    }
}

/// The identity processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FrameProcessor for Passthrough {
    fn process_frame(&mut self, frame: RgbImage) -> RgbImage {
        frame
    }
}

/// Round-trips frames through a [`ComputeDevice`], falling back to the
/// original buffer whenever the device result cannot be trusted.
pub struct AcceleratedProcessor {
    device: Box<dyn ComputeDevice>,
    release_interval: u32,
    frames_since_release: u32,
    processed: u64,
    fallbacks: u64,
}

impl AcceleratedProcessor {
    /// Wrap `device`, releasing its memory every `release_interval` frames.
    ///
    /// An interval of 0 is treated as 1.
    pub fn new(device: Box<dyn ComputeDevice>, release_interval: u32) -> Self {
        Self {
            device,
            release_interval: release_interval.max(1),
            frames_since_release: 0,
            processed: 0,
            fallbacks: 0,
        }
    }

    /// Frames processed so far, including fallbacks.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn release_now(&mut self) {
        self.device.release_memory();
        self.frames_since_release = 0;
    }
}

impl FrameProcessor for AcceleratedProcessor {
    fn begin(&mut self) {
        log::debug!("Accelerated processing on {}", self.device.name());
        self.release_now();
    }

    fn process_frame(&mut self, frame: RgbImage) -> RgbImage {
        self.processed += 1;

        let result = match self.device.round_trip(&frame) {
            Ok(returned) if returned.dimensions() == frame.dimensions()
                && returned.as_raw() == frame.as_raw() =>
            {
                returned
            }
            Ok(_) => {
                log::debug!(
                    "Device {} altered frame {}; using the original",
                    self.device.name(),
                    self.processed
                );
                self.fallbacks += 1;
                frame
            }
            Err(error) => {
                log::debug!("Accelerated pass failed on frame {}: {error}", self.processed);
                self.fallbacks += 1;
                frame
            }
        };

        self.frames_since_release += 1;
        if self.frames_since_release >= self.release_interval {
            self.release_now();
        }
        result
    }

    fn release(&mut self) {
        self.release_now();
        if self.fallbacks > 0 {
            log::warn!(
                "{} of {} frames fell back to the unaccelerated path on {}",
                self.fallbacks,
                self.processed,
                self.device.name()
            );
        }
    }

    fn is_accelerated(&self) -> bool {
        true
    }

    fn fallback_count(&self) -> u64 {
        self.fallbacks
    }
}

/// Pick the processor for one job.
pub(crate) fn select_processor(
    provider: Option<&Arc<dyn DeviceProvider>>,
    release_interval: u32,
) -> Box<dyn FrameProcessor> {
    let Some(provider) = provider else {
        return Box::new(Passthrough);
    };

    match provider.open_device() {
        Ok(device) => {
            log::info!("Using compute device {}", device.name());
            Box::new(AcceleratedProcessor::new(device, release_interval))
        }
        Err(error) => {
            log::warn!("No compute device available, continuing without: {error}");
            Box::new(Passthrough)
        }
    }
}
