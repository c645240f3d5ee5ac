//! Test doubles shared by the integration tests.
//!
//! [`SyntheticSource`] produces deterministic frames without FFmpeg, and
//! [`RecordingSinkFactory`] captures what a crop export writes.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use framecut::{
    CancellationToken, CompletionCallback, ComputeDevice, DeviceProvider, FrameSink, FrameSource,
    FramecutError, JobOutcome, ProgressCallback, ProgressInfo, SinkFactory, SinkSpec,
    VideoMetadata,
};
use image::{Rgb, RgbImage};

/// Pixel `(x, y)` of frame `index` is `[x, y, index]`, each modulo 256.
pub fn synthetic_frame(width: u32, height: u32, index: u64) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, index as u8]))
}

/// An in-memory [`FrameSource`].
pub struct SyntheticSource {
    metadata: VideoMetadata,
    position: u64,
    available: u64,
    fail_at: Option<u64>,
    panic_at: Option<u64>,
    closed: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frames_per_second: f64, frame_count: u64) -> Self {
        Self {
            metadata: VideoMetadata {
                width,
                height,
                frames_per_second,
                frame_count,
                duration: Duration::from_secs_f64(if frames_per_second > 0.0 {
                    frame_count as f64 / frames_per_second
                } else {
                    0.0
                }),
                codec: "synthetic".to_string(),
            },
            position: 0,
            available: frame_count,
            fail_at: None,
            panic_at: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Only `available` frames can actually be decoded.
    pub fn truncated(mut self, available: u64) -> Self {
        self.available = available;
        self
    }

    /// Reading frame `index` returns a decode error.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Reading frame `index` panics.
    pub fn panicking_at(mut self, index: u64) -> Self {
        self.panic_at = Some(index);
        self
    }

    /// Flag set once the source has been closed.
    pub fn close_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl FrameSource for SyntheticSource {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, FramecutError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FramecutError::SourceClosed);
        }
        if self.panic_at == Some(self.position) {
            panic!("synthetic decoder crashed at frame {}", self.position);
        }
        if self.fail_at == Some(self.position) {
            return Err(FramecutError::VideoDecodeError(format!(
                "corrupt frame {}",
                self.position
            )));
        }
        if self.position >= self.available {
            return Ok(None);
        }
        let frame = synthetic_frame(self.metadata.width, self.metadata.height, self.position);
        self.position += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), FramecutError> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every frame written and touches the output file so its removal
/// can be observed.
#[derive(Clone, Default)]
pub struct RecordingSinkFactory {
    pub frames: Arc<Mutex<Vec<RgbImage>>>,
    pub specs: Arc<Mutex<Vec<SinkSpec>>>,
    pub finished: Arc<AtomicBool>,
    pub fail_create: bool,
}

impl RecordingSinkFactory {
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<RgbImage> {
        self.frames.lock().unwrap().clone()
    }

    pub fn spec(&self) -> Option<SinkSpec> {
        self.specs.lock().unwrap().last().cloned()
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn create(&self, path: &Path, spec: &SinkSpec) -> Result<Box<dyn FrameSink>, FramecutError> {
        if self.fail_create {
            // Leave a stub behind to check that failed jobs clean up.
            fs::write(path, b"stub")?;
            return Err(FramecutError::VideoEncodeError(
                "encoder unavailable".to_string(),
            ));
        }
        fs::write(path, b"")?;
        self.specs.lock().unwrap().push(spec.clone());
        Ok(Box::new(RecordingSink {
            path: path.to_path_buf(),
            frames: Arc::clone(&self.frames),
            finished: Arc::clone(&self.finished),
        }))
    }
}

struct RecordingSink {
    path: PathBuf,
    frames: Arc<Mutex<Vec<RgbImage>>>,
    finished: Arc<AtomicBool>,
}

impl FrameSink for RecordingSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), FramecutError> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), FramecutError> {
        fs::write(&self.path, b"done")?;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records progress updates and outcomes.
#[derive(Default)]
pub struct Recorder {
    pub progress: Mutex<Vec<(u64, u64, String)>>,
    pub outcomes: Mutex<Vec<JobOutcome>>,
}

impl Recorder {
    pub fn currents(&self) -> Vec<u64> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .map(|(current, _, _)| *current)
            .collect()
    }

    pub fn last_progress(&self) -> Option<(u64, u64, String)> {
        self.progress.lock().unwrap().last().cloned()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl ProgressCallback for Recorder {
    fn on_progress(&self, info: &ProgressInfo) {
        self.progress
            .lock()
            .unwrap()
            .push((info.current, info.total, info.status.clone()));
    }
}

impl CompletionCallback for Recorder {
    fn on_complete(&self, outcome: &JobOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

/// Cancels `token` once `at` frames have been processed.
pub struct CancelAt {
    pub token: CancellationToken,
    pub at: u64,
}

impl ProgressCallback for CancelAt {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.current >= self.at {
            self.token.cancel();
        }
    }
}

/// Blocks the worker on its first progress update until released.
pub struct Gate {
    receiver: Mutex<mpsc::Receiver<()>>,
}

impl Gate {
    /// Returns the gate and the sender whose drop releases it.
    pub fn new() -> (Arc<Self>, mpsc::Sender<()>) {
        let (sender, receiver) = mpsc::channel();
        (
            Arc::new(Self {
                receiver: Mutex::new(receiver),
            }),
            sender,
        )
    }
}

impl ProgressCallback for Gate {
    fn on_progress(&self, _info: &ProgressInfo) {
        let _ = self.receiver.lock().unwrap().recv();
    }
}

/// What a fake device does with each frame.
#[derive(Clone, Copy)]
pub enum DeviceBehaviour {
    /// Returns the frame unchanged.
    Faithful,
    /// Every round trip fails.
    Failing,
    /// Flips one byte.
    Corrupting,
    /// Returns a frame of a different size.
    Resizing,
}

pub struct FakeDevice {
    behaviour: DeviceBehaviour,
    releases: Arc<AtomicUsize>,
    round_trips: Arc<AtomicUsize>,
}

impl ComputeDevice for FakeDevice {
    fn name(&self) -> &str {
        "fake"
    }

    fn round_trip(&mut self, frame: &RgbImage) -> Result<RgbImage, FramecutError> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            DeviceBehaviour::Faithful => Ok(frame.clone()),
            DeviceBehaviour::Failing => Err(FramecutError::AcceleratorError(
                "device lost".to_string(),
            )),
            DeviceBehaviour::Corrupting => {
                let mut altered = frame.clone();
                if let Some(pixel) = altered.pixels_mut().next() {
                    pixel.0[0] = pixel.0[0].wrapping_add(1);
                }
                Ok(altered)
            }
            DeviceBehaviour::Resizing => Ok(RgbImage::new(frame.width() + 2, frame.height())),
        }
    }

    fn release_memory(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens [`FakeDevice`]s and counts what they do.
pub struct FakeProvider {
    pub behaviour: DeviceBehaviour,
    pub unavailable: bool,
    pub releases: Arc<AtomicUsize>,
    pub round_trips: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(behaviour: DeviceBehaviour) -> Self {
        Self {
            behaviour,
            unavailable: false,
            releases: Arc::new(AtomicUsize::new(0)),
            round_trips: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(DeviceBehaviour::Faithful)
        }
    }

    pub fn device(&self) -> FakeDevice {
        FakeDevice {
            behaviour: self.behaviour,
            releases: Arc::clone(&self.releases),
            round_trips: Arc::clone(&self.round_trips),
        }
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for FakeProvider {
    fn open_device(&self) -> Result<Box<dyn ComputeDevice>, FramecutError> {
        if self.unavailable {
            return Err(FramecutError::AcceleratorError(
                "no device present".to_string(),
            ));
        }
        Ok(Box::new(self.device()))
    }
}

/// Path of the FFmpeg fixture video, if it has been generated.
pub fn sample_video() -> Option<&'static Path> {
    let path = Path::new("tests/fixtures/sample_video.mp4");
    path.exists().then_some(path)
}
