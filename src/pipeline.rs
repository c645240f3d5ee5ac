//! Background export jobs.
//!
//! [`ExportPipeline`] runs one job at a time on a dedicated worker thread:
//!
//! - **Frame extraction** decodes the source sequentially from frame 0 and
//!   saves the frames picked by a [`SamplingPolicy`] as numbered still images.
//! - **Crop export** decodes every frame, crops it, optionally passes it
//!   through a [`FrameProcessor`](crate::FrameProcessor) and streams it into
//!   a [`FrameSink`](crate::FrameSink).
//!
//! Parameters are validated before the worker starts, so configuration
//! errors come back from the `start_*` call. Everything after that is
//! reported once, as a [`JobOutcome`].

use std::any::Any;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use image::{ImageFormat, imageops};

use crate::acceleration::{self, FrameProcessor};
use crate::config::{CropExportSettings, ExportOptions, frame_file_name};
use crate::encode::SinkSpec;
use crate::error::FramecutError;
use crate::geometry::CropRegion;
use crate::job::{JobHandle, JobOutcome, JobState, JobStatus};
use crate::progress::{CancellationToken, OperationType, ProgressTracker};
use crate::selection::{FrameIndices, SamplingPolicy, compute_indices};
use crate::source::FrameSource;

/// Runs export jobs on a worker thread, one at a time.
///
/// # Example
///
/// ```no_run
/// use framecut::{
///     CropExportSettings, CropRegion, ExportOptions, ExportPipeline, FramecutError, VideoFile,
/// };
///
/// let source = VideoFile::open("input.mp4")?;
/// let mut pipeline = ExportPipeline::new(ExportOptions::new());
/// pipeline.start_crop_export(
///     source,
///     CropRegion::new(10, 10, 320, 240),
///     CropExportSettings::new(),
///     "framed_input.mp4",
/// )?;
/// println!("{:?}", pipeline.wait());
/// # Ok::<(), FramecutError>(())
/// ```
pub struct ExportPipeline {
    options: ExportOptions,
    current: Option<RunningJob>,
}

struct RunningJob {
    worker: JoinHandle<()>,
    handle: JobHandle,
}

impl std::fmt::Debug for ExportPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportPipeline")
            .field("options", &self.options)
            .field("job", &self.current.as_ref().map(|job| &job.handle))
            .finish()
    }
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self::new(ExportOptions::new())
    }
}

impl ExportPipeline {
    /// Create an idle pipeline.
    pub fn new(options: ExportOptions) -> Self {
        Self {
            options,
            current: None,
        }
    }

    /// The options every job is started with.
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// State of the current job, or [`JobState::Idle`] when there is none.
    pub fn state(&self) -> JobState {
        self.current
            .as_ref()
            .map_or(JobState::Idle, |job| job.handle.state())
    }

    /// Returns `true` while a job is running.
    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Handle to the current job, if any.
    pub fn handle(&self) -> Option<JobHandle> {
        self.current.as_ref().map(|job| job.handle.clone())
    }

    /// Ask the current job to stop at the next frame boundary.
    pub fn cancel(&self) {
        if let Some(job) = &self.current {
            job.handle.cancel();
        }
    }

    /// Block until the current job ends, and return to idle.
    ///
    /// Returns `None` if no job was started since the last wait.
    pub fn wait(&mut self) -> Option<JobOutcome> {
        let RunningJob { worker, handle } = self.current.take()?;
        if worker.join().is_err() {
            log::error!("Export worker panicked after recording its outcome");
        }
        handle.outcome()
    }

    /// Take the current job out of the pipeline without joining it.
    #[cfg(feature = "async")]
    pub(crate) fn take_job(&mut self) -> Option<(JoinHandle<()>, JobHandle)> {
        self.current
            .take()
            .map(|RunningJob { worker, handle }| (worker, handle))
    }

    /// Start saving the frames selected by `policy` into `output_dir` as
    /// `{stem}_{n:06}.{ext}`, numbered from 1.
    ///
    /// Images already written are kept if the job is cancelled or fails.
    ///
    /// # Errors
    ///
    /// - [`FramecutError::JobAlreadyRunning`] if a job is still running.
    /// - [`FramecutError::InvalidInterval`] or
    ///   [`FramecutError::InvalidStreamParameters`] for unusable sampling
    ///   parameters.
    /// - [`FramecutError::IoError`] if `output_dir` cannot be created or the
    ///   worker cannot be spawned.
    pub fn start_frame_extraction<S, P>(
        &mut self,
        source: S,
        policy: SamplingPolicy,
        output_dir: P,
        stem: &str,
    ) -> Result<JobHandle, FramecutError>
    where
        S: FrameSource + 'static,
        P: AsRef<Path>,
    {
        self.ensure_idle()?;

        let metadata = source.metadata();
        let indices = compute_indices(&policy, metadata.frame_count, metadata.frames_per_second)?;
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;

        log::info!(
            "Extracting {} of {} frames into {}",
            indices.len(),
            metadata.frame_count,
            output_dir.display()
        );

        let job = ExtractionJob {
            indices,
            output_dir,
            stem: stem.to_string(),
            format: self.options.image_format,
            extension: self.options.image_extension(),
        };
        let total = job.indices.len() as u64;
        let source = SourceGuard(Box::new(source));

        self.spawn(OperationType::FrameExtraction, total, move |progress, token| {
            job.run(source, progress, token)
        })
    }

    /// Start cropping every frame to `region` and encoding the result to
    /// `output_path`.
    ///
    /// The region's width and height are rounded down to even values first.
    /// The partial output is removed if the job is cancelled or fails.
    ///
    /// # Errors
    ///
    /// - [`FramecutError::JobAlreadyRunning`] if a job is still running.
    /// - [`FramecutError::InvalidCropRegion`] if the region is empty (also
    ///   after rounding) or exceeds the frame.
    /// - [`FramecutError::InvalidQuality`] if the quality exceeds 51.
    /// - [`FramecutError::IoError`] if the output directory cannot be created
    ///   or the worker cannot be spawned.
    pub fn start_crop_export<S, P>(
        &mut self,
        source: S,
        region: CropRegion,
        settings: CropExportSettings,
        output_path: P,
    ) -> Result<JobHandle, FramecutError>
    where
        S: FrameSource + 'static,
        P: AsRef<Path>,
    {
        self.ensure_idle()?;

        let metadata = source.metadata();
        region.validate(metadata.width, metadata.height)?;
        let adjusted = region.even_adjusted();
        if adjusted.is_empty() {
            return Err(FramecutError::InvalidCropRegion {
                region: region.to_string(),
                reason: "nothing left after rounding to even dimensions".to_string(),
            });
        }
        settings.validate()?;

        let output_path = output_path.as_ref().to_path_buf();
        if let Some(parent) = output_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if adjusted != region {
            log::debug!("Crop region {region} adjusted to {adjusted}");
        }
        log::info!(
            "Exporting {adjusted} crop of {} frames to {}",
            metadata.frame_count,
            output_path.display()
        );

        let job = CropJob {
            region: adjusted,
            spec: SinkSpec {
                width: adjusted.width,
                height: adjusted.height,
                frames_per_second: metadata.frames_per_second,
                codec: settings.codec,
                quality: settings.quality,
            },
            output_path,
            options: self.options.clone(),
        };
        let total = metadata.frame_count;
        let source = SourceGuard(Box::new(source));

        self.spawn(OperationType::CropExport, total, move |progress, token| {
            job.run(source, progress, token)
        })
    }

    fn ensure_idle(&mut self) -> Result<(), FramecutError> {
        if self.is_running() {
            return Err(FramecutError::JobAlreadyRunning);
        }
        // Collect a job that finished without being waited on.
        if self.current.is_some() {
            self.wait();
        }
        Ok(())
    }

    fn spawn<F>(
        &mut self,
        operation: OperationType,
        total: u64,
        work: F,
    ) -> Result<JobHandle, FramecutError>
    where
        F: FnOnce(&mut JobProgress, &CancellationToken) -> JobOutcome + Send + 'static,
    {
        let status = Arc::new(JobStatus::new(total));
        let token = self
            .options
            .cancellation
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child);
        let handle = JobHandle::new(Arc::clone(&status), token.clone(), operation);

        let tracker = ProgressTracker::new(
            Arc::clone(&self.options.progress),
            operation,
            total,
            self.options.batch_size,
        );
        let completion = Arc::clone(&self.options.completion);
        let worker_status = Arc::clone(&status);

        let thread_name = match operation {
            OperationType::FrameExtraction => "framecut-extract",
            OperationType::CropExport => "framecut-crop",
        };

        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let mut progress = JobProgress {
                    tracker,
                    status: Arc::clone(&worker_status),
                };

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut progress, &token)))
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        log::error!("Export worker panicked: {message}");
                        JobOutcome::from_error(&FramecutError::WorkerPanicked(message))
                    });

                progress.tracker.finish();
                log::info!("Job finished: {outcome}");

                if worker_status.finish(outcome.clone()) {
                    completion.on_complete(&outcome);
                }
            })?;

        self.current = Some(RunningJob {
            worker,
            handle: handle.clone(),
        });
        Ok(handle)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Progress reporting for a running job: callbacks plus handle counters.
struct JobProgress {
    tracker: ProgressTracker,
    status: Arc<JobStatus>,
}

impl JobProgress {
    fn processed(&self) -> u64 {
        self.tracker.current()
    }

    fn advance(&mut self) {
        self.status.set_processed(self.tracker.current() + 1);
        self.tracker.advance();
    }
}

/// Closes the source on every exit path, including unwinding.
struct SourceGuard(Box<dyn FrameSource>);

impl Deref for SourceGuard {
    type Target = dyn FrameSource;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for SourceGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Releases processor state on every exit path.
struct ProcessorGuard(Box<dyn FrameProcessor>);

impl Drop for ProcessorGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Deletes an output file unless the job completes.
struct PartialOutput {
    path: PathBuf,
    keep: bool,
}

impl PartialOutput {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.keep || !self.path.exists() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed partial output {}", self.path.display()),
            Err(error) => log::warn!(
                "Could not remove partial output {}: {error}",
                self.path.display()
            ),
        }
    }
}

/// Reads the next frame, treating read failures as the end of the stream.
fn read_next(source: &mut SourceGuard, index: u64) -> Option<image::RgbImage> {
    match source.next_frame() {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => None,
        Err(error) => {
            log::warn!("Stopping at frame {index}: {error}");
            None
        }
    }
}

struct ExtractionJob {
    indices: FrameIndices,
    output_dir: PathBuf,
    stem: String,
    format: ImageFormat,
    extension: &'static str,
}

impl ExtractionJob {
    fn run(
        self,
        mut source: SourceGuard,
        progress: &mut JobProgress,
        token: &CancellationToken,
    ) -> JobOutcome {
        let Some(last) = self.indices.last() else {
            return JobOutcome::Completed { processed: 0 };
        };

        let mut index = 0u64;
        loop {
            if token.is_cancelled() {
                log::info!("Frame extraction cancelled at frame {index}");
                return JobOutcome::Cancelled {
                    processed: progress.processed(),
                };
            }

            let Some(frame) = read_next(&mut source, index) else {
                log::warn!("Stream ended at frame {index}, before selected frame {last}");
                break;
            };

            if self.indices.contains(index) {
                let name = frame_file_name(&self.stem, progress.processed() + 1, self.extension);
                let path = self.output_dir.join(name);
                if let Err(error) = frame.save_with_format(&path, self.format) {
                    return JobOutcome::from_error(&FramecutError::from(error));
                }
                log::trace!("Saved frame {index} as {}", path.display());
                progress.advance();
            }

            if index >= last {
                break;
            }
            index += 1;
        }

        JobOutcome::Completed {
            processed: progress.processed(),
        }
    }
}

struct CropJob {
    region: CropRegion,
    spec: SinkSpec,
    output_path: PathBuf,
    options: ExportOptions,
}

impl CropJob {
    fn run(
        self,
        mut source: SourceGuard,
        progress: &mut JobProgress,
        token: &CancellationToken,
    ) -> JobOutcome {
        let total = source.metadata().frame_count;
        if total == 0 {
            return JobOutcome::Completed { processed: 0 };
        }

        // Dropped after the sink, so the file is closed before removal.
        let partial = PartialOutput::new(self.output_path.clone());
        let mut sink = match self.options.sink_factory.create(&self.output_path, &self.spec) {
            Ok(sink) => sink,
            Err(error) => return JobOutcome::from_error(&error),
        };

        let mut processor = ProcessorGuard(acceleration::select_processor(
            self.options.accelerator.as_ref(),
            self.options.release_interval,
        ));
        processor.0.begin();
        if processor.0.is_accelerated() {
            progress.tracker.set_note("accelerated");
        }

        let CropRegion {
            x,
            y,
            width,
            height,
        } = self.region;

        let mut index = 0u64;
        loop {
            if token.is_cancelled() {
                log::info!("Crop export cancelled at frame {index}");
                return JobOutcome::Cancelled {
                    processed: progress.processed(),
                };
            }
            // Estimated frame counts can undershoot what the decoder yields.
            if index >= total {
                break;
            }

            let Some(frame) = read_next(&mut source, index) else {
                break;
            };

            let cropped = imageops::crop_imm(&frame, x, y, width, height).to_image();
            let processed = processor.0.process_frame(cropped);
            if let Err(error) = sink.write_frame(&processed) {
                return JobOutcome::from_error(&error);
            }

            progress.advance();
            index += 1;
        }

        if index < total {
            log::warn!("Stream ended after {index} of {total} frames");
        }

        if let Err(error) = sink.finish() {
            return JobOutcome::from_error(&error);
        }
        partial.keep();

        JobOutcome::Completed {
            processed: progress.processed(),
        }
    }
}
