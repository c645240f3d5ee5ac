//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring export progress,
//! [`CompletionCallback`] for the single terminal notification of a job,
//! [`CancellationToken`] for cooperative cancellation, and [`ProgressInfo`]
//! for detailed progress snapshots.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecut::{
//!     CancellationToken, ExportOptions, ExportPipeline, FramecutError, ProgressCallback,
//!     ProgressInfo, SamplingPolicy, VideoFile,
//! };
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{} ({}/{})", info.status, info.current, info.total);
//!     }
//! }
//!
//! let token = CancellationToken::new();
//! let options = ExportOptions::new()
//!     .with_progress(Arc::new(PrintProgress))
//!     .with_cancellation(token.clone());
//!
//! let source = VideoFile::open("input.mp4")?;
//! let mut pipeline = ExportPipeline::new(options);
//! pipeline.start_frame_extraction(source, SamplingPolicy::All, "frames", "input")?;
//! let outcome = pipeline.wait();
//! # Ok::<(), FramecutError>(())
//! ```

use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use crate::job::JobOutcome;

/// The kind of export currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Writing selected frames as still images.
    FrameExtraction,
    /// Cropping every frame and re-encoding the result.
    CropExport,
}

impl OperationType {
    pub(crate) fn verb(self) -> &'static str {
        match self {
            OperationType::FrameExtraction => "Extracting frames",
            OperationType::CropExport => "Exporting cropped video",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A snapshot of export progress.
///
/// Delivered to [`ProgressCallback::on_progress`] at a cadence controlled by
/// [`ExportOptions::with_batch_size`](crate::ExportOptions::with_batch_size).
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How many frames have been processed so far.
    pub current: u64,
    /// Total frames the job expects to process.
    pub total: u64,
    /// Completion percentage (0.0 – 100.0), if `total` is non-zero.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the job started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Human-readable status line, e.g. `"Extracting frames (3/6)"`.
    pub status: String,
}

/// Trait for receiving progress updates during an export.
///
/// Callbacks run on the worker thread, so implementations must be [`Send`]
/// and [`Sync`]. They observe but cannot halt the job; use
/// [`CancellationToken`] for that.
pub trait ProgressCallback: Send + Sync {
    /// Called after processed frames, and once more with the final count.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Trait for receiving the terminal outcome of a job.
///
/// Invoked exactly once per job, from the worker thread, after every
/// resource the job opened has been released.
pub trait CompletionCallback: Send + Sync {
    /// Called with the job's terminal outcome.
    fn on_complete(&self, outcome: &JobOutcome);
}

/// A no-op implementation that discards all notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

impl CompletionCallback for NoOpProgress {
    fn on_complete(&self, _outcome: &JobOutcome) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to request that the
/// associated job stop. The worker checks
/// [`is_cancelled`](CancellationToken::is_cancelled) once per frame, so the
/// frame in flight always completes first.
///
/// # Example
///
/// ```
/// use framecut::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: None,
        }
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    ///
    /// Cancelling the child leaves `self` untouched. Each job runs on a child
    /// of the configured token, so stopping one job does not stop the next.
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.is_cancelled())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks progress timing and emits callbacks.
///
/// Reports every `batch_size` frames; [`finish`](ProgressTracker::finish)
/// emits the terminal count unless that exact count was the last one
/// reported, so the final update is delivered once.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    label: String,
    total: u64,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    items_since_last_report: u64,
    last_reported: Option<u64>,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: u64,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            label: operation.verb().to_string(),
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            items_since_last_report: 0,
            last_reported: None,
        }
    }

    /// Append a note to the status label, e.g. which processing path is used.
    pub(crate) fn set_note(&mut self, note: &str) {
        self.label = format!("{} ({note})", self.operation.verb());
    }

    pub(crate) fn current(&self) -> u64 {
        self.current
    }

    /// Record one processed frame and fire the callback if the batch
    /// threshold is reached.
    pub(crate) fn advance(&mut self) {
        self.current += 1;
        self.items_since_last_report += 1;

        if self.items_since_last_report >= self.batch_size {
            self.report();
            self.items_since_last_report = 0;
        }
    }

    /// Emit the terminal count.
    pub(crate) fn finish(&mut self) {
        if self.last_reported != Some(self.current) {
            self.report();
        }
    }

    fn report(&mut self) {
        let elapsed = self.start_time.elapsed();

        let percentage = (self.total > 0)
            .then(|| (self.current as f32 / self.total as f32) * 100.0);

        let estimated_remaining = (self.current > 0).then(|| {
            let remaining = self.total.saturating_sub(self.current);
            Duration::from_secs_f64(
                elapsed.as_secs_f64() / self.current as f64 * remaining as f64,
            )
        });

        let info = ProgressInfo {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            status: format!("{}... ({}/{})", self.label, self.current, self.total),
        };

        self.last_reported = Some(self.current);
        self.callback.on_progress(&info);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    impl ProgressCallback for Recorder {
        fn on_progress(&self, info: &ProgressInfo) {
            self.seen.lock().unwrap().push(info.current);
        }
    }

    #[test]
    fn batch_size_throttles_and_final_count_is_reported_once() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(recorder.clone(), OperationType::CropExport, 7, 3);
        for _ in 0..7 {
            tracker.advance();
        }
        tracker.finish();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![3, 6, 7]);
    }

    #[test]
    fn finish_does_not_repeat_an_aligned_final_report() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(recorder.clone(), OperationType::FrameExtraction, 4, 2);
        for _ in 0..4 {
            tracker.advance();
        }
        tracker.finish();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![2, 4]);
    }

    #[derive(Default)]
    struct LastInfo {
        info: Mutex<Option<ProgressInfo>>,
    }

    impl ProgressCallback for LastInfo {
        fn on_progress(&self, info: &ProgressInfo) {
            *self.info.lock().unwrap() = Some(info.clone());
        }
    }

    #[test]
    fn estimate_survives_counts_beyond_u32() {
        let recorder = Arc::new(LastInfo::default());
        let current = u64::from(u32::MAX) + 1;
        let mut tracker =
            ProgressTracker::new(recorder.clone(), OperationType::CropExport, current * 2, 1);
        tracker.current = current - 1;
        tracker.start_time = Instant::now() - Duration::from_secs(8);
        tracker.advance();

        let info = recorder.info.lock().unwrap().clone().unwrap();
        assert_eq!(info.current, current);
        let remaining = info.estimated_remaining.unwrap().as_secs_f64();
        assert!((8.0..9.0).contains(&remaining), "{remaining}");
    }

    #[test]
    fn child_token_sees_parent_but_not_the_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let sibling = parent.child();
        assert!(!sibling.is_cancelled());
        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn empty_job_still_reports_zero() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(recorder.clone(), OperationType::FrameExtraction, 0, 1);
        tracker.finish();
        assert_eq!(*recorder.seen.lock().unwrap(), vec![0]);
    }
}
