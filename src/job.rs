//! Job state and outcomes.
//!
//! Every export runs as a job on a worker thread. The worker and any number
//! of [`JobHandle`]s share one status record: lock-free counters for
//! progress and a write-once slot for the terminal [`JobOutcome`].

use std::fmt;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, AtomicU64, Ordering},
};

use crate::error::{ErrorKind, FramecutError};
use crate::progress::{CancellationToken, OperationType};

/// Lifecycle of an export job.
///
/// `Idle -> Running -> {Completed, Cancelled, Failed}`; a pipeline returns
/// to `Idle` once the finished job has been collected with
/// [`wait`](crate::ExportPipeline::wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobState {
    /// No job, or the last one has been collected.
    Idle = 0,
    /// The worker is processing frames.
    Running = 1,
    /// Every frame was processed.
    Completed = 2,
    /// Stopped by a cancellation request.
    Cancelled = 3,
    /// Stopped by an error.
    Failed = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => JobState::Running,
            2 => JobState::Completed,
            3 => JobState::Cancelled,
            4 => JobState::Failed,
            _ => JobState::Idle,
        }
    }

    /// Returns `true` for the three terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// The terminal result of a job, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran to the end.
    Completed {
        /// Frames written.
        processed: u64,
    },
    /// The job observed a cancellation request and stopped.
    Cancelled {
        /// Frames written before stopping.
        processed: u64,
    },
    /// The job stopped on an error.
    Failed {
        /// Coarse error classification.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

impl JobOutcome {
    pub(crate) fn from_error(error: &FramecutError) -> Self {
        JobOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// The terminal [`JobState`] this outcome corresponds to.
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed { .. } => JobState::Completed,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
            JobOutcome::Failed { .. } => JobState::Failed,
        }
    }

    /// Frames written, unless the job failed.
    pub fn processed(&self) -> Option<u64> {
        match self {
            JobOutcome::Completed { processed } | JobOutcome::Cancelled { processed } => {
                Some(*processed)
            }
            JobOutcome::Failed { .. } => None,
        }
    }

    /// Returns `true` for [`JobOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { processed } => write!(f, "completed ({processed} frames)"),
            JobOutcome::Cancelled { processed } => {
                write!(f, "cancelled after {processed} frames")
            }
            JobOutcome::Failed { kind, message } => write!(f, "failed [{kind}]: {message}"),
        }
    }
}

/// Status shared between a worker and its handles.
pub(crate) struct JobStatus {
    state: AtomicU8,
    processed: AtomicU64,
    total: AtomicU64,
    outcome: OnceLock<JobOutcome>,
}

impl JobStatus {
    pub(crate) fn new(total: u64) -> Self {
        Self {
            state: AtomicU8::new(JobState::Running as u8),
            processed: AtomicU64::new(0),
            total: AtomicU64::new(total),
            outcome: OnceLock::new(),
        }
    }

    pub(crate) fn set_processed(&self, processed: u64) {
        self.processed.store(processed, Ordering::Release);
    }

    /// Record the terminal outcome. Returns `false` if one was already set.
    pub(crate) fn finish(&self, outcome: JobOutcome) -> bool {
        let state = outcome.state();
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        self.state.store(state as u8, Ordering::Release);
        true
    }
}

/// A cheap, cloneable view of one job.
///
/// Handles stay valid after the job ends and keep reporting its outcome.
#[derive(Clone)]
pub struct JobHandle {
    status: Arc<JobStatus>,
    cancellation: CancellationToken,
    operation: OperationType,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("operation", &self.operation)
            .field("state", &self.state())
            .field("processed", &self.processed())
            .field("total", &self.total())
            .finish()
    }
}

impl JobHandle {
    pub(crate) fn new(
        status: Arc<JobStatus>,
        cancellation: CancellationToken,
        operation: OperationType,
    ) -> Self {
        Self {
            status,
            cancellation,
            operation,
        }
    }

    /// What the job does.
    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.status.state.load(Ordering::Acquire))
    }

    /// Frames processed so far.
    pub fn processed(&self) -> u64 {
        self.status.processed.load(Ordering::Acquire)
    }

    /// Frames the job expects to process.
    pub fn total(&self) -> u64 {
        self.status.total.load(Ordering::Acquire)
    }

    /// The terminal outcome, once the job has finished.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.status.outcome.get().cloned()
    }

    /// Returns `true` once a terminal outcome is recorded.
    pub fn is_finished(&self) -> bool {
        self.status.outcome.get().is_some()
    }

    /// Ask the job to stop at the next frame boundary.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}
