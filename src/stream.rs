//! Async integration.
//!
//! With the `async` feature enabled this module provides
//! [`ExportPipeline::wait_async`], which joins the worker on Tokio's blocking
//! pool, and [`ProgressStream`], which forwards job events into an async
//! [`Stream`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tokio_stream::StreamExt;
//!
//! use framecut::{
//!     ExportOptions, ExportPipeline, FramecutError, JobEvent, ProgressStream, SamplingPolicy,
//!     VideoFile,
//! };
//!
//! # async fn example() -> Result<(), FramecutError> {
//! let (forwarder, mut events) = ProgressStream::channel();
//! let options = ExportOptions::new()
//!     .with_progress(forwarder.clone())
//!     .with_completion(forwarder);
//!
//! let mut pipeline = ExportPipeline::new(options);
//! pipeline.start_frame_extraction(VideoFile::open("input.mp4")?, SamplingPolicy::All, "out", "input")?;
//!
//! while let Some(event) = events.next().await {
//!     if let JobEvent::Progress(info) = event {
//!         println!("{}", info.status);
//!     }
//! }
//! let outcome = pipeline.wait_async().await;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_stream::Stream;

use crate::job::JobOutcome;
use crate::pipeline::ExportPipeline;
use crate::progress::{CompletionCallback, ProgressCallback, ProgressInfo};

/// One notification from a running job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A progress snapshot.
    Progress(ProgressInfo),
    /// The terminal outcome. Always the last event of a job.
    Finished(JobOutcome),
}

/// Callback half of a [`ProgressStream`]; install it as both the progress
/// and the completion callback.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    sender: UnboundedSender<JobEvent>,
}

impl ProgressCallback for EventForwarder {
    fn on_progress(&self, info: &ProgressInfo) {
        // The receiver may have been dropped; the job carries on regardless.
        let _ = self.sender.send(JobEvent::Progress(info.clone()));
    }
}

impl CompletionCallback for EventForwarder {
    fn on_complete(&self, outcome: &JobOutcome) {
        let _ = self.sender.send(JobEvent::Finished(outcome.clone()));
    }
}

/// A stream of [`JobEvent`]s for one job.
///
/// Implements [`tokio_stream::Stream`]. The stream ends after yielding
/// [`JobEvent::Finished`], or when every forwarder has been dropped.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: UnboundedReceiver<JobEvent>,
    finished: bool,
}

impl ProgressStream {
    /// Create a connected forwarder and stream.
    pub fn channel() -> (Arc<EventForwarder>, ProgressStream) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (
            Arc::new(EventForwarder { sender }),
            ProgressStream {
                receiver,
                finished: false,
            },
        )
    }
}

impl Stream for ProgressStream {
    type Item = JobEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = self.receiver.poll_recv(cx);
        if let Poll::Ready(Some(JobEvent::Finished(_))) = &polled {
            self.finished = true;
        }
        polled
    }
}

impl ExportPipeline {
    /// Wait for the current job without blocking the async runtime, and
    /// return to idle.
    ///
    /// Returns `None` if no job was started since the last wait.
    pub async fn wait_async(&mut self) -> Option<JobOutcome> {
        let (worker, handle) = self.take_job()?;
        match tokio::task::spawn_blocking(move || worker.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => log::error!("Export worker panicked after recording its outcome"),
            Err(error) => log::error!("Could not join export worker: {error}"),
        }
        handle.outcome()
    }
}
