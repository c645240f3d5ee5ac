//! Export pipeline integration tests.
//!
//! These run against the in-memory source and sink in `common`, so they do
//! not need fixture videos.

mod common;

use std::path::Path;
use std::sync::Arc;

use framecut::{
    CancellationToken, CropExportSettings, CropRegion, ErrorKind, ExportOptions, ExportPipeline,
    FramecutError, JobOutcome, JobState, SamplingPolicy,
};

use common::{
    CancelAt, DeviceBehaviour, FakeProvider, Gate, Recorder, RecordingSinkFactory,
    SyntheticSource, synthetic_frame,
};

fn image_files(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn crop_options(factory: &RecordingSinkFactory) -> ExportOptions {
    ExportOptions::new().with_sink_factory(Arc::new(factory.clone()))
}

// ── Frame extraction ───────────────────────────────────────────────

#[test]
fn interval_extraction_writes_numbered_images() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("clip");
    let recorder = Arc::new(Recorder::default());

    let mut pipeline = ExportPipeline::new(
        ExportOptions::new()
            .with_progress(recorder.clone())
            .with_completion(recorder.clone()),
    );
    pipeline
        .start_frame_extraction(
            SyntheticSource::new(16, 8, 30.0, 301),
            SamplingPolicy::Interval(2.0),
            &output,
            "clip",
        )
        .unwrap();

    let outcome = pipeline.wait();
    assert_eq!(outcome, Some(JobOutcome::Completed { processed: 6 }));

    let expected: Vec<String> = (1..=6).map(|n| format!("clip_{n:06}.png")).collect();
    assert_eq!(image_files(&output), expected);

    // The second image is source frame 60.
    let second = image::open(output.join("clip_000002.png")).unwrap().to_rgb8();
    assert_eq!(second, synthetic_frame(16, 8, 60));

    let (current, total, status) = recorder.last_progress().unwrap();
    assert_eq!((current, total), (6, 6));
    assert!(status.contains("(6/6)"), "{status}");
    assert_eq!(recorder.outcomes(), vec![JobOutcome::Completed { processed: 6 }]);
}

#[test]
fn extracting_all_frames_writes_every_frame() {
    let directory = tempfile::tempdir().unwrap();
    let mut pipeline = ExportPipeline::default();
    pipeline
        .start_frame_extraction(
            SyntheticSource::new(4, 4, 25.0, 5),
            SamplingPolicy::All,
            directory.path(),
            "all",
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 5 }));
    assert_eq!(image_files(directory.path()).len(), 5);
}

#[test]
fn extraction_with_jpeg_format_uses_jpg_extension() {
    let directory = tempfile::tempdir().unwrap();
    let mut pipeline =
        ExportPipeline::new(ExportOptions::new().with_image_format(image::ImageFormat::Jpeg));
    pipeline
        .start_frame_extraction(
            SyntheticSource::new(8, 8, 10.0, 2),
            SamplingPolicy::All,
            directory.path(),
            "still",
        )
        .unwrap();

    pipeline.wait();
    assert_eq!(
        image_files(directory.path()),
        vec!["still_000001.jpg", "still_000002.jpg"]
    );
}

#[test]
fn batch_size_throttles_progress_and_reports_the_final_count_once() {
    let directory = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut pipeline = ExportPipeline::new(
        ExportOptions::new()
            .with_progress(recorder.clone())
            .with_batch_size(3),
    );
    pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 7),
            SamplingPolicy::All,
            directory.path(),
            "batch",
        )
        .unwrap();
    pipeline.wait();

    assert_eq!(recorder.currents(), vec![3, 6, 7]);
}

#[test]
fn empty_selection_completes_with_zero() {
    let directory = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let mut pipeline = ExportPipeline::new(
        ExportOptions::new()
            .with_progress(recorder.clone())
            .with_completion(recorder.clone()),
    );
    pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 0),
            SamplingPolicy::All,
            directory.path(),
            "empty",
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 0 }));
    assert!(image_files(directory.path()).is_empty());
    assert_eq!(recorder.currents(), vec![0]);
    assert_eq!(recorder.outcomes().len(), 1);
}

#[test]
fn read_failure_mid_stream_counts_as_end_of_stream() {
    let directory = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(2, 2, 10.0, 10).failing_at(3);
    let closed = source.close_flag();

    let mut pipeline = ExportPipeline::default();
    pipeline
        .start_frame_extraction(source, SamplingPolicy::All, directory.path(), "broken")
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 3 }));
    assert_eq!(image_files(directory.path()).len(), 3);
    assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn cancelled_extraction_keeps_written_images() {
    let directory = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let mut pipeline = ExportPipeline::new(
        ExportOptions::new()
            .with_cancellation(token.clone())
            .with_progress(Arc::new(CancelAt {
                token: token.clone(),
                at: 4,
            })),
    );
    pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 50),
            SamplingPolicy::All,
            directory.path(),
            "partial",
        )
        .unwrap();

    let outcome = pipeline.wait().unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled { processed: 4 });
    assert_eq!(image_files(directory.path()).len(), 4);
}

#[test]
fn interval_on_stream_without_frames_is_rejected() {
    let directory = tempfile::tempdir().unwrap();
    let mut pipeline = ExportPipeline::default();
    let error = pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 30.0, 0),
            SamplingPolicy::Interval(1.0),
            directory.path(),
            "none",
        )
        .unwrap_err();

    assert!(matches!(error, FramecutError::InvalidStreamParameters { .. }));
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(pipeline.state(), JobState::Idle);
}

// ── Crop export ────────────────────────────────────────────────────

#[test]
fn odd_crop_is_rounded_down_to_even() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("framed_clip.mp4");
    let factory = RecordingSinkFactory::default();

    let mut pipeline = ExportPipeline::new(crop_options(&factory));
    pipeline
        .start_crop_export(
            SyntheticSource::new(200, 100, 24.0, 10),
            CropRegion::new(10, 10, 101, 50),
            CropExportSettings::new(),
            &output,
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 10 }));

    let spec = factory.spec().unwrap();
    assert_eq!((spec.width, spec.height), (100, 50));
    assert_eq!(spec.frames_per_second, 24.0);
    assert_eq!(spec.quality, 23);

    let frames = factory.frames();
    assert_eq!(frames.len(), 10);
    assert!(frames.iter().all(|frame| frame.dimensions() == (100, 50)));
    assert_eq!(frames[7].get_pixel(0, 0).0, [10, 10, 7]);
    assert!(output.exists());
}

#[test]
fn cancelled_crop_export_removes_its_output() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("framed_long.mp4");
    let factory = RecordingSinkFactory::default();
    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder::default());

    let mut pipeline = ExportPipeline::new(
        crop_options(&factory)
            .with_cancellation(token.clone())
            .with_progress(Arc::new(CancelAt {
                token: token.clone(),
                at: 10,
            }))
            .with_completion(recorder.clone()),
    );
    pipeline
        .start_crop_export(
            SyntheticSource::new(32, 32, 30.0, 100),
            CropRegion::new(0, 0, 16, 16),
            CropExportSettings::new(),
            &output,
        )
        .unwrap();

    let outcome = pipeline.wait().unwrap();
    let JobOutcome::Cancelled { processed } = outcome else {
        panic!("expected a cancelled outcome, got {outcome:?}");
    };
    assert!((10..=11).contains(&processed), "processed {processed}");
    assert!(!output.exists());
    assert_eq!(recorder.outcomes().len(), 1);
}

#[test]
fn failing_accelerator_produces_the_same_output_as_none() {
    let directory = tempfile::tempdir().unwrap();
    let region = CropRegion::new(4, 2, 20, 10);

    let plain = RecordingSinkFactory::default();
    let mut pipeline = ExportPipeline::new(crop_options(&plain));
    pipeline
        .start_crop_export(
            SyntheticSource::new(40, 20, 30.0, 12),
            region,
            CropExportSettings::new(),
            directory.path().join("plain.mp4"),
        )
        .unwrap();
    pipeline.wait();

    for behaviour in [
        DeviceBehaviour::Failing,
        DeviceBehaviour::Corrupting,
        DeviceBehaviour::Resizing,
    ] {
        let accelerated = RecordingSinkFactory::default();
        let provider = Arc::new(FakeProvider::new(behaviour));
        let mut pipeline =
            ExportPipeline::new(crop_options(&accelerated).with_accelerator(provider.clone()));
        pipeline
            .start_crop_export(
                SyntheticSource::new(40, 20, 30.0, 12),
                region,
                CropExportSettings::new(),
                directory.path().join("accelerated.mp4"),
            )
            .unwrap();

        assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 12 }));
        assert_eq!(provider.round_trips(), 12);
        assert_eq!(accelerated.frames(), plain.frames());
    }
}

#[test]
fn unavailable_accelerator_runs_unaccelerated() {
    let directory = tempfile::tempdir().unwrap();
    let factory = RecordingSinkFactory::default();
    let recorder = Arc::new(Recorder::default());
    let mut pipeline = ExportPipeline::new(
        crop_options(&factory)
            .with_accelerator(Arc::new(FakeProvider::unavailable()))
            .with_progress(recorder.clone()),
    );
    pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 3),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            directory.path().join("out.mp4"),
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 3 }));
    let (_, _, status) = recorder.last_progress().unwrap();
    assert!(!status.contains("accelerated"), "{status}");
}

#[test]
fn device_memory_is_released_periodically_and_at_both_ends() {
    let directory = tempfile::tempdir().unwrap();
    let factory = RecordingSinkFactory::default();
    let provider = Arc::new(FakeProvider::new(DeviceBehaviour::Faithful));
    let recorder = Arc::new(Recorder::default());

    let mut pipeline = ExportPipeline::new(
        crop_options(&factory)
            .with_accelerator(provider.clone())
            .with_release_interval(10)
            .with_progress(recorder.clone()),
    );
    pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 25),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            directory.path().join("out.mp4"),
        )
        .unwrap();
    pipeline.wait();

    // Start, after frames 10 and 20, and end.
    assert_eq!(provider.releases(), 4);
    let (_, _, status) = recorder.last_progress().unwrap();
    assert!(status.contains("accelerated"), "{status}");
}

#[test]
fn sink_creation_failure_fails_the_job_and_cleans_up() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("framed.mp4");
    let factory = RecordingSinkFactory::failing();
    let recorder = Arc::new(Recorder::default());

    let mut pipeline =
        ExportPipeline::new(crop_options(&factory).with_completion(recorder.clone()));
    pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 5),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            &output,
        )
        .unwrap();

    let outcome = pipeline.wait().unwrap();
    assert!(
        matches!(&outcome, JobOutcome::Failed { kind: ErrorKind::Encode, message } if message.contains("encoder unavailable")),
        "{outcome:?}"
    );
    assert!(!output.exists());
    assert_eq!(recorder.outcomes(), vec![outcome]);
}

#[test]
fn truncated_stream_completes_with_what_was_read() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("short.mp4");
    let factory = RecordingSinkFactory::default();

    let mut pipeline = ExportPipeline::new(crop_options(&factory));
    pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 10).truncated(5),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            &output,
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 5 }));
    assert!(output.exists());
    assert!(factory.finished.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn crop_export_stops_at_the_reported_frame_count() {
    let directory = tempfile::tempdir().unwrap();
    let factory = RecordingSinkFactory::default();
    let recorder = Arc::new(Recorder::default());

    // The decoder yields more frames than the container advertised.
    let mut pipeline =
        ExportPipeline::new(crop_options(&factory).with_progress(recorder.clone()));
    pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 5).truncated(8),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            directory.path().join("bounded.mp4"),
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 5 }));
    assert_eq!(factory.frames().len(), 5);
    assert_eq!(recorder.currents(), vec![1, 2, 3, 4, 5]);
    let (current, total, _) = recorder.last_progress().unwrap();
    assert_eq!((current, total), (5, 5));
}

#[test]
fn crop_of_empty_stream_completes_without_output() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("nothing.mp4");
    let factory = RecordingSinkFactory::default();

    let mut pipeline = ExportPipeline::new(crop_options(&factory));
    pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 0),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            &output,
        )
        .unwrap();

    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 0 }));
    assert!(!output.exists());
}

#[test]
fn invalid_crop_parameters_are_rejected_before_starting() {
    let directory = tempfile::tempdir().unwrap();
    let output = directory.path().join("never.mp4");
    let mut pipeline = ExportPipeline::default();

    let cases = [
        (CropRegion::new(90, 0, 20, 10), CropExportSettings::new()),
        (CropRegion::new(0, 0, 0, 10), CropExportSettings::new()),
        (CropRegion::new(0, 0, 1, 1), CropExportSettings::new()),
        (
            CropRegion::full_frame(100, 50),
            CropExportSettings::new().with_quality(52),
        ),
    ];
    for (region, settings) in cases {
        let error = pipeline
            .start_crop_export(
                SyntheticSource::new(100, 50, 30.0, 5),
                region,
                settings,
                &output,
            )
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration, "{region}: {error}");
    }

    assert_eq!(pipeline.state(), JobState::Idle);
    assert!(!output.exists());
}

// ── Job lifecycle ──────────────────────────────────────────────────

#[test]
fn second_job_is_refused_while_one_runs() {
    let directory = tempfile::tempdir().unwrap();
    let (gate, release) = Gate::new();

    let mut pipeline = ExportPipeline::new(ExportOptions::new().with_progress(gate));
    let handle = pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 3),
            SamplingPolicy::All,
            directory.path(),
            "first",
        )
        .unwrap();

    assert_eq!(pipeline.state(), JobState::Running);
    let error = pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 3),
            SamplingPolicy::All,
            directory.path(),
            "second",
        )
        .unwrap_err();
    assert!(matches!(error, FramecutError::JobAlreadyRunning));
    assert_eq!(error.kind(), ErrorKind::Busy);

    drop(release);
    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 3 }));
    assert_eq!(pipeline.state(), JobState::Idle);
    assert_eq!(handle.state(), JobState::Completed);
    assert_eq!(handle.processed(), 3);
}

#[test]
fn pipeline_accepts_a_new_job_after_the_previous_one_finished() {
    let directory = tempfile::tempdir().unwrap();
    let mut pipeline = ExportPipeline::default();

    let first = pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 2),
            SamplingPolicy::All,
            directory.path().join("a"),
            "a",
        )
        .unwrap();
    while !first.is_finished() {
        std::thread::yield_now();
    }

    pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 2),
            SamplingPolicy::All,
            directory.path().join("b"),
            "b",
        )
        .unwrap();
    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 2 }));
    assert_eq!(first.outcome(), Some(JobOutcome::Completed { processed: 2 }));
    assert_eq!(pipeline.wait(), None);
}

#[test]
fn worker_panic_becomes_an_internal_failure_and_releases_the_source() {
    let directory = tempfile::tempdir().unwrap();
    let source = SyntheticSource::new(2, 2, 10.0, 10).panicking_at(2);
    let closed = source.close_flag();
    let recorder = Arc::new(Recorder::default());

    let mut pipeline = ExportPipeline::new(ExportOptions::new().with_completion(recorder.clone()));
    pipeline
        .start_frame_extraction(source, SamplingPolicy::All, directory.path(), "crash")
        .unwrap();

    let outcome = pipeline.wait().unwrap();
    assert!(
        matches!(&outcome, JobOutcome::Failed { kind: ErrorKind::Internal, message } if message.contains("crashed")),
        "{outcome:?}"
    );
    assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(recorder.outcomes().len(), 1);
}

#[test]
fn handle_cancel_stops_the_job() {
    let directory = tempfile::tempdir().unwrap();
    let factory = RecordingSinkFactory::default();
    let (gate, release) = Gate::new();

    let mut pipeline = ExportPipeline::new(crop_options(&factory).with_progress(gate));
    let handle = pipeline
        .start_crop_export(
            SyntheticSource::new(8, 8, 30.0, 50),
            CropRegion::full_frame(8, 8),
            CropExportSettings::new(),
            directory.path().join("cancelled.mp4"),
        )
        .unwrap();

    // The worker is parked in the gate after its first frame.
    while handle.processed() < 1 {
        std::thread::yield_now();
    }
    handle.cancel();
    drop(release);

    let outcome = pipeline.wait().unwrap();
    assert_eq!(outcome.state(), JobState::Cancelled);
    assert_eq!(outcome.processed(), Some(1));
}

#[test]
fn cancelling_one_job_does_not_cancel_the_next() {
    let directory = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let (gate, release) = Gate::new();

    let mut pipeline = ExportPipeline::new(
        ExportOptions::new()
            .with_cancellation(token.clone())
            .with_progress(gate),
    );
    let first = pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 50),
            SamplingPolicy::All,
            directory.path().join("first"),
            "first",
        )
        .unwrap();
    while first.processed() < 1 {
        std::thread::yield_now();
    }
    pipeline.cancel();
    drop(release);

    assert_eq!(pipeline.wait(), Some(JobOutcome::Cancelled { processed: 1 }));
    assert!(!token.is_cancelled());

    pipeline
        .start_frame_extraction(
            SyntheticSource::new(2, 2, 10.0, 4),
            SamplingPolicy::All,
            directory.path().join("second"),
            "second",
        )
        .unwrap();
    assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 4 }));
}

#[test]
fn cancelling_the_configured_token_stops_later_jobs_too() {
    let directory = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let mut pipeline = ExportPipeline::new(ExportOptions::new().with_cancellation(token.clone()));

    for name in ["a", "b"] {
        token.cancel();
        pipeline
            .start_frame_extraction(
                SyntheticSource::new(2, 2, 10.0, 4),
                SamplingPolicy::All,
                directory.path().join(name),
                name,
            )
            .unwrap();
        assert_eq!(pipeline.wait(), Some(JobOutcome::Cancelled { processed: 0 }));
    }
}
