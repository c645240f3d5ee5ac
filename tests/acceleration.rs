//! Accelerated frame processing tests.

mod common;

use framecut::{AcceleratedProcessor, DEFAULT_RELEASE_INTERVAL, FrameProcessor, Passthrough};

use common::{DeviceBehaviour, FakeProvider, synthetic_frame};

fn run(processor: &mut dyn FrameProcessor, frames: u64) -> Vec<image::RgbImage> {
    processor.begin();
    let output = (0..frames)
        .map(|index| processor.process_frame(synthetic_frame(12, 6, index)))
        .collect();
    processor.release();
    output
}

#[test]
fn faithful_device_returns_identical_frames() {
    let provider = FakeProvider::new(DeviceBehaviour::Faithful);
    let mut processor = AcceleratedProcessor::new(Box::new(provider.device()), 10);

    let output = run(&mut processor, 3);
    assert_eq!(output, run(&mut Passthrough, 3));
    assert!(processor.is_accelerated());
    assert_eq!(processor.fallback_count(), 0);
    assert_eq!(processor.processed(), 3);
}

#[test]
fn every_misbehaving_device_falls_back_to_the_input() {
    for behaviour in [
        DeviceBehaviour::Failing,
        DeviceBehaviour::Corrupting,
        DeviceBehaviour::Resizing,
    ] {
        let provider = FakeProvider::new(behaviour);
        let mut processor = AcceleratedProcessor::new(Box::new(provider.device()), 10);

        let output = run(&mut processor, 4);
        assert_eq!(output, run(&mut Passthrough, 4));
        assert_eq!(processor.fallback_count(), 4);
        assert_eq!(provider.round_trips(), 4);
    }
}

#[test]
fn memory_is_released_at_begin_every_interval_and_release() {
    let provider = FakeProvider::new(DeviceBehaviour::Faithful);
    let mut processor = AcceleratedProcessor::new(Box::new(provider.device()), 3);

    processor.begin();
    assert_eq!(provider.releases(), 1);
    for index in 0..7 {
        processor.process_frame(synthetic_frame(2, 2, index));
    }
    // After frames 3 and 6.
    assert_eq!(provider.releases(), 3);
    processor.release();
    assert_eq!(provider.releases(), 4);
}

#[test]
fn zero_release_interval_releases_after_every_frame() {
    let provider = FakeProvider::new(DeviceBehaviour::Faithful);
    let mut processor = AcceleratedProcessor::new(Box::new(provider.device()), 0);

    for index in 0..4 {
        processor.process_frame(synthetic_frame(2, 2, index));
    }
    assert_eq!(provider.releases(), 4);
}

#[test]
fn default_release_interval_is_ten_frames() {
    assert_eq!(DEFAULT_RELEASE_INTERVAL, 10);
}

#[test]
fn passthrough_is_not_accelerated() {
    let mut passthrough = Passthrough;
    assert!(!passthrough.is_accelerated());
    assert_eq!(passthrough.fallback_count(), 0);
    let frame = synthetic_frame(3, 3, 9);
    assert_eq!(passthrough.process_frame(frame.clone()), frame);
}
