//! Hardware acceleration integration tests (feature = "hardware").
//!
//! Real devices cannot be relied on in CI because availability depends on
//! the host GPU and driver stack, so these tests only require that every
//! path ends in either a working device or a clean fallback.

#![cfg(feature = "hardware")]

mod common;

use std::sync::Arc;

use framecut::{
    CropExportSettings, CropRegion, DeviceProvider, ErrorKind, ExportOptions, ExportPipeline,
    HardwareAccelerationMode, HardwareDevice, HardwareDeviceProvider, HardwareDeviceType,
    JobOutcome, available_hardware_devices,
};

use common::{RecordingSinkFactory, SyntheticSource, synthetic_frame};

#[test]
fn enumerate_hw_devices_does_not_panic() {
    let devices = available_hardware_devices();
    println!("Detected HW devices: {devices:?}");

    for device in &devices {
        assert_eq!(device.name().parse::<HardwareDeviceType>(), Ok(*device));
    }
}

#[test]
fn mode_strings_parse() {
    assert_eq!(
        "AUTO".parse::<HardwareAccelerationMode>(),
        Ok(HardwareAccelerationMode::Auto)
    );
    assert_eq!(
        "off".parse::<HardwareAccelerationMode>(),
        Ok(HardwareAccelerationMode::Software)
    );
    assert_eq!(
        "vulkan".parse::<HardwareAccelerationMode>(),
        Ok(HardwareAccelerationMode::Specific(HardwareDeviceType::Vulkan))
    );
    assert!("gpu".parse::<HardwareAccelerationMode>().is_err());
}

#[test]
fn software_mode_refuses_to_open_a_device() {
    let provider = HardwareDeviceProvider::new(HardwareAccelerationMode::Software);
    let error = provider.open_device().err().unwrap();
    assert_eq!(error.kind(), ErrorKind::Accelerator);
}

#[test]
fn opened_devices_round_trip_losslessly() {
    for device_type in available_hardware_devices() {
        let Ok(mut device) = HardwareDevice::open(device_type) else {
            continue;
        };
        let frame = synthetic_frame(64, 32, 7);
        match framecut::ComputeDevice::round_trip(&mut device, &frame) {
            Ok(returned) => assert_eq!(returned, frame, "{device_type}"),
            Err(error) => println!("{device_type} round trip unsupported: {error}"),
        }
        framecut::ComputeDevice::release_memory(&mut device);
    }
}

#[test]
fn auto_mode_export_matches_an_unaccelerated_one() {
    let directory = tempfile::tempdir().unwrap();
    let region = CropRegion::new(2, 2, 32, 16);

    let export = |provider: Option<Arc<dyn DeviceProvider>>, name: &str| {
        let factory = RecordingSinkFactory::default();
        let mut options = ExportOptions::new().with_sink_factory(Arc::new(factory.clone()));
        if let Some(provider) = provider {
            options = options.with_accelerator(provider);
        }
        let mut pipeline = ExportPipeline::new(options);
        pipeline
            .start_crop_export(
                SyntheticSource::new(48, 24, 30.0, 6),
                region,
                CropExportSettings::new(),
                directory.path().join(name),
            )
            .unwrap();
        assert_eq!(pipeline.wait(), Some(JobOutcome::Completed { processed: 6 }));
        factory.frames()
    };

    let plain = export(None, "plain.mp4");
    let accelerated = export(
        Some(Arc::new(HardwareDeviceProvider::new(
            HardwareAccelerationMode::Auto,
        ))),
        "auto.mp4",
    );
    assert_eq!(plain, accelerated);
}
