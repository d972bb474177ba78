mod common;

use std::sync::{Arc, Mutex};

use common::{buffer, encoder, fail, initialize_device, instance_with, request_device, texture_2d};
use webgpu_core::{
    api::Noop,
    capabilities::RequestDeviceError,
    device::{DeviceError, QueueSubmitError},
    error::{Error, PopErrorScopeError},
    instance::Instance,
    resource::{BufferAccessError, MapState},
};

fn adapter(name: &str, device_type: wgt::DeviceType) -> hal::noop::AdapterConfig {
    hal::noop::AdapterConfig {
        name: name.to_string(),
        device_type,
        ..Default::default()
    }
}

fn request_adapter_name(instance: &Instance<Noop>, options: &wgt::RequestAdapterOptions) -> Option<String> {
    pollster::block_on(instance.request_adapter(options)).map(|adapter| adapter.get_info().name)
}

#[test]
fn adapter_follows_power_preference() {
    let instance = instance_with(vec![
        adapter("software", wgt::DeviceType::Cpu),
        adapter("integrated", wgt::DeviceType::IntegratedGpu),
        adapter("discrete", wgt::DeviceType::DiscreteGpu),
    ]);
    assert_eq!(instance.enumerate_adapters().len(), 3);

    let pick = |power_preference, force_fallback_adapter| {
        request_adapter_name(
            &instance,
            &wgt::RequestAdapterOptions {
                power_preference,
                force_fallback_adapter,
            },
        )
    };
    assert_eq!(
        pick(wgt::PowerPreference::HighPerformance, false).as_deref(),
        Some("discrete")
    );
    assert_eq!(
        pick(wgt::PowerPreference::LowPower, false).as_deref(),
        Some("integrated")
    );
    assert_eq!(
        pick(wgt::PowerPreference::None, false).as_deref(),
        Some("software")
    );
    assert_eq!(
        pick(wgt::PowerPreference::HighPerformance, true).as_deref(),
        Some("software")
    );
}

#[test]
fn no_adapter_is_not_an_error() {
    let instance = instance_with(vec![adapter("discrete", wgt::DeviceType::DiscreteGpu)]);
    let fallback = request_adapter_name(
        &instance,
        &wgt::RequestAdapterOptions {
            force_fallback_adapter: true,
            ..Default::default()
        },
    );
    assert_eq!(fallback, None);

    let disabled = Instance::<Noop>::new(&wgt::InstanceDescriptor {
        backends: wgt::Backends::VULKAN,
        flags: wgt::InstanceFlags::empty(),
    });
    assert!(disabled.enumerate_adapters().is_empty());

    let enabled = Instance::<Noop>::new(&wgt::InstanceDescriptor {
        backends: wgt::Backends::NOOP,
        flags: wgt::InstanceFlags::empty(),
    });
    assert_eq!(enabled.enumerate_adapters().len(), 1);
}

#[test]
fn device_request_is_checked_against_adapter() {
    let instance = instance_with(vec![hal::noop::AdapterConfig {
        features: wgt::Features::SHADER_F16,
        ..Default::default()
    }]);
    let adapter = pollster::block_on(instance.request_adapter(&Default::default())).unwrap();
    assert!(adapter.is_fallback_adapter());
    assert_eq!(adapter.features(), wgt::Features::SHADER_F16);

    let limits = adapter.limits();
    let too_many_groups = pollster::block_on(adapter.request_device(&wgt::DeviceDescriptor {
        label: None,
        required_features: wgt::Features::empty(),
        required_limits: wgt::Limits {
            max_bind_groups: limits.max_bind_groups + 1,
            ..limits.clone()
        },
    }));
    match too_many_groups {
        Err(RequestDeviceError::LimitsExceeded(ref failed)) => {
            assert_eq!(failed.name(), "max_bind_groups")
        }
        other => panic!("unexpected result {other:?}"),
    }

    let missing_feature = pollster::block_on(adapter.request_device(&wgt::DeviceDescriptor {
        label: None,
        required_features: wgt::Features::TIMESTAMP_QUERY,
        required_limits: limits.clone(),
    }));
    assert!(matches!(
        missing_feature,
        Err(RequestDeviceError::UnsupportedFeature(f)) if f == wgt::Features::TIMESTAMP_QUERY
    ));

    let (device, _queue) = request_device(
        &adapter,
        &wgt::DeviceDescriptor {
            label: Some("f16".into()),
            required_features: wgt::Features::SHADER_F16,
            required_limits: wgt::Limits {
                max_bind_groups: 2,
                ..limits
            },
        },
    );
    assert_eq!(device.features(), wgt::Features::SHADER_F16);
    assert_eq!(device.limits().max_bind_groups, 2);
}

#[test]
fn backend_loss_fails_pending_work() {
    let (device, queue) = initialize_device();
    let target = buffer(
        &device,
        "target",
        16,
        wgt::BufferUsages::MAP_READ | wgt::BufferUsages::COPY_DST,
    );
    let mapping = target.map_async(wgt::MapMode::Read, 0, None);
    let lost = device.lost();
    assert!(lost.try_get().is_none());

    unsafe { device.as_hal(|raw| raw.simulate_device_lost()) };
    let after = buffer(&device, "after", 16, wgt::BufferUsages::COPY_DST);
    assert!(!after.is_valid());
    assert!(!device.is_valid());

    let info = pollster::block_on(lost);
    assert_eq!(info.reason, wgt::DeviceLostReason::Unknown);
    assert!(matches!(
        pollster::block_on(mapping),
        Err(BufferAccessError::Device(DeviceError::Lost))
    ));

    let command_buffer = encoder(&device, "too late").finish();
    assert!(command_buffer.is_err());
    let submitted = queue.submit(std::iter::empty());
    assert!(matches!(
        submitted,
        Err(QueueSubmitError::Queue(DeviceError::Lost))
    ));
    assert!(matches!(
        pollster::block_on(queue.on_submitted_work_done()),
        Err(DeviceError::Lost)
    ));
    assert!(device.poll(wgt::Maintain::Poll).is_err());
}

#[test]
fn destroy_resolves_lost_once() {
    let (device, _queue) = initialize_device();
    let lost = device.lost();
    let staging = device.create_buffer(&wgt::BufferDescriptor {
        label: Some("staging".into()),
        size: 16,
        usage: wgt::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    let target = texture_2d(
        &device,
        "target",
        4,
        4,
        wgt::TextureFormat::Rgba8Unorm,
        wgt::TextureUsages::COPY_DST,
    );

    device.destroy();
    device.destroy();
    assert!(staging.is_destroyed());
    assert_eq!(staging.map_state(), MapState::Unmapped);
    assert!(target.is_destroyed());

    let info = pollster::block_on(lost);
    assert_eq!(info.reason, wgt::DeviceLostReason::Destroyed);
    assert_eq!(
        device.lost().try_get().map(|info| info.reason),
        Some(wgt::DeviceLostReason::Destroyed)
    );

    // Errors on a lost device reach no scope.
    let doomed = fail_free(&device);
    assert!(doomed.is_none());
}

fn fail_free(device: &common::TestDevice) -> Option<Error> {
    device.push_error_scope(wgt::ErrorFilter::Validation);
    let _ = buffer(device, "invalid", 16, wgt::BufferUsages::empty());
    pollster::block_on(device.pop_error_scope().unwrap())
}

#[test]
fn dropping_the_device_resolves_lost() {
    let (device, queue) = initialize_device();
    let lost = device.lost();
    drop(queue);
    drop(device);

    let info = pollster::block_on(lost);
    assert_eq!(info.reason, wgt::DeviceLostReason::Dropped);
}

#[test]
fn pop_on_empty_stack_is_an_error() {
    let (device, _queue) = initialize_device();
    assert!(matches!(
        device.pop_error_scope(),
        Err(PopErrorScopeError::Empty)
    ));

    device.push_error_scope(wgt::ErrorFilter::Internal);
    assert!(pollster::block_on(device.pop_error_scope().unwrap()).is_none());
    assert!(device.pop_error_scope().is_err());
}

#[test]
fn scopes_capture_by_filter() {
    let (device, _queue) = initialize_device();

    device.push_error_scope(wgt::ErrorFilter::Validation);
    device.push_error_scope(wgt::ErrorFilter::OutOfMemory);
    let _ = buffer(&device, "first", 16, wgt::BufferUsages::empty());
    let _ = buffer(&device, "second", 16, wgt::BufferUsages::empty());
    let out_of_memory = pollster::block_on(device.pop_error_scope().unwrap());
    let validation = pollster::block_on(device.pop_error_scope().unwrap());

    assert!(out_of_memory.is_none());
    // Only the first error of a scope is kept.
    let validation = validation.expect("validation error was not captured");
    assert_eq!(validation.filter(), wgt::ErrorFilter::Validation);
    assert!(validation.description().contains("first"), "{validation}");
}

#[test]
fn uncaptured_errors_reach_the_handler() {
    let (device, _queue) = initialize_device();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    device.on_uncaptured_error(move |error| {
        sink.lock().unwrap().push(error.to_string());
    });

    let _ = buffer(&device, "stray", 16, wgt::BufferUsages::empty());
    fail(&device, || buffer(&device, "scoped", 16, wgt::BufferUsages::empty()));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("stray"), "{seen:?}");
}
