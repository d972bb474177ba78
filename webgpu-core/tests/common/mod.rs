#![allow(dead_code)]

use std::sync::Arc;

use webgpu_core::{
    api::Noop,
    device::{Device, Queue},
    instance::{Adapter, Instance},
};

pub type TestDevice = Arc<Device<Noop>>;
pub type TestQueue = Arc<Queue<Noop>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn instance_with(adapters: Vec<hal::noop::AdapterConfig>) -> Instance<Noop> {
    init_logger();
    Instance::from_hal(
        hal::noop::Instance::with_adapters(adapters),
        wgt::InstanceFlags::from_build_config().with_env(),
    )
}

pub fn request_device(
    adapter: &Arc<Adapter<Noop>>,
    desc: &webgpu_core::device::DeviceDescriptor,
) -> (TestDevice, TestQueue) {
    pollster::block_on(adapter.request_device(desc)).expect("device request failed")
}

/// A device on the default noop adapter, with default limits.
pub fn initialize_device() -> (TestDevice, TestQueue) {
    initialize_device_with(hal::noop::AdapterConfig::default())
}

pub fn initialize_device_with(config: hal::noop::AdapterConfig) -> (TestDevice, TestQueue) {
    let instance = instance_with(vec![config]);
    let adapter = pollster::block_on(instance.request_adapter(&Default::default()))
        .expect("no noop adapter");
    request_device(
        &adapter,
        &wgt::DeviceDescriptor {
            label: Some("test device".into()),
            ..Default::default()
        },
    )
}

/// Run some code in an error scope and assert that validation fails.
pub fn fail<T>(device: &TestDevice, callback: impl FnOnce() -> T) -> T {
    device.push_error_scope(wgt::ErrorFilter::Validation);
    let result = callback();
    let error = pollster::block_on(device.pop_error_scope().expect("scope stack is empty"));
    assert!(error.is_some(), "expected a validation error");

    result
}

/// Run some code in an error scope and assert that validation succeeds.
pub fn valid<T>(device: &TestDevice, callback: impl FnOnce() -> T) -> T {
    device.push_error_scope(wgt::ErrorFilter::Validation);
    let result = callback();
    let error = pollster::block_on(device.pop_error_scope().expect("scope stack is empty"));
    if let Some(error) = error {
        panic!("unexpected validation error: {error}");
    }

    result
}

pub fn buffer(
    device: &TestDevice,
    label: &str,
    size: u64,
    usage: wgt::BufferUsages,
) -> Arc<webgpu_core::resource::Buffer<Noop>> {
    device.create_buffer(&wgt::BufferDescriptor {
        label: Some(label.to_string().into()),
        size,
        usage,
        mapped_at_creation: false,
    })
}

pub fn texture_2d(
    device: &TestDevice,
    label: &str,
    width: u32,
    height: u32,
    format: wgt::TextureFormat,
    usage: wgt::TextureUsages,
) -> Arc<webgpu_core::resource::Texture<Noop>> {
    device.create_texture(&wgt::TextureDescriptor {
        label: Some(label.to_string().into()),
        size: wgt::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgt::TextureDimension::D2,
        format,
        usage,
    })
}

pub fn encoder(device: &TestDevice, label: &str) -> webgpu_core::command::CommandEncoder<Noop> {
    device.create_command_encoder(&wgt::CommandEncoderDescriptor {
        label: Some(label.to_string().into()),
    })
}
