mod common;

use common::{buffer, fail, initialize_device, initialize_device_with, texture_2d, valid};
use webgpu_core::{
    error::Error,
    pipeline::{ShaderModuleDescriptor, ShaderModuleSource},
    resource::{BufferAccessError, CreateBufferError, MapState},
};

#[test]
fn buffer_usage_rules() {
    let (device, _queue) = initialize_device();

    let ok = valid(&device, || {
        buffer(
            &device,
            "readback",
            256,
            wgt::BufferUsages::MAP_READ | wgt::BufferUsages::COPY_DST,
        )
    });
    assert!(ok.is_valid());

    let mixed = fail(&device, || {
        buffer(
            &device,
            "mixed",
            256,
            wgt::BufferUsages::MAP_READ | wgt::BufferUsages::STORAGE,
        )
    });
    assert!(!mixed.is_valid());

    let unused = fail(&device, || buffer(&device, "unused", 16, wgt::BufferUsages::empty()));
    assert!(!unused.is_valid());

    let too_big = fail(&device, || {
        buffer(
            &device,
            "huge",
            device.limits().max_buffer_size + 1,
            wgt::BufferUsages::COPY_DST,
        )
    });
    assert!(!too_big.is_valid());
}

#[test]
fn mapped_at_creation_needs_aligned_size() {
    let (device, _queue) = initialize_device();

    let unaligned = fail(&device, || {
        device.create_buffer(&wgt::BufferDescriptor {
            label: Some("unaligned".into()),
            size: 6,
            usage: wgt::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        })
    });
    assert!(!unaligned.is_valid());

    let mapped = valid(&device, || {
        device.create_buffer(&wgt::BufferDescriptor {
            label: Some("upload".into()),
            size: 8,
            usage: wgt::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        })
    });
    assert_eq!(mapped.map_state(), webgpu_core::resource::MapState::Mapped);
    let view = mapped.get_mapped_range(0, None).unwrap();
    view.write(0, &[1, 2, 3, 4]).unwrap();
    mapped.unmap().unwrap();
    assert!(!view.is_attached());
}

#[test]
fn view_callbacks_may_unmap() {
    let (device, _queue) = initialize_device();
    let upload = device.create_buffer(&wgt::BufferDescriptor {
        label: Some("upload".into()),
        size: 8,
        usage: wgt::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    let view = upload.get_mapped_range(0, None).unwrap();

    let first = view
        .with_slice(|slice| {
            let contents = upload.get_mapped_range(0, Some(4)).unwrap().read().unwrap();
            (slice.len(), contents)
        })
        .unwrap();
    assert_eq!(first, (8, vec![0; 4]));

    view.with_slice_mut(|slice| slice[0] = 9).unwrap();
    assert_eq!(view.read().unwrap()[0], 9);

    let lost = view.with_slice_mut(|slice| {
        slice[1] = 7;
        upload.unmap().unwrap();
    });
    assert!(matches!(lost, Err(BufferAccessError::Detached)));
    assert_eq!(upload.map_state(), MapState::Unmapped);
    assert!(!view.is_attached());
}

#[test]
fn invalid_buffer_is_named_on_use() {
    let (device, _queue) = initialize_device();

    let bad = fail(&device, || buffer(&device, "ghost", 16, wgt::BufferUsages::empty()));
    let dst = buffer(&device, "dst", 16, wgt::BufferUsages::COPY_DST);

    let encoder = common::encoder(&device, "copy");
    device.push_error_scope(wgt::ErrorFilter::Validation);
    assert!(encoder.copy_buffer_to_buffer(&bad, 0, &dst, 0, 16).is_err());
    let error = pollster::block_on(device.pop_error_scope().unwrap()).expect("no error");
    assert!(error.description().contains("ghost"), "{error}");
}

#[test]
fn texture_mip_level_count_zero() {
    let (device, _queue) = initialize_device();

    let texture = fail(&device, || {
        device.create_texture(&wgt::TextureDescriptor {
            label: Some("no mips".into()),
            size: wgt::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 0,
            sample_count: 1,
            dimension: wgt::TextureDimension::D2,
            format: wgt::TextureFormat::Rgba8Unorm,
            usage: wgt::TextureUsages::TEXTURE_BINDING,
        })
    });
    assert!(!texture.is_valid());
}

#[test]
fn texture_dimension_and_sample_rules() {
    let (device, _queue) = initialize_device();

    let empty = fail(&device, || {
        texture_2d(
            &device,
            "empty",
            0,
            4,
            wgt::TextureFormat::Rgba8Unorm,
            wgt::TextureUsages::COPY_DST,
        )
    });
    assert!(!empty.is_valid());

    let multisampled_mips = fail(&device, || {
        device.create_texture(&wgt::TextureDescriptor {
            label: Some("msaa".into()),
            size: wgt::Extent3d {
                width: 16,
                height: 16,
                depth_or_array_layers: 1,
            },
            mip_level_count: 2,
            sample_count: 4,
            dimension: wgt::TextureDimension::D2,
            format: wgt::TextureFormat::Rgba8Unorm,
            usage: wgt::TextureUsages::RENDER_ATTACHMENT,
        })
    });
    assert!(!multisampled_mips.is_valid());

    let msaa = valid(&device, || {
        device.create_texture(&wgt::TextureDescriptor {
            label: Some("msaa".into()),
            size: wgt::Extent3d {
                width: 16,
                height: 16,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 4,
            dimension: wgt::TextureDimension::D2,
            format: wgt::TextureFormat::Rgba8Unorm,
            usage: wgt::TextureUsages::RENDER_ATTACHMENT,
        })
    });
    assert_eq!(msaa.sample_count(), 4);

    let depth_3d = fail(&device, || {
        device.create_texture(&wgt::TextureDescriptor {
            label: Some("depth volume".into()),
            size: wgt::Extent3d {
                width: 4,
                height: 4,
                depth_or_array_layers: 4,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgt::TextureDimension::D3,
            format: wgt::TextureFormat::Depth32Float,
            usage: wgt::TextureUsages::TEXTURE_BINDING,
        })
    });
    assert!(!depth_3d.is_valid());
}

#[test]
fn render_attachment_needs_supported_format() {
    let (device, _queue) = initialize_device_with(hal::noop::AdapterConfig {
        unsupported_formats: vec![wgt::TextureFormat::Rgba16Float],
        ..Default::default()
    });

    let texture = fail(&device, || {
        texture_2d(
            &device,
            "target",
            4,
            4,
            wgt::TextureFormat::Rgba16Float,
            wgt::TextureUsages::RENDER_ATTACHMENT,
        )
    });
    assert!(!texture.is_valid());
}

#[test]
fn create_view_after_destroy() {
    let (device, _queue) = initialize_device();

    let texture = texture_2d(
        &device,
        "sampled",
        4,
        4,
        wgt::TextureFormat::Rgba8Unorm,
        wgt::TextureUsages::TEXTURE_BINDING,
    );
    let before = valid(&device, || texture.create_view(&Default::default()));
    assert!(before.is_valid());

    texture.destroy();
    texture.destroy();
    assert!(texture.is_destroyed());

    let after = fail(&device, || texture.create_view(&Default::default()));
    assert!(!after.is_valid());
}

#[test]
fn view_format_and_range_rules() {
    let (device, _queue) = initialize_device();

    let texture = texture_2d(
        &device,
        "color",
        8,
        8,
        wgt::TextureFormat::Rgba8Unorm,
        wgt::TextureUsages::TEXTURE_BINDING,
    );

    let srgb = valid(&device, || {
        texture.create_view(&wgt::TextureViewDescriptor {
            format: Some(wgt::TextureFormat::Rgba8UnormSrgb),
            ..Default::default()
        })
    });
    assert_eq!(srgb.format(), wgt::TextureFormat::Rgba8UnormSrgb);

    let other_format = fail(&device, || {
        texture.create_view(&wgt::TextureViewDescriptor {
            format: Some(wgt::TextureFormat::Bgra8Unorm),
            ..Default::default()
        })
    });
    assert!(!other_format.is_valid());

    let depth_aspect = fail(&device, || {
        texture.create_view(&wgt::TextureViewDescriptor {
            aspect: wgt::TextureAspect::DepthOnly,
            ..Default::default()
        })
    });
    assert!(!depth_aspect.is_valid());

    let past_mips = fail(&device, || {
        texture.create_view(&wgt::TextureViewDescriptor {
            base_mip_level: 1,
            ..Default::default()
        })
    });
    assert!(!past_mips.is_valid());
}

#[test]
fn shader_errors_are_compilation_errors() {
    let (device, _queue) = initialize_device();

    device.push_error_scope(wgt::ErrorFilter::Validation);
    let module = device.create_shader_module(&ShaderModuleDescriptor {
        label: Some("broken".into()),
        source: ShaderModuleSource::Wgsl("fn main( {".into()),
    });
    let error = pollster::block_on(device.pop_error_scope().unwrap());
    assert!(!module.is_valid());
    assert!(matches!(error, Some(Error::Compilation { .. })), "{error:?}");

    let module = valid(&device, || {
        device.create_shader_module(&ShaderModuleDescriptor {
            label: Some("compute".into()),
            source: ShaderModuleSource::Wgsl("@compute @workgroup_size(1) fn main() {}".into()),
        })
    });
    assert_eq!(
        module.entry_points(),
        vec![("main".to_string(), naga::ShaderStage::Compute)]
    );
}

#[test]
fn parsed_modules_skip_the_front_end() {
    let (device, _queue) = initialize_device();

    let parsed = naga::front::wgsl::parse_str(
        "@vertex fn vs() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }",
    )
    .unwrap();
    let module = valid(&device, || {
        device.create_shader_module(&ShaderModuleDescriptor {
            label: Some("parsed".into()),
            source: ShaderModuleSource::Naga(std::borrow::Cow::Owned(parsed)),
        })
    });
    assert!(module.is_valid());
    assert_eq!(
        module.entry_points(),
        vec![("vs".to_string(), naga::ShaderStage::Vertex)]
    );
}

#[test]
fn out_of_memory_is_its_own_filter() {
    let (device, _queue) = initialize_device_with(hal::noop::AdapterConfig {
        memory_budget: Some(1024),
        ..Default::default()
    });

    device.push_error_scope(wgt::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgt::ErrorFilter::Validation);
    let big = buffer(&device, "big", 4096, wgt::BufferUsages::COPY_DST);
    let validation = pollster::block_on(device.pop_error_scope().unwrap());
    let oom = pollster::block_on(device.pop_error_scope().unwrap());

    assert!(!big.is_valid());
    assert!(validation.is_none());
    let oom = oom.expect("allocation should run out of memory");
    assert!(matches!(oom, Error::OutOfMemory { .. }));
    assert!(oom.find_source::<CreateBufferError>().is_some());

    let small = valid(&device, || buffer(&device, "small", 512, wgt::BufferUsages::COPY_DST));
    assert!(small.is_valid());
}

#[test]
fn store_tracks_resources() {
    let (device, _queue) = initialize_device();

    let good = buffer(&device, "good", 16, wgt::BufferUsages::COPY_DST);
    let bad = fail(&device, || buffer(&device, "bad", 16, wgt::BufferUsages::empty()));

    let report = device.generate_report();
    assert_eq!(report.buffers.num_occupied, 1);
    assert_eq!(report.buffers.num_error, 1);

    good.destroy();
    assert_eq!(device.generate_report().buffers.num_destroyed, 1);

    drop((good, bad));
    let report = device.generate_report();
    assert!(report.buffers.is_empty());
    assert_eq!(report.buffers.num_vacant, 2);
}
