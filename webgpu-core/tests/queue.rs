mod common;

use std::sync::Arc;

use common::{buffer, encoder, fail, initialize_device, texture_2d, valid, TestDevice};
use webgpu_core::{
    api::Noop,
    command::{
        CopyError, ImageCopyBuffer, ImageCopyTexture, RenderPassColorAttachment,
        RenderPassDescriptor, TransferError,
    },
    device::{QueueSubmitError, WaitIdleError},
    resource::{Buffer, BufferAccessError, BufferUseError, MapState},
};

fn executed(device: &TestDevice) -> Vec<hal::noop::ExecutedCommand> {
    unsafe { device.as_hal(|raw| raw.execution_log()) }
}

fn upload(device: &TestDevice, label: &str, contents: &[u8]) -> Arc<Buffer<Noop>> {
    let buffer = device.create_buffer(&wgt::BufferDescriptor {
        label: Some(label.to_string().into()),
        size: contents.len() as u64,
        usage: wgt::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    let view = buffer.get_mapped_range(0, None).expect("mapped at creation");
    view.write(0, contents).unwrap();
    buffer.unmap().unwrap();
    buffer
}

fn readback(buffer: &Arc<Buffer<Noop>>) -> Vec<u8> {
    pollster::block_on(buffer.map_async(wgt::MapMode::Read, 0, None)).expect("map failed");
    let contents = buffer.get_mapped_range(0, None).unwrap().read().unwrap();
    buffer.unmap().unwrap();
    contents
}

#[test]
fn submissions_execute_in_order() {
    let (device, queue) = initialize_device();
    let scratch = buffer(&device, "scratch", 64, wgt::BufferUsages::COPY_DST);

    let first = encoder(&device, "first");
    first.clear_buffer(&scratch, 0, None).unwrap();
    let first = first.finish().unwrap();

    let second = encoder(&device, "second");
    second.clear_buffer(&scratch, 16, Some(16)).unwrap();
    let second = second.finish().unwrap();

    assert_eq!(queue.submit([first]).unwrap(), 1);
    assert_eq!(queue.submit([Arc::clone(&second)]).unwrap(), 2);
    assert!(second.is_submitted());

    let log = executed(&device);
    assert_eq!(
        log,
        vec![
            hal::noop::ExecutedCommand {
                submission: 1,
                command_buffer: Some("first".to_string()),
                command: "clear_buffer 0..64".to_string(),
            },
            hal::noop::ExecutedCommand {
                submission: 2,
                command_buffer: Some("second".to_string()),
                command: "clear_buffer 16..32".to_string(),
            },
        ]
    );
}

#[test]
fn batch_keeps_command_buffer_order() {
    let (device, queue) = initialize_device();
    let scratch = buffer(&device, "scratch", 64, wgt::BufferUsages::COPY_DST);

    let buffers = ["a", "b", "c"].map(|label| {
        let encoder = encoder(&device, label);
        encoder.clear_buffer(&scratch, 0, Some(4)).unwrap();
        encoder.finish().unwrap()
    });
    queue.submit(buffers).unwrap();

    let labels = executed(&device)
        .into_iter()
        .map(|command| command.command_buffer.unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(labels, ["a", "b", "c"]);
}

#[test]
fn work_done_resolves_after_submission() {
    let (device, queue) = initialize_device();

    let idle = queue.on_submitted_work_done();
    assert!(matches!(idle.try_get(), Some(Ok(()))));

    let scratch = buffer(&device, "scratch", 16, wgt::BufferUsages::COPY_DST);
    let encoder = encoder(&device, "work");
    encoder.clear_buffer(&scratch, 0, None).unwrap();
    queue.submit([encoder.finish().unwrap()]).unwrap();

    pollster::block_on(queue.on_submitted_work_done()).unwrap();
    assert!(device.poll(wgt::Maintain::Wait).unwrap());
}

#[test]
fn map_waits_for_running_submission() {
    let (device, queue) = initialize_device();
    let readback = buffer(
        &device,
        "readback",
        16,
        wgt::BufferUsages::MAP_READ | wgt::BufferUsages::COPY_DST,
    );
    unsafe { device.as_hal(|raw| raw.hold_fences()) };

    let fill = encoder(&device, "fill");
    fill.clear_buffer(&readback, 0, None).unwrap();
    queue.submit([fill.finish().unwrap()]).unwrap();

    let work_done = queue.on_submitted_work_done();
    let mapping = readback.map_async(wgt::MapMode::Read, 0, None);
    assert!(!device.poll(wgt::Maintain::Poll).unwrap());
    assert_eq!(readback.map_state(), MapState::Pending);
    assert!(mapping.try_get().is_none());
    assert!(work_done.try_get().is_none());
    assert!(matches!(
        device.poll(wgt::Maintain::Wait),
        Err(WaitIdleError::StuckGpu)
    ));
    assert_eq!(readback.map_state(), MapState::Pending);

    unsafe { device.as_hal(|raw| raw.release_fences()) };
    assert!(device.poll(wgt::Maintain::Poll).unwrap());
    assert_eq!(readback.map_state(), MapState::Mapped);
    assert!(matches!(mapping.try_get(), Some(Ok(()))));
    assert!(matches!(work_done.try_get(), Some(Ok(()))));
    assert_eq!(
        readback.get_mapped_range(0, None).unwrap().read().unwrap(),
        vec![0; 16]
    );
}

#[test]
fn map_needs_map_usage() {
    let (device, _queue) = initialize_device();
    let plain = buffer(&device, "plain", 16, wgt::BufferUsages::COPY_DST);

    let mapping = fail(&device, || plain.map_async(wgt::MapMode::Read, 0, None));
    assert!(matches!(
        pollster::block_on(mapping),
        Err(BufferAccessError::MissingBufferUsage(_))
    ));
    assert_eq!(plain.map_state(), MapState::Unmapped);
}

#[test]
fn second_map_while_pending_fails() {
    let (device, _queue) = initialize_device();
    let target = buffer(
        &device,
        "target",
        16,
        wgt::BufferUsages::MAP_READ | wgt::BufferUsages::COPY_DST,
    );

    let first = target.map_async(wgt::MapMode::Read, 0, None);
    assert_eq!(target.map_state(), MapState::Pending);
    let second = fail(&device, || target.map_async(wgt::MapMode::Read, 0, None));
    assert!(matches!(
        second.try_get(),
        Some(Err(BufferAccessError::MapAlreadyPending))
    ));

    pollster::block_on(first).unwrap();
    assert_eq!(target.map_state(), MapState::Mapped);

    target.unmap().unwrap();
    assert_eq!(target.map_state(), MapState::Unmapped);
}

#[test]
fn unmap_aborts_pending_map() {
    let (device, _queue) = initialize_device();
    let target = buffer(
        &device,
        "target",
        16,
        wgt::BufferUsages::MAP_WRITE | wgt::BufferUsages::COPY_SRC,
    );

    let mapping = target.map_async(wgt::MapMode::Write, 0, None);
    valid(&device, || target.unmap()).unwrap();
    assert!(matches!(
        pollster::block_on(mapping),
        Err(BufferAccessError::MapAborted)
    ));
}

#[test]
fn copy_round_trips_through_the_queue() {
    let (device, queue) = initialize_device();
    let src = upload(&device, "src", &[1, 2, 3, 4, 5, 6, 7, 8]);
    let dst = buffer(
        &device,
        "dst",
        8,
        wgt::BufferUsages::MAP_READ | wgt::BufferUsages::COPY_DST,
    );

    let encoder = encoder(&device, "copy");
    valid(&device, || encoder.copy_buffer_to_buffer(&src, 4, &dst, 0, 4)).unwrap();
    queue.submit([encoder.finish().unwrap()]).unwrap();

    assert_eq!(readback(&dst), [5, 6, 7, 8, 0, 0, 0, 0]);
}

#[test]
fn render_pass_clears_attachment() {
    let (device, queue) = initialize_device();
    let texture = texture_2d(
        &device,
        "target",
        4,
        4,
        wgt::TextureFormat::Rgba8Unorm,
        wgt::TextureUsages::RENDER_ATTACHMENT | wgt::TextureUsages::COPY_SRC,
    );
    let view = texture.create_view(&Default::default());
    let readback_buffer = buffer(
        &device,
        "pixels",
        4 * 256,
        wgt::BufferUsages::MAP_READ | wgt::BufferUsages::COPY_DST,
    );

    let encoder = encoder(&device, "clear");
    let colors = [Some(RenderPassColorAttachment {
        view: &view,
        resolve_target: None,
        ops: wgt::Operations {
            load: wgt::LoadOp::Clear(wgt::Color::RED),
            store: wgt::StoreOp::Store,
        },
    })];
    let pass = encoder
        .begin_render_pass(&RenderPassDescriptor {
            label: Some("clear to red".into()),
            color_attachments: &colors,
            depth_stencil_attachment: None,
        })
        .unwrap();
    valid(&device, || pass.end()).unwrap();
    encoder
        .copy_texture_to_buffer(
            &ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgt::Origin3d::ZERO,
                aspect: wgt::TextureAspect::All,
            },
            &ImageCopyBuffer {
                buffer: &readback_buffer,
                layout: wgt::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(256),
                    rows_per_image: None,
                },
            },
            &texture.size(),
        )
        .unwrap();
    queue.submit([encoder.finish().unwrap()]).unwrap();

    let commands = executed(&device)
        .into_iter()
        .map(|command| command.command)
        .collect::<Vec<_>>();
    assert!(commands[0].starts_with("begin_render_pass"), "{commands:?}");
    assert_eq!(commands[1], "end_render_pass");
    assert_eq!(commands[2], "copy_texture_to_buffer x1");

    let pixels = readback(&readback_buffer);
    assert_eq!(pixels[..4], [255, 0, 0, 255]);
    let last = 3 * 256 + 3 * 4;
    assert_eq!(pixels[last..last + 4], [255, 0, 0, 255]);
    assert_eq!(pixels[16..20], [0, 0, 0, 0]);
}

#[test]
fn compute_dispatch_reaches_the_backend() {
    let (device, queue) = initialize_device();
    let module = device.create_shader_module(&webgpu_core::pipeline::ShaderModuleDescriptor {
        label: Some("compute".into()),
        source: webgpu_core::pipeline::ShaderModuleSource::Wgsl(
            "@compute @workgroup_size(8) fn main() {}".into(),
        ),
    });
    let layout = device.create_pipeline_layout(&webgpu_core::binding_model::PipelineLayoutDescriptor {
        label: None,
        bind_group_layouts: &[],
    });
    let pipeline = device.create_compute_pipeline(&webgpu_core::pipeline::ComputePipelineDescriptor {
        label: Some("main".into()),
        layout: &layout,
        stage: webgpu_core::pipeline::ProgrammableStageDescriptor {
            module: &module,
            entry_point: Some("main".into()),
        },
    });

    let encoder = encoder(&device, "compute");
    let mut pass = encoder
        .begin_compute_pass(&webgpu_core::command::ComputePassDescriptor {
            label: Some("work".into()),
        })
        .unwrap();
    pass.set_pipeline(&pipeline);
    pass.dispatch_workgroups(4, 2, 1);
    valid(&device, || pass.end()).unwrap();
    queue.submit([encoder.finish().unwrap()]).unwrap();

    let commands = executed(&device)
        .into_iter()
        .map(|command| command.command)
        .collect::<Vec<_>>();
    assert_eq!(
        commands,
        [
            "begin_compute_pass Some(\"work\")",
            "set_compute_pipeline",
            "dispatch 4 2 1",
            "end_compute_pass",
        ]
    );
}

#[test]
fn command_buffer_submits_once() {
    let (device, queue) = initialize_device();
    let command_buffer = encoder(&device, "once").finish().unwrap();

    queue.submit([Arc::clone(&command_buffer)]).unwrap();
    let again = fail(&device, || queue.submit([command_buffer]));
    assert!(matches!(again, Err(QueueSubmitError::AlreadySubmitted(_))));
}

#[test]
fn destroy_after_encoding_still_submits() {
    let (device, queue) = initialize_device();
    let scratch = buffer(&device, "scratch", 16, wgt::BufferUsages::COPY_DST);

    let early = encoder(&device, "before destroy");
    early.clear_buffer(&scratch, 0, None).unwrap();
    let command_buffer = early.finish().unwrap();
    scratch.destroy();
    assert!(scratch.is_destroyed());

    valid(&device, || queue.submit([command_buffer])).unwrap();
    assert_eq!(executed(&device).len(), 1);

    // New commands see the destroyed buffer right away.
    let late = encoder(&device, "after destroy");
    let cleared = fail(&device, || late.clear_buffer(&scratch, 0, None));
    assert!(matches!(
        cleared,
        Err(CopyError::Transfer(TransferError::BufferUse(
            BufferUseError::DestroyedResource(_)
        )))
    ));
    fail(&device, || late.finish()).unwrap_err();
}

#[test]
fn mapped_buffer_fails_submit() {
    let (device, queue) = initialize_device();
    let staging = device.create_buffer(&wgt::BufferDescriptor {
        label: Some("staging".into()),
        size: 16,
        usage: wgt::BufferUsages::COPY_SRC,
        mapped_at_creation: true,
    });
    let dst = buffer(&device, "dst", 16, wgt::BufferUsages::COPY_DST);

    let encoder = encoder(&device, "still mapped");
    encoder.copy_buffer_to_buffer(&staging, 0, &dst, 0, 16).unwrap();
    let result = fail(&device, || queue.submit([encoder.finish().unwrap()]));
    assert!(matches!(result, Err(QueueSubmitError::BufferStillMapped(_))));
}

#[test]
fn one_invalid_buffer_rejects_the_batch() {
    let (device, queue) = initialize_device();
    let scratch = buffer(&device, "scratch", 16, wgt::BufferUsages::COPY_DST);

    let good = encoder(&device, "good");
    good.clear_buffer(&scratch, 0, None).unwrap();
    let good = good.finish().unwrap();
    let spent = encoder(&device, "spent").finish().unwrap();
    queue.submit([Arc::clone(&spent)]).unwrap();
    device.poll(wgt::Maintain::Wait).unwrap();
    unsafe { device.as_hal(|raw| raw.clear_execution_log()) };

    fail(&device, || queue.submit([good, spent])).unwrap_err();
    assert!(executed(&device).is_empty());
}
