mod common;

use std::sync::Arc;

use common::{buffer, encoder, fail, initialize_device, texture_2d, valid, TestDevice};
use webgpu_core::{
    api::Noop,
    binding_model::{
        BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
        BindingResource, BufferBinding, PipelineLayout, PipelineLayoutDescriptor,
    },
    command::{
        BinderError, CommandEncoderError, CommandEncoderStatus, ComputePassDescriptor,
        CopyError, ImageCopyBuffer, ImageCopyTexture, RenderPassColorAttachment,
        RenderPassDescriptor, RenderPassErrorInner, TransferError,
    },
    pipeline::{
        FragmentState, ProgrammableStageDescriptor, RenderPipeline, RenderPipelineDescriptor,
        ShaderModuleDescriptor, ShaderModuleSource, VertexState,
    },
    resource::{Texture, TextureView},
};

const FORMAT: wgt::TextureFormat = wgt::TextureFormat::Rgba8Unorm;

const TINTED: &str = "
@group(0) @binding(0) var<uniform> tint: vec4<f32>;

@vertex
fn vs() -> @builtin(position) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}

@fragment
fn fs() -> @location(0) vec4<f32> {
    return tint;
}
";

fn target(device: &TestDevice) -> (Arc<Texture<Noop>>, Arc<TextureView<Noop>>) {
    let texture = texture_2d(
        device,
        "target",
        4,
        4,
        FORMAT,
        wgt::TextureUsages::RENDER_ATTACHMENT | wgt::TextureUsages::COPY_SRC,
    );
    let view = texture.create_view(&Default::default());
    (texture, view)
}

fn uniform_layout(device: &TestDevice) -> Arc<BindGroupLayout<Noop>> {
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("tint layout".into()),
        entries: vec![wgt::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgt::ShaderStages::FRAGMENT,
            ty: wgt::BindingType::Buffer {
                ty: wgt::BufferBindingType::Uniform,
                min_binding_size: None,
            },
        }]
        .into(),
    })
}

fn tinted_pipeline(
    device: &TestDevice,
    bgl: &Arc<BindGroupLayout<Noop>>,
) -> (Arc<PipelineLayout<Noop>>, Arc<RenderPipeline<Noop>>) {
    let module = device.create_shader_module(&ShaderModuleDescriptor {
        label: Some("tinted".into()),
        source: ShaderModuleSource::Wgsl(TINTED.into()),
    });
    let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("tinted".into()),
        bind_group_layouts: &[Arc::clone(bgl)],
    });
    let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("tinted".into()),
        layout: &layout,
        vertex: VertexState {
            stage: ProgrammableStageDescriptor {
                module: &module,
                entry_point: Some("vs".into()),
            },
        },
        topology: wgt::PrimitiveTopology::TriangleList,
        depth_stencil: None,
        multisample: Default::default(),
        fragment: Some(FragmentState {
            stage: ProgrammableStageDescriptor {
                module: &module,
                entry_point: Some("fs".into()),
            },
            targets: vec![Some(wgt::ColorTargetState::from(FORMAT))].into(),
        }),
    });
    (layout, pipeline)
}

fn color_pass<'a>(view: &'a Arc<TextureView<Noop>>) -> [Option<RenderPassColorAttachment<'a, Noop>>; 1] {
    [Some(RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgt::Operations {
            load: wgt::LoadOp::Clear(wgt::Color::BLACK),
            store: wgt::StoreOp::Store,
        },
    })]
}

#[test]
fn nested_render_pass_poisons_encoder() {
    let (device, _queue) = initialize_device();
    let (_texture, view) = target(&device);
    let colors = color_pass(&view);
    let desc = RenderPassDescriptor {
        label: Some("outer".into()),
        color_attachments: &colors,
        depth_stencil_attachment: None,
    };

    let encoder = encoder(&device, "nested");
    let outer = valid(&device, || encoder.begin_render_pass(&desc)).unwrap();
    assert_eq!(encoder.status(), CommandEncoderStatus::Locked);

    let inner = fail(&device, || encoder.begin_render_pass(&desc));
    assert!(matches!(
        inner.map(drop).unwrap_err().inner(),
        RenderPassErrorInner::Encoder(CommandEncoderError::Locked)
    ));
    assert_eq!(encoder.status(), CommandEncoderStatus::Error);

    fail(&device, || outer.end()).unwrap_err();
    let finished = fail(&device, || encoder.finish());
    assert!(matches!(finished, Err(CommandEncoderError::Invalid)));
}

#[test]
fn finish_with_open_pass_fails() {
    let (device, _queue) = initialize_device();

    let encoder = encoder(&device, "open pass");
    let pass = encoder
        .begin_compute_pass(&ComputePassDescriptor::default())
        .unwrap();
    let finished = fail(&device, || encoder.finish());
    assert!(matches!(finished, Err(CommandEncoderError::Locked)));
    drop(pass);
    assert_eq!(encoder.status(), CommandEncoderStatus::Error);
}

#[test]
fn second_finish_is_a_usage_error() {
    let (device, _queue) = initialize_device();

    let encoder = encoder(&device, "twice");
    let command_buffer = valid(&device, || encoder.finish()).unwrap();
    assert!(!command_buffer.is_submitted());

    let again = valid(&device, || encoder.finish());
    assert!(matches!(again, Err(CommandEncoderError::NotRecording)));
    assert_eq!(encoder.status(), CommandEncoderStatus::Finished);
}

#[test]
fn poisoned_encoder_ignores_later_commands() {
    let (device, _queue) = initialize_device();
    let src = buffer(&device, "src", 64, wgt::BufferUsages::COPY_SRC);
    let dst = buffer(&device, "dst", 64, wgt::BufferUsages::COPY_DST);

    let encoder = encoder(&device, "poisoned");
    let overrun = fail(&device, || encoder.copy_buffer_to_buffer(&src, 0, &dst, 32, 64));
    assert!(matches!(
        overrun,
        Err(CopyError::Transfer(TransferError::BufferOverrun { .. }))
    ));
    assert_eq!(encoder.status(), CommandEncoderStatus::Error);

    let later = fail(&device, || encoder.copy_buffer_to_buffer(&src, 0, &dst, 0, 64));
    assert!(matches!(
        later,
        Err(CopyError::Encoder(CommandEncoderError::Invalid))
    ));
    fail(&device, || encoder.finish()).unwrap_err();
}

#[test]
fn copy_texture_to_buffer_bytes_per_row() {
    let (device, _queue) = initialize_device();
    let texture = texture_2d(
        &device,
        "wide",
        256,
        2,
        FORMAT,
        wgt::TextureUsages::COPY_SRC,
    );
    let readback = buffer(&device, "readback", 4096, wgt::BufferUsages::COPY_DST);
    let size = wgt::Extent3d {
        width: 256,
        height: 2,
        depth_or_array_layers: 1,
    };
    let copy = |bytes_per_row| {
        let encoder = encoder(&device, "copy");
        encoder.copy_texture_to_buffer(
            &ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgt::Origin3d::ZERO,
                aspect: wgt::TextureAspect::All,
            },
            &ImageCopyBuffer {
                buffer: &readback,
                layout: wgt::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            &size,
        )
    };

    let unaligned = fail(&device, || copy(800));
    assert!(matches!(
        unaligned,
        Err(CopyError::Transfer(TransferError::UnalignedBytesPerRow(_)))
    ));
    let too_small = fail(&device, || copy(768));
    assert!(matches!(
        too_small,
        Err(CopyError::Transfer(TransferError::InvalidBytesPerRow { .. }))
    ));
    valid(&device, || copy(1024)).unwrap();
}

#[test]
fn attachment_needs_render_attachment_usage() {
    let (device, _queue) = initialize_device();
    let texture = texture_2d(&device, "sampled", 4, 4, FORMAT, wgt::TextureUsages::TEXTURE_BINDING);
    let view = texture.create_view(&Default::default());
    let colors = color_pass(&view);

    let encoder = encoder(&device, "bad attachment");
    let pass = fail(&device, || {
        encoder.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: &colors,
            depth_stencil_attachment: None,
        })
    });
    assert!(matches!(
        pass.map(drop).unwrap_err().inner(),
        RenderPassErrorInner::MissingTextureUsage(_)
    ));
    assert_eq!(encoder.status(), CommandEncoderStatus::Error);
}

#[test]
fn draw_requires_pipeline_and_bind_groups() {
    let (device, _queue) = initialize_device();
    let (_texture, view) = target(&device);
    let colors = color_pass(&view);
    let desc = RenderPassDescriptor {
        label: Some("draw".into()),
        color_attachments: &colors,
        depth_stencil_attachment: None,
    };
    let bgl = uniform_layout(&device);
    let (_layout, pipeline) = valid(&device, || tinted_pipeline(&device, &bgl));
    assert!(pipeline.is_valid());

    let encoder1 = encoder(&device, "no pipeline");
    let mut pass = encoder1.begin_render_pass(&desc).unwrap();
    pass.draw(3, 1, 0, 0);
    let ended = fail(&device, || pass.end());
    assert!(matches!(
        ended.unwrap_err().inner(),
        RenderPassErrorInner::MissingPipeline
    ));
    fail(&device, || encoder1.finish()).unwrap_err();

    let encoder2 = encoder(&device, "no bind group");
    let mut pass = encoder2.begin_render_pass(&desc).unwrap();
    pass.set_pipeline(&pipeline);
    pass.draw(3, 1, 0, 0);
    let ended = fail(&device, || pass.end());
    assert!(matches!(
        ended.unwrap_err().inner(),
        RenderPassErrorInner::IncompatibleBindGroup(BinderError::MissingBindGroup { index: 0, .. })
    ));

    let uniforms = buffer(&device, "tint", 16, wgt::BufferUsages::UNIFORM);
    let group = valid(&device, || {
        device.create_bind_group(&BindGroupDescriptor {
            label: Some("tint".into()),
            layout: &bgl,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer(BufferBinding {
                    buffer: &uniforms,
                    offset: 0,
                    size: None,
                }),
            }],
        })
    });

    let encoder3 = encoder(&device, "complete");
    let mut pass = encoder3.begin_render_pass(&desc).unwrap();
    pass.set_pipeline(&pipeline);
    pass.set_bind_group(0, &group);
    pass.set_viewport(0.0, 0.0, 4.0, 4.0, 0.0, 1.0);
    pass.draw(3, 1, 0, 0);
    valid(&device, || pass.end()).unwrap();
    valid(&device, || encoder3.finish()).unwrap();
}

#[test]
fn viewport_must_fit_the_attachments() {
    let (device, _queue) = initialize_device();
    let (_texture, view) = target(&device);
    let colors = color_pass(&view);
    let desc = RenderPassDescriptor {
        label: None,
        color_attachments: &colors,
        depth_stencil_attachment: None,
    };

    let encoder1 = encoder(&device, "wide viewport");
    let mut pass = encoder1.begin_render_pass(&desc).unwrap();
    pass.set_viewport(0.0, 0.0, 8.0, 4.0, 0.0, 1.0);
    let ended = fail(&device, || pass.end());
    assert!(matches!(
        ended.unwrap_err().inner(),
        RenderPassErrorInner::InvalidViewportRect { .. }
    ));

    let encoder2 = encoder(&device, "deep viewport");
    let mut pass = encoder2.begin_render_pass(&desc).unwrap();
    pass.set_viewport(0.0, 0.0, 4.0, 4.0, 0.5, 2.0);
    let ended = fail(&device, || pass.end());
    assert!(matches!(
        ended.unwrap_err().inner(),
        RenderPassErrorInner::InvalidViewportDepth { .. }
    ));

    let encoder3 = encoder(&device, "nan viewport");
    let mut pass = encoder3.begin_render_pass(&desc).unwrap();
    pass.set_viewport(f32::NAN, 0.0, f32::NAN, 4.0, 0.0, 1.0);
    let ended = fail(&device, || pass.end());
    assert!(matches!(
        ended.unwrap_err().inner(),
        RenderPassErrorInner::InvalidViewportRect { .. }
    ));
    assert!(fail(&device, || encoder3.finish()).is_err());
}

#[test]
fn compute_dispatch_is_checked_against_limits() {
    let (device, _queue) = initialize_device();
    let module = device.create_shader_module(&ShaderModuleDescriptor {
        label: Some("compute".into()),
        source: ShaderModuleSource::Wgsl("@compute @workgroup_size(1) fn main() {}".into()),
    });
    let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: None,
        bind_group_layouts: &[],
    });
    let pipeline = valid(&device, || {
        device.create_compute_pipeline(&webgpu_core::pipeline::ComputePipelineDescriptor {
            label: Some("noop".into()),
            layout: &layout,
            stage: ProgrammableStageDescriptor {
                module: &module,
                entry_point: None,
            },
        })
    });
    assert_eq!(pipeline.workgroup_size(), [1, 1, 1]);

    let limit = device.limits().max_compute_workgroups_per_dimension;
    let encoder = encoder(&device, "dispatch");
    let mut pass = encoder
        .begin_compute_pass(&ComputePassDescriptor::default())
        .unwrap();
    pass.set_pipeline(&pipeline);
    pass.dispatch_workgroups(limit + 1, 1, 1);
    let ended = fail(&device, || pass.end());
    assert!(ended.is_err());
    assert_eq!(encoder.status(), CommandEncoderStatus::Error);
}
