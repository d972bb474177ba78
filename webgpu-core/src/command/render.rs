use std::{ops::Range, sync::Arc};

use arrayvec::ArrayVec;
use hal::CommandEncoder as _;
use thiserror::Error;
use wgt::TextureUsages;

use crate::{
    api_log,
    binding_model::{BindGroup, BindGroupUseError, PipelineLayout},
    command::{
        bind::{Binder, BinderError},
        BasePass, Command, CommandEncoder, CommandEncoderError, CommandEncoderStatus, MapPassErr,
        PassErrorScope,
    },
    device::{
        AttachmentData, Device, DeviceError, RenderPassCompatibilityCheckType,
        RenderPassCompatibilityError, RenderPassContext,
    },
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    pipeline::RenderPipeline,
    resource::{
        Buffer, DestroyedResourceError, InvalidResourceError, Labeled, MissingTextureUsageError,
        ParentDevice, ResourceErrorIdent, Texture, TextureView, TextureViewUseError,
    },
    Label, MAX_COLOR_ATTACHMENTS,
};

/// Describes a color attachment to a [`RenderPass`].
#[derive(Debug)]
pub struct RenderPassColorAttachment<'a, A: HalApi> {
    /// The view to use as an attachment.
    pub view: &'a Arc<TextureView<A>>,
    /// The view that will receive the resolved output if multisampling is used.
    pub resolve_target: Option<&'a Arc<TextureView<A>>>,
    /// What operations will be performed on this color attachment.
    pub ops: wgt::Operations<wgt::Color>,
}

/// Describes a depth/stencil attachment to a [`RenderPass`].
///
/// Operations must be given for exactly the aspects the view's format has.
#[derive(Debug)]
pub struct RenderPassDepthStencilAttachment<'a, A: HalApi> {
    pub view: &'a Arc<TextureView<A>>,
    pub depth_ops: Option<wgt::Operations<f32>>,
    pub stencil_ops: Option<wgt::Operations<u32>>,
}

/// Describes the attachments of a render pass.
#[derive(Debug)]
pub struct RenderPassDescriptor<'a, A: HalApi> {
    pub label: Label<'a>,
    /// The color attachments of the render pass. Empty slots are allowed.
    pub color_attachments: &'a [Option<RenderPassColorAttachment<'a, A>>],
    pub depth_stencil_attachment: Option<&'a RenderPassDepthStencilAttachment<'a, A>>,
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RenderPassErrorInner {
    #[error(transparent)]
    Encoder(#[from] CommandEncoderError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    InvalidResource(#[from] InvalidResourceError),
    #[error(transparent)]
    DestroyedResource(#[from] DestroyedResourceError),
    #[error(transparent)]
    TextureView(#[from] TextureViewUseError),
    #[error(transparent)]
    BindGroup(#[from] BindGroupUseError),
    #[error(transparent)]
    MissingTextureUsage(#[from] MissingTextureUsageError),
    #[error("A render pass needs at least one attachment")]
    NoAttachments,
    #[error("The number of color attachments {given} exceeds the limit {limit}")]
    TooManyColorAttachments { given: usize, limit: u32 },
    #[error("Color attachment {index} has format {format:?}, which is not a renderable color format")]
    InvalidColorAttachmentFormat {
        index: usize,
        format: wgt::TextureFormat,
    },
    #[error("Depth/stencil attachment has format {0:?}, which is not a renderable depth/stencil format")]
    InvalidDepthStencilAttachmentFormat(wgt::TextureFormat),
    #[error("Load and store operations for the {aspect:?} aspect of {format:?} must be given exactly when the format has that aspect")]
    InvalidAttachmentOps {
        format: wgt::TextureFormat,
        aspect: wgt::TextureAspect,
    },
    #[error("{0} must view a single mip level and array layer to be an attachment")]
    AttachmentNotSingleSubresource(ResourceErrorIdent),
    #[error("{res} is {actual:?} in size, but the other attachments are {expected:?}")]
    AttachmentSizeMismatch {
        res: ResourceErrorIdent,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("{res} has {actual} samples, but the other attachments have {expected}")]
    AttachmentSampleCountMismatch {
        res: ResourceErrorIdent,
        expected: u32,
        actual: u32,
    },
    #[error("Resolving {0} is not possible, it is not multisampled")]
    InvalidResolveSourceSampleCount(ResourceErrorIdent),
    #[error("Resolve target {0} must not be multisampled")]
    InvalidResolveTargetSampleCount(ResourceErrorIdent),
    #[error("Resolve source format {src:?} differs from resolve target format {dst:?}")]
    ResolveFormatMismatch {
        src: wgt::TextureFormat,
        dst: wgt::TextureFormat,
    },
    #[error("Resolve target {0} has a different size than its source")]
    ResolveSizeMismatch(ResourceErrorIdent),
    #[error("Render pipeline is incompatible with render pass")]
    IncompatiblePipeline(#[from] RenderPassCompatibilityError),
    #[error("Bind group index {index} is greater than the device's requested `max_bind_group` limit {max}")]
    BindGroupIndexOutOfRange { index: u32, max: u32 },
    #[error("A render pipeline must be set")]
    MissingPipeline,
    #[error(transparent)]
    IncompatibleBindGroup(#[from] BinderError),
    #[error("Viewport ({x}, {y}, {w}, {h}) does not fit in the {width}x{height} attachments")]
    InvalidViewportRect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        width: u32,
        height: u32,
    },
    #[error("Viewport depth range {min}..{max} is not within 0..=1")]
    InvalidViewportDepth { min: f32, max: f32 },
}

/// Error encountered when performing a render pass.
#[derive(Clone, Debug, Error)]
#[error("{scope}")]
pub struct RenderPassError {
    pub scope: PassErrorScope,
    #[source]
    pub(super) inner: RenderPassErrorInner,
}

impl RenderPassError {
    pub fn inner(&self) -> &RenderPassErrorInner {
        &self.inner
    }
}

impl From<CommandEncoderError> for RenderPassError {
    fn from(error: CommandEncoderError) -> Self {
        Self {
            scope: PassErrorScope::RenderPass,
            inner: error.into(),
        }
    }
}

impl WebGpuError for RenderPassError {
    fn webgpu_error_type(&self) -> ErrorType {
        match self.inner {
            RenderPassErrorInner::Encoder(ref e) => e.webgpu_error_type(),
            RenderPassErrorInner::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}

impl<T, E> MapPassErr<T, RenderPassError> for Result<T, E>
where
    E: Into<RenderPassErrorInner>,
{
    fn map_pass_err(self, scope: PassErrorScope) -> Result<T, RenderPassError> {
        self.map_err(|inner| RenderPassError {
            scope,
            inner: inner.into(),
        })
    }
}

/// A view used as an attachment, with its texture kept alive.
#[derive(Debug)]
pub(crate) struct AttachmentTarget<A: HalApi> {
    view: Arc<TextureView<A>>,
    _texture: Arc<Texture<A>>,
}

impl<A: HalApi> AttachmentTarget<A> {
    fn new(
        device: &Device<A>,
        view: &Arc<TextureView<A>>,
    ) -> Result<Self, RenderPassErrorInner> {
        view.same_device(device)?;
        view.raw_for_use()?;
        let texture = view
            .parent()
            .ok_or_else(|| DestroyedResourceError(view.error_ident()))?;
        if !view.usage.contains(TextureUsages::RENDER_ATTACHMENT) {
            return Err(MissingTextureUsageError {
                res: view.error_ident(),
                actual: view.usage,
                expected: TextureUsages::RENDER_ATTACHMENT,
            }
            .into());
        }
        if !view.is_single_subresource() {
            return Err(RenderPassErrorInner::AttachmentNotSingleSubresource(
                view.error_ident(),
            ));
        }
        Ok(Self {
            view: Arc::clone(view),
            _texture: texture,
        })
    }

    fn size(&self) -> (u32, u32) {
        (self.view.extent.width, self.view.extent.height)
    }
}

#[derive(Debug)]
pub(crate) struct ColorAttachmentRecord<A: HalApi> {
    target: AttachmentTarget<A>,
    resolve_target: Option<AttachmentTarget<A>>,
    ops: wgt::Operations<wgt::Color>,
}

#[derive(Debug)]
pub(crate) struct DepthStencilAttachmentRecord<A: HalApi> {
    target: AttachmentTarget<A>,
    depth_ops: Option<wgt::Operations<f32>>,
    stencil_ops: Option<wgt::Operations<u32>>,
}

/// Checks every attachment has the same size and sample count.
struct AttachmentShape {
    size: Option<(u32, u32)>,
    sample_count: Option<u32>,
}

impl AttachmentShape {
    fn check<A: HalApi>(&mut self, target: &AttachmentTarget<A>) -> Result<(), RenderPassErrorInner> {
        let size = target.size();
        match self.size {
            Some(expected) if expected != size => {
                return Err(RenderPassErrorInner::AttachmentSizeMismatch {
                    res: target.view.error_ident(),
                    expected,
                    actual: size,
                })
            }
            _ => self.size = Some(size),
        }
        let samples = target.view.samples;
        match self.sample_count {
            Some(expected) if expected != samples => {
                Err(RenderPassErrorInner::AttachmentSampleCountMismatch {
                    res: target.view.error_ident(),
                    expected,
                    actual: samples,
                })
            }
            _ => {
                self.sample_count = Some(samples);
                Ok(())
            }
        }
    }
}

struct ResolvedAttachments<A: HalApi> {
    colors: ArrayVec<Option<ColorAttachmentRecord<A>>, MAX_COLOR_ATTACHMENTS>,
    depth_stencil: Option<DepthStencilAttachmentRecord<A>>,
    context: RenderPassContext,
    extent: wgt::Extent3d,
}

fn resolve_color_attachment<A: HalApi>(
    device: &Device<A>,
    index: usize,
    at: &RenderPassColorAttachment<A>,
    shape: &mut AttachmentShape,
) -> Result<ColorAttachmentRecord<A>, RenderPassErrorInner> {
    let target = AttachmentTarget::new(device, at.view)?;
    let format = at.view.format;
    if !at.view.aspects.contains(hal::FormatAspects::COLOR)
        || !device.capabilities.is_renderable(format)
    {
        return Err(RenderPassErrorInner::InvalidColorAttachmentFormat { index, format });
    }
    shape.check(&target)?;

    let resolve_target = match at.resolve_target {
        Some(resolve_view) => {
            let resolve = AttachmentTarget::new(device, resolve_view)?;
            if at.view.samples == 1 {
                return Err(RenderPassErrorInner::InvalidResolveSourceSampleCount(
                    at.view.error_ident(),
                ));
            }
            if resolve_view.samples != 1 {
                return Err(RenderPassErrorInner::InvalidResolveTargetSampleCount(
                    resolve_view.error_ident(),
                ));
            }
            if resolve_view.format != format {
                return Err(RenderPassErrorInner::ResolveFormatMismatch {
                    src: format,
                    dst: resolve_view.format,
                });
            }
            if resolve.size() != target.size() {
                return Err(RenderPassErrorInner::ResolveSizeMismatch(
                    resolve_view.error_ident(),
                ));
            }
            Some(resolve)
        }
        None => None,
    };

    Ok(ColorAttachmentRecord {
        target,
        resolve_target,
        ops: at.ops,
    })
}

fn resolve_depth_stencil_attachment<A: HalApi>(
    device: &Device<A>,
    at: &RenderPassDepthStencilAttachment<A>,
    shape: &mut AttachmentShape,
) -> Result<DepthStencilAttachmentRecord<A>, RenderPassErrorInner> {
    let target = AttachmentTarget::new(device, at.view)?;
    let format = at.view.format;
    if !format.is_depth_stencil_format() || !device.capabilities.is_renderable(format) {
        return Err(RenderPassErrorInner::InvalidDepthStencilAttachmentFormat(
            format,
        ));
    }
    let aspects = hal::FormatAspects::from(format);
    if aspects.contains(hal::FormatAspects::DEPTH) != at.depth_ops.is_some() {
        return Err(RenderPassErrorInner::InvalidAttachmentOps {
            format,
            aspect: wgt::TextureAspect::DepthOnly,
        });
    }
    if aspects.contains(hal::FormatAspects::STENCIL) != at.stencil_ops.is_some() {
        return Err(RenderPassErrorInner::InvalidAttachmentOps {
            format,
            aspect: wgt::TextureAspect::StencilOnly,
        });
    }
    shape.check(&target)?;

    Ok(DepthStencilAttachmentRecord {
        target,
        depth_ops: at.depth_ops,
        stencil_ops: at.stencil_ops,
    })
}

fn resolve_attachments<A: HalApi>(
    device: &Device<A>,
    desc: &RenderPassDescriptor<A>,
) -> Result<ResolvedAttachments<A>, RenderPassErrorInner> {
    let limit = device.capabilities.limits().max_color_attachments;
    if desc.color_attachments.len() > limit as usize
        || desc.color_attachments.len() > MAX_COLOR_ATTACHMENTS
    {
        return Err(RenderPassErrorInner::TooManyColorAttachments {
            given: desc.color_attachments.len(),
            limit,
        });
    }

    let mut shape = AttachmentShape {
        size: None,
        sample_count: None,
    };
    let mut colors = ArrayVec::new();
    for (index, at) in desc.color_attachments.iter().enumerate() {
        colors.push(match *at {
            Some(ref at) => Some(resolve_color_attachment(device, index, at, &mut shape)?),
            None => None,
        });
    }
    let depth_stencil = match desc.depth_stencil_attachment {
        Some(at) => Some(resolve_depth_stencil_attachment(device, at, &mut shape)?),
        None => None,
    };

    let ((width, height), sample_count) = match (shape.size, shape.sample_count) {
        (Some(size), Some(sample_count)) => (size, sample_count),
        _ => return Err(RenderPassErrorInner::NoAttachments),
    };

    let context = RenderPassContext {
        attachments: AttachmentData {
            colors: colors
                .iter()
                .map(|at| at.as_ref().map(|at| at.target.view.format))
                .collect(),
            resolves: colors
                .iter()
                .flatten()
                .filter_map(|at| at.resolve_target.as_ref().map(|r| r.view.format))
                .collect(),
            depth_stencil: depth_stencil.as_ref().map(|at| at.target.view.format),
        },
        sample_count,
    };

    Ok(ResolvedAttachments {
        colors,
        depth_stencil,
        context,
        extent: wgt::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    })
}

#[derive(Debug)]
pub(crate) enum RenderCommand<A: HalApi> {
    SetPipeline(Arc<RenderPipeline<A>>),
    SetBindGroup {
        layout: Arc<PipelineLayout<A>>,
        index: u32,
        group: Arc<BindGroup<A>>,
    },
    SetViewport {
        rect: hal::Rect<f32>,
        depth: Range<f32>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
}

/// A render pass that ended successfully, waiting for `finish`.
#[derive(Debug)]
pub(crate) struct RecordedRenderPass<A: HalApi> {
    label: Option<String>,
    colors: ArrayVec<Option<ColorAttachmentRecord<A>>, MAX_COLOR_ATTACHMENTS>,
    depth_stencil: Option<DepthStencilAttachmentRecord<A>>,
    extent: wgt::Extent3d,
    sample_count: u32,
    commands: Vec<RenderCommand<A>>,
}

impl<A: HalApi> RecordedRenderPass<A> {
    pub(super) fn encode(&self, raw: &mut A::CommandEncoder) -> Result<(), InvalidResourceError> {
        let mut colors = ArrayVec::<_, MAX_COLOR_ATTACHMENTS>::new();
        for at in self.colors.iter() {
            colors.push(match *at {
                Some(ref at) => Some(hal::ColorAttachment {
                    target: at.target.view.try_raw()?,
                    resolve_target: match at.resolve_target {
                        Some(ref resolve) => Some(resolve.view.try_raw()?),
                        None => None,
                    },
                    ops: at.ops,
                }),
                None => None,
            });
        }
        let depth_stencil_attachment = match self.depth_stencil {
            Some(ref at) => Some(hal::DepthStencilAttachment {
                target: at.target.view.try_raw()?,
                depth_ops: at.depth_ops,
                stencil_ops: at.stencil_ops,
            }),
            None => None,
        };

        let desc = hal::RenderPassDescriptor {
            label: self.label.as_deref(),
            extent: self.extent,
            sample_count: self.sample_count,
            color_attachments: &colors,
            depth_stencil_attachment,
        };
        unsafe { raw.begin_render_pass(&desc) };
        for command in self.commands.iter() {
            match *command {
                RenderCommand::SetPipeline(ref pipeline) => unsafe {
                    raw.set_render_pipeline(pipeline.try_raw()?)
                },
                RenderCommand::SetBindGroup {
                    ref layout,
                    index,
                    ref group,
                } => unsafe { raw.set_bind_group(layout.try_raw()?, index, group.try_raw()?, &[]) },
                RenderCommand::SetViewport {
                    ref rect,
                    ref depth,
                } => unsafe { raw.set_viewport(rect, depth.clone()) },
                RenderCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => unsafe { raw.draw(first_vertex, vertex_count, first_instance, instance_count) },
            }
        }
        unsafe { raw.end_render_pass() };
        Ok(())
    }
}

/// An open render pass.
///
/// The encoder is locked until [`RenderPass::end`] is called. Errors raised
/// by pass commands are kept, later commands are ignored, and the first error
/// is reported when the pass ends.
#[derive(Debug)]
pub struct RenderPass<'e, A: HalApi> {
    encoder: &'e CommandEncoder<A>,
    base: BasePass<RenderCommand<A>>,
    colors: ArrayVec<Option<ColorAttachmentRecord<A>>, MAX_COLOR_ATTACHMENTS>,
    depth_stencil: Option<DepthStencilAttachmentRecord<A>>,
    context: RenderPassContext,
    extent: wgt::Extent3d,
    binder: Binder<A>,
    pipeline: Option<Arc<RenderPipeline<A>>>,
    used_buffers: Vec<Arc<Buffer<A>>>,
    error: Option<RenderPassError>,
}

impl<A: HalApi> CommandEncoder<A> {
    /// Open a render pass, locking the encoder until the pass ends.
    ///
    /// Opening a pass while another one is open poisons the encoder.
    pub fn begin_render_pass<'e>(
        &'e self,
        desc: &RenderPassDescriptor<A>,
    ) -> Result<RenderPass<'e, A>, RenderPassError> {
        profiling::scope!("CommandEncoder::begin_render_pass");
        api_log!("CommandEncoder::begin_render_pass {:?}", desc.label);

        let attachments: Result<_, RenderPassError> =
            self.record("CommandEncoder::begin_render_pass", |data| {
                let attachments = resolve_attachments(&self.device, desc)
                    .map_err(|inner| RenderPassError {
                        scope: PassErrorScope::RenderPass,
                        inner,
                    })?;
                data.status = CommandEncoderStatus::Locked;
                Ok(attachments)
            });
        let attachments = attachments?;

        Ok(RenderPass {
            encoder: self,
            base: BasePass::new(&desc.label),
            colors: attachments.colors,
            depth_stencil: attachments.depth_stencil,
            context: attachments.context,
            extent: attachments.extent,
            binder: Binder::new(),
            pipeline: None,
            used_buffers: Vec::new(),
            error: None,
        })
    }
}

impl<'e, A: HalApi> RenderPass<'e, A> {
    pub fn label(&self) -> Option<&str> {
        self.base.label.as_deref()
    }

    fn device(&self) -> &Device<A> {
        &self.encoder.device
    }

    fn store_error(&mut self, scope: PassErrorScope, result: Result<(), RenderPassErrorInner>) {
        if let Err(inner) = result {
            log::trace!("Render pass {:?} failed {scope}: {inner}", self.base.label);
            self.error = Some(RenderPassError { scope, inner });
        }
    }

    pub fn set_pipeline(&mut self, pipeline: &Arc<RenderPipeline<A>>) {
        api_log!("RenderPass::set_pipeline {}", pipeline.error_ident());
        if self.error.is_none() {
            let result = self.set_pipeline_inner(pipeline);
            self.store_error(PassErrorScope::SetPipeline, result);
        }
    }

    fn set_pipeline_inner(
        &mut self,
        pipeline: &Arc<RenderPipeline<A>>,
    ) -> Result<(), RenderPassErrorInner> {
        pipeline.same_device(self.device())?;
        pipeline.try_raw()?;
        pipeline
            .pass_context
            .check_compatible(&self.context, RenderPassCompatibilityCheckType::RenderPipeline)?;

        self.binder.change_pipeline_layout(&pipeline.layout);
        self.pipeline = Some(Arc::clone(pipeline));
        self.base
            .commands
            .push(RenderCommand::SetPipeline(Arc::clone(pipeline)));
        Ok(())
    }

    pub fn set_bind_group(&mut self, index: u32, group: &Arc<BindGroup<A>>) {
        api_log!("RenderPass::set_bind_group {index} {}", group.error_ident());
        if self.error.is_none() {
            let result = self.set_bind_group_inner(index, group);
            self.store_error(PassErrorScope::SetBindGroup, result);
        }
    }

    fn set_bind_group_inner(
        &mut self,
        index: u32,
        group: &Arc<BindGroup<A>>,
    ) -> Result<(), RenderPassErrorInner> {
        let max = self.device().capabilities.limits().max_bind_groups;
        if index >= max || index as usize >= crate::MAX_BIND_GROUPS {
            return Err(RenderPassErrorInner::BindGroupIndexOutOfRange { index, max });
        }
        group.same_device(self.device())?;
        group.try_raw()?;
        group.check_resources()?;

        self.used_buffers
            .extend(group.used_buffers.iter().map(Arc::clone));
        self.binder.assign_group(index as usize, group);
        Ok(())
    }

    /// Set the viewport transform, in attachment pixels.
    pub fn set_viewport(&mut self, x: f32, y: f32, w: f32, h: f32, min_depth: f32, max_depth: f32) {
        api_log!("RenderPass::set_viewport {x} {y} {w} {h} {min_depth}..{max_depth}");
        if self.error.is_none() {
            let result = self.set_viewport_inner(hal::Rect { x, y, w, h }, min_depth..max_depth);
            self.store_error(PassErrorScope::SetViewport, result);
        }
    }

    fn set_viewport_inner(
        &mut self,
        rect: hal::Rect<f32>,
        depth: Range<f32>,
    ) -> Result<(), RenderPassErrorInner> {
        let (width, height) = (self.extent.width, self.extent.height);
        let finite = [rect.x, rect.y, rect.w, rect.h]
            .iter()
            .all(|value| value.is_finite());
        if !finite
            || rect.x < 0.0
            || rect.y < 0.0
            || rect.w < 0.0
            || rect.h < 0.0
            || rect.x + rect.w > width as f32
            || rect.y + rect.h > height as f32
        {
            return Err(RenderPassErrorInner::InvalidViewportRect {
                x: rect.x,
                y: rect.y,
                w: rect.w,
                h: rect.h,
                width,
                height,
            });
        }
        if !(0.0..=1.0).contains(&depth.start)
            || !(0.0..=1.0).contains(&depth.end)
            || depth.start > depth.end
        {
            return Err(RenderPassErrorInner::InvalidViewportDepth {
                min: depth.start,
                max: depth.end,
            });
        }
        self.base
            .commands
            .push(RenderCommand::SetViewport { rect, depth });
        Ok(())
    }

    /// Draw primitives.
    ///
    /// Nothing checks the vertex data; a pipeline and the bind groups its
    /// layout expects must be set.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        api_log!("RenderPass::draw {vertex_count} {instance_count} {first_vertex} {first_instance}");
        if self.error.is_none() {
            let result = self.draw_inner(vertex_count, instance_count, first_vertex, first_instance);
            self.store_error(PassErrorScope::Draw, result);
        }
    }

    fn draw_inner(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RenderPassErrorInner> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(RenderPassErrorInner::MissingPipeline)?;
        self.binder.check_compatibility(&**pipeline)?;

        if let Some((layout, rebinds)) = self.binder.take_rebinds() {
            self.base
                .commands
                .extend(rebinds.into_iter().map(|(index, group)| RenderCommand::SetBindGroup {
                    layout: Arc::clone(&layout),
                    index,
                    group,
                }));
        }
        self.base.commands.push(RenderCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    /// End the pass and unlock the encoder.
    ///
    /// If any pass command failed, the error is reported now and the encoder
    /// becomes invalid.
    pub fn end(self) -> Result<(), RenderPassError> {
        profiling::scope!("RenderPass::end");
        api_log!("RenderPass::end {:?}", self.base.label);

        let RenderPass {
            encoder,
            base,
            colors,
            depth_stencil,
            context,
            extent,
            used_buffers,
            error,
            ..
        } = self;

        let result: Result<(), RenderPassError> = match error {
            Some(error) => {
                encoder.invalidate();
                Err(error)
            }
            None => {
                let recorded = RecordedRenderPass {
                    label: crate::hal_label(base.label.as_deref(), encoder.device.instance_flags)
                        .map(str::to_string),
                    colors,
                    depth_stencil,
                    extent,
                    sample_count: context.sample_count,
                    commands: base.commands,
                };
                encoder
                    .unlock(Command::RenderPass(recorded), used_buffers)
                    .map_pass_err(PassErrorScope::EndPass)
            }
        };
        if let Err(ref error) = result {
            encoder
                .device
                .handle_error("RenderPass::end", &encoder.label, error.clone());
        }
        result
    }
}
