/*! This library describes the native backend boundary of the WebGPU binding.
 *  It follows WebGPU for the most part, re-using webgpu-types,
 *  with the following deviations:
 *  - Fully unsafe: zero overhead, zero validation.
 *  - Compile-time backend selection via traits.
 *  - Objects are passed by references and returned by value. No IDs.
 *  - Mapping is persistent, with explicit synchronization.
 *  - Completion is observed through fences signalled at submission.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Every method here is unsafe, the contract is on the trait.
    clippy::missing_safety_doc,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

pub mod noop;

pub mod api {
    pub use super::noop::Api as Noop;
}

use std::{fmt, ops::Range, ptr::NonNull};

use bitflags::bitflags;
use thiserror::Error;

pub const MAX_BIND_GROUPS: usize = wgt::MAX_BIND_GROUPS;
pub const MAX_COLOR_ATTACHMENTS: usize = wgt::MAX_COLOR_ATTACHMENTS;

pub type Label<'a> = Option<&'a str>;
pub type MemoryRange = Range<wgt::BufferAddress>;
pub type FenceValue = u64;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device is lost")]
    Lost,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ShaderError {
    #[error("compilation failed: {0:?}")]
    Compilation(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("linkage failed for stage {0:?}: {1}")]
    Linkage(wgt::ShaderStages, String),
    #[error("entry point for stage {0:?} is invalid")]
    EntryPoint(naga::ShaderStage),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("failed to initialize the backend: {message}")]
pub struct InstanceError {
    message: String,
}

impl InstanceError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

pub trait Api: Clone + fmt::Debug + Sized + 'static {
    type Instance: Instance<Self>;
    type Adapter: Adapter<Self>;
    type Device: Device<Self>;
    type Queue: Queue<Self>;

    type CommandEncoder: CommandEncoder<Self>;
    type CommandBuffer: fmt::Debug + Send + Sync;

    type Buffer: fmt::Debug + Send + Sync + 'static;
    type Texture: fmt::Debug + Send + Sync + 'static;
    type TextureView: fmt::Debug + Send + Sync;
    type Fence: fmt::Debug + Send + Sync;

    type BindGroupLayout: fmt::Debug + Send + Sync;
    type BindGroup: fmt::Debug + Send + Sync;
    type PipelineLayout: fmt::Debug + Send + Sync;
    type ShaderModule: fmt::Debug + Send + Sync;
    type RenderPipeline: fmt::Debug + Send + Sync;
    type ComputePipeline: fmt::Debug + Send + Sync;
}

pub trait Instance<A: Api>: fmt::Debug + Sized + Send + Sync {
    unsafe fn init(desc: &InstanceDescriptor) -> Result<Self, InstanceError>;
    unsafe fn enumerate_adapters(&self) -> Vec<ExposedAdapter<A>>;
}

pub trait Adapter<A: Api>: fmt::Debug + Send + Sync {
    unsafe fn open(
        &self,
        features: wgt::Features,
        limits: &wgt::Limits,
    ) -> Result<OpenDevice<A>, DeviceError>;

    /// Return the set of supported capabilities for a texture format.
    unsafe fn texture_format_capabilities(
        &self,
        format: wgt::TextureFormat,
    ) -> TextureFormatCapabilities;
}

pub trait Device<A: Api>: fmt::Debug + Send + Sync {
    /// Exit connection to this logical device.
    unsafe fn exit(self, queue: A::Queue);
    /// Creates a new buffer.
    ///
    /// The initial usage is `BufferUses::empty()`.
    unsafe fn create_buffer(&self, desc: &BufferDescriptor) -> Result<A::Buffer, DeviceError>;
    unsafe fn destroy_buffer(&self, buffer: A::Buffer);
    /// Map `range` of `buffer` into host memory.
    ///
    /// The returned pointer stays valid until [`Device::unmap_buffer`].
    unsafe fn map_buffer(
        &self,
        buffer: &A::Buffer,
        range: MemoryRange,
    ) -> Result<BufferMapping, DeviceError>;
    unsafe fn unmap_buffer(&self, buffer: &A::Buffer) -> Result<(), DeviceError>;

    /// Creates a new texture.
    ///
    /// The initial usage for all subresources is `TextureUses::UNINITIALIZED`.
    unsafe fn create_texture(&self, desc: &TextureDescriptor) -> Result<A::Texture, DeviceError>;
    unsafe fn destroy_texture(&self, texture: A::Texture);
    unsafe fn create_texture_view(
        &self,
        texture: &A::Texture,
        desc: &TextureViewDescriptor,
    ) -> Result<A::TextureView, DeviceError>;
    unsafe fn destroy_texture_view(&self, view: A::TextureView);

    unsafe fn create_command_encoder(
        &self,
        desc: &CommandEncoderDescriptor,
    ) -> Result<A::CommandEncoder, DeviceError>;
    /// All command buffers produced by the encoder must have been destroyed.
    unsafe fn destroy_command_encoder(&self, encoder: A::CommandEncoder);
    unsafe fn destroy_command_buffer(&self, cmd_buf: A::CommandBuffer);

    unsafe fn create_bind_group_layout(
        &self,
        desc: &BindGroupLayoutDescriptor,
    ) -> Result<A::BindGroupLayout, DeviceError>;
    unsafe fn destroy_bind_group_layout(&self, bg_layout: A::BindGroupLayout);
    unsafe fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDescriptor<A>,
    ) -> Result<A::PipelineLayout, DeviceError>;
    unsafe fn destroy_pipeline_layout(&self, pipeline_layout: A::PipelineLayout);
    unsafe fn create_bind_group(
        &self,
        desc: &BindGroupDescriptor<A>,
    ) -> Result<A::BindGroup, DeviceError>;
    unsafe fn destroy_bind_group(&self, group: A::BindGroup);

    unsafe fn create_shader_module(
        &self,
        desc: &ShaderModuleDescriptor,
        shader: NagaShader,
    ) -> Result<A::ShaderModule, ShaderError>;
    unsafe fn destroy_shader_module(&self, module: A::ShaderModule);
    unsafe fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDescriptor<A>,
    ) -> Result<A::RenderPipeline, PipelineError>;
    unsafe fn destroy_render_pipeline(&self, pipeline: A::RenderPipeline);
    unsafe fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDescriptor<A>,
    ) -> Result<A::ComputePipeline, PipelineError>;
    unsafe fn destroy_compute_pipeline(&self, pipeline: A::ComputePipeline);

    unsafe fn create_fence(&self) -> Result<A::Fence, DeviceError>;
    unsafe fn destroy_fence(&self, fence: A::Fence);
    unsafe fn get_fence_value(&self, fence: &A::Fence) -> Result<FenceValue, DeviceError>;
    /// Calling wait with a lower value than the current fence value will immediately return.
    ///
    /// Returns `Ok(false)` on timeout.
    unsafe fn wait(
        &self,
        fence: &A::Fence,
        value: FenceValue,
        timeout_ms: u32,
    ) -> Result<bool, DeviceError>;
}

pub trait Queue<A: Api>: fmt::Debug + Send + Sync {
    /// Submits the command buffers for execution on GPU.
    ///
    /// Command buffers execute in slice order. Once all of them have finished,
    /// the fence is set to the signal value.
    unsafe fn submit(
        &mut self,
        command_buffers: &[&A::CommandBuffer],
        signal_fence: (&mut A::Fence, FenceValue),
    ) -> Result<(), DeviceError>;
}

/// Encoder and allocation pool for `CommandBuffer`.
///
/// The encoder records commands between `begin_encoding` and `end_encoding`;
/// all validation has happened before any of these calls.
pub trait CommandEncoder<A: Api>: fmt::Debug + Send + Sync {
    /// Begin encoding a new command buffer.
    unsafe fn begin_encoding(&mut self, label: Label) -> Result<(), DeviceError>;
    /// Discard currently recorded list, if any.
    unsafe fn discard_encoding(&mut self);
    unsafe fn end_encoding(&mut self) -> Result<A::CommandBuffer, DeviceError>;

    // copy operations

    unsafe fn clear_buffer(&mut self, buffer: &A::Buffer, range: MemoryRange);

    unsafe fn copy_buffer_to_buffer<T>(&mut self, src: &A::Buffer, dst: &A::Buffer, regions: T)
    where
        T: Iterator<Item = BufferCopy>;

    unsafe fn copy_buffer_to_texture<T>(&mut self, src: &A::Buffer, dst: &A::Texture, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>;

    unsafe fn copy_texture_to_buffer<T>(&mut self, src: &A::Texture, dst: &A::Buffer, regions: T)
    where
        T: Iterator<Item = BufferTextureCopy>;

    // pass common

    /// Sets the bind group at `index` to `group`, assuming the layout
    /// of all the preceeding groups to be taken from `layout`.
    unsafe fn set_bind_group(
        &mut self,
        layout: &A::PipelineLayout,
        index: u32,
        group: &A::BindGroup,
        dynamic_offsets: &[wgt::DynamicOffset],
    );

    // render passes

    /// Begins a render pass, clears all active bindings.
    unsafe fn begin_render_pass(&mut self, desc: &RenderPassDescriptor<A>);
    unsafe fn end_render_pass(&mut self);

    unsafe fn set_render_pipeline(&mut self, pipeline: &A::RenderPipeline);
    unsafe fn set_vertex_buffer<'a>(&mut self, index: u32, binding: BufferBinding<'a, A>);
    unsafe fn set_viewport(&mut self, rect: &Rect<f32>, depth_range: Range<f32>);

    unsafe fn draw(
        &mut self,
        start_vertex: u32,
        vertex_count: u32,
        start_instance: u32,
        instance_count: u32,
    );

    // compute passes

    /// Begins a compute pass, clears all active bindings.
    unsafe fn begin_compute_pass(&mut self, desc: &ComputePassDescriptor);
    unsafe fn end_compute_pass(&mut self);

    unsafe fn set_compute_pipeline(&mut self, pipeline: &A::ComputePipeline);

    unsafe fn dispatch(&mut self, count: [u32; 3]);
}

bitflags!(
    /// Texture format capability flags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TextureFormatCapabilities: u32 {
        /// Format can be sampled.
        const SAMPLED = 1 << 0;
        /// Format can be sampled with a linear sampler.
        const SAMPLED_LINEAR = 1 << 1;

        /// Format can be used as storage with write-only access.
        const STORAGE = 1 << 4;
        /// Format can be used as storage with read and read/write access.
        const STORAGE_READ_WRITE = 1 << 5;

        /// Format can be used as color and input attachment.
        const COLOR_ATTACHMENT = 1 << 8;
        /// Format can be used as color (with blending) and input attachment.
        const COLOR_ATTACHMENT_BLEND = 1 << 9;
        /// Format can be used as depth-stencil and input attachment.
        const DEPTH_STENCIL_ATTACHMENT = 1 << 10;
        /// Format can be multisampled with 4 samples.
        const MULTISAMPLE_X4 = 1 << 11;

        /// Format can be copied from.
        const COPY_SRC = 1 << 12;
        /// Format can be copied to.
        const COPY_DST = 1 << 13;
    }
);

impl TextureFormatCapabilities {
    /// Translate the guaranteed format features into backend capabilities.
    pub fn from_format_features(
        format: wgt::TextureFormat,
        features: wgt::TextureFormatFeatures,
    ) -> Self {
        let mut caps = Self::empty();
        let usages = features.allowed_usages;
        caps.set(
            Self::SAMPLED,
            usages.contains(wgt::TextureUsages::TEXTURE_BINDING),
        );
        caps.set(
            Self::SAMPLED_LINEAR,
            features
                .flags
                .contains(wgt::TextureFormatFeatureFlags::FILTERABLE),
        );
        caps.set(
            Self::STORAGE,
            usages.contains(wgt::TextureUsages::STORAGE_BINDING),
        );
        caps.set(
            Self::STORAGE_READ_WRITE,
            features
                .flags
                .contains(wgt::TextureFormatFeatureFlags::STORAGE_READ_WRITE),
        );
        let renderable = usages.contains(wgt::TextureUsages::RENDER_ATTACHMENT);
        if format.is_depth_stencil_format() {
            caps.set(Self::DEPTH_STENCIL_ATTACHMENT, renderable);
        } else {
            caps.set(Self::COLOR_ATTACHMENT, renderable);
            caps.set(
                Self::COLOR_ATTACHMENT_BLEND,
                renderable
                    && features
                        .flags
                        .contains(wgt::TextureFormatFeatureFlags::BLENDABLE),
            );
        }
        caps.set(
            Self::MULTISAMPLE_X4,
            features
                .flags
                .contains(wgt::TextureFormatFeatureFlags::MULTISAMPLE_X4),
        );
        caps.set(Self::COPY_SRC, usages.contains(wgt::TextureUsages::COPY_SRC));
        caps.set(Self::COPY_DST, usages.contains(wgt::TextureUsages::COPY_DST));
        caps
    }

    /// Texture usages a texture with these capabilities may be created with.
    pub fn allowed_usages(self) -> wgt::TextureUsages {
        let mut usages = wgt::TextureUsages::empty();
        usages.set(wgt::TextureUsages::COPY_SRC, self.contains(Self::COPY_SRC));
        usages.set(wgt::TextureUsages::COPY_DST, self.contains(Self::COPY_DST));
        usages.set(
            wgt::TextureUsages::TEXTURE_BINDING,
            self.contains(Self::SAMPLED),
        );
        usages.set(
            wgt::TextureUsages::STORAGE_BINDING,
            self.contains(Self::STORAGE),
        );
        usages.set(
            wgt::TextureUsages::RENDER_ATTACHMENT,
            self.intersects(Self::COLOR_ATTACHMENT | Self::DEPTH_STENCIL_ATTACHMENT),
        );
        usages
    }
}

bitflags!(
    /// Aspects of a texture format.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct FormatAspects: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
);

impl FormatAspects {
    /// The aspects of `format` selected by `aspect`.
    pub fn new(format: wgt::TextureFormat, aspect: wgt::TextureAspect) -> Self {
        let aspect_mask = match aspect {
            wgt::TextureAspect::All => Self::all(),
            wgt::TextureAspect::DepthOnly => Self::DEPTH,
            wgt::TextureAspect::StencilOnly => Self::STENCIL,
        };
        Self::from(format) & aspect_mask
    }
}

impl From<wgt::TextureFormat> for FormatAspects {
    fn from(format: wgt::TextureFormat) -> Self {
        match format {
            wgt::TextureFormat::Stencil8 => Self::STENCIL,
            wgt::TextureFormat::Depth16Unorm
            | wgt::TextureFormat::Depth32Float
            | wgt::TextureFormat::Depth24Plus => Self::DEPTH,
            wgt::TextureFormat::Depth24PlusStencil8 => Self::DEPTH | Self::STENCIL,
            _ => Self::COLOR,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstanceDescriptor<'a> {
    pub name: &'a str,
    pub flags: wgt::InstanceFlags,
}

#[derive(Clone, Debug)]
pub struct Capabilities {
    pub limits: wgt::Limits,
}

#[derive(Debug)]
pub struct ExposedAdapter<A: Api> {
    pub adapter: A::Adapter,
    pub info: wgt::AdapterInfo,
    pub features: wgt::Features,
    pub capabilities: Capabilities,
}

#[derive(Debug)]
pub struct OpenDevice<A: Api> {
    pub device: A::Device,
    pub queue: A::Queue,
}

/// Host view of mapped buffer memory.
#[derive(Debug)]
pub struct BufferMapping {
    pub ptr: NonNull<u8>,
    pub is_coherent: bool,
}

#[derive(Clone, Debug)]
pub struct BufferDescriptor<'a> {
    pub label: Label<'a>,
    pub size: wgt::BufferAddress,
    pub usage: wgt::BufferUsages,
}

#[derive(Clone, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: Label<'a>,
    pub size: wgt::Extent3d,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: wgt::TextureDimension,
    pub format: wgt::TextureFormat,
    pub usage: wgt::TextureUsages,
}

/// TextureView descriptor.
///
/// Valid usage:
///. - `format` has to be the same as `TextureDescriptor::format`, or its sRGB sibling
///. - `dimension` has to be compatible with `TextureDescriptor::dimension`
///. - `range` has to be a subset of parent texture
#[derive(Clone, Debug)]
pub struct TextureViewDescriptor<'a> {
    pub label: Label<'a>,
    pub format: wgt::TextureFormat,
    pub dimension: wgt::TextureViewDimension,
    pub aspects: FormatAspects,
    pub mip_levels: Range<u32>,
    pub array_layers: Range<u32>,
}

#[derive(Clone, Debug)]
pub struct CommandEncoderDescriptor<'a> {
    pub label: Label<'a>,
}

#[derive(Clone, Debug)]
pub struct BindGroupLayoutDescriptor<'a> {
    pub label: Label<'a>,
    pub entries: &'a [wgt::BindGroupLayoutEntry],
}

#[derive(Clone, Debug)]
pub struct PipelineLayoutDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub bind_group_layouts: &'a [&'a A::BindGroupLayout],
}

#[derive(Debug)]
pub struct BufferBinding<'a, A: Api> {
    pub buffer: &'a A::Buffer,
    pub offset: wgt::BufferAddress,
    pub size: Option<wgt::BufferSize>,
}

// Rust gets confused about the impl requirements for `A`
impl<A: Api> Clone for BufferBinding<'_, A> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer,
            offset: self.offset,
            size: self.size,
        }
    }
}

#[derive(Debug)]
pub enum BindingResource<'a, A: Api> {
    Buffer(BufferBinding<'a, A>),
    TextureView(&'a A::TextureView),
}

#[derive(Debug)]
pub struct BindGroupEntry<'a, A: Api> {
    pub binding: u32,
    pub resource: BindingResource<'a, A>,
}

#[derive(Debug)]
pub struct BindGroupDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub layout: &'a A::BindGroupLayout,
    pub entries: &'a [BindGroupEntry<'a, A>],
}

/// Naga shader module.
#[derive(Debug)]
pub struct NagaShader {
    /// Shader module IR.
    pub module: naga::Module,
    /// Analysis information of the module.
    pub info: naga::valid::ModuleInfo,
}

#[derive(Clone, Debug)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Label<'a>,
}

/// Describes a programmable pipeline stage.
#[derive(Debug)]
pub struct ProgrammableStage<'a, A: Api> {
    /// The compiled shader module for this stage.
    pub module: &'a A::ShaderModule,
    /// The name of the entry point in the compiled shader. There must be a function with this name
    ///  in the shader.
    pub entry_point: &'a str,
}

/// Describes a compute pipeline.
#[derive(Debug)]
pub struct ComputePipelineDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    /// The layout of bind groups for this pipeline.
    pub layout: &'a A::PipelineLayout,
    /// The compiled compute stage and its entry point.
    pub stage: ProgrammableStage<'a, A>,
}

/// Describes a render (graphics) pipeline.
#[derive(Debug)]
pub struct RenderPipelineDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    /// The layout of bind groups for this pipeline.
    pub layout: &'a A::PipelineLayout,
    /// The vertex stage for this pipeline.
    pub vertex_stage: ProgrammableStage<'a, A>,
    /// The properties of the pipeline at the primitive assembly and rasterization level.
    pub topology: wgt::PrimitiveTopology,
    /// The effect of draw calls on the depth and stencil aspects of the output target, if any.
    pub depth_stencil: Option<wgt::DepthStencilState>,
    /// The multi-sampling properties of the pipeline.
    pub multisample: wgt::MultisampleState,
    /// The fragment stage for this pipeline.
    pub fragment_stage: Option<ProgrammableStage<'a, A>>,
    /// The effect of draw calls on the color aspect of the output target.
    pub color_targets: &'a [Option<wgt::ColorTargetState>],
}

#[derive(Clone, Debug)]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub w: T,
    pub h: T,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferCopy {
    pub src_offset: wgt::BufferAddress,
    pub dst_offset: wgt::BufferAddress,
    pub size: wgt::BufferSize,
}

#[derive(Clone, Debug)]
pub struct TextureCopyBase {
    pub mip_level: u32,
    pub array_layer: u32,
    /// Origin within a texture.
    pub origin: wgt::Origin3d,
    pub aspect: FormatAspects,
}

#[derive(Clone, Debug)]
pub struct BufferTextureCopy {
    pub buffer_layout: wgt::ImageDataLayout,
    pub texture_base: TextureCopyBase,
    pub size: wgt::Extent3d,
}

#[derive(Debug)]
pub struct ColorAttachment<'a, A: Api> {
    pub target: &'a A::TextureView,
    pub resolve_target: Option<&'a A::TextureView>,
    pub ops: wgt::Operations<wgt::Color>,
}

#[derive(Debug)]
pub struct DepthStencilAttachment<'a, A: Api> {
    pub target: &'a A::TextureView,
    pub depth_ops: Option<wgt::Operations<f32>>,
    pub stencil_ops: Option<wgt::Operations<u32>>,
}

#[derive(Debug)]
pub struct RenderPassDescriptor<'a, A: Api> {
    pub label: Label<'a>,
    pub extent: wgt::Extent3d,
    pub sample_count: u32,
    pub color_attachments: &'a [Option<ColorAttachment<'a, A>>],
    pub depth_stencil_attachment: Option<DepthStencilAttachment<'a, A>>,
}

#[derive(Clone, Debug)]
pub struct ComputePassDescriptor<'a> {
    pub label: Label<'a>,
}

#[test]
fn test_default_limits() {
    let limits = wgt::Limits::default();
    assert!(limits.max_bind_groups <= MAX_BIND_GROUPS as u32);
    assert!(limits.max_color_attachments <= MAX_COLOR_ATTACHMENTS as u32);
}

#[test]
fn format_capabilities_follow_usages() {
    let format = wgt::TextureFormat::Rgba8Unorm;
    let features = format.guaranteed_format_features(wgt::Features::empty());
    let caps = TextureFormatCapabilities::from_format_features(format, features);
    assert!(caps.contains(TextureFormatCapabilities::COLOR_ATTACHMENT_BLEND));
    assert_eq!(caps.allowed_usages(), features.allowed_usages);

    let depth = wgt::TextureFormat::Depth24Plus;
    let caps = TextureFormatCapabilities::from_format_features(
        depth,
        depth.guaranteed_format_features(wgt::Features::empty()),
    );
    assert!(caps.contains(TextureFormatCapabilities::DEPTH_STENCIL_ATTACHMENT));
    assert!(!caps.contains(TextureFormatCapabilities::COPY_SRC));
}
