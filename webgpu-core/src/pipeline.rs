use crate::{
    binding_model::PipelineLayout,
    device::{Device, DeviceError, MissingFeatures, RenderPassContext},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource::{InvalidResourceError, Labeled},
    resource_log,
    storage::ResourceId,
    validation, Label,
};

use arrayvec::ArrayVec;
use hal::Device as _;
use thiserror::Error;

use std::{borrow::Cow, sync::Arc};

/// Source of a shader module.
#[derive(Clone, Debug)]
pub enum ShaderModuleSource<'a> {
    Wgsl(Cow<'a, str>),
    /// A module that was parsed already, skipping the WGSL front end.
    Naga(Cow<'static, naga::Module>),
}

#[derive(Clone, Debug)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Label<'a>,
    pub source: ShaderModuleSource<'a>,
}

#[derive(Debug)]
pub struct ShaderModule<A: HalApi> {
    pub(crate) raw: Option<A::ShaderModule>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) interface: Option<validation::Interface>,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for ShaderModule<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_shader_module(raw);
            }
        }
        self.device.store.lock().shader_modules.remove(self.id);
    }
}

impl<A: HalApi> ShaderModule<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    /// Name and stage of every entry point, in declaration order.
    ///
    /// Empty for a module that failed to compile.
    pub fn entry_points(&self) -> Vec<(String, naga::ShaderStage)> {
        match self.interface {
            Some(ref interface) => interface
                .entry_points()
                .map(|(name, stage)| (name.to_string(), stage))
                .collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn try_raw(&self) -> Result<&A::ShaderModule, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    /// Check `stage` of `layout` against the entry point named `name`.
    pub(crate) fn check_stage(
        &self,
        layout: &PipelineLayout<A>,
        stage: naga::ShaderStage,
        name: Option<&str>,
    ) -> Result<&validation::EntryPoint, validation::StageError> {
        let interface = match (self.raw.as_ref(), self.interface.as_ref()) {
            (Some(_), Some(interface)) => interface,
            _ => return Err(validation::StageError::InvalidModule),
        };
        interface.check_stage(layout, stage, name)
    }
}

crate::impl_resource_type!(ShaderModule);
crate::impl_labeled!(ShaderModule);
crate::impl_parent_device!(ShaderModule);

/// A shader front-end or validation diagnostic, rendered against its source.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ShaderError {
    message: String,
    location: Option<naga::SourceLocation>,
}

impl ShaderError {
    pub(crate) fn parsing(error: &naga::front::wgsl::ParseError, source: &str) -> Self {
        Self {
            message: error.emit_to_string(source),
            location: error.location(source),
        }
    }

    pub(crate) fn validation(
        error: &naga::WithSpan<naga::valid::ValidationError>,
        source: &str,
    ) -> Self {
        Self {
            message: error.emit_to_string(source),
            location: error.location(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Line and column of the first offending span, if there is one.
    pub fn location(&self) -> Option<naga::SourceLocation> {
        self.location
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateShaderModuleError {
    #[error("Shader parsing failed: {0}")]
    Parsing(#[source] ShaderError),
    #[error("Shader validation failed: {0}")]
    Validation(#[source] ShaderError),
    #[error("Failed to generate the backend-specific code: {0}")]
    Generation(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(
        "Shader global {bind:?} uses a group index {group} that exceeds the max_bind_groups limit of {limit}."
    )]
    InvalidGroupIndex {
        bind: naga::ResourceBinding,
        group: u32,
        limit: u32,
    },
}

impl CreateShaderModuleError {
    pub fn location(&self) -> Option<naga::SourceLocation> {
        match *self {
            Self::Parsing(ref err) | Self::Validation(ref err) => err.location(),
            _ => None,
        }
    }

    /// Whether the error is a diagnostic of the shader source itself.
    pub(crate) fn is_compilation(&self) -> bool {
        matches!(*self, Self::Parsing(_) | Self::Validation(_))
    }
}

impl WebGpuError for CreateShaderModuleError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::Generation(_) => ErrorType::Internal,
            Self::Parsing(_) | Self::Validation(_) | Self::InvalidGroupIndex { .. } => {
                ErrorType::Validation
            }
        }
    }
}

/// Describes a programmable pipeline stage.
#[derive(Debug)]
pub struct ProgrammableStageDescriptor<'a, A: HalApi> {
    /// The compiled shader module for this stage.
    pub module: &'a Arc<ShaderModule<A>>,
    /// The name of the entry point in the compiled shader. If `None`, the
    /// module must have exactly one entry point for the stage.
    pub entry_point: Option<Cow<'a, str>>,
}

/// Describes a compute pipeline.
#[derive(Debug)]
pub struct ComputePipelineDescriptor<'a, A: HalApi> {
    pub label: Label<'a>,
    /// The layout of bind groups for this pipeline.
    pub layout: &'a Arc<PipelineLayout<A>>,
    /// The compiled compute stage and its entry point.
    pub stage: ProgrammableStageDescriptor<'a, A>,
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateComputePipelineError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Pipeline layout is invalid")]
    InvalidLayout(#[source] InvalidResourceError),
    #[error("Error matching shader requirements against the pipeline")]
    Stage(#[from] validation::StageError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebGpuError for CreateComputePipelineError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::Internal(_) => ErrorType::Internal,
            Self::InvalidLayout(_) | Self::Stage(_) => ErrorType::Validation,
        }
    }
}

#[derive(Debug)]
pub struct ComputePipeline<A: HalApi> {
    pub(crate) raw: Option<A::ComputePipeline>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) layout: Arc<PipelineLayout<A>>,
    pub(crate) _shader_module: Arc<ShaderModule<A>>,
    pub(crate) workgroup_size: [u32; 3],
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for ComputePipeline<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_compute_pipeline(raw);
            }
        }
        self.device.store.lock().compute_pipelines.remove(self.id);
    }
}

impl<A: HalApi> ComputePipeline<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub(crate) fn try_raw(&self) -> Result<&A::ComputePipeline, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }
}

crate::impl_resource_type!(ComputePipeline);
crate::impl_labeled!(ComputePipeline);
crate::impl_parent_device!(ComputePipeline);

/// Describes the vertex process in a render pipeline.
#[derive(Debug)]
pub struct VertexState<'a, A: HalApi> {
    /// The compiled vertex stage and its entry point.
    pub stage: ProgrammableStageDescriptor<'a, A>,
}

/// Describes fragment processing in a render pipeline.
#[derive(Debug)]
pub struct FragmentState<'a, A: HalApi> {
    /// The compiled fragment stage and its entry point.
    pub stage: ProgrammableStageDescriptor<'a, A>,
    /// The effect of draw calls on the color aspect of the output target.
    pub targets: Cow<'a, [Option<wgt::ColorTargetState>]>,
}

/// Describes a render (graphics) pipeline.
#[derive(Debug)]
pub struct RenderPipelineDescriptor<'a, A: HalApi> {
    pub label: Label<'a>,
    /// The layout of bind groups for this pipeline.
    pub layout: &'a Arc<PipelineLayout<A>>,
    /// The vertex processing state for this pipeline.
    pub vertex: VertexState<'a, A>,
    /// The way primitives are assembled from vertices.
    pub topology: wgt::PrimitiveTopology,
    /// The effect of draw calls on the depth and stencil aspects of the output target, if any.
    pub depth_stencil: Option<wgt::DepthStencilState>,
    /// The multi-sampling properties of the pipeline.
    pub multisample: wgt::MultisampleState,
    /// The fragment processing state for this pipeline.
    pub fragment: Option<FragmentState<'a, A>>,
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ColorStateError {
    #[error("Format {0:?} is not renderable")]
    FormatNotRenderable(wgt::TextureFormat),
    #[error("Format {0:?} does not have a color aspect")]
    FormatNotColor(wgt::TextureFormat),
    #[error("Sample count {0} is not supported by format {1:?}")]
    InvalidSampleCount(u32, wgt::TextureFormat),
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum DepthStencilStateError {
    #[error("Format {0:?} is not renderable")]
    FormatNotRenderable(wgt::TextureFormat),
    #[error("Format {0:?} does not have a depth aspect, but depth test/write is enabled")]
    FormatNotDepth(wgt::TextureFormat),
    #[error("Sample count {0} is not supported by format {1:?}")]
    InvalidSampleCount(u32, wgt::TextureFormat),
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateRenderPipelineError {
    #[error(transparent)]
    ColorAttachment(#[from] ColorAttachmentError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Pipeline layout is invalid")]
    InvalidLayout(#[source] InvalidResourceError),
    #[error("Color state [{0}] is invalid")]
    ColorState(u8, #[source] ColorStateError),
    #[error("Depth/stencil state is invalid")]
    DepthStencilState(#[from] DepthStencilStateError),
    #[error("Invalid sample count {0}")]
    InvalidSampleCount(u32),
    #[error(transparent)]
    MissingFeatures(#[from] MissingFeatures),
    #[error("Error matching {stage:?} shader requirements against the pipeline")]
    Stage {
        stage: wgt::ShaderStages,
        #[source]
        error: validation::StageError,
    },
    #[error("Internal error in {stage:?} shader: {error}")]
    Internal {
        stage: wgt::ShaderStages,
        error: String,
    },
    #[error("A render pipeline needs at least one color target or a depth/stencil state")]
    NoTargets,
}

impl WebGpuError for CreateRenderPipelineError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::Internal { .. } => ErrorType::Internal,
            _ => ErrorType::Validation,
        }
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ColorAttachmentError {
    #[error("The number of color attachments {given} exceeds the limit {limit}")]
    TooMany { given: usize, limit: usize },
}

#[derive(Debug)]
pub struct RenderPipeline<A: HalApi> {
    pub(crate) raw: Option<A::RenderPipeline>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) layout: Arc<PipelineLayout<A>>,
    pub(crate) _shader_modules: ArrayVec<Arc<ShaderModule<A>>, 2>,
    pub(crate) pass_context: RenderPassContext,
    pub(crate) topology: wgt::PrimitiveTopology,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for RenderPipeline<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_render_pipeline(raw);
            }
        }
        self.device.store.lock().render_pipelines.remove(self.id);
    }
}

impl<A: HalApi> RenderPipeline<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn topology(&self) -> wgt::PrimitiveTopology {
        self.topology
    }

    pub(crate) fn try_raw(&self) -> Result<&A::RenderPipeline, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }
}

crate::impl_resource_type!(RenderPipeline);
crate::impl_labeled!(RenderPipeline);
crate::impl_parent_device!(RenderPipeline);
