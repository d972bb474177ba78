use crate::{
    device::{Device, DeviceError},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource::{
        Buffer, BufferUseError, InvalidResourceError, Labeled, MissingBufferUsageError,
        MissingTextureUsageError, ResourceErrorIdent, TextureView, TextureViewUseError,
    },
    resource_log,
    storage::ResourceId,
    Label, MAX_BIND_GROUPS,
};

use arrayvec::ArrayVec;
use hal::Device as _;
use thiserror::Error;

use std::{borrow::Cow, sync::Arc};

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BindGroupLayoutEntryError {
    #[error("Cube dimension is not expected for texture storage")]
    StorageTextureCube,
    #[error("Read-write and read-only storage textures are not allowed by the format {0:?}")]
    StorageTextureReadWrite(wgt::TextureFormat),
    #[error("Format {0:?} can't be used for storage textures")]
    StorageTextureFormat(wgt::TextureFormat),
    #[error("Sample type must not be filterable float when the binding is multisampled")]
    SampleTypeFloatFilterableBindingMultisampled,
    #[error("Multisampled texture binding view dimension must be 2d, got {0:?}")]
    Non2DMultisampled(wgt::TextureViewDimension),
    #[error("Vertex shaders can't write to storage bindings")]
    VertexWritableStorage,
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateBindGroupLayoutError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Conflicting binding at index {0}")]
    ConflictBinding(u32),
    #[error("Binding {binding} entry is invalid")]
    Entry {
        binding: u32,
        #[source]
        error: BindGroupLayoutEntryError,
    },
    #[error("Binding index {binding} is greater than the maximum number {maximum}")]
    InvalidBindingIndex { binding: u32, maximum: u32 },
    #[error("Invalid visibility {0:?}")]
    InvalidVisibility(wgt::ShaderStages),
}

impl WebGpuError for CreateBindGroupLayoutError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateBindGroupError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Bind group layout is invalid")]
    InvalidLayout(#[source] InvalidResourceError),
    #[error(transparent)]
    BufferUse(#[from] BufferUseError),
    #[error(transparent)]
    TextureViewUse(#[from] TextureViewUseError),
    #[error("Binding size {actual} of {buffer} is less than minimum {min}")]
    BindingSizeTooSmall {
        buffer: ResourceErrorIdent,
        actual: u64,
        min: u64,
    },
    #[error("{0} binding size is zero")]
    BindingZeroSize(ResourceErrorIdent),
    #[error("Binding range {offset}..{end} of {buffer} would overrun the buffer of size {buffer_size}")]
    BindingRangeTooLarge {
        buffer: ResourceErrorIdent,
        offset: wgt::BufferAddress,
        end: wgt::BufferAddress,
        buffer_size: wgt::BufferAddress,
    },
    #[error("Number of bindings in bind group descriptor ({actual}) does not match the number of bindings defined in the bind group layout ({expected})")]
    BindingsNumMismatch { actual: usize, expected: usize },
    #[error("Binding {0} is used at least twice in the descriptor")]
    DuplicateBinding(u32),
    #[error("Unable to find a corresponding declaration for the given binding {0}")]
    MissingBindingDeclaration(u32),
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error(transparent)]
    MissingTextureUsage(#[from] MissingTextureUsageError),
    #[error("Binding {binding} has a different type ({actual:?}) than the one in the layout ({expected:?})")]
    WrongBindingType {
        binding: u32,
        actual: wgt::BindingType,
        expected: &'static str,
    },
    #[error("Buffer offset {0} does not respect device's requested `{1}` limit {2}")]
    UnalignedBufferOffset(wgt::BufferAddress, &'static str, u32),
    #[error(
        "Buffer binding {binding} range {given} exceeds `max_*_buffer_binding_size` limit {limit}"
    )]
    BufferRangeTooLarge {
        binding: u32,
        given: u64,
        limit: u64,
    },
    #[error("Texture binding {binding} expects dimension = {layout_dimension:?}, but given a view with dimension = {view_dimension:?}")]
    InvalidTextureViewDimension {
        binding: u32,
        layout_dimension: wgt::TextureViewDimension,
        view_dimension: wgt::TextureViewDimension,
    },
    #[error("Texture binding {binding} expects multisampled = {layout_multisampled}, but given a view with samples = {view_samples}")]
    InvalidTextureMultisample {
        binding: u32,
        layout_multisampled: bool,
        view_samples: u32,
    },
    #[error("Texture binding {binding} expects sample type {layout_sample_type:?}, but was given a view with format {view_format:?} (sample type {view_sample_type:?})")]
    InvalidTextureSampleType {
        binding: u32,
        layout_sample_type: wgt::TextureSampleType,
        view_format: wgt::TextureFormat,
        view_sample_type: wgt::TextureSampleType,
    },
    #[error("Storage texture binding {binding} expects format = {layout_format:?}, but given a view with format = {view_format:?}")]
    InvalidStorageTextureFormat {
        binding: u32,
        layout_format: wgt::TextureFormat,
        view_format: wgt::TextureFormat,
    },
    #[error("Storage texture bindings must have a single mip level, but given a view with mip_level_count = {mip_level_count:?} at binding {binding}")]
    InvalidStorageTextureMipLevelCount { binding: u32, mip_level_count: u32 },
}

impl WebGpuError for CreateBindGroupError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BindGroupLayoutDescriptor<'a> {
    /// Debug label of the bind group layout.
    ///
    /// This will show up in graphics debuggers for easy identification.
    pub label: Label<'a>,
    /// Array of entries in this BindGroupLayout
    pub entries: Cow<'a, [wgt::BindGroupLayoutEntry]>,
}

/// Bind group layout.
#[derive(Debug)]
pub struct BindGroupLayout<A: HalApi> {
    pub(crate) raw: Option<A::BindGroupLayout>,
    pub(crate) device: Arc<Device<A>>,
    /// Sorted by binding index.
    pub(crate) entries: Vec<wgt::BindGroupLayoutEntry>,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for BindGroupLayout<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_bind_group_layout(raw);
            }
        }
        self.device.store.lock().bind_group_layouts.remove(self.id);
    }
}

impl<A: HalApi> BindGroupLayout<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn entries(&self) -> &[wgt::BindGroupLayoutEntry] {
        &self.entries
    }

    pub(crate) fn try_raw(&self) -> Result<&A::BindGroupLayout, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    pub(crate) fn entry(&self, binding: u32) -> Option<&wgt::BindGroupLayoutEntry> {
        self.entries
            .binary_search_by_key(&binding, |entry| entry.binding)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Whether a bind group made for `other` may be used where `self` is expected.
    pub(crate) fn is_compatible(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.entries == other.entries
    }
}

crate::impl_resource_type!(BindGroupLayout);
crate::impl_labeled!(BindGroupLayout);
crate::impl_parent_device!(BindGroupLayout);

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreatePipelineLayoutError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Bind group layout at index {index} is invalid")]
    InvalidBindGroupLayout {
        index: usize,
        #[source]
        error: InvalidResourceError,
    },
    #[error(
        "Bind group layout count {actual} exceeds device bind group limit {max}"
    )]
    TooManyGroups { actual: usize, max: usize },
}

impl WebGpuError for CreatePipelineLayoutError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::InvalidBindGroupLayout { .. } | Self::TooManyGroups { .. } => {
                ErrorType::Validation
            }
        }
    }
}

/// Describes a pipeline layout.
///
/// A `PipelineLayoutDescriptor` can be used to create a pipeline layout.
#[derive(Debug)]
pub struct PipelineLayoutDescriptor<'a, A: HalApi> {
    /// Debug label of the pipeline layout.
    ///
    /// This will show up in graphics debuggers for easy identification.
    pub label: Label<'a>,
    /// Bind groups that this pipeline uses. The first entry will provide all the bindings for
    /// "set = 0", second entry will provide all the bindings for "set = 1" etc.
    pub bind_group_layouts: &'a [Arc<BindGroupLayout<A>>],
}

#[derive(Debug)]
pub struct PipelineLayout<A: HalApi> {
    pub(crate) raw: Option<A::PipelineLayout>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) bind_group_layouts: ArrayVec<Arc<BindGroupLayout<A>>, MAX_BIND_GROUPS>,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for PipelineLayout<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_pipeline_layout(raw);
            }
        }
        self.device.store.lock().pipeline_layouts.remove(self.id);
    }
}

impl<A: HalApi> PipelineLayout<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub(crate) fn try_raw(&self) -> Result<&A::PipelineLayout, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    /// The layout entry a shader global at `group`/`binding` resolves to.
    pub(crate) fn entry(&self, group: u32, binding: u32) -> Option<&wgt::BindGroupLayoutEntry> {
        self.bind_group_layouts
            .get(group as usize)
            .and_then(|bgl| bgl.entry(binding))
    }
}

crate::impl_resource_type!(PipelineLayout);
crate::impl_labeled!(PipelineLayout);
crate::impl_parent_device!(PipelineLayout);

#[derive(Debug)]
pub struct BufferBinding<'a, A: HalApi> {
    pub buffer: &'a Arc<Buffer<A>>,
    pub offset: wgt::BufferAddress,
    /// `None` binds the rest of the buffer.
    pub size: Option<wgt::BufferSize>,
}

#[derive(Debug)]
pub enum BindingResource<'a, A: HalApi> {
    Buffer(BufferBinding<'a, A>),
    TextureView(&'a Arc<TextureView<A>>),
}

#[derive(Debug)]
pub struct BindGroupEntry<'a, A: HalApi> {
    pub binding: u32,
    pub resource: BindingResource<'a, A>,
}

/// Describes a group of bindings and the resources to be bound.
#[derive(Debug)]
pub struct BindGroupDescriptor<'a, A: HalApi> {
    /// Debug label of the bind group.
    ///
    /// This will show up in graphics debuggers for easy identification.
    pub label: Label<'a>,
    /// The [`BindGroupLayout`] that corresponds to this bind group.
    pub layout: &'a Arc<BindGroupLayout<A>>,
    /// The resources to bind to this bind group.
    pub entries: &'a [BindGroupEntry<'a, A>],
}

#[derive(Debug)]
pub struct BindGroup<A: HalApi> {
    pub(crate) raw: Option<A::BindGroup>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) layout: Arc<BindGroupLayout<A>>,
    pub(crate) used_buffers: Vec<Arc<Buffer<A>>>,
    pub(crate) used_views: Vec<Arc<TextureView<A>>>,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for BindGroup<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_bind_group(raw);
            }
        }
        self.device.store.lock().bind_groups.remove(self.id);
    }
}

impl<A: HalApi> BindGroup<A> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub(crate) fn try_raw(&self) -> Result<&A::BindGroup, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    /// Check that nothing bound in the group was destroyed since its creation.
    pub(crate) fn check_resources(&self) -> Result<(), BindGroupUseError> {
        for buffer in self.used_buffers.iter() {
            buffer.raw_for_use()?;
        }
        for view in self.used_views.iter() {
            view.raw_for_use()?;
        }
        Ok(())
    }
}

crate::impl_resource_type!(BindGroup);
crate::impl_labeled!(BindGroup);
crate::impl_parent_device!(BindGroup);

/// Reasons a bind group can't be set in a pass.
#[derive(Clone, Debug, Error)]
pub enum BindGroupUseError {
    #[error(transparent)]
    Invalid(#[from] InvalidResourceError),
    #[error(transparent)]
    Buffer(#[from] BufferUseError),
    #[error(transparent)]
    TextureView(#[from] TextureViewUseError),
}

impl WebGpuError for BindGroupUseError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

/// The sample type a view of `format` provides to shaders.
pub(crate) fn view_sample_type(
    format: wgt::TextureFormat,
    filterable: bool,
) -> wgt::TextureSampleType {
    use wgt::TextureFormat as Tf;
    match format {
        Tf::R8Uint
        | Tf::R16Uint
        | Tf::Rg8Uint
        | Tf::R32Uint
        | Tf::Rg16Uint
        | Tf::Rgba8Uint
        | Tf::Rg32Uint
        | Tf::Rgba16Uint
        | Tf::Rgba32Uint
        | Tf::Stencil8 => wgt::TextureSampleType::Uint,
        Tf::R8Sint
        | Tf::R16Sint
        | Tf::Rg8Sint
        | Tf::R32Sint
        | Tf::Rg16Sint
        | Tf::Rgba8Sint
        | Tf::Rg32Sint
        | Tf::Rgba16Sint
        | Tf::Rgba32Sint => wgt::TextureSampleType::Sint,
        Tf::Depth16Unorm | Tf::Depth24Plus | Tf::Depth24PlusStencil8 | Tf::Depth32Float => {
            wgt::TextureSampleType::Depth
        }
        _ => wgt::TextureSampleType::Float { filterable },
    }
}

/// Whether a view providing `actual` fits a layout expecting `expected`.
pub(crate) fn sample_type_compatible(
    expected: wgt::TextureSampleType,
    actual: wgt::TextureSampleType,
) -> bool {
    use wgt::TextureSampleType as Tst;
    match (expected, actual) {
        (Tst::Float { filterable: true }, Tst::Float { filterable: true }) => true,
        (Tst::Float { filterable: false }, Tst::Float { .. } | Tst::Depth) => true,
        (Tst::Depth, Tst::Depth) | (Tst::Uint, Tst::Uint) | (Tst::Sint, Tst::Sint) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgt::{TextureFormat as Tf, TextureSampleType as Tst};

    #[test]
    fn view_sample_types() {
        assert_eq!(view_sample_type(Tf::Rgba8Uint, true), Tst::Uint);
        assert_eq!(view_sample_type(Tf::Rg16Sint, true), Tst::Sint);
        assert_eq!(view_sample_type(Tf::Depth32Float, true), Tst::Depth);
        assert_eq!(
            view_sample_type(Tf::Rgba32Float, false),
            Tst::Float { filterable: false }
        );
    }

    #[test]
    fn depth_views_bind_as_unfilterable_float() {
        assert!(sample_type_compatible(
            Tst::Float { filterable: false },
            Tst::Depth
        ));
        assert!(!sample_type_compatible(
            Tst::Float { filterable: true },
            Tst::Depth
        ));
        assert!(!sample_type_compatible(
            Tst::Float { filterable: true },
            Tst::Float { filterable: false }
        ));
        assert!(!sample_type_compatible(Tst::Uint, Tst::Sint));
    }
}
