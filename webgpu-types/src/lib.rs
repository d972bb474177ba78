/*! This library describes the data types shared between the WebGPU binding
 *  core and the native backends it drives.
 *
 *  Everything here is plain data: descriptors, bit-sets, formats and limits.
 *  The few helpers (block sizes, padded row pitch, limit comparison, parsing
 *  of WebGPU enum strings) are pure functions.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs, unsafe_op_in_unsafe_fn)]

use std::{fmt, num::NonZeroU64, str::FromStr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod assertions;

macro_rules! impl_bitflags {
    ($name:ident) => {
        #[cfg(feature = "serde")]
        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.bits().serialize(serializer)
            }
        }

        #[cfg(feature = "serde")]
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<$name, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let value = <_ as serde::Deserialize<'de>>::deserialize(deserializer)?;
                Ok($name::from_bits_retain(value))
            }
        }

        impl $name {
            /// Returns true if the bitflags contains bits that are not part of
            /// the bitflags definition.
            pub fn contains_invalid_bits(&self) -> bool {
                let all = Self::all().bits();
                (self.bits() | all) != all
            }
        }
    };
}

/// Integral type used for buffer offsets.
pub type BufferAddress = u64;
/// Integral type used for buffer slice sizes.
pub type BufferSize = NonZeroU64;
/// Integral type used for dynamic bind group offsets.
pub type DynamicOffset = u32;

/// Buffer-texture copies must have [`bytes_per_row`] aligned to this number.
///
/// This derives from the transfer granularity of the native backends. A copy
/// with an unaligned pitch is rejected while it is encoded.
///
/// [`bytes_per_row`]: ImageDataLayout::bytes_per_row
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;
/// Buffer to buffer copy offsets and sizes must be aligned to this number.
pub const COPY_BUFFER_ALIGNMENT: BufferAddress = 4;
/// Size to align mappings.
pub const MAP_ALIGNMENT: BufferAddress = 8;
/// Maximum number of bind groups a pipeline layout may declare.
pub const MAX_BIND_GROUPS: usize = 8;
/// Maximum number of color attachments in a render pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Round `unpadded` up to the next multiple of [`COPY_BYTES_PER_ROW_ALIGNMENT`].
///
/// `padded = unpadded + ((256 - unpadded % 256) % 256)`
///
/// ```
/// assert_eq!(webgpu_types::padded_bytes_per_row(800), 1024);
/// assert_eq!(webgpu_types::padded_bytes_per_row(512), 512);
/// ```
pub const fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded + ((align - unpadded % align) % align)
}

/// Error returned when a WebGPU enum string is not recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a valid {}", self.value, self.kind)
    }
}

impl std::error::Error for ParseEnumError {}

/// Backends supported by the binding.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Backend {
    /// In-memory backend without a GPU.
    Noop = 0,
    /// Vulkan API.
    Vulkan = 1,
    /// Metal API (Apple platforms).
    Metal = 2,
    /// Direct3D-12 (Windows).
    Dx12 = 3,
    /// OpenGL ES 3.0+.
    Gl = 4,
}

impl Backend {
    /// Returns the string name of the backend.
    pub const fn to_str(self) -> &'static str {
        match self {
            Backend::Noop => "noop",
            Backend::Vulkan => "vulkan",
            Backend::Metal => "metal",
            Backend::Dx12 => "dx12",
            Backend::Gl => "gl",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

bitflags::bitflags! {
    /// Represents the backends that the binding will use.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Backends: u32 {
        /// In-memory backend.
        const NOOP = 1 << Backend::Noop as u32;
        /// Vulkan API.
        const VULKAN = 1 << Backend::Vulkan as u32;
        /// Metal API.
        const METAL = 1 << Backend::Metal as u32;
        /// Direct3D-12.
        const DX12 = 1 << Backend::Dx12 as u32;
        /// OpenGL ES.
        const GL = 1 << Backend::Gl as u32;
    }
}

impl_bitflags!(Backends);

impl Default for Backends {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Backend> for Backends {
    fn from(backend: Backend) -> Self {
        Self::from_bits_retain(1 << backend as u32)
    }
}

impl Backends {
    /// Parse a comma separated list of backend names.
    ///
    /// Unknown names are ignored with a warning.
    pub fn from_comma_list(string: &str) -> Self {
        let mut backends = Self::empty();
        for backend in string.to_lowercase().split(',') {
            backends |= match backend.trim() {
                "noop" => Self::NOOP,
                "vulkan" | "vk" => Self::VULKAN,
                "metal" | "mtl" => Self::METAL,
                "dx12" | "d3d12" => Self::DX12,
                "gl" | "gles" | "opengl" => Self::GL,
                "" => Self::empty(),
                other => {
                    log::warn!("unknown backend string '{}'", other);
                    continue;
                }
            }
        }

        if backends.is_empty() {
            log::warn!("no valid backend strings found");
        }

        backends
    }

    /// Reads the `WEBGPU_BACKEND` environment variable.
    ///
    /// Returns `None` if the variable is not set.
    pub fn from_env() -> Option<Self> {
        let env = std::env::var("WEBGPU_BACKEND").ok()?;
        Some(Self::from_comma_list(&env))
    }
}

/// Power Preference when choosing a physical adapter.
///
/// Corresponds to [WebGPU `GPUPowerPreference`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gpupowerpreference).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum PowerPreference {
    #[default]
    /// Power usage is not considered when choosing an adapter.
    None = 0,
    /// Adapter that uses the least possible power. This is often an integrated GPU.
    LowPower = 1,
    /// Adapter that has the highest performance. This is often a discrete GPU.
    HighPerformance = 2,
}

impl PowerPreference {
    /// Reads the `WEBGPU_POWER_PREF` environment variable.
    ///
    /// Returns `None` if the variable is unset or not one of `low`, `high`, `none`.
    pub fn from_env() -> Option<Self> {
        let env = std::env::var("WEBGPU_POWER_PREF").ok()?;
        match env.to_lowercase().as_str() {
            "low" => Some(Self::LowPower),
            "high" => Some(Self::HighPerformance),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Options for requesting an adapter.
///
/// Corresponds to [WebGPU `GPURequestAdapterOptions`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpurequestadapteroptions).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RequestAdapterOptions {
    /// Power preference for the adapter.
    pub power_preference: PowerPreference,
    /// Indicates that only a fallback adapter can be returned. This is generally a "software"
    /// implementation on the system.
    pub force_fallback_adapter: bool,
}

/// Supported physical device types.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceType {
    /// Other or Unknown.
    Other,
    /// Integrated GPU with shared CPU/GPU memory.
    IntegratedGpu,
    /// Discrete GPU with separate CPU/GPU memory.
    DiscreteGpu,
    /// Virtual / Hosted.
    VirtualGpu,
    /// Cpu / Software Rendering.
    Cpu,
}

/// Information about an adapter.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdapterInfo {
    /// Adapter name
    pub name: String,
    /// PCI id of the adapter vendor
    pub vendor: u32,
    /// PCI id of the adapter
    pub device: u32,
    /// Type of device
    pub device_type: DeviceType,
    /// Backend used for device
    pub backend: Backend,
}

bitflags::bitflags! {
    /// Instance debugging flags.
    ///
    /// These are not part of the WebGPU standard.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InstanceFlags: u32 {
        /// Generate debug information in shaders and objects.
        const DEBUG = 1 << 0;
        /// Enable validation in the backend API, if possible.
        const VALIDATION = 1 << 1;
        /// Don't pass labels to the backend.
        const DISCARD_HAL_LABELS = 1 << 2;
    }
}

impl_bitflags!(InstanceFlags);

impl Default for InstanceFlags {
    fn default() -> Self {
        Self::from_build_config()
    }
}

impl InstanceFlags {
    /// Enable debugging and validation flags.
    pub fn debugging() -> Self {
        InstanceFlags::DEBUG | InstanceFlags::VALIDATION
    }

    /// Infer good defaults from the build type
    ///
    /// Returns the default flags and add debugging flags if the build configuration has `debug_assertions`.
    pub fn from_build_config() -> Self {
        if cfg!(debug_assertions) {
            return InstanceFlags::debugging();
        }

        InstanceFlags::empty()
    }

    /// Returns this set of flags, affected by environment variables.
    ///
    /// The presence of an environment variable implies that the corresponding flag should be set
    /// unless the value is "0" in which case the flag is unset. If the environment variable is
    /// not present, then the flag is unaffected.
    ///
    /// For example `let flags = InstanceFlags::debugging().with_env();` with `WEBGPU_VALIDATION=0`
    /// does not contain `InstanceFlags::VALIDATION`.
    ///
    /// The environment variables are named after the flags prefixed with "WEBGPU_". For example:
    /// - WEBGPU_DEBUG
    /// - WEBGPU_VALIDATION
    /// - WEBGPU_DISCARD_HAL_LABELS
    #[must_use]
    pub fn with_env(mut self) -> Self {
        fn env(key: &str) -> Option<bool> {
            std::env::var(key).ok().map(|s| match s.as_str() {
                "0" => false,
                _ => true,
            })
        }

        if let Some(bit) = env("WEBGPU_DEBUG") {
            self.set(Self::DEBUG, bit);
        }
        if let Some(bit) = env("WEBGPU_VALIDATION") {
            self.set(Self::VALIDATION, bit);
        }
        if let Some(bit) = env("WEBGPU_DISCARD_HAL_LABELS") {
            self.set(Self::DISCARD_HAL_LABELS, bit);
        }

        self
    }
}

/// Options for creating an instance.
#[derive(Clone, Debug, Default)]
pub struct InstanceDescriptor {
    /// Which backends to enable.
    pub backends: Backends,
    /// Flags to tune the behavior of the instance.
    pub flags: InstanceFlags,
}

bitflags::bitflags! {
    /// Features that are not guaranteed to be supported.
    ///
    /// These are either part of the webgpu standard, or are extension features supported by
    /// the binding when targeting native.
    ///
    /// If you want to use a feature, you need to first verify that the adapter supports
    /// the feature. If the adapter does not support the feature, requesting a device with it
    /// enabled will fail.
    ///
    /// Corresponds to [WebGPU `GPUFeatureName`](
    /// https://gpuweb.github.io/gpuweb/#enumdef-gpufeaturename).
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Features: u64 {
        /// Allows shaders to write to the depth clip distance.
        const DEPTH_CLIP_CONTROL = 1 << 0;
        /// Enables timestamp queries.
        const TIMESTAMP_QUERY = 1 << 1;
        /// Allows `first_instance` to be non-zero in indirect draws.
        const INDIRECT_FIRST_INSTANCE = 1 << 2;
        /// Allows 16-bit floats in shaders.
        const SHADER_F16 = 1 << 3;
        /// Allows `Rg11b10Float` textures to be render attachments.
        const RG11B10UFLOAT_RENDERABLE = 1 << 4;
        /// Allows 32-bit float textures to be filtered.
        const FLOAT32_FILTERABLE = 1 << 5;
        /// Allows `MAP_READ`/`MAP_WRITE` to be combined with any other buffer usage.
        ///
        /// This is a native only feature.
        const MAPPABLE_PRIMARY_BUFFERS = 1 << 16;
    }
}

impl_bitflags!(Features);

/// Represents the sets of limits an adapter/device supports.
///
/// Limits "better" than the default must be supported by the adapter and requested when
/// requesting a device. If limits "better" than the adapter supports are requested,
/// requesting a device will fail.
///
/// Corresponds to [WebGPU `GPUSupportedLimits`](
/// https://gpuweb.github.io/gpuweb/#gpusupportedlimits).
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct Limits {
    /// Maximum allowed value for the `size.width` of a texture created with `TextureDimension::D1`.
    /// Defaults to 8192. Higher is "better".
    #[cfg_attr(feature = "serde", serde(rename = "maxTextureDimension1D"))]
    pub max_texture_dimension_1d: u32,
    /// Maximum allowed value for the `size.width` and `size.height` of a texture created with `TextureDimension::D2`.
    /// Defaults to 8192. Higher is "better".
    #[cfg_attr(feature = "serde", serde(rename = "maxTextureDimension2D"))]
    pub max_texture_dimension_2d: u32,
    /// Maximum allowed value for the `size.width`, `size.height`, and `size.depth_or_array_layers`
    /// of a texture created with `TextureDimension::D3`.
    /// Defaults to 2048. Higher is "better".
    #[cfg_attr(feature = "serde", serde(rename = "maxTextureDimension3D"))]
    pub max_texture_dimension_3d: u32,
    /// Maximum allowed value for the `size.depth_or_array_layers` of a texture created with `TextureDimension::D2`.
    /// Defaults to 256. Higher is "better".
    pub max_texture_array_layers: u32,
    /// Amount of bind groups that can be attached to a pipeline at the same time. Defaults to 4. Higher is "better".
    pub max_bind_groups: u32,
    /// Maximum binding index allowed in `create_bind_group_layout`. Defaults to 1000.
    pub max_bindings_per_bind_group: u32,
    /// Maximum size in bytes of a binding to a uniform buffer. Defaults to 64 KiB. Higher is "better".
    pub max_uniform_buffer_binding_size: u32,
    /// Maximum size in bytes of a binding to a storage buffer. Defaults to 128 MiB. Higher is "better".
    pub max_storage_buffer_binding_size: u32,
    /// Maximum length of `VertexState::buffers` when creating a `RenderPipeline`.
    /// Defaults to 8. Higher is "better".
    pub max_vertex_buffers: u32,
    /// A limit above which buffer allocations are guaranteed to fail.
    /// Defaults to 256 MiB. Higher is "better".
    pub max_buffer_size: u64,
    /// The maximum number of color attachments in a render pass. Defaults to 8. Higher is "better".
    pub max_color_attachments: u32,
    /// The maximum value for each dimension of a `dispatch_workgroups` call.
    /// Defaults to 65535. Higher is "better".
    pub max_compute_workgroups_per_dimension: u32,
    /// Required alignment for uniform buffer bindings. Defaults to 256. Lower is "better".
    pub min_uniform_buffer_offset_alignment: u32,
    /// Required alignment for storage buffer bindings. Defaults to 256. Lower is "better".
    pub min_storage_buffer_offset_alignment: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_texture_dimension_1d: 8192,
            max_texture_dimension_2d: 8192,
            max_texture_dimension_3d: 2048,
            max_texture_array_layers: 256,
            max_bind_groups: 4,
            max_bindings_per_bind_group: 1000,
            max_uniform_buffer_binding_size: 64 << 10,
            max_storage_buffer_binding_size: 128 << 20,
            max_vertex_buffers: 8,
            max_buffer_size: 256 << 20,
            max_color_attachments: 8,
            max_compute_workgroups_per_dimension: 65535,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
        }
    }
}

impl Limits {
    /// Compares every limits within self is within the limits given in `allowed`.
    ///
    /// If you need detailed information on failures, look at [`Limits::check_limits_with_fail_fn`].
    pub fn check_limits(&self, allowed: &Self) -> bool {
        let mut within = true;
        self.check_limits_with_fail_fn(allowed, true, |_, _, _| within = false);
        within
    }

    /// Compares every limits within self is within the limits given in `allowed`.
    /// For an easy to use binary choice, use [`Limits::check_limits`].
    ///
    /// If a value is not within the allowed limit, this function calls the `fail_fn`
    /// with the:
    ///  - limit name
    ///  - self's limit
    ///  - allowed's limit.
    ///
    /// If fatal is true, a single failure bails out the comparison after a single failure.
    pub fn check_limits_with_fail_fn(
        &self,
        allowed: &Self,
        fatal: bool,
        mut fail_fn: impl FnMut(&'static str, u64, u64),
    ) {
        use std::cmp::Ordering;

        macro_rules! compare {
            ($name:ident, $ordering:ident) => {
                match self.$name.cmp(&allowed.$name) {
                    Ordering::$ordering | Ordering::Equal => (),
                    _ => {
                        fail_fn(stringify!($name), self.$name as u64, allowed.$name as u64);
                        if fatal {
                            return;
                        }
                    }
                }
            };
        }

        compare!(max_texture_dimension_1d, Less);
        compare!(max_texture_dimension_2d, Less);
        compare!(max_texture_dimension_3d, Less);
        compare!(max_texture_array_layers, Less);
        compare!(max_bind_groups, Less);
        compare!(max_bindings_per_bind_group, Less);
        compare!(max_uniform_buffer_binding_size, Less);
        compare!(max_storage_buffer_binding_size, Less);
        compare!(max_vertex_buffers, Less);
        compare!(max_buffer_size, Less);
        compare!(max_color_attachments, Less);
        compare!(max_compute_workgroups_per_dimension, Less);
        compare!(min_uniform_buffer_offset_alignment, Greater);
        compare!(min_storage_buffer_offset_alignment, Greater);
    }
}

bitflags::bitflags! {
    /// Describes the shader stages that a binding will be visible from.
    ///
    /// Corresponds to [WebGPU `GPUShaderStageFlags`](
    /// https://gpuweb.github.io/gpuweb/#typedefdef-gpushaderstageflags).
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Binding is not visible from any shader stage.
        const NONE = 0;
        /// Binding is visible from the vertex shader of a render pipeline.
        const VERTEX = 1 << 0;
        /// Binding is visible from the fragment shader of a render pipeline.
        const FRAGMENT = 1 << 1;
        /// Binding is visible from the compute shader of a compute pipeline.
        const COMPUTE = 1 << 2;
        /// Binding is visible from the vertex and fragment shaders of a render pipeline.
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

impl_bitflags!(ShaderStages);

bitflags::bitflags! {
    /// Different ways that you can use a buffer.
    ///
    /// The usages determine what kind of memory the buffer is allocated from and what
    /// actions the buffer can partake in.
    ///
    /// Corresponds to [WebGPU `GPUBufferUsageFlags`](
    /// https://gpuweb.github.io/gpuweb/#typedefdef-gpubufferusageflags).
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        /// Allow a buffer to be mapped for reading using `Buffer::map_async` + `Buffer::get_mapped_range`.
        /// This does not include creating a buffer with [`BufferDescriptor::mapped_at_creation`] set.
        ///
        /// If [`Features::MAPPABLE_PRIMARY_BUFFERS`] isn't enabled, the only other usage a buffer
        /// may have is COPY_DST.
        const MAP_READ = 1 << 0;
        /// Allow a buffer to be mapped for writing using `Buffer::map_async` + `Buffer::get_mapped_range`.
        /// This does not include creating a buffer with `mapped_at_creation` set.
        ///
        /// If [`Features::MAPPABLE_PRIMARY_BUFFERS`] feature isn't enabled, the only other usage a buffer
        /// may have is COPY_SRC.
        const MAP_WRITE = 1 << 1;
        /// Allow a buffer to be the source buffer for a `copy_buffer_to_buffer` or `copy_buffer_to_texture`
        /// operation.
        const COPY_SRC = 1 << 2;
        /// Allow a buffer to be the destination buffer for a `copy_buffer_to_buffer` or
        /// `copy_texture_to_buffer` operation.
        const COPY_DST = 1 << 3;
        /// Allow a buffer to be the index buffer in a draw operation.
        const INDEX = 1 << 4;
        /// Allow a buffer to be the vertex buffer in a draw operation.
        const VERTEX = 1 << 5;
        /// Allow a buffer to be a [`BufferBindingType::Uniform`] inside a bind group.
        const UNIFORM = 1 << 6;
        /// Allow a buffer to be a [`BufferBindingType::Storage`] inside a bind group.
        const STORAGE = 1 << 7;
        /// Allow a buffer to be the indirect buffer in an indirect draw call.
        const INDIRECT = 1 << 8;
    }
}

impl_bitflags!(BufferUsages);

/// Describes a buffer.
///
/// Corresponds to [WebGPU `GPUBufferDescriptor`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpubufferdescriptor).
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferDescriptor<L> {
    /// Debug label of a buffer. This will show up in graphics debuggers for easy identification.
    pub label: L,
    /// Size of a buffer, in bytes.
    pub size: BufferAddress,
    /// Usages of a buffer. If the buffer is used in any way that isn't specified here, the operation
    /// will be rejected.
    pub usage: BufferUsages,
    /// Allows a buffer to be mapped immediately after they are made. It does not have to be [`BufferUsages::MAP_READ`] or
    /// [`BufferUsages::MAP_WRITE`], all buffers are allowed to be mapped at creation.
    ///
    /// If this is `true`, [`size`](#structfield.size) must be a multiple of
    /// [`COPY_BUFFER_ALIGNMENT`].
    pub mapped_at_creation: bool,
}

impl<L> BufferDescriptor<L> {
    /// Takes a closure and maps the label of the buffer descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> BufferDescriptor<K> {
        BufferDescriptor {
            label: fun(&self.label),
            size: self.size,
            usage: self.usage,
            mapped_at_creation: self.mapped_at_creation,
        }
    }
}

/// Type of buffer mapping.
///
/// Corresponds to [WebGPU `GPUMapMode`](
/// https://gpuweb.github.io/gpuweb/#namespacedef-gpumapmode).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MapMode {
    /// Map only for reading
    Read,
    /// Map only for writing
    Write,
}

/// Describes a command encoder.
///
/// Corresponds to [WebGPU `GPUCommandEncoderDescriptor`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpucommandencoderdescriptor).
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandEncoderDescriptor<L> {
    /// Debug label for the command encoder. This will show up in graphics debuggers for easy identification.
    pub label: L,
}

impl<L> CommandEncoderDescriptor<L> {
    /// Takes a closure and maps the label of the command encoder descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> CommandEncoderDescriptor<K> {
        CommandEncoderDescriptor {
            label: fun(&self.label),
        }
    }
}

/// Describes a device.
///
/// Corresponds to [WebGPU `GPUDeviceDescriptor`](
/// https://gpuweb.github.io/gpuweb/#gpudevicedescriptor).
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor<L> {
    /// Debug label for the device.
    pub label: L,
    /// Specifies the features that are required by the device request.
    /// The request will fail if the adapter cannot provide these features.
    pub required_features: Features,
    /// Specifies the limits that are required by the device request.
    /// The request will fail if the adapter cannot provide these limits.
    pub required_limits: Limits,
}

impl<L> DeviceDescriptor<L> {
    /// Takes a closure and maps the label of the device descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> DeviceDescriptor<K> {
        DeviceDescriptor {
            label: fun(&self.label),
            required_features: self.required_features,
            required_limits: self.required_limits.clone(),
        }
    }
}

/// Passed to `Device::poll` to control how and if it should block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Maintain {
    /// Block until the device has finished all submitted work.
    Wait,
    /// Check the device for completed work without blocking.
    Poll,
}

impl Maintain {
    /// Returns true if the maintain mode waits for work to complete.
    pub fn is_wait(self) -> bool {
        match self {
            Self::Wait => true,
            Self::Poll => false,
        }
    }
}

/// Filter for error scopes.
///
/// Corresponds to [WebGPU `GPUErrorFilter`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gpuerrorfilter).
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ErrorFilter {
    /// Catch only out-of-memory errors.
    OutOfMemory,
    /// Catch only validation errors.
    Validation,
    /// Catch only internal errors.
    Internal,
}

impl FromStr for ErrorFilter {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "out-of-memory" => Self::OutOfMemory,
            "validation" => Self::Validation,
            "internal" => Self::Internal,
            _ => return Err(ParseEnumError::new("error filter", s)),
        })
    }
}

/// Reason for a device to be lost.
///
/// Corresponds to [WebGPU `GPUDeviceLostReason`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gpudevicelostreason).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceLostReason {
    /// Triggered by the backend.
    Unknown = 0,
    /// After `Device::destroy`.
    Destroyed = 1,
    /// After the last handle to the device was dropped.
    Dropped = 2,
}

/// Extent of a texture related operation.
///
/// Corresponds to [WebGPU `GPUExtent3D`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpuextent3ddict).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Extent3d {
    /// Width of the extent
    pub width: u32,
    /// Height of the extent
    pub height: u32,
    /// The depth of the extent or the number of array layers
    #[cfg_attr(feature = "serde", serde(default = "default_depth"))]
    pub depth_or_array_layers: u32,
}

#[cfg(feature = "serde")]
fn default_depth() -> u32 {
    1
}

impl Default for Extent3d {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        }
    }
}

impl Extent3d {
    /// Calculates the extent at a given mip level.
    /// Does *not* account for memory size being a multiple of block size.
    ///
    /// <https://gpuweb.github.io/gpuweb/#logical-miplevel-specific-texture-extent>
    pub fn mip_level_size(&self, level: u32, dim: TextureDimension) -> Self {
        Self {
            width: u32::max(1, self.width >> level),
            height: match dim {
                TextureDimension::D1 => 1,
                _ => u32::max(1, self.height >> level),
            },
            depth_or_array_layers: match dim {
                TextureDimension::D1 => 1,
                TextureDimension::D2 => self.depth_or_array_layers,
                TextureDimension::D3 => u32::max(1, self.depth_or_array_layers >> level),
            },
        }
    }

    /// Calculates the maximum possible count of mipmaps.
    ///
    /// Treats the depth as part of the mipmaps. If calculating
    /// for a 2DArray texture, which does not mipmap depth, set depth to 1.
    pub fn max_mips(&self, dim: TextureDimension) -> u32 {
        match dim {
            TextureDimension::D1 => 1,
            TextureDimension::D2 => {
                let max_dim = self.width.max(self.height);
                32 - max_dim.leading_zeros()
            }
            TextureDimension::D3 => {
                let max_dim = self.width.max(self.height.max(self.depth_or_array_layers));
                32 - max_dim.leading_zeros()
            }
        }
    }
}

/// Origin of a copy to/from a texture.
///
/// Corresponds to [WebGPU `GPUOrigin3D`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpuorigin3ddict).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Origin3d {
    /// X position of the origin
    pub x: u32,
    /// Y position of the origin
    pub y: u32,
    /// Z position of the origin
    pub z: u32,
}

impl Origin3d {
    /// Zero origin.
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    /// Build an origin from the sequence form `[x, y, z]`; missing components are zero.
    pub fn from_slice(values: &[u32]) -> Self {
        let get = |i: usize| values.get(i).copied().unwrap_or(0);
        Self {
            x: get(0),
            y: get(1),
            z: get(2),
        }
    }
}

/// Dimensionality of a texture.
///
/// Corresponds to [WebGPU `GPUTextureDimension`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gputexturedimension).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureDimension {
    /// 1D texture
    #[cfg_attr(feature = "serde", serde(rename = "1d"))]
    D1,
    /// 2D texture
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "2d"))]
    D2,
    /// 3D texture
    #[cfg_attr(feature = "serde", serde(rename = "3d"))]
    D3,
}

impl FromStr for TextureDimension {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1d" => Self::D1,
            "2d" => Self::D2,
            "3d" => Self::D3,
            _ => return Err(ParseEnumError::new("texture dimension", s)),
        })
    }
}

/// Dimensions of a particular texture view.
///
/// Corresponds to [WebGPU `GPUTextureViewDimension`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gputextureviewdimension).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureViewDimension {
    /// A one dimensional texture. `texture_1d` in WGSL.
    D1,
    /// A two dimensional texture. `texture_2d` in WGSL.
    #[default]
    D2,
    /// A two dimensional array texture. `texture_2d_array` in WGSL.
    D2Array,
    /// A cubemap texture. `texture_cube` in WGSL.
    Cube,
    /// A cubemap array texture. `texture_cube_array` in WGSL.
    CubeArray,
    /// A three dimensional texture. `texture_3d` in WGSL.
    D3,
}

impl TextureViewDimension {
    /// Get the texture dimension required of this texture view dimension.
    pub fn compatible_texture_dimension(self) -> TextureDimension {
        match self {
            Self::D1 => TextureDimension::D1,
            Self::D2 | Self::D2Array | Self::Cube | Self::CubeArray => TextureDimension::D2,
            Self::D3 => TextureDimension::D3,
        }
    }
}

/// Kind of data the texture holds.
///
/// Corresponds to [WebGPU `GPUTextureAspect`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gputextureaspect).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum TextureAspect {
    /// Depth, Stencil, and Color.
    #[default]
    All,
    /// Stencil.
    StencilOnly,
    /// Depth.
    DepthOnly,
}

impl FromStr for TextureAspect {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "all" => Self::All,
            "stencil-only" => Self::StencilOnly,
            "depth-only" => Self::DepthOnly,
            _ => return Err(ParseEnumError::new("texture aspect", s)),
        })
    }
}

bitflags::bitflags! {
    /// Different ways that you can use a texture.
    ///
    /// The usages determine what kind of memory the texture is allocated from and what
    /// actions the texture can partake in.
    ///
    /// Corresponds to [WebGPU `GPUTextureUsageFlags`](
    /// https://gpuweb.github.io/gpuweb/#typedefdef-gputextureusageflags).
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        /// Allows a texture to be the source in a `copy_texture_to_buffer`.
        const COPY_SRC = 1 << 0;
        /// Allows a texture to be the destination in a `copy_buffer_to_texture`.
        const COPY_DST = 1 << 1;
        /// Allows a texture to be a sampled texture in a bind group.
        const TEXTURE_BINDING = 1 << 2;
        /// Allows a texture to be a storage texture in a bind group.
        const STORAGE_BINDING = 1 << 3;
        /// Allows a texture to be an output attachment of a render pass.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl_bitflags!(TextureUsages);

bitflags::bitflags! {
    /// Feature flags for a texture format.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TextureFormatFeatureFlags: u32 {
        /// If not present, the texture can't be sampled with a filtering sampler.
        const FILTERABLE = 1 << 0;
        /// Allows [`TextureDescriptor::sample_count`] to be `4`.
        const MULTISAMPLE_X4 = 1 << 1;
        /// When used as a render target, the format can be blended.
        const BLENDABLE = 1 << 2;
        /// Allows a storage texture of this format to be read and written in one shader.
        const STORAGE_READ_WRITE = 1 << 3;
    }
}

impl_bitflags!(TextureFormatFeatureFlags);

/// Features supported by a given texture format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureFormatFeatures {
    /// Valid bits for `TextureDescriptor::usage` provided for format creation.
    pub allowed_usages: TextureUsages,
    /// Additional property flags for the format.
    pub flags: TextureFormatFeatureFlags,
}

impl TextureFormatFeatures {
    /// Features of a format nothing can be done with.
    pub const fn none() -> Self {
        Self {
            allowed_usages: TextureUsages::empty(),
            flags: TextureFormatFeatureFlags::empty(),
        }
    }
}

/// Underlying texture data format.
///
/// If there is a conversion in the format (such as srgb -> linear), the conversion listed here is for
/// loading from texture in a shader. When writing to the texture, the opposite conversion takes place.
///
/// Compressed formats are not exposed by this binding.
///
/// Corresponds to [WebGPU `GPUTextureFormat`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gputextureformat).
#[repr(C)]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum TextureFormat {
    // Normal 8 bit formats
    /// Red channel only. 8 bit integer per channel. [0, 255] converted to/from float [0, 1] in shader.
    R8Unorm,
    /// Red channel only. 8 bit integer per channel. [-127, 127] converted to/from float [-1, 1] in shader.
    R8Snorm,
    /// Red channel only. 8 bit integer per channel. Unsigned in shader.
    R8Uint,
    /// Red channel only. 8 bit integer per channel. Signed in shader.
    R8Sint,

    // Normal 16 bit formats
    /// Red channel only. 16 bit integer per channel. Unsigned in shader.
    R16Uint,
    /// Red channel only. 16 bit integer per channel. Signed in shader.
    R16Sint,
    /// Red channel only. 16 bit float per channel. Float in shader.
    R16Float,
    /// Red and green channels. 8 bit integer per channel. [0, 255] converted to/from float [0, 1] in shader.
    Rg8Unorm,
    /// Red and green channels. 8 bit integer per channel. [-127, 127] converted to/from float [-1, 1] in shader.
    Rg8Snorm,
    /// Red and green channels. 8 bit integer per channel. Unsigned in shader.
    Rg8Uint,
    /// Red and green channels. 8 bit integer per channel. Signed in shader.
    Rg8Sint,

    // Normal 32 bit formats
    /// Red channel only. 32 bit integer per channel. Unsigned in shader.
    R32Uint,
    /// Red channel only. 32 bit integer per channel. Signed in shader.
    R32Sint,
    /// Red channel only. 32 bit float per channel. Float in shader.
    R32Float,
    /// Red and green channels. 16 bit integer per channel. Unsigned in shader.
    Rg16Uint,
    /// Red and green channels. 16 bit integer per channel. Signed in shader.
    Rg16Sint,
    /// Red and green channels. 16 bit float per channel. Float in shader.
    Rg16Float,
    /// Red, green, blue, and alpha channels. 8 bit integer per channel. [0, 255] converted to/from float [0, 1] in shader.
    Rgba8Unorm,
    /// Red, green, blue, and alpha channels. 8 bit integer per channel. Srgb-color [0, 255] converted to/from linear-color float [0, 1] in shader.
    Rgba8UnormSrgb,
    /// Red, green, blue, and alpha channels. 8 bit integer per channel. [-127, 127] converted to/from float [-1, 1] in shader.
    Rgba8Snorm,
    /// Red, green, blue, and alpha channels. 8 bit integer per channel. Unsigned in shader.
    Rgba8Uint,
    /// Red, green, blue, and alpha channels. 8 bit integer per channel. Signed in shader.
    Rgba8Sint,
    /// Blue, green, red, and alpha channels. 8 bit integer per channel. [0, 255] converted to/from float [0, 1] in shader.
    Bgra8Unorm,
    /// Blue, green, red, and alpha channels. 8 bit integer per channel. Srgb-color [0, 255] converted to/from linear-color float [0, 1] in shader.
    Bgra8UnormSrgb,

    // Packed 32 bit formats
    /// Red, green, blue, and alpha channels. 10 bit integer for RGB channels, 2 bit integer for alpha channel. [0, 1023] ([0, 3] for alpha) converted to/from float [0, 1] in shader.
    Rgb10a2Unorm,
    /// Red, green, and blue channels. 11 bit float with no sign bit for RG channels. 10 bit float with no sign bit for blue channel. Float in shader.
    Rg11b10Float,

    // Normal 64 bit formats
    /// Red and green channels. 32 bit integer per channel. Unsigned in shader.
    Rg32Uint,
    /// Red and green channels. 32 bit integer per channel. Signed in shader.
    Rg32Sint,
    /// Red and green channels. 32 bit float per channel. Float in shader.
    Rg32Float,
    /// Red, green, blue, and alpha channels. 16 bit integer per channel. Unsigned in shader.
    Rgba16Uint,
    /// Red, green, blue, and alpha channels. 16 bit integer per channel. Signed in shader.
    Rgba16Sint,
    /// Red, green, blue, and alpha channels. 16 bit float per channel. Float in shader.
    Rgba16Float,

    // Normal 128 bit formats
    /// Red, green, blue, and alpha channels. 32 bit integer per channel. Unsigned in shader.
    Rgba32Uint,
    /// Red, green, blue, and alpha channels. 32 bit integer per channel. Signed in shader.
    Rgba32Sint,
    /// Red, green, blue, and alpha channels. 32 bit float per channel. Float in shader.
    Rgba32Float,

    // Depth and stencil formats
    /// Stencil format with 8 bit integer stencil.
    Stencil8,
    /// Special depth format with 16 bit integer depth.
    Depth16Unorm,
    /// Special depth format with at least 24 bit integer depth.
    Depth24Plus,
    /// Special depth/stencil format with at least 24 bit integer depth and 8 bits integer stencil.
    Depth24PlusStencil8,
    /// Special depth format with 32 bit floating point depth.
    Depth32Float,
}

impl TextureFormat {
    /// Every format exposed by the binding, in declaration order.
    pub const ALL: &'static [TextureFormat] = &[
        Self::R8Unorm,
        Self::R8Snorm,
        Self::R8Uint,
        Self::R8Sint,
        Self::R16Uint,
        Self::R16Sint,
        Self::R16Float,
        Self::Rg8Unorm,
        Self::Rg8Snorm,
        Self::Rg8Uint,
        Self::Rg8Sint,
        Self::R32Uint,
        Self::R32Sint,
        Self::R32Float,
        Self::Rg16Uint,
        Self::Rg16Sint,
        Self::Rg16Float,
        Self::Rgba8Unorm,
        Self::Rgba8UnormSrgb,
        Self::Rgba8Snorm,
        Self::Rgba8Uint,
        Self::Rgba8Sint,
        Self::Bgra8Unorm,
        Self::Bgra8UnormSrgb,
        Self::Rgb10a2Unorm,
        Self::Rg11b10Float,
        Self::Rg32Uint,
        Self::Rg32Sint,
        Self::Rg32Float,
        Self::Rgba16Uint,
        Self::Rgba16Sint,
        Self::Rgba16Float,
        Self::Rgba32Uint,
        Self::Rgba32Sint,
        Self::Rgba32Float,
        Self::Stencil8,
        Self::Depth16Unorm,
        Self::Depth24Plus,
        Self::Depth24PlusStencil8,
        Self::Depth32Float,
    ];

    /// The WebGPU name of the format.
    pub const fn name(self) -> &'static str {
        match self {
            Self::R8Unorm => "r8unorm",
            Self::R8Snorm => "r8snorm",
            Self::R8Uint => "r8uint",
            Self::R8Sint => "r8sint",
            Self::R16Uint => "r16uint",
            Self::R16Sint => "r16sint",
            Self::R16Float => "r16float",
            Self::Rg8Unorm => "rg8unorm",
            Self::Rg8Snorm => "rg8snorm",
            Self::Rg8Uint => "rg8uint",
            Self::Rg8Sint => "rg8sint",
            Self::R32Uint => "r32uint",
            Self::R32Sint => "r32sint",
            Self::R32Float => "r32float",
            Self::Rg16Uint => "rg16uint",
            Self::Rg16Sint => "rg16sint",
            Self::Rg16Float => "rg16float",
            Self::Rgba8Unorm => "rgba8unorm",
            Self::Rgba8UnormSrgb => "rgba8unorm-srgb",
            Self::Rgba8Snorm => "rgba8snorm",
            Self::Rgba8Uint => "rgba8uint",
            Self::Rgba8Sint => "rgba8sint",
            Self::Bgra8Unorm => "bgra8unorm",
            Self::Bgra8UnormSrgb => "bgra8unorm-srgb",
            Self::Rgb10a2Unorm => "rgb10a2unorm",
            Self::Rg11b10Float => "rg11b10ufloat",
            Self::Rg32Uint => "rg32uint",
            Self::Rg32Sint => "rg32sint",
            Self::Rg32Float => "rg32float",
            Self::Rgba16Uint => "rgba16uint",
            Self::Rgba16Sint => "rgba16sint",
            Self::Rgba16Float => "rgba16float",
            Self::Rgba32Uint => "rgba32uint",
            Self::Rgba32Sint => "rgba32sint",
            Self::Rgba32Float => "rgba32float",
            Self::Stencil8 => "stencil8",
            Self::Depth16Unorm => "depth16unorm",
            Self::Depth24Plus => "depth24plus",
            Self::Depth24PlusStencil8 => "depth24plus-stencil8",
            Self::Depth32Float => "depth32float",
        }
    }

    /// Strips the `Srgb` suffix from the given texture format.
    pub fn remove_srgb_suffix(self) -> Self {
        match self {
            Self::Rgba8UnormSrgb => Self::Rgba8Unorm,
            Self::Bgra8UnormSrgb => Self::Bgra8Unorm,
            _ => self,
        }
    }

    /// Returns `true` if `self` is a depth or stencil component of the given
    /// combined depth-stencil format.
    pub fn is_depth_stencil_format(self) -> bool {
        match self {
            Self::Stencil8
            | Self::Depth16Unorm
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => true,
            _ => false,
        }
    }

    /// Returns `true` if the format has a depth aspect.
    pub fn has_depth_aspect(self) -> bool {
        match self {
            Self::Depth16Unorm
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => true,
            _ => false,
        }
    }

    /// Returns `true` if the format has a color aspect.
    pub fn has_color_aspect(self) -> bool {
        !self.is_depth_stencil_format()
    }

    /// Returns the features required by the device in order to use this format at all.
    pub fn required_features(self) -> Features {
        Features::empty()
    }

    /// The number of bytes one texel block occupies during an image copy, if applicable.
    ///
    /// Returns `None` for formats (or aspects of them) that cannot be copied,
    /// and for combined depth-stencil formats when `aspect` doesn't select a single aspect.
    pub fn block_copy_size(self, aspect: Option<TextureAspect>) -> Option<u32> {
        match self {
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint => Some(1),

            Self::Rg8Unorm | Self::Rg8Snorm | Self::Rg8Uint | Self::Rg8Sint => Some(2),
            Self::R16Uint | Self::R16Sint | Self::R16Float => Some(2),

            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Rgba8Snorm
            | Self::Rgba8Uint
            | Self::Rgba8Sint
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb => Some(4),
            Self::Rg16Uint | Self::Rg16Sint | Self::Rg16Float => Some(4),
            Self::R32Uint | Self::R32Sint | Self::R32Float => Some(4),
            Self::Rgb10a2Unorm | Self::Rg11b10Float => Some(4),

            Self::Rgba16Uint | Self::Rgba16Sint | Self::Rgba16Float => Some(8),
            Self::Rg32Uint | Self::Rg32Sint | Self::Rg32Float => Some(8),

            Self::Rgba32Uint | Self::Rgba32Sint | Self::Rgba32Float => Some(16),

            Self::Stencil8 => Some(1),
            Self::Depth16Unorm => Some(2),
            Self::Depth32Float => Some(4),
            Self::Depth24Plus => None,
            Self::Depth24PlusStencil8 => match aspect {
                Some(TextureAspect::StencilOnly) => Some(1),
                _ => None,
            },
        }
    }

    /// The size of one texel in backend memory, used to size allocations.
    pub fn block_memory_size(self) -> u32 {
        match self {
            Self::Depth24Plus => 4,
            Self::Depth24PlusStencil8 => 4,
            _ => self.block_copy_size(None).unwrap_or(4),
        }
    }

    /// Returns the format features every WebGPU implementation guarantees.
    ///
    /// Backends may expose more through their capability tables.
    pub fn guaranteed_format_features(self, device_features: Features) -> TextureFormatFeatures {
        let copy = TextureUsages::COPY_SRC | TextureUsages::COPY_DST;
        let basic = copy | TextureUsages::TEXTURE_BINDING;
        let attachment = basic | TextureUsages::RENDER_ATTACHMENT;
        let storage = basic | TextureUsages::STORAGE_BINDING;
        let all_flags = TextureUsages::all();

        let rg11b10_usages = if device_features.contains(Features::RG11B10UFLOAT_RENDERABLE) {
            attachment
        } else {
            basic
        };
        let float32_filterable = device_features.contains(Features::FLOAT32_FILTERABLE);

        let msaa = TextureFormatFeatureFlags::MULTISAMPLE_X4;
        let msaa_blend = msaa | TextureFormatFeatureFlags::BLENDABLE;
        let filter = TextureFormatFeatureFlags::FILTERABLE;
        let filter_msaa_blend = filter | msaa_blend;
        let empty = TextureFormatFeatureFlags::empty();

        #[rustfmt::skip] // lets make a nice table
        let (flags, allowed_usages) = match self {
            Self::R8Unorm =>              (filter_msaa_blend, attachment),
            Self::R8Snorm =>              (            filter,      basic),
            Self::R8Uint =>               (              msaa, attachment),
            Self::R8Sint =>               (              msaa, attachment),
            Self::R16Uint =>              (              msaa, attachment),
            Self::R16Sint =>              (              msaa, attachment),
            Self::R16Float =>             (filter_msaa_blend, attachment),
            Self::Rg8Unorm =>             (filter_msaa_blend, attachment),
            Self::Rg8Snorm =>             (            filter,      basic),
            Self::Rg8Uint =>              (              msaa, attachment),
            Self::Rg8Sint =>              (              msaa, attachment),
            Self::R32Uint =>              (             empty,  all_flags),
            Self::R32Sint =>              (             empty,  all_flags),
            Self::R32Float =>             (              msaa,  all_flags),
            Self::Rg16Uint =>             (              msaa, attachment),
            Self::Rg16Sint =>             (              msaa, attachment),
            Self::Rg16Float =>            (filter_msaa_blend, attachment),
            Self::Rgba8Unorm =>           (filter_msaa_blend,  all_flags),
            Self::Rgba8UnormSrgb =>       (filter_msaa_blend, attachment),
            Self::Rgba8Snorm =>           (            filter,    storage),
            Self::Rgba8Uint =>            (              msaa,  all_flags),
            Self::Rgba8Sint =>            (              msaa,  all_flags),
            Self::Bgra8Unorm =>           (filter_msaa_blend, attachment),
            Self::Bgra8UnormSrgb =>       (filter_msaa_blend, attachment),
            Self::Rgb10a2Unorm =>         (filter_msaa_blend, attachment),
            Self::Rg11b10Float =>         (            filter, rg11b10_usages),
            Self::Rg32Uint =>             (             empty,  all_flags),
            Self::Rg32Sint =>             (             empty,  all_flags),
            Self::Rg32Float =>            (             empty,  all_flags),
            Self::Rgba16Uint =>           (              msaa,  all_flags),
            Self::Rgba16Sint =>           (              msaa,  all_flags),
            Self::Rgba16Float =>          (filter_msaa_blend,  all_flags),
            Self::Rgba32Uint =>           (             empty,  all_flags),
            Self::Rgba32Sint =>           (             empty,  all_flags),
            Self::Rgba32Float =>          (             empty,  all_flags),
            Self::Stencil8 =>             (              msaa, attachment),
            Self::Depth16Unorm =>         (              msaa, attachment),
            Self::Depth24Plus =>          (              msaa, attachment - copy),
            Self::Depth24PlusStencil8 =>  (              msaa, attachment - copy),
            Self::Depth32Float =>         (              msaa, attachment - TextureUsages::COPY_DST),
        };

        let mut flags = flags;
        if float32_filterable
            && matches!(self, Self::R32Float | Self::Rg32Float | Self::Rgba32Float)
        {
            flags |= TextureFormatFeatureFlags::FILTERABLE;
        }

        TextureFormatFeatures {
            allowed_usages,
            flags,
        }
    }
}

impl fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TextureFormat {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|format| format.name() == s)
            .ok_or_else(|| ParseEnumError::new("texture format", s))
    }
}

#[cfg(feature = "serde")]
impl Serialize for TextureFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for TextureFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Describes a texture.
///
/// Corresponds to [WebGPU `GPUTextureDescriptor`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gputexturedescriptor).
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureDescriptor<L> {
    /// Debug label of the texture. This will show up in graphics debuggers for easy identification.
    pub label: L,
    /// Size of the texture. All components must be greater than zero. For a
    /// regular 1D/2D texture, the unused sizes will be 1. For 2DArray textures,
    /// Z is the number of 2D textures in that array.
    pub size: Extent3d,
    /// Mip count of texture. For a texture with no extra mips, this must be 1.
    pub mip_level_count: u32,
    /// Sample count of texture. If this is not 1, texture must have [`BindingType::Texture::multisampled`] set to true.
    pub sample_count: u32,
    /// Dimensions of the texture.
    pub dimension: TextureDimension,
    /// Format of the texture.
    pub format: TextureFormat,
    /// Allowed usages of the texture. If used in other ways, the operation will be rejected.
    pub usage: TextureUsages,
}

impl<L> TextureDescriptor<L> {
    /// Takes a closure and maps the label of the texture descriptor into another.
    pub fn map_label<K>(&self, fun: impl FnOnce(&L) -> K) -> TextureDescriptor<K> {
        TextureDescriptor {
            label: fun(&self.label),
            size: self.size,
            mip_level_count: self.mip_level_count,
            sample_count: self.sample_count,
            dimension: self.dimension,
            format: self.format,
            usage: self.usage,
        }
    }

    /// Returns the number of array layers.
    pub fn array_layer_count(&self) -> u32 {
        match self.dimension {
            TextureDimension::D1 | TextureDimension::D3 => 1,
            TextureDimension::D2 => self.size.depth_or_array_layers,
        }
    }
}

/// Describes a texture view.
///
/// Corresponds to [WebGPU `GPUTextureViewDescriptor`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gputextureviewdescriptor).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextureViewDescriptor<L> {
    /// Debug label of the texture view.
    pub label: L,
    /// Format of the texture view. Either must be the same as the texture format or its
    /// sRGB sibling. `None` means the texture's format.
    pub format: Option<TextureFormat>,
    /// The dimension of the texture view. `None` derives it from the texture.
    pub dimension: Option<TextureViewDimension>,
    /// Aspect of the texture. Color textures must be [`TextureAspect::All`].
    pub aspect: TextureAspect,
    /// Base mip level.
    pub base_mip_level: u32,
    /// Mip level count. `None` means all remaining levels.
    pub mip_level_count: Option<u32>,
    /// Base array layer.
    pub base_array_layer: u32,
    /// Layer count. `None` means all remaining layers.
    pub array_layer_count: Option<u32>,
}

/// Layout of a texture in a buffer's memory.
///
/// Corresponds to [WebGPU `GPUImageDataLayout`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpuimagedatalayout).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImageDataLayout {
    /// Offset into the buffer that is the start of the texture. Must be a multiple of texture block size.
    pub offset: BufferAddress,
    /// Bytes per "row" in an image.
    ///
    /// Must be a multiple of [`COPY_BYTES_PER_ROW_ALIGNMENT`]. Required if there is more
    /// than one row of texel blocks to copy.
    pub bytes_per_row: Option<u32>,
    /// "Rows" that make up a single "image".
    ///
    /// Required if there are multiple images (i.e. the depth is more than one).
    pub rows_per_image: Option<u32>,
}

/// RGBA double precision color.
///
/// Corresponds to [WebGPU `GPUColor`](https://gpuweb.github.io/gpuweb/#typedefdef-gpucolor).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    /// Red component of the color
    pub r: f64,
    /// Green component of the color
    pub g: f64,
    /// Blue component of the color
    pub b: f64,
    /// Alpha component of the color
    pub a: f64,
}

#[allow(missing_docs)]
impl Color {
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const RED: Self = Self {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    /// Build a color from the sequence form `[r, g, b, a]`.
    ///
    /// Missing color components are zero; a missing alpha is one.
    pub fn from_slice(values: &[f64]) -> Self {
        let get = |i: usize, default: f64| values.get(i).copied().unwrap_or(default);
        Self {
            r: get(0, 0.0),
            g: get(1, 0.0),
            b: get(2, 0.0),
            a: get(3, 1.0),
        }
    }
}

/// Operation to perform to the output attachment at the start of a render pass.
///
/// Corresponds to [WebGPU `GPULoadOp`](https://gpuweb.github.io/gpuweb/#enumdef-gpuloadop),
/// plus the corresponding clearValue.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum LoadOp<V> {
    /// Loads the specified value for this attachment into the render pass.
    Clear(V),
    /// Loads the existing value for this attachment into the render pass.
    Load,
}

impl<V: Default> Default for LoadOp<V> {
    fn default() -> Self {
        Self::Clear(Default::default())
    }
}

impl<V> LoadOp<V> {
    /// Build a load op from its WebGPU name and the attachment's clear value.
    ///
    /// An empty name is treated as `"load"`.
    pub fn from_webgpu(name: &str, clear_value: V) -> Result<Self, ParseEnumError> {
        match name {
            "" | "load" => Ok(Self::Load),
            "clear" => Ok(Self::Clear(clear_value)),
            _ => Err(ParseEnumError::new("load op", name)),
        }
    }
}

/// Operation to perform to the output attachment at the end of a render pass.
///
/// Corresponds to [WebGPU `GPUStoreOp`](https://gpuweb.github.io/gpuweb/#enumdef-gpustoreop).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum StoreOp {
    /// Stores the resulting value of the render pass for this attachment.
    #[default]
    Store,
    /// Discards the resulting value of the render pass for this attachment.
    Discard,
}

impl FromStr for StoreOp {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store" => Ok(Self::Store),
            "discard" => Ok(Self::Discard),
            _ => Err(ParseEnumError::new("store op", s)),
        }
    }
}

/// Pair of load and store operations for an attachment aspect.
#[repr(C)]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Operations<V> {
    /// How data should be read through this attachment.
    pub load: LoadOp<V>,
    /// Whether data will be written to through this attachment.
    pub store: StoreOp,
}

impl<V: Default> Default for Operations<V> {
    #[inline]
    fn default() -> Self {
        Self {
            load: LoadOp::<V>::default(),
            store: StoreOp::default(),
        }
    }
}

/// Describes the color state of a render pipeline.
///
/// Corresponds to [WebGPU `GPUColorTargetState`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpucolortargetstate).
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ColorTargetState {
    /// The [`TextureFormat`] of the image that this pipeline will render to. Must match the format
    /// of the corresponding color attachment in the render pass.
    pub format: TextureFormat,
}

impl From<TextureFormat> for ColorTargetState {
    fn from(format: TextureFormat) -> Self {
        Self { format }
    }
}

/// Comparison function used for depth and stencil operations.
#[repr(C)]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CompareFunction {
    /// Function never passes
    Never = 1,
    /// Function passes if new value less than existing value
    Less = 2,
    /// Function passes if new value is equal to existing value.
    Equal = 3,
    /// Function passes if new value is less than or equal to existing value
    LessEqual = 4,
    /// Function passes if new value is greater than existing value
    Greater = 5,
    /// Function passes if new value is not equal to existing value.
    NotEqual = 6,
    /// Function passes if new value is greater than or equal to existing value
    GreaterEqual = 7,
    /// Function always passes
    Always = 8,
}

/// Describes the depth/stencil state in a render pipeline.
///
/// Corresponds to [WebGPU `GPUDepthStencilState`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpudepthstencilstate).
#[repr(C)]
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepthStencilState {
    /// Format of the depth/stencil buffer, must be special depth format. Must match the format
    /// of the depth/stencil attachment in the render pass.
    pub format: TextureFormat,
    /// If disabled, depth will not be written to.
    pub depth_write_enabled: bool,
    /// Comparison function used to compare depth values in the depth test.
    pub depth_compare: CompareFunction,
}

/// Primitive type the input mesh is composed of.
///
/// Corresponds to [WebGPU `GPUPrimitiveTopology`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gpuprimitivetopology).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum PrimitiveTopology {
    /// Vertex data is a list of points. Each vertex is a new point.
    PointList = 0,
    /// Vertex data is a list of lines. Each pair of vertices composes a new line.
    LineList = 1,
    /// Vertex data is a strip of lines. Each set of two adjacent vertices form a line.
    LineStrip = 2,
    /// Vertex data is a list of triangles. Each set of 3 vertices composes a new triangle.
    #[default]
    TriangleList = 3,
    /// Vertex data is a triangle strip. Each set of three adjacent vertices form a triangle.
    TriangleStrip = 4,
}

/// Describes the multi-sampling state of a render pipeline.
///
/// Corresponds to [WebGPU `GPUMultisampleState`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpumultisamplestate).
#[repr(C)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MultisampleState {
    /// The number of samples calculated per pixel (for MSAA). For non-multisampled textures,
    /// this should be `1`
    pub count: u32,
    /// Bitmask that restricts the samples of a pixel modified by this pipeline.
    pub mask: u64,
    /// When enabled, produces another sample mask per pixel based on the alpha output value.
    pub alpha_to_coverage_enabled: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        }
    }
}

/// Specific type of a buffer binding.
///
/// Corresponds to [WebGPU `GPUBufferBindingType`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gpubufferbindingtype).
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BufferBindingType {
    /// A buffer for uniform values.
    #[default]
    Uniform,
    /// A storage buffer.
    Storage {
        /// If `true`, the buffer can only be read in the shader.
        read_only: bool,
    },
}

/// Specific type of a sample in a texture binding.
///
/// Corresponds to [WebGPU `GPUTextureSampleType`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gputexturesampletype).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureSampleType {
    /// Sampling returns floats.
    Float {
        /// If this is `false`, the texture can't be sampled with a filtering sampler.
        filterable: bool,
    },
    /// Sampling does the depth reference comparison.
    Depth,
    /// Sampling returns signed integers.
    Sint,
    /// Sampling returns unsigned integers.
    Uint,
}

impl Default for TextureSampleType {
    fn default() -> Self {
        Self::Float { filterable: true }
    }
}

/// Specific type of a sample in a storage texture binding.
///
/// Corresponds to [WebGPU `GPUStorageTextureAccess`](
/// https://gpuweb.github.io/gpuweb/#enumdef-gpustoragetextureaccess).
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StorageTextureAccess {
    /// The texture can only be written in the shader.
    WriteOnly,
    /// The texture can only be read in the shader.
    ReadOnly,
    /// The texture can be both read and written in the shader.
    ReadWrite,
}

/// Specific type of a binding.
///
/// Corresponds to WebGPU's mutually exclusive fields within [`GPUBindGroupLayoutEntry`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpubindgrouplayoutentry).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BindingType {
    /// A buffer binding.
    Buffer {
        /// Sub-type of the buffer binding.
        ty: BufferBindingType,
        /// Minimum size of the corresponding `BufferBinding` required to match this entry.
        min_binding_size: Option<BufferSize>,
    },
    /// A texture binding.
    Texture {
        /// Sample type of the texture binding.
        sample_type: TextureSampleType,
        /// Dimension of the texture view that is going to be sampled.
        view_dimension: TextureViewDimension,
        /// True if the texture has a sample count greater than 1.
        multisampled: bool,
    },
    /// A storage texture.
    StorageTexture {
        /// Allowed access to this texture.
        access: StorageTextureAccess,
        /// Format of the texture.
        format: TextureFormat,
        /// Dimension of the texture view that is going to be sampled.
        view_dimension: TextureViewDimension,
    },
}

/// Describes a single binding inside a bind group.
///
/// Corresponds to [WebGPU `GPUBindGroupLayoutEntry`](
/// https://gpuweb.github.io/gpuweb/#dictdef-gpubindgrouplayoutentry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BindGroupLayoutEntry {
    /// Binding index. Must match shader index and be unique inside a BindGroupLayout.
    pub binding: u32,
    /// Which shader stages can see this binding.
    pub visibility: ShaderStages,
    /// The type of the binding
    pub ty: BindingType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_row_pitch() {
        assert_eq!(padded_bytes_per_row(0), 0);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(256), 256);
        assert_eq!(padded_bytes_per_row(257), 512);
        // 200 texels of a 4 byte format.
        assert_eq!(padded_bytes_per_row(200 * 4), 1024);
    }

    #[test]
    fn texture_format_names_round_trip() {
        for &format in TextureFormat::ALL {
            assert_eq!(format.name().parse::<TextureFormat>(), Ok(format));
        }
        assert!("bgra8unorm-srgbx".parse::<TextureFormat>().is_err());
    }

    #[test]
    fn depth_stencil_copy_sizes() {
        let format = TextureFormat::Depth24PlusStencil8;
        assert_eq!(format.block_copy_size(None), None);
        assert_eq!(format.block_copy_size(Some(TextureAspect::StencilOnly)), Some(1));
        assert_eq!(TextureFormat::Depth24Plus.block_copy_size(None), None);
        assert_eq!(TextureFormat::Rgba32Float.block_copy_size(None), Some(16));
    }

    #[test]
    fn rg11b10_renderable_behind_feature() {
        let format = TextureFormat::Rg11b10Float;
        let base = format.guaranteed_format_features(Features::empty());
        assert!(!base
            .allowed_usages
            .contains(TextureUsages::RENDER_ATTACHMENT));
        let extended = format.guaranteed_format_features(Features::RG11B10UFLOAT_RENDERABLE);
        assert!(extended
            .allowed_usages
            .contains(TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn limits_report_every_failure() {
        let allowed = Limits::default();
        let requested = Limits {
            max_bind_groups: 5,
            max_buffer_size: allowed.max_buffer_size + 1,
            min_uniform_buffer_offset_alignment: 64,
            ..Limits::default()
        };
        let mut failed = Vec::new();
        requested.check_limits_with_fail_fn(&allowed, false, |name, _, _| failed.push(name));
        assert_eq!(
            failed,
            [
                "max_bind_groups",
                "max_buffer_size",
                "min_uniform_buffer_offset_alignment"
            ]
        );
        assert!(Limits::default().check_limits(&allowed));
    }

    #[test]
    fn partial_sequences() {
        assert_eq!(
            Color::from_slice(&[0.5]),
            Color {
                r: 0.5,
                g: 0.0,
                b: 0.0,
                a: 1.0
            }
        );
        assert_eq!(Origin3d::from_slice(&[3, 4]), Origin3d { x: 3, y: 4, z: 0 });
        assert_eq!(mip_count_for(200, 100), 8);
    }

    fn mip_count_for(width: u32, height: u32) -> u32 {
        Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        }
        .max_mips(TextureDimension::D2)
    }

    #[test]
    fn load_and_store_ops_from_strings() {
        assert_eq!(
            LoadOp::from_webgpu("clear", Color::RED),
            Ok(LoadOp::Clear(Color::RED))
        );
        assert_eq!(LoadOp::from_webgpu("", Color::RED), Ok(LoadOp::Load));
        assert!(LoadOp::from_webgpu("keep", Color::RED).is_err());
        assert_eq!("discard".parse::<StoreOp>(), Ok(StoreOp::Discard));
        assert_eq!("depth-only".parse::<TextureAspect>(), Ok(TextureAspect::DepthOnly));
        assert_eq!(
            "out-of-memory".parse::<ErrorFilter>(),
            Ok(ErrorFilter::OutOfMemory)
        );
        assert_eq!("3d".parse::<TextureDimension>(), Ok(TextureDimension::D3));
        assert!("cube".parse::<TextureDimension>().is_err());
    }

    #[test]
    fn backend_lists() {
        assert_eq!(
            Backends::from_comma_list("Noop, vk,unknown"),
            Backends::NOOP | Backends::VULKAN
        );
        assert!(Backends::from_comma_list("").is_empty());
        assert!(Backends::from(Backend::Noop).contains(Backends::NOOP));
    }
}
