//! In-memory backend.
//!
//! Resources live in host memory, copies and attachment clears are executed
//! for real at submission time, and everything else (draws, dispatches,
//! state changes) is only recorded in the execution log. Work is complete as
//! soon as `submit` returns, unless the device holds its fences back with
//! [`Device::hold_fences`].

mod command;

use std::{
    ops::Range,
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use fxhash::FxHashSet;
use parking_lot::Mutex;

pub use command::{CommandBuffer, CommandEncoder};

type DeviceResult<T> = Result<T, crate::DeviceError>;

/// Host memory backing a buffer.
type Memory = Arc<Mutex<Box<[u8]>>>;

#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Instance = Instance;
    type Adapter = Adapter;
    type Device = Device;
    type Queue = Queue;

    type CommandEncoder = CommandEncoder;
    type CommandBuffer = CommandBuffer;

    type Buffer = Buffer;
    type Texture = Texture;
    type TextureView = TextureView;
    type Fence = Fence;

    type BindGroupLayout = Resource;
    type BindGroup = Resource;
    type PipelineLayout = Resource;
    type ShaderModule = ShaderModule;
    type RenderPipeline = Resource;
    type ComputePipeline = Resource;
}

/// Description of one adapter exposed by the noop [`Instance`].
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    pub name: String,
    pub device_type: wgt::DeviceType,
    pub features: wgt::Features,
    pub limits: wgt::Limits,
    /// Total bytes of buffers and textures a device may hold before
    /// allocations report out-of-memory.
    pub memory_budget: Option<u64>,
    /// Formats the adapter reports no capabilities for.
    pub unsupported_formats: Vec<wgt::TextureFormat>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: "Noop Adapter".to_string(),
            device_type: wgt::DeviceType::Cpu,
            features: wgt::Features::all(),
            limits: wgt::Limits::default(),
            memory_budget: None,
            unsupported_formats: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Instance {
    adapters: Vec<AdapterConfig>,
}

impl Instance {
    /// Create an instance exposing exactly the given adapters, in order.
    pub fn with_adapters(adapters: Vec<AdapterConfig>) -> Self {
        Self { adapters }
    }
}

impl crate::Instance<Api> for Instance {
    unsafe fn init(desc: &crate::InstanceDescriptor) -> Result<Self, crate::InstanceError> {
        log::debug!("Initializing noop instance {:?}", desc.name);
        Ok(Self::with_adapters(vec![AdapterConfig::default()]))
    }

    unsafe fn enumerate_adapters(&self) -> Vec<crate::ExposedAdapter<Api>> {
        self.adapters
            .iter()
            .enumerate()
            .map(|(index, config)| crate::ExposedAdapter {
                info: wgt::AdapterInfo {
                    name: config.name.clone(),
                    vendor: 0,
                    device: index as u32,
                    device_type: config.device_type,
                    backend: wgt::Backend::Noop,
                },
                features: config.features,
                capabilities: crate::Capabilities {
                    limits: config.limits.clone(),
                },
                adapter: Adapter {
                    config: config.clone(),
                    unsupported_formats: config.unsupported_formats.iter().copied().collect(),
                },
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct Adapter {
    config: AdapterConfig,
    unsupported_formats: FxHashSet<wgt::TextureFormat>,
}

impl crate::Adapter<Api> for Adapter {
    unsafe fn open(
        &self,
        features: wgt::Features,
        _limits: &wgt::Limits,
    ) -> DeviceResult<crate::OpenDevice<Api>> {
        log::debug!(
            "Opening noop device on {:?} with {:?}",
            self.config.name,
            features
        );
        let shared = Arc::new(Shared::default());
        Ok(crate::OpenDevice {
            device: Device {
                shared: Arc::clone(&shared),
                memory_budget: self.config.memory_budget,
            },
            queue: Queue { shared },
        })
    }

    unsafe fn texture_format_capabilities(
        &self,
        format: wgt::TextureFormat,
    ) -> crate::TextureFormatCapabilities {
        if self.unsupported_formats.contains(&format) {
            return crate::TextureFormatCapabilities::empty();
        }
        let features = format.guaranteed_format_features(self.config.features);
        crate::TextureFormatCapabilities::from_format_features(format, features)
    }
}

/// One command executed by the noop queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedCommand {
    /// Fence value signalled by the submission that carried the command.
    pub submission: crate::FenceValue,
    /// Label of the command buffer the command was recorded into.
    pub command_buffer: Option<String>,
    /// Name of the command, with its main arguments.
    pub command: String,
}

/// State shared between a device and its queue.
#[derive(Debug, Default)]
struct Shared {
    lost: AtomicBool,
    allocated: AtomicU64,
    log: Mutex<Vec<ExecutedCommand>>,
    /// Highest fence value signalled by a submission.
    signalled: AtomicU64,
    /// While set, fences report no value past this one.
    held_at: Mutex<Option<crate::FenceValue>>,
}

impl Shared {
    fn check_lost(&self) -> DeviceResult<()> {
        if self.lost.load(Ordering::Acquire) {
            Err(crate::DeviceError::Lost)
        } else {
            Ok(())
        }
    }

    fn completed(&self, fence: &Fence) -> crate::FenceValue {
        match *self.held_at.lock() {
            Some(held) => fence.value.min(held),
            None => fence.value,
        }
    }
}

#[derive(Debug)]
pub struct Device {
    shared: Arc<Shared>,
    memory_budget: Option<u64>,
}

impl Device {
    /// Every command executed by this device's queue so far, in execution order.
    pub fn execution_log(&self) -> Vec<ExecutedCommand> {
        self.shared.log.lock().clone()
    }

    /// Drop the recorded execution log.
    pub fn clear_execution_log(&self) {
        self.shared.log.lock().clear();
    }

    /// Make every subsequent call on this device and its queue report
    /// [`DeviceError::Lost`](crate::DeviceError::Lost).
    pub fn simulate_device_lost(&self) {
        log::warn!("Simulating loss of the noop device");
        self.shared.lost.store(true, Ordering::Release);
    }

    /// Stop fences from advancing past the work submitted so far.
    ///
    /// Later submissions still execute, but they are reported as running
    /// until [`Device::release_fences`].
    pub fn hold_fences(&self) {
        let mut held = self.shared.held_at.lock();
        if held.is_none() {
            *held = Some(self.shared.signalled.load(Ordering::Acquire));
        }
    }

    /// Let fences catch up with every submission.
    pub fn release_fences(&self) {
        self.shared.held_at.lock().take();
    }

    /// Bytes currently held by buffers and textures of this device.
    pub fn allocated_bytes(&self) -> u64 {
        self.shared.allocated.load(Ordering::Acquire)
    }

    fn allocate(&self, size: u64) -> DeviceResult<()> {
        self.shared.check_lost()?;
        let previous = self.shared.allocated.fetch_add(size, Ordering::AcqRel);
        match self.memory_budget {
            Some(budget) if previous.saturating_add(size) > budget => {
                self.shared.allocated.fetch_sub(size, Ordering::AcqRel);
                Err(crate::DeviceError::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    fn release(&self, size: u64) {
        self.shared.allocated.fetch_sub(size, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct Queue {
    shared: Arc<Shared>,
}

impl crate::Queue<Api> for Queue {
    unsafe fn submit(
        &mut self,
        command_buffers: &[&CommandBuffer],
        signal_fence: (&mut Fence, crate::FenceValue),
    ) -> DeviceResult<()> {
        self.shared.check_lost()?;
        let (fence, value) = signal_fence;
        let mut log = self.shared.log.lock();
        for cmd_buf in command_buffers {
            cmd_buf.execute(value, &mut log);
        }
        fence.value = fence.value.max(value);
        self.shared.signalled.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }
}

#[derive(Debug)]
pub struct Buffer {
    memory: Memory,
    size: wgt::BufferAddress,
}

/// Texel storage of a texture, one allocation per mip level.
///
/// Each level holds `depth_or_array_layers` slices of `height` rows.
#[derive(Debug)]
struct TextureStorage {
    format: wgt::TextureFormat,
    dimension: wgt::TextureDimension,
    size: wgt::Extent3d,
    mips: Mutex<Vec<Box<[u8]>>>,
}

impl TextureStorage {
    fn mip_extent(&self, level: u32) -> wgt::Extent3d {
        self.size.mip_level_size(level, self.dimension)
    }

    fn texel_bytes(&self) -> usize {
        self.format.block_memory_size() as usize
    }

    /// Byte offset of texel `(x, y, slice)` within the given mip level.
    fn texel_offset(&self, level: u32, x: u32, y: u32, slice: u32) -> usize {
        let extent = self.mip_extent(level);
        let index = (slice as usize * extent.height as usize + y as usize) * extent.width as usize
            + x as usize;
        index * self.texel_bytes()
    }
}

#[derive(Debug)]
pub struct Texture {
    storage: Arc<TextureStorage>,
    bytes: u64,
}

#[derive(Debug)]
pub struct TextureView {
    storage: Arc<TextureStorage>,
    format: wgt::TextureFormat,
    mip_level: u32,
    array_layer: u32,
}

#[derive(Debug)]
pub struct Fence {
    value: crate::FenceValue,
}

#[derive(Debug)]
pub struct Resource;

#[derive(Debug)]
pub struct ShaderModule {
    entry_points: Vec<(String, naga::ShaderStage)>,
}

impl ShaderModule {
    fn check_stage(
        &self,
        stage: &crate::ProgrammableStage<Api>,
        kind: naga::ShaderStage,
    ) -> Result<(), crate::PipelineError> {
        if self
            .entry_points
            .iter()
            .any(|(name, ep_stage)| name == stage.entry_point && *ep_stage == kind)
        {
            Ok(())
        } else {
            Err(crate::PipelineError::EntryPoint(kind))
        }
    }
}

impl crate::Device<Api> for Device {
    unsafe fn exit(self, _queue: Queue) {
        log::debug!("Closing noop device");
    }

    unsafe fn create_buffer(&self, desc: &crate::BufferDescriptor) -> DeviceResult<Buffer> {
        self.allocate(desc.size)?;
        Ok(Buffer {
            memory: Arc::new(Mutex::new(vec![0u8; desc.size as usize].into_boxed_slice())),
            size: desc.size,
        })
    }
    unsafe fn destroy_buffer(&self, buffer: Buffer) {
        self.release(buffer.size);
    }
    unsafe fn map_buffer(
        &self,
        buffer: &Buffer,
        range: crate::MemoryRange,
    ) -> DeviceResult<crate::BufferMapping> {
        self.shared.check_lost()?;
        let mut memory = buffer.memory.lock();
        let offset = (range.start as usize).min(memory.len());
        // The allocation never moves, so the pointer outlives the guard.
        let ptr = memory[offset..].as_mut_ptr();
        Ok(crate::BufferMapping {
            ptr: NonNull::new(ptr).ok_or(crate::DeviceError::OutOfMemory)?,
            is_coherent: true,
        })
    }
    unsafe fn unmap_buffer(&self, _buffer: &Buffer) -> DeviceResult<()> {
        self.shared.check_lost()
    }

    unsafe fn create_texture(&self, desc: &crate::TextureDescriptor) -> DeviceResult<Texture> {
        let texel_bytes = desc.format.block_memory_size() as u64;
        let mut mips = Vec::with_capacity(desc.mip_level_count as usize);
        let mut bytes = 0;
        for level in 0..desc.mip_level_count {
            let extent = desc.size.mip_level_size(level, desc.dimension);
            let level_bytes = extent.width as u64
                * extent.height as u64
                * extent.depth_or_array_layers as u64
                * texel_bytes;
            bytes += level_bytes;
            mips.push(level_bytes);
        }
        self.allocate(bytes)?;
        Ok(Texture {
            storage: Arc::new(TextureStorage {
                format: desc.format,
                dimension: desc.dimension,
                size: desc.size,
                mips: Mutex::new(
                    mips.into_iter()
                        .map(|level_bytes| vec![0u8; level_bytes as usize].into_boxed_slice())
                        .collect(),
                ),
            }),
            bytes,
        })
    }
    unsafe fn destroy_texture(&self, texture: Texture) {
        self.release(texture.bytes);
    }
    unsafe fn create_texture_view(
        &self,
        texture: &Texture,
        desc: &crate::TextureViewDescriptor,
    ) -> DeviceResult<TextureView> {
        self.shared.check_lost()?;
        Ok(TextureView {
            storage: Arc::clone(&texture.storage),
            format: desc.format,
            mip_level: desc.mip_levels.start,
            array_layer: desc.array_layers.start,
        })
    }
    unsafe fn destroy_texture_view(&self, _view: TextureView) {}

    unsafe fn create_command_encoder(
        &self,
        desc: &crate::CommandEncoderDescriptor,
    ) -> DeviceResult<CommandEncoder> {
        self.shared.check_lost()?;
        Ok(CommandEncoder::new(desc.label))
    }
    unsafe fn destroy_command_encoder(&self, _encoder: CommandEncoder) {}
    unsafe fn destroy_command_buffer(&self, _cmd_buf: CommandBuffer) {}

    unsafe fn create_bind_group_layout(
        &self,
        _desc: &crate::BindGroupLayoutDescriptor,
    ) -> DeviceResult<Resource> {
        self.shared.check_lost()?;
        Ok(Resource)
    }
    unsafe fn destroy_bind_group_layout(&self, _bg_layout: Resource) {}
    unsafe fn create_pipeline_layout(
        &self,
        _desc: &crate::PipelineLayoutDescriptor<Api>,
    ) -> DeviceResult<Resource> {
        self.shared.check_lost()?;
        Ok(Resource)
    }
    unsafe fn destroy_pipeline_layout(&self, _pipeline_layout: Resource) {}
    unsafe fn create_bind_group(
        &self,
        _desc: &crate::BindGroupDescriptor<Api>,
    ) -> DeviceResult<Resource> {
        self.shared.check_lost()?;
        Ok(Resource)
    }
    unsafe fn destroy_bind_group(&self, _group: Resource) {}

    unsafe fn create_shader_module(
        &self,
        _desc: &crate::ShaderModuleDescriptor,
        shader: crate::NagaShader,
    ) -> Result<ShaderModule, crate::ShaderError> {
        self.shared.check_lost()?;
        Ok(ShaderModule {
            entry_points: shader
                .module
                .entry_points
                .iter()
                .map(|ep| (ep.name.clone(), ep.stage))
                .collect(),
        })
    }
    unsafe fn destroy_shader_module(&self, _module: ShaderModule) {}
    unsafe fn create_render_pipeline(
        &self,
        desc: &crate::RenderPipelineDescriptor<Api>,
    ) -> Result<Resource, crate::PipelineError> {
        self.shared.check_lost()?;
        desc.vertex_stage
            .module
            .check_stage(&desc.vertex_stage, naga::ShaderStage::Vertex)?;
        if let Some(ref stage) = desc.fragment_stage {
            stage.module.check_stage(stage, naga::ShaderStage::Fragment)?;
        }
        Ok(Resource)
    }
    unsafe fn destroy_render_pipeline(&self, _pipeline: Resource) {}
    unsafe fn create_compute_pipeline(
        &self,
        desc: &crate::ComputePipelineDescriptor<Api>,
    ) -> Result<Resource, crate::PipelineError> {
        self.shared.check_lost()?;
        desc.stage
            .module
            .check_stage(&desc.stage, naga::ShaderStage::Compute)?;
        Ok(Resource)
    }
    unsafe fn destroy_compute_pipeline(&self, _pipeline: Resource) {}

    unsafe fn create_fence(&self) -> DeviceResult<Fence> {
        self.shared.check_lost()?;
        Ok(Fence { value: 0 })
    }
    unsafe fn destroy_fence(&self, _fence: Fence) {}
    unsafe fn get_fence_value(&self, fence: &Fence) -> DeviceResult<crate::FenceValue> {
        self.shared.check_lost()?;
        Ok(self.shared.completed(fence))
    }
    unsafe fn wait(
        &self,
        fence: &Fence,
        value: crate::FenceValue,
        _timeout_ms: u32,
    ) -> DeviceResult<bool> {
        self.shared.check_lost()?;
        // Nothing releases a held fence while we wait, so that is a timeout.
        Ok(self.shared.completed(fence) >= value)
    }
}

/// Range of bytes of a mip level covered by one slice.
fn slice_range(storage: &TextureStorage, level: u32, slice: u32) -> Range<usize> {
    let extent = storage.mip_extent(level);
    let slice_bytes = extent.width as usize * extent.height as usize * storage.texel_bytes();
    let start = slice as usize * slice_bytes;
    start..start + slice_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Adapter as _, CommandEncoder as _, Device as _, Instance as _, Queue as _};

    fn open() -> (Device, Queue) {
        let _ = env_logger::builder().is_test(true).try_init();
        let instance = unsafe {
            Instance::init(&crate::InstanceDescriptor {
                name: "test",
                flags: wgt::InstanceFlags::empty(),
            })
        }
        .unwrap();
        let mut adapters = unsafe { instance.enumerate_adapters() };
        assert_eq!(adapters.len(), 1);
        let exposed = adapters.remove(0);
        assert_eq!(exposed.info.device_type, wgt::DeviceType::Cpu);
        let open = unsafe {
            exposed
                .adapter
                .open(wgt::Features::empty(), &wgt::Limits::default())
        }
        .unwrap();
        (open.device, open.queue)
    }

    fn buffer(device: &Device, size: u64) -> Buffer {
        unsafe {
            device.create_buffer(&crate::BufferDescriptor {
                label: None,
                size,
                usage: wgt::BufferUsages::COPY_SRC | wgt::BufferUsages::COPY_DST,
            })
        }
        .unwrap()
    }

    #[test]
    fn copies_execute_in_submission_order() {
        let (device, mut queue) = open();
        let src = buffer(&device, 16);
        let dst = buffer(&device, 16);
        unsafe {
            let mapping = device.map_buffer(&src, 0..16).unwrap();
            std::ptr::copy_nonoverlapping([7u8; 16].as_ptr(), mapping.ptr.as_ptr(), 16);
            device.unmap_buffer(&src).unwrap();
        }

        let mut fence = unsafe { device.create_fence() }.unwrap();
        let encoder_desc = crate::CommandEncoderDescriptor { label: None };
        let mut first = unsafe { device.create_command_encoder(&encoder_desc) }.unwrap();
        let mut second = unsafe { device.create_command_encoder(&encoder_desc) }.unwrap();
        let (a, b) = unsafe {
            first.begin_encoding(Some("first")).unwrap();
            first.copy_buffer_to_buffer(
                &src,
                &dst,
                std::iter::once(crate::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: wgt::BufferSize::new(8).unwrap(),
                }),
            );
            second.begin_encoding(Some("second")).unwrap();
            second.clear_buffer(&dst, 4..8);
            (first.end_encoding().unwrap(), second.end_encoding().unwrap())
        };

        unsafe { queue.submit(&[&a, &b], (&mut fence, 1)) }.unwrap();
        assert_eq!(unsafe { device.get_fence_value(&fence) }, Ok(1));

        let log = device.execution_log();
        let labels: Vec<_> = log.iter().map(|c| c.command_buffer.as_deref()).collect();
        assert_eq!(labels, [Some("first"), Some("second")]);

        let data = unsafe { device.map_buffer(&dst, 0..16) }.unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(data.ptr.as_ptr(), 16) };
        assert_eq!(&bytes[..8], &[7, 7, 7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn memory_budget_reports_out_of_memory() {
        let instance = Instance::with_adapters(vec![AdapterConfig {
            memory_budget: Some(64),
            ..AdapterConfig::default()
        }]);
        let exposed = unsafe { instance.enumerate_adapters() }.remove(0);
        let open = unsafe {
            exposed
                .adapter
                .open(wgt::Features::empty(), &wgt::Limits::default())
        }
        .unwrap();
        let device = open.device;
        let first = buffer(&device, 48);
        let desc = crate::BufferDescriptor {
            label: None,
            size: 32,
            usage: wgt::BufferUsages::COPY_DST,
        };
        assert_eq!(
            unsafe { device.create_buffer(&desc) }.unwrap_err(),
            crate::DeviceError::OutOfMemory
        );
        unsafe { device.destroy_buffer(first) };
        assert_eq!(device.allocated_bytes(), 0);
        assert!(unsafe { device.create_buffer(&desc) }.is_ok());
    }

    #[test]
    fn held_fences_lag_behind_submissions() {
        let (device, mut queue) = open();
        let mut fence = unsafe { device.create_fence() }.unwrap();
        unsafe { queue.submit(&[], (&mut fence, 1)) }.unwrap();

        device.hold_fences();
        unsafe { queue.submit(&[], (&mut fence, 2)) }.unwrap();
        assert_eq!(unsafe { device.get_fence_value(&fence) }, Ok(1));
        assert_eq!(unsafe { device.wait(&fence, 1, 0) }, Ok(true));
        assert_eq!(unsafe { device.wait(&fence, 2, 0) }, Ok(false));

        device.release_fences();
        assert_eq!(unsafe { device.get_fence_value(&fence) }, Ok(2));
        assert_eq!(unsafe { device.wait(&fence, 2, 0) }, Ok(true));
    }

    #[test]
    fn lost_device_fails_calls() {
        let (device, mut queue) = open();
        let mut fence = unsafe { device.create_fence() }.unwrap();
        device.simulate_device_lost();
        assert_eq!(
            unsafe { device.get_fence_value(&fence) },
            Err(crate::DeviceError::Lost)
        );
        assert_eq!(
            unsafe { queue.submit(&[], (&mut fence, 1)) },
            Err(crate::DeviceError::Lost)
        );
    }
}
