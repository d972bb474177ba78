use crate::{
    api_log,
    binding_model::{
        self, BindGroup, BindGroupLayout, BindGroupLayoutEntryError, BindingResource,
        CreateBindGroupError, CreateBindGroupLayoutError, CreatePipelineLayoutError,
        PipelineLayout,
    },
    capabilities::CapabilityRegistry,
    command::{CommandEncoder, CommandEncoderDescriptor},
    device::{
        life::{ActiveSubmission, LifetimeTracker, WorkDoneSignal},
        AttachmentData, DeviceDescriptor, DeviceError, DeviceLostInfo, MissingFeatures,
        RenderPassContext, WaitIdleError, CLEANUP_WAIT_MS,
    },
    error::{Error, ErrorSink, PopErrorScopeError, PopErrorScopeFuture, WebGpuError},
    hal_api::HalApi,
    instance::Adapter,
    pipeline::{
        self, ColorAttachmentError, ColorStateError, ComputePipeline, CreateComputePipelineError,
        CreateRenderPipelineError, CreateShaderModuleError, DepthStencilStateError,
        RenderPipeline, ShaderModule, ShaderModuleSource,
    },
    resource::{
        Buffer, BufferMapState, CreateBufferError, CreateTextureError, CreateTextureViewError,
        Labeled, MissingTextureUsageError, ParentDevice, ResolvedTextureView, Texture,
        TextureDimensionError, TextureErrorDimension, TextureView,
    },
    resource_log,
    signal::{Pump, Signal, SignalFuture},
    storage::{ResourceId, ResourceStore, StoreReport},
    validation, LabelHelpers, SubmissionIndex, MAX_BIND_GROUPS, MAX_COLOR_ATTACHMENTS,
};

use arrayvec::ArrayVec;
use hal::Device as _;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use std::{
    fmt,
    mem::ManuallyDrop,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Structure describing a logical device. Some members are internally mutable,
/// stored behind mutexes.
///
/// Locks are acquired in this order: `queue_raw`, `fence`, `life_tracker`,
/// `store`. `error_sink` is never held while calling out. No `Arc` to a
/// resource is dropped while `life_tracker` or `store` is held, since dropping
/// the last one locks `store` again.
pub struct Device<A: HalApi> {
    raw: ManuallyDrop<A::Device>,
    pub(crate) adapter: Arc<Adapter<A>>,
    pub(crate) queue_raw: Mutex<ManuallyDrop<A::Queue>>,
    /// Signalled with the index of every submission once it completes.
    pub(crate) fence: Mutex<ManuallyDrop<A::Fence>>,
    /// The index of the last queue submission.
    pub(crate) active_submission_index: AtomicU64,
    pub(crate) label: String,
    pub(crate) capabilities: CapabilityRegistry,
    pub(crate) instance_flags: wgt::InstanceFlags,
    valid: AtomicBool,
    pub(crate) store: Mutex<ResourceStore<A>>,
    life_tracker: Mutex<LifetimeTracker<A>>,
    error_sink: Mutex<ErrorSink>,
    lost_signal: Signal<DeviceLostInfo>,
}

impl<A: HalApi> fmt::Debug for Device<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("label", &self.label)
            .field("valid", &self.is_valid())
            .field(
                "active_submission_index",
                &self.active_submission_index.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl<A: HalApi> Drop for Device<A> {
    fn drop(&mut self) {
        resource_log!("Drop {}", self.error_ident());
        self.lost_signal.resolve(DeviceLostInfo {
            reason: wgt::DeviceLostReason::Dropped,
            message: "Device was dropped.".to_string(),
        });
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        let queue = unsafe { ManuallyDrop::take(self.queue_raw.get_mut()) };
        let fence = unsafe { ManuallyDrop::take(self.fence.get_mut()) };
        unsafe {
            raw.destroy_fence(fence);
            raw.exit(queue);
        }
    }
}

crate::impl_resource_type!(Device);
crate::impl_labeled!(Device);

impl<A: HalApi> Pump for Device<A> {
    fn pump(&self) {
        if let Err(error) = self.poll(wgt::Maintain::Poll) {
            log::debug!("Polling {} failed: {error}", self.error_ident());
        }
    }
}

impl<A: HalApi> Device<A> {
    pub(crate) fn new(
        open: hal::OpenDevice<A>,
        adapter: &Arc<Adapter<A>>,
        desc: &DeviceDescriptor,
        instance_flags: wgt::InstanceFlags,
    ) -> Result<Self, DeviceError> {
        let fence = match unsafe { open.device.create_fence() } {
            Ok(fence) => fence,
            Err(error) => {
                log::error!("Failed to create fence for device: {error}");
                unsafe { open.device.exit(open.queue) };
                return Err(DeviceError::from_hal(error));
            }
        };

        Ok(Self {
            raw: ManuallyDrop::new(open.device),
            adapter: Arc::clone(adapter),
            queue_raw: Mutex::new(ManuallyDrop::new(open.queue)),
            fence: Mutex::new(ManuallyDrop::new(fence)),
            active_submission_index: AtomicU64::new(0),
            label: desc.label.borrow_or_default().to_string(),
            capabilities: adapter
                .capabilities
                .for_device(desc.required_features, desc.required_limits.clone()),
            instance_flags,
            valid: AtomicBool::new(true),
            store: Mutex::new(ResourceStore::new()),
            life_tracker: Mutex::new(LifetimeTracker::new()),
            error_sink: Mutex::new(ErrorSink::new()),
            lost_signal: Signal::new(),
        })
    }

    pub(crate) fn raw(&self) -> &A::Device {
        &self.raw
    }

    /// Run `f` with the backend device.
    ///
    /// # Safety
    ///
    /// `f` must not destroy or invalidate anything this device created.
    pub unsafe fn as_hal<R>(&self, f: impl FnOnce(&A::Device) -> R) -> R {
        f(&self.raw)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn adapter(&self) -> &Arc<Adapter<A>> {
        &self.adapter
    }

    pub fn features(&self) -> wgt::Features {
        self.capabilities.features()
    }

    pub fn limits(&self) -> wgt::Limits {
        self.capabilities.limits().clone()
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Whether the device is still usable, i.e. not lost or destroyed.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn check_is_valid(&self) -> Result<(), DeviceError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DeviceError::Lost)
        }
    }

    pub(crate) fn require_features(&self, feature: wgt::Features) -> Result<(), MissingFeatures> {
        if self.features().contains(feature) {
            Ok(())
        } else {
            Err(MissingFeatures(feature - self.features()))
        }
    }

    pub(crate) fn lock_life(&self) -> MutexGuard<'_, LifetimeTracker<A>> {
        self.life_tracker.lock()
    }

    /// A handle futures use to drive this device while they wait.
    pub(crate) fn pump_handle(self: &Arc<Self>) -> Weak<dyn Pump> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    pub fn generate_report(&self) -> StoreReport {
        self.store.lock().generate_report()
    }

    // Error reporting

    /// Route `cause`, raised by `fn_ident` on the object labelled `label`,
    /// to the error scopes.
    ///
    /// Usage errors and device loss are not routed, and nothing is reported
    /// once the device is lost.
    pub(crate) fn handle_error(&self, fn_ident: &'static str, label: &str, cause: impl WebGpuError) {
        self.report(Error::from_cause(fn_ident, label, cause));
    }

    fn report(&self, error: Option<Error>) {
        let error = match error {
            Some(error) => error,
            None => return,
        };
        if !self.is_valid() {
            log::debug!("Discarding error on lost {}: {error}", self.error_ident());
            return;
        }
        let uncaptured = self.error_sink.lock().handle_error(error);
        if let Some((handler, error)) = uncaptured {
            handler(error);
        }
    }

    /// Convert a backend error, losing the device if the backend says so.
    pub(crate) fn handle_hal_error(&self, error: hal::DeviceError) -> DeviceError {
        if let hal::DeviceError::Lost = error {
            self.lose(
                wgt::DeviceLostReason::Unknown,
                "The backend reported the device as lost",
            );
        }
        DeviceError::from_hal(error)
    }

    pub fn push_error_scope(&self, filter: wgt::ErrorFilter) {
        api_log!("Device::push_error_scope {filter:?}");
        self.error_sink.lock().push(filter);
    }

    /// Pop the innermost error scope.
    ///
    /// Popping from an empty stack is a usage error of the caller and is
    /// returned here, never routed to a scope.
    pub fn pop_error_scope(&self) -> Result<PopErrorScopeFuture, PopErrorScopeError> {
        api_log!("Device::pop_error_scope");
        let error = self.error_sink.lock().pop()?;
        Ok(ErrorSink::resolved_future(error))
    }

    /// Replace the handler receiving errors no scope captured.
    pub fn on_uncaptured_error(&self, handler: impl Fn(Error) + Send + Sync + 'static) {
        self.error_sink
            .lock()
            .set_uncaptured_handler(Arc::new(handler));
    }

    // Lifecycle

    /// Resolves once, when the device is lost, destroyed or dropped.
    pub fn lost(&self) -> SignalFuture<DeviceLostInfo> {
        self.lost_signal.future()
    }

    /// Check the fence and complete everything the GPU has finished.
    ///
    /// With [`wgt::Maintain::Wait`], blocks until every submission so far is
    /// done. Returns `true` if no submission is left in flight.
    pub fn poll(&self, maintain: wgt::Maintain) -> Result<bool, WaitIdleError> {
        profiling::scope!("Device::poll");
        api_log!("Device::poll {maintain:?}");
        self.check_is_valid()?;

        let last_done = {
            let fence = self.fence.lock();
            let result = if maintain.is_wait() {
                let target = self.active_submission_index.load(Ordering::Acquire);
                unsafe { self.raw.wait(&**fence, target, CLEANUP_WAIT_MS) }
                    .map(|done| done.then_some(target))
            } else {
                unsafe { self.raw.get_fence_value(&**fence) }.map(Some)
            };
            drop(fence);
            match result {
                Ok(Some(value)) => value,
                Ok(None) => return Err(WaitIdleError::StuckGpu),
                Err(error) => return Err(self.handle_hal_error(error).into()),
            }
        };

        let (done, ready, queue_empty) = {
            let mut life = self.lock_life();
            life.triage_mapped();
            let done = life.triage_submissions(last_done);
            (done, life.take_ready_to_map(), life.queue_empty())
        };
        log::trace!(
            "Device::poll retired {} submissions, {} buffers to map",
            done.len(),
            ready.len()
        );
        self.retire(done, ready);

        Ok(queue_empty)
    }

    /// Release completed submissions and fire their signals, mappings first.
    fn retire(
        &self,
        done: SmallVec<[ActiveSubmission<A>; 4]>,
        ready: Vec<Arc<Buffer<A>>>,
    ) {
        let mut work_done = SmallVec::<[WorkDoneSignal; 4]>::new();
        for submission in done {
            for data in submission.command_buffers {
                data.destroy(self.raw());
            }
            work_done.extend(submission.work_done);
        }

        let mapped = ready
            .iter()
            .filter_map(|buffer| buffer.map_pending())
            .collect::<Vec<_>>();
        for (signal, result) in mapped {
            signal.resolve(result);
        }
        for signal in work_done {
            signal.resolve(Ok(()));
        }
    }

    pub(crate) fn next_submission_index(&self) -> SubmissionIndex {
        self.active_submission_index.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Mark the device as lost and fail everything still waiting on it.
    ///
    /// Only the first call has any effect.
    pub(crate) fn lose(&self, reason: wgt::DeviceLostReason, message: &str) {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        match reason {
            wgt::DeviceLostReason::Unknown => {
                log::error!("{} was lost: {message}", self.error_ident())
            }
            _ => log::debug!("{} is gone ({reason:?}): {message}", self.error_ident()),
        }

        let (buffers, active) = self.lock_life().drain_all();
        for buffer in buffers.iter() {
            if let Some(signal) = buffer.abort_pending() {
                signal.resolve(Err(DeviceError::Lost.into()));
            }
        }
        for submission in active {
            for data in submission.command_buffers {
                data.destroy(self.raw());
            }
            for signal in submission.work_done {
                signal.resolve(Err(DeviceError::Lost));
            }
        }

        self.lost_signal.resolve(DeviceLostInfo {
            reason,
            message: message.to_string(),
        });
    }

    /// Wait for the queue to drain, destroy every buffer and texture, then
    /// make the device unusable.
    ///
    /// The `lost` future resolves with [`wgt::DeviceLostReason::Destroyed`].
    pub fn destroy(&self) {
        api_log!("Device::destroy {:?}", self.label);
        if !self.is_valid() {
            return;
        }
        if let Err(error) = self.poll(wgt::Maintain::Wait) {
            log::warn!("Failed to wait for {} before destroying it: {error}", self.error_ident());
        }
        let (buffers, textures) = {
            let store = self.store.lock();
            (store.buffers.live(), store.textures.live())
        };
        for buffer in buffers {
            buffer.destroy();
        }
        for texture in textures {
            texture.destroy();
        }
        self.lose(wgt::DeviceLostReason::Destroyed, "Device was destroyed.");
    }

    fn describe_format_features(
        &self,
        format: wgt::TextureFormat,
    ) -> Result<wgt::TextureFormatFeatures, MissingFeatures> {
        self.require_features(format.required_features())?;
        Ok(self.capabilities.format_features(format))
    }

    // Buffers

    pub fn create_buffer(self: &Arc<Self>, desc: &crate::resource::BufferDescriptor) -> Arc<Buffer<A>> {
        profiling::scope!("Device::create_buffer");
        api_log!("Device::create_buffer {:?} size {}", desc.label, desc.size);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().buffers.insert_error(label);
        match self.create_buffer_inner(id, desc) {
            Ok(buffer) => {
                let buffer = Arc::new(buffer);
                self.store.lock().buffers.assign(id, &buffer);
                resource_log!("Created {}", buffer.error_ident());
                buffer
            }
            Err(error) => {
                self.handle_error("Device::create_buffer", label, error);
                Arc::new(Buffer::new(None, self, id, desc, BufferMapState::Idle))
            }
        }
    }

    fn create_buffer_inner(
        self: &Arc<Self>,
        id: ResourceId,
        desc: &crate::resource::BufferDescriptor,
    ) -> Result<Buffer<A>, CreateBufferError> {
        self.check_is_valid()?;

        let max_buffer_size = self.capabilities.limits().max_buffer_size;
        if desc.size > max_buffer_size {
            return Err(CreateBufferError::MaxBufferSize {
                requested: desc.size,
                maximum: max_buffer_size,
            });
        }

        if desc.usage.is_empty() || desc.usage.contains_invalid_bits() {
            return Err(CreateBufferError::InvalidUsage(desc.usage));
        }

        if !self
            .features()
            .contains(wgt::Features::MAPPABLE_PRIMARY_BUFFERS)
        {
            use wgt::BufferUsages as Bu;
            let write_mismatch = desc.usage.contains(Bu::MAP_WRITE)
                && !(Bu::MAP_WRITE | Bu::COPY_SRC).contains(desc.usage);
            let read_mismatch = desc.usage.contains(Bu::MAP_READ)
                && !(Bu::MAP_READ | Bu::COPY_DST).contains(desc.usage);
            if write_mismatch || read_mismatch {
                return Err(CreateBufferError::UsageMismatch(desc.usage));
            }
        }

        if desc.mapped_at_creation && desc.size % wgt::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(CreateBufferError::UnalignedSize);
        }

        let hal_desc = hal::BufferDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            size: desc.size,
            usage: desc.usage,
        };
        let raw = unsafe { self.raw.create_buffer(&hal_desc) }
            .map_err(|error| self.handle_hal_error(error))?;

        let map_state = if desc.mapped_at_creation {
            match unsafe { self.raw.map_buffer(&raw, 0..desc.size) } {
                Ok(mapping) => BufferMapState::Init { mapping },
                Err(error) => {
                    unsafe { self.raw.destroy_buffer(raw) };
                    return Err(self.handle_hal_error(error).into());
                }
            }
        } else {
            BufferMapState::Idle
        };

        Ok(Buffer::new(Some(raw), self, id, desc, map_state))
    }

    // Textures

    pub fn create_texture(
        self: &Arc<Self>,
        desc: &crate::resource::TextureDescriptor,
    ) -> Arc<Texture<A>> {
        profiling::scope!("Device::create_texture");
        api_log!("Device::create_texture {:?}", desc);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().textures.insert_error(label);
        match self.create_texture_inner(desc) {
            Ok((raw, format_features)) => {
                let texture = Arc::new(Texture::new(Some(raw), self, id, desc, format_features));
                self.store.lock().textures.assign(id, &texture);
                resource_log!("Created {}", texture.error_ident());
                texture
            }
            Err(error) => {
                self.handle_error("Device::create_texture", label, error);
                Arc::new(Texture::new(
                    None,
                    self,
                    id,
                    desc,
                    wgt::TextureFormatFeatures::none(),
                ))
            }
        }
    }

    fn create_texture_inner(
        &self,
        desc: &crate::resource::TextureDescriptor,
    ) -> Result<(A::Texture, wgt::TextureFormatFeatures), CreateTextureError> {
        use wgt::TextureUsages as Tu;

        self.check_is_valid()?;

        if desc.usage.is_empty() || desc.usage.contains_invalid_bits() {
            return Err(CreateTextureError::InvalidUsage(desc.usage));
        }

        check_texture_dimension_size(
            desc.dimension,
            desc.size,
            desc.sample_count,
            self.capabilities.limits(),
        )?;

        if desc.dimension != wgt::TextureDimension::D2 {
            // Depth textures can only be 2D
            if desc.format.is_depth_stencil_format() {
                return Err(CreateTextureError::InvalidDepthDimension(
                    desc.dimension,
                    desc.format,
                ));
            }
            // Renderable textures can only be 2D
            if desc.usage.contains(Tu::RENDER_ATTACHMENT) {
                return Err(CreateTextureError::InvalidDimensionUsages(
                    Tu::RENDER_ATTACHMENT,
                    desc.dimension,
                ));
            }
        }

        let format_features = self.describe_format_features(desc.format)?;

        if desc.sample_count > 1 {
            if desc.mip_level_count != 1 {
                return Err(CreateTextureError::InvalidMipLevelCount {
                    requested: desc.mip_level_count,
                    maximum: 1,
                });
            }
            if desc.size.depth_or_array_layers != 1 {
                return Err(CreateTextureError::InvalidDimension(
                    TextureDimensionError::MultisampledDepthOrArrayLayer(
                        desc.size.depth_or_array_layers,
                    ),
                ));
            }
            if desc.usage.contains(Tu::STORAGE_BINDING) {
                return Err(CreateTextureError::InvalidMultisampledStorageBinding);
            }
            if !desc.usage.contains(Tu::RENDER_ATTACHMENT) {
                return Err(CreateTextureError::MultisampledNotRenderAttachment);
            }
            if !format_features
                .flags
                .contains(wgt::TextureFormatFeatureFlags::MULTISAMPLE_X4)
            {
                return Err(CreateTextureError::InvalidMultisampledFormat(desc.format));
            }
        }

        let mips = desc.mip_level_count;
        let max_levels_allowed = desc.size.max_mips(desc.dimension);
        if mips == 0 || mips > max_levels_allowed {
            return Err(CreateTextureError::InvalidMipLevelCount {
                requested: mips,
                maximum: max_levels_allowed,
            });
        }

        let missing_allowed_usages = desc.usage - format_features.allowed_usages;
        if !missing_allowed_usages.is_empty() {
            return Err(CreateTextureError::InvalidFormatUsages(
                missing_allowed_usages,
                desc.format,
            ));
        }

        let hal_desc = hal::TextureDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            size: desc.size,
            mip_level_count: desc.mip_level_count,
            sample_count: desc.sample_count,
            dimension: desc.dimension,
            format: desc.format,
            usage: desc.usage,
        };
        let raw = unsafe { self.raw.create_texture(&hal_desc) }
            .map_err(|error| self.handle_hal_error(error))?;

        Ok((raw, format_features))
    }

    pub(crate) fn create_texture_view(
        self: &Arc<Self>,
        texture: &Arc<Texture<A>>,
        desc: &crate::resource::TextureViewDescriptor,
    ) -> Arc<TextureView<A>> {
        profiling::scope!("Texture::create_view");
        api_log!("Texture::create_view {:?} {:?}", texture.label, desc);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().texture_views.insert_error(label);
        match self.create_texture_view_inner(texture, desc) {
            Ok((raw, resolved)) => {
                let view = Arc::new(TextureView::new(Some(raw), texture, id, &desc.label, resolved));
                self.store.lock().texture_views.assign(id, &view);
                resource_log!("Created {}", view.error_ident());
                view
            }
            Err(error) => {
                self.handle_error("Texture::create_view", label, error);
                Arc::new(TextureView::new_invalid(texture, id, &desc.label))
            }
        }
    }

    fn create_texture_view_inner(
        &self,
        texture: &Texture<A>,
        desc: &crate::resource::TextureViewDescriptor,
    ) -> Result<(A::TextureView, ResolvedTextureView), CreateTextureViewError> {
        use wgt::TextureViewDimension as Tvd;

        self.check_is_valid()?;
        texture.same_device(self)?;
        let texture_raw = texture.try_raw()?;
        texture.check_destroyed()?;

        let texture_format = texture.desc.format;
        let format = desc.format.unwrap_or(texture_format);
        let dimension = desc.dimension.unwrap_or(match texture.desc.dimension {
            wgt::TextureDimension::D1 => Tvd::D1,
            wgt::TextureDimension::D2 => {
                if texture.desc.array_layer_count() == 1 {
                    Tvd::D2
                } else {
                    Tvd::D2Array
                }
            }
            wgt::TextureDimension::D3 => Tvd::D3,
        });

        let mip_count = desc.mip_level_count.unwrap_or(
            texture
                .desc
                .mip_level_count
                .saturating_sub(desc.base_mip_level),
        );
        let layer_count = desc.array_layer_count.unwrap_or(match dimension {
            Tvd::D1 | Tvd::D2 | Tvd::D3 => 1,
            Tvd::Cube => 6,
            Tvd::D2Array | Tvd::CubeArray => texture
                .desc
                .array_layer_count()
                .saturating_sub(desc.base_array_layer),
        });

        let aspects = hal::FormatAspects::new(texture_format, desc.aspect);
        if aspects.is_empty() {
            return Err(CreateTextureViewError::InvalidAspect {
                texture_format,
                requested_aspect: desc.aspect,
            });
        }

        if format != texture_format
            && format.remove_srgb_suffix() != texture_format.remove_srgb_suffix()
        {
            return Err(CreateTextureViewError::FormatReinterpretation {
                texture: texture_format,
                view: format,
            });
        }

        // check if multisampled texture is seen as anything but 2D
        if texture.desc.sample_count > 1 && dimension != Tvd::D2 {
            return Err(
                CreateTextureViewError::InvalidMultisampledTextureViewDimension(dimension),
            );
        }

        // check if the dimension is compatible with the texture
        if texture.desc.dimension != dimension.compatible_texture_dimension() {
            return Err(CreateTextureViewError::InvalidTextureViewDimension {
                view: dimension,
                texture: texture.desc.dimension,
            });
        }

        match dimension {
            Tvd::D1 | Tvd::D2 | Tvd::D3 if layer_count != 1 => {
                return Err(CreateTextureViewError::InvalidArrayLayerCount {
                    requested: layer_count,
                    dim: dimension,
                });
            }
            Tvd::Cube if layer_count != 6 => {
                return Err(CreateTextureViewError::InvalidCubemapTextureDepth {
                    depth: layer_count,
                });
            }
            Tvd::CubeArray if layer_count % 6 != 0 => {
                return Err(CreateTextureViewError::InvalidCubemapArrayTextureDepth {
                    depth: layer_count,
                });
            }
            _ => {}
        }

        if let Tvd::Cube | Tvd::CubeArray = dimension {
            if texture.desc.size.width != texture.desc.size.height {
                return Err(CreateTextureViewError::InvalidCubeTextureViewSize);
            }
        }

        if mip_count == 0 {
            return Err(CreateTextureViewError::ZeroMipLevelCount);
        }
        let mip_level_end = desc.base_mip_level.saturating_add(mip_count);
        if mip_level_end > texture.desc.mip_level_count {
            return Err(CreateTextureViewError::TooManyMipLevels {
                requested: mip_level_end,
                total: texture.desc.mip_level_count,
            });
        }

        if layer_count == 0 {
            return Err(CreateTextureViewError::ZeroArrayLayerCount);
        }
        let array_layer_end = desc.base_array_layer.saturating_add(layer_count);
        if array_layer_end > texture.desc.array_layer_count() {
            return Err(CreateTextureViewError::TooManyArrayLayers {
                requested: array_layer_end,
                total: texture.desc.array_layer_count(),
            });
        }

        let resolved = ResolvedTextureView {
            format,
            dimension,
            aspects,
            mip_levels: desc.base_mip_level..mip_level_end,
            array_layers: desc.base_array_layer..array_layer_end,
        };
        let hal_desc = hal::TextureViewDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            format: resolved.format,
            dimension: resolved.dimension,
            aspects: resolved.aspects,
            mip_levels: resolved.mip_levels.clone(),
            array_layers: resolved.array_layers.clone(),
        };
        let raw = unsafe { self.raw.create_texture_view(texture_raw, &hal_desc) }
            .map_err(|error| self.handle_hal_error(error))?;

        Ok((raw, resolved))
    }

    // Shaders

    pub fn create_shader_module(
        self: &Arc<Self>,
        desc: &pipeline::ShaderModuleDescriptor,
    ) -> Arc<ShaderModule<A>> {
        profiling::scope!("Device::create_shader_module");
        api_log!("Device::create_shader_module {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().shader_modules.insert_error(label);
        let (raw, interface) = match self.create_shader_module_inner(desc) {
            Ok((raw, interface)) => (Some(raw), Some(interface)),
            Err(error) => {
                if error.is_compilation() {
                    self.report(Some(Error::compilation(
                        "Device::create_shader_module",
                        label,
                        error,
                    )));
                } else {
                    self.handle_error("Device::create_shader_module", label, error);
                }
                (None, None)
            }
        };

        let module = Arc::new(ShaderModule {
            raw,
            device: Arc::clone(self),
            interface,
            label: label.to_string(),
            id,
        });
        if module.is_valid() {
            self.store.lock().shader_modules.assign(id, &module);
            resource_log!("Created {}", module.error_ident());
        }
        module
    }

    fn create_shader_module_inner(
        &self,
        desc: &pipeline::ShaderModuleDescriptor,
    ) -> Result<(A::ShaderModule, validation::Interface), CreateShaderModuleError> {
        self.check_is_valid()?;

        let (module, source) = match desc.source {
            ShaderModuleSource::Wgsl(ref code) => {
                profiling::scope!("naga::front::wgsl::parse_str");
                let module = naga::front::wgsl::parse_str(code).map_err(|inner| {
                    CreateShaderModuleError::Parsing(pipeline::ShaderError::parsing(&inner, code))
                })?;
                (module, code.as_ref())
            }
            ShaderModuleSource::Naga(ref module) => (module.as_ref().clone(), ""),
        };

        let max_bind_groups = self.capabilities.limits().max_bind_groups;
        for (_, var) in module.global_variables.iter() {
            match var.binding {
                Some(ref br) if br.group >= max_bind_groups => {
                    return Err(CreateShaderModuleError::InvalidGroupIndex {
                        bind: br.clone(),
                        group: br.group,
                        limit: max_bind_groups,
                    });
                }
                _ => continue,
            };
        }

        let info = {
            profiling::scope!("naga::validate");
            naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::CUBE_ARRAY_TEXTURES,
            )
            .validate(&module)
            .map_err(|inner| {
                CreateShaderModuleError::Validation(pipeline::ShaderError::validation(
                    &inner, source,
                ))
            })?
        };

        let interface = validation::Interface::new(&module, &info);
        let hal_desc = hal::ShaderModuleDescriptor {
            label: desc.label.to_hal(self.instance_flags),
        };
        let raw = unsafe {
            self.raw
                .create_shader_module(&hal_desc, hal::NagaShader { module, info })
        }
        .map_err(|error| match error {
            hal::ShaderError::Device(error) => {
                CreateShaderModuleError::Device(self.handle_hal_error(error))
            }
            hal::ShaderError::Compilation(message) => {
                log::error!("Shader generation error: {message}");
                CreateShaderModuleError::Generation(message)
            }
        })?;

        Ok((raw, interface))
    }

    // Binding model

    pub fn create_bind_group_layout(
        self: &Arc<Self>,
        desc: &binding_model::BindGroupLayoutDescriptor,
    ) -> Arc<BindGroupLayout<A>> {
        profiling::scope!("Device::create_bind_group_layout");
        api_log!("Device::create_bind_group_layout {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().bind_group_layouts.insert_error(label);
        let mut entries = desc.entries.to_vec();
        entries.sort_by_key(|entry| entry.binding);

        let raw = match self.create_bind_group_layout_inner(desc, &entries) {
            Ok(raw) => Some(raw),
            Err(error) => {
                self.handle_error("Device::create_bind_group_layout", label, error);
                None
            }
        };

        let layout = Arc::new(BindGroupLayout {
            raw,
            device: Arc::clone(self),
            entries,
            label: label.to_string(),
            id,
        });
        if layout.is_valid() {
            self.store.lock().bind_group_layouts.assign(id, &layout);
            resource_log!("Created {}", layout.error_ident());
        }
        layout
    }

    fn create_bind_group_layout_inner(
        &self,
        desc: &binding_model::BindGroupLayoutDescriptor,
        sorted_entries: &[wgt::BindGroupLayoutEntry],
    ) -> Result<A::BindGroupLayout, CreateBindGroupLayoutError> {
        use wgt::BindingType as Bt;

        self.check_is_valid()?;

        if let Some(pair) = sorted_entries
            .windows(2)
            .find(|pair| pair[0].binding == pair[1].binding)
        {
            return Err(CreateBindGroupLayoutError::ConflictBinding(pair[0].binding));
        }

        let max_bindings = self.capabilities.limits().max_bindings_per_bind_group;
        for entry in sorted_entries.iter() {
            if entry.binding >= max_bindings {
                return Err(CreateBindGroupLayoutError::InvalidBindingIndex {
                    binding: entry.binding,
                    maximum: max_bindings,
                });
            }
            if !wgt::ShaderStages::all().contains(entry.visibility) {
                return Err(CreateBindGroupLayoutError::InvalidVisibility(
                    entry.visibility,
                ));
            }

            let writable_storage = match entry.ty {
                Bt::Buffer {
                    ty: wgt::BufferBindingType::Storage { read_only },
                    ..
                } => !read_only,
                Bt::Buffer { .. } => false,
                Bt::Texture {
                    sample_type,
                    view_dimension,
                    multisampled,
                } => {
                    if multisampled {
                        if let wgt::TextureSampleType::Float { filterable: true } = sample_type {
                            return Err(CreateBindGroupLayoutError::Entry {
                                binding: entry.binding,
                                error:
                                    BindGroupLayoutEntryError::SampleTypeFloatFilterableBindingMultisampled,
                            });
                        }
                        if view_dimension != wgt::TextureViewDimension::D2 {
                            return Err(CreateBindGroupLayoutError::Entry {
                                binding: entry.binding,
                                error: BindGroupLayoutEntryError::Non2DMultisampled(
                                    view_dimension,
                                ),
                            });
                        }
                    }
                    false
                }
                Bt::StorageTexture {
                    access,
                    format,
                    view_dimension,
                } => {
                    use wgt::TextureViewDimension as Tvd;
                    let entry_error = |error| CreateBindGroupLayoutError::Entry {
                        binding: entry.binding,
                        error,
                    };
                    if let Tvd::Cube | Tvd::CubeArray = view_dimension {
                        return Err(entry_error(BindGroupLayoutEntryError::StorageTextureCube));
                    }
                    let format_features = self.capabilities.format_features(format);
                    if !format_features
                        .allowed_usages
                        .contains(wgt::TextureUsages::STORAGE_BINDING)
                    {
                        return Err(entry_error(
                            BindGroupLayoutEntryError::StorageTextureFormat(format),
                        ));
                    }
                    match access {
                        wgt::StorageTextureAccess::WriteOnly => true,
                        wgt::StorageTextureAccess::ReadOnly
                        | wgt::StorageTextureAccess::ReadWrite => {
                            if !format_features
                                .flags
                                .contains(wgt::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
                            {
                                return Err(entry_error(
                                    BindGroupLayoutEntryError::StorageTextureReadWrite(format),
                                ));
                            }
                            access == wgt::StorageTextureAccess::ReadWrite
                        }
                    }
                }
            };

            if writable_storage && entry.visibility.contains(wgt::ShaderStages::VERTEX) {
                return Err(CreateBindGroupLayoutError::Entry {
                    binding: entry.binding,
                    error: BindGroupLayoutEntryError::VertexWritableStorage,
                });
            }
        }

        let hal_desc = hal::BindGroupLayoutDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            entries: sorted_entries,
        };
        let raw = unsafe { self.raw.create_bind_group_layout(&hal_desc) }
            .map_err(|error| self.handle_hal_error(error))?;
        Ok(raw)
    }

    pub fn create_pipeline_layout(
        self: &Arc<Self>,
        desc: &binding_model::PipelineLayoutDescriptor<A>,
    ) -> Arc<PipelineLayout<A>> {
        profiling::scope!("Device::create_pipeline_layout");
        api_log!("Device::create_pipeline_layout {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().pipeline_layouts.insert_error(label);
        let (raw, bind_group_layouts) = match self.create_pipeline_layout_inner(desc) {
            Ok(raw) => (
                Some(raw),
                desc.bind_group_layouts.iter().cloned().collect(),
            ),
            Err(error) => {
                self.handle_error("Device::create_pipeline_layout", label, error);
                (None, ArrayVec::new())
            }
        };

        let layout = Arc::new(PipelineLayout {
            raw,
            device: Arc::clone(self),
            bind_group_layouts,
            label: label.to_string(),
            id,
        });
        if layout.is_valid() {
            self.store.lock().pipeline_layouts.assign(id, &layout);
            resource_log!("Created {}", layout.error_ident());
        }
        layout
    }

    fn create_pipeline_layout_inner(
        &self,
        desc: &binding_model::PipelineLayoutDescriptor<A>,
    ) -> Result<A::PipelineLayout, CreatePipelineLayoutError> {
        self.check_is_valid()?;

        let max = (self.capabilities.limits().max_bind_groups as usize).min(MAX_BIND_GROUPS);
        if desc.bind_group_layouts.len() > max {
            return Err(CreatePipelineLayoutError::TooManyGroups {
                actual: desc.bind_group_layouts.len(),
                max,
            });
        }

        let raw_layouts = desc
            .bind_group_layouts
            .iter()
            .enumerate()
            .map(|(index, bgl)| -> Result<_, CreatePipelineLayoutError> {
                bgl.same_device(self)?;
                bgl.try_raw()
                    .map_err(|error| CreatePipelineLayoutError::InvalidBindGroupLayout {
                        index,
                        error,
                    })
            })
            .collect::<Result<ArrayVec<_, MAX_BIND_GROUPS>, _>>()?;

        let hal_desc = hal::PipelineLayoutDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            bind_group_layouts: &raw_layouts,
        };
        let raw = unsafe { self.raw.create_pipeline_layout(&hal_desc) }
            .map_err(|error| self.handle_hal_error(error))?;
        Ok(raw)
    }

    pub fn create_bind_group(
        self: &Arc<Self>,
        desc: &binding_model::BindGroupDescriptor<A>,
    ) -> Arc<BindGroup<A>> {
        profiling::scope!("Device::create_bind_group");
        api_log!("Device::create_bind_group {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().bind_groups.insert_error(label);
        let (raw, used_buffers, used_views) = match self.create_bind_group_inner(desc) {
            Ok(raw) => {
                let mut used_buffers = Vec::new();
                let mut used_views = Vec::new();
                for entry in desc.entries.iter() {
                    match entry.resource {
                        BindingResource::Buffer(ref bb) => used_buffers.push(Arc::clone(bb.buffer)),
                        BindingResource::TextureView(view) => used_views.push(Arc::clone(view)),
                    }
                }
                (Some(raw), used_buffers, used_views)
            }
            Err(error) => {
                self.handle_error("Device::create_bind_group", label, error);
                (None, Vec::new(), Vec::new())
            }
        };

        let group = Arc::new(BindGroup {
            raw,
            device: Arc::clone(self),
            layout: Arc::clone(desc.layout),
            used_buffers,
            used_views,
            label: label.to_string(),
            id,
        });
        if group.is_valid() {
            self.store.lock().bind_groups.assign(id, &group);
            resource_log!("Created {}", group.error_ident());
        }
        group
    }

    fn create_bind_group_inner(
        &self,
        desc: &binding_model::BindGroupDescriptor<A>,
    ) -> Result<A::BindGroup, CreateBindGroupError> {
        self.check_is_valid()?;

        let layout = desc.layout;
        layout.same_device(self)?;
        let layout_raw = layout
            .try_raw()
            .map_err(CreateBindGroupError::InvalidLayout)?;

        if desc.entries.len() != layout.entries.len() {
            return Err(CreateBindGroupError::BindingsNumMismatch {
                actual: desc.entries.len(),
                expected: layout.entries.len(),
            });
        }

        let mut bindings = desc.entries.iter().map(|e| e.binding).collect::<Vec<_>>();
        bindings.sort_unstable();
        if let Some(pair) = bindings.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(CreateBindGroupError::DuplicateBinding(pair[0]));
        }

        let mut hal_entries = Vec::with_capacity(desc.entries.len());
        for entry in desc.entries.iter() {
            let binding = entry.binding;
            let decl = layout
                .entry(binding)
                .ok_or(CreateBindGroupError::MissingBindingDeclaration(binding))?;
            let resource = match entry.resource {
                BindingResource::Buffer(ref bb) => {
                    hal::BindingResource::Buffer(self.create_buffer_binding(bb, binding, decl)?)
                }
                BindingResource::TextureView(view) => hal::BindingResource::TextureView(
                    self.create_texture_binding(view, binding, decl)?,
                ),
            };
            hal_entries.push(hal::BindGroupEntry { binding, resource });
        }

        let hal_desc = hal::BindGroupDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            layout: layout_raw,
            entries: &hal_entries,
        };
        let raw = unsafe { self.raw.create_bind_group(&hal_desc) }
            .map_err(|error| self.handle_hal_error(error))?;
        Ok(raw)
    }

    fn create_buffer_binding<'a>(
        &self,
        bb: &binding_model::BufferBinding<'a, A>,
        binding: u32,
        decl: &wgt::BindGroupLayoutEntry,
    ) -> Result<hal::BufferBinding<'a, A>, CreateBindGroupError> {
        use crate::binding_model::CreateBindGroupError as Error;

        let binding_ty = match decl.ty {
            wgt::BindingType::Buffer { ty, .. } => ty,
            _ => {
                return Err(Error::WrongBindingType {
                    binding,
                    actual: decl.ty,
                    expected: "UniformBuffer, StorageBuffer or ReadonlyStorageBuffer",
                })
            }
        };
        let min_size = match decl.ty {
            wgt::BindingType::Buffer {
                min_binding_size, ..
            } => min_binding_size,
            _ => None,
        };

        let limits = self.capabilities.limits();
        let (pub_usage, range_limit, align, align_limit_name) = match binding_ty {
            wgt::BufferBindingType::Uniform => (
                wgt::BufferUsages::UNIFORM,
                limits.max_uniform_buffer_binding_size,
                limits.min_uniform_buffer_offset_alignment,
                "min_uniform_buffer_offset_alignment",
            ),
            wgt::BufferBindingType::Storage { .. } => (
                wgt::BufferUsages::STORAGE,
                limits.max_storage_buffer_binding_size,
                limits.min_storage_buffer_offset_alignment,
                "min_storage_buffer_offset_alignment",
            ),
        };

        if bb.offset % align as u64 != 0 {
            return Err(Error::UnalignedBufferOffset(
                bb.offset,
                align_limit_name,
                align,
            ));
        }

        let buffer: &'a Arc<Buffer<A>> = bb.buffer;
        buffer.same_device(self)?;
        let raw_buffer = buffer.raw_for_use()?;
        buffer.check_usage(pub_usage)?;

        let (bind_size, bind_end) = match bb.size {
            Some(size) => (size.get(), bb.offset.saturating_add(size.get())),
            None => (buffer.size.saturating_sub(bb.offset), buffer.size),
        };
        if bind_end > buffer.size || bb.offset > buffer.size {
            return Err(Error::BindingRangeTooLarge {
                buffer: buffer.error_ident(),
                offset: bb.offset,
                end: bind_end,
                buffer_size: buffer.size,
            });
        }

        if bind_size > range_limit as u64 {
            return Err(Error::BufferRangeTooLarge {
                binding,
                given: bind_size,
                limit: range_limit as u64,
            });
        }

        if bind_size == 0 {
            return Err(Error::BindingZeroSize(buffer.error_ident()));
        }
        if let Some(min_size) = min_size {
            if min_size.get() > bind_size {
                return Err(Error::BindingSizeTooSmall {
                    buffer: buffer.error_ident(),
                    actual: bind_size,
                    min: min_size.get(),
                });
            }
        }

        Ok(hal::BufferBinding {
            buffer: raw_buffer,
            offset: bb.offset,
            size: bb.size,
        })
    }

    fn create_texture_binding<'a>(
        &self,
        view: &'a Arc<TextureView<A>>,
        binding: u32,
        decl: &wgt::BindGroupLayoutEntry,
    ) -> Result<&'a A::TextureView, CreateBindGroupError> {
        use crate::binding_model::CreateBindGroupError as Error;

        view.same_device(self)?;
        let raw = view.raw_for_use()?;

        let check_usage = |expected: wgt::TextureUsages| {
            if view.usage.contains(expected) {
                Ok(())
            } else {
                Err(MissingTextureUsageError {
                    res: view.error_ident(),
                    actual: view.usage,
                    expected,
                })
            }
        };

        match decl.ty {
            wgt::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled,
            } => {
                check_usage(wgt::TextureUsages::TEXTURE_BINDING)?;
                if multisampled != (view.samples > 1) {
                    return Err(Error::InvalidTextureMultisample {
                        binding,
                        layout_multisampled: multisampled,
                        view_samples: view.samples,
                    });
                }
                let filterable = self
                    .capabilities
                    .format_features(view.format)
                    .flags
                    .contains(wgt::TextureFormatFeatureFlags::FILTERABLE);
                let view_sample_type = binding_model::view_sample_type(view.format, filterable);
                if !binding_model::sample_type_compatible(sample_type, view_sample_type) {
                    return Err(Error::InvalidTextureSampleType {
                        binding,
                        layout_sample_type: sample_type,
                        view_format: view.format,
                        view_sample_type,
                    });
                }
                if view_dimension != view.dimension {
                    return Err(Error::InvalidTextureViewDimension {
                        binding,
                        layout_dimension: view_dimension,
                        view_dimension: view.dimension,
                    });
                }
            }
            wgt::BindingType::StorageTexture {
                format,
                view_dimension,
                ..
            } => {
                check_usage(wgt::TextureUsages::STORAGE_BINDING)?;
                if format != view.format {
                    return Err(Error::InvalidStorageTextureFormat {
                        binding,
                        layout_format: format,
                        view_format: view.format,
                    });
                }
                if view_dimension != view.dimension {
                    return Err(Error::InvalidTextureViewDimension {
                        binding,
                        layout_dimension: view_dimension,
                        view_dimension: view.dimension,
                    });
                }
                let mip_level_count = view.mip_levels.end - view.mip_levels.start;
                if mip_level_count != 1 {
                    return Err(Error::InvalidStorageTextureMipLevelCount {
                        binding,
                        mip_level_count,
                    });
                }
            }
            wgt::BindingType::Buffer { .. } => {
                return Err(Error::WrongBindingType {
                    binding,
                    actual: decl.ty,
                    expected: "SampledTexture or StorageTexture",
                })
            }
        }

        Ok(raw)
    }

    // Pipelines

    pub fn create_compute_pipeline(
        self: &Arc<Self>,
        desc: &pipeline::ComputePipelineDescriptor<A>,
    ) -> Arc<ComputePipeline<A>> {
        profiling::scope!("Device::create_compute_pipeline");
        api_log!("Device::create_compute_pipeline {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().compute_pipelines.insert_error(label);
        let (raw, workgroup_size) = match self.create_compute_pipeline_inner(desc) {
            Ok((raw, workgroup_size)) => (Some(raw), workgroup_size),
            Err(error) => {
                self.handle_error("Device::create_compute_pipeline", label, error);
                (None, [0; 3])
            }
        };

        let pipeline = Arc::new(ComputePipeline {
            raw,
            device: Arc::clone(self),
            layout: Arc::clone(desc.layout),
            _shader_module: Arc::clone(desc.stage.module),
            workgroup_size,
            label: label.to_string(),
            id,
        });
        if pipeline.is_valid() {
            self.store.lock().compute_pipelines.assign(id, &pipeline);
            resource_log!("Created {}", pipeline.error_ident());
        }
        pipeline
    }

    fn create_compute_pipeline_inner(
        &self,
        desc: &pipeline::ComputePipelineDescriptor<A>,
    ) -> Result<(A::ComputePipeline, [u32; 3]), CreateComputePipelineError> {
        self.check_is_valid()?;

        let layout = desc.layout;
        layout.same_device(self)?;
        let layout_raw = layout
            .try_raw()
            .map_err(CreateComputePipelineError::InvalidLayout)?;

        let module = desc.stage.module;
        module.same_device(self)?;
        let entry_point = module.check_stage(
            layout,
            naga::ShaderStage::Compute,
            desc.stage.entry_point.as_deref(),
        )?;
        let module_raw = module
            .try_raw()
            .map_err(|_| validation::StageError::InvalidModule)?;

        let hal_desc = hal::ComputePipelineDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            layout: layout_raw,
            stage: hal::ProgrammableStage {
                module: module_raw,
                entry_point: &entry_point.name,
            },
        };
        let raw = unsafe { self.raw.create_compute_pipeline(&hal_desc) }.map_err(
            |error| match error {
                hal::PipelineError::Device(error) => {
                    CreateComputePipelineError::Device(self.handle_hal_error(error))
                }
                other => CreateComputePipelineError::Internal(other.to_string()),
            },
        )?;

        Ok((raw, entry_point.workgroup_size))
    }

    pub fn create_render_pipeline(
        self: &Arc<Self>,
        desc: &pipeline::RenderPipelineDescriptor<A>,
    ) -> Arc<RenderPipeline<A>> {
        profiling::scope!("Device::create_render_pipeline");
        api_log!("Device::create_render_pipeline {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let id = self.store.lock().render_pipelines.insert_error(label);
        let (raw, pass_context) = match self.create_render_pipeline_inner(desc) {
            Ok((raw, pass_context)) => (Some(raw), pass_context),
            Err(error) => {
                self.handle_error("Device::create_render_pipeline", label, error);
                let empty = RenderPassContext {
                    attachments: AttachmentData {
                        colors: ArrayVec::new(),
                        resolves: ArrayVec::new(),
                        depth_stencil: None,
                    },
                    sample_count: desc.multisample.count,
                };
                (None, empty)
            }
        };

        let mut shader_modules = ArrayVec::new();
        shader_modules.push(Arc::clone(desc.vertex.stage.module));
        if let Some(ref fragment) = desc.fragment {
            shader_modules.push(Arc::clone(fragment.stage.module));
        }

        let pipeline = Arc::new(RenderPipeline {
            raw,
            device: Arc::clone(self),
            layout: Arc::clone(desc.layout),
            _shader_modules: shader_modules,
            pass_context,
            topology: desc.topology,
            label: label.to_string(),
            id,
        });
        if pipeline.is_valid() {
            self.store.lock().render_pipelines.assign(id, &pipeline);
            resource_log!("Created {}", pipeline.error_ident());
        }
        pipeline
    }

    fn create_render_pipeline_inner(
        &self,
        desc: &pipeline::RenderPipelineDescriptor<A>,
    ) -> Result<(A::RenderPipeline, RenderPassContext), CreateRenderPipelineError> {
        use wgt::TextureFormatFeatureFlags as Tfff;

        self.check_is_valid()?;

        let layout = desc.layout;
        layout.same_device(self)?;
        let layout_raw = layout
            .try_raw()
            .map_err(CreateRenderPipelineError::InvalidLayout)?;

        let color_targets = desc
            .fragment
            .as_ref()
            .map_or(&[][..], |fragment| &fragment.targets[..]);
        let max_color_attachments = (self.capabilities.limits().max_color_attachments as usize)
            .min(MAX_COLOR_ATTACHMENTS);
        if color_targets.len() > max_color_attachments {
            return Err(ColorAttachmentError::TooMany {
                given: color_targets.len(),
                limit: max_color_attachments,
            }
            .into());
        }

        let sample_count = desc.multisample.count;
        if sample_count != 1 && sample_count != 4 {
            return Err(CreateRenderPipelineError::InvalidSampleCount(sample_count));
        }

        for (index, target) in color_targets.iter().enumerate() {
            let cs = match *target {
                Some(ref cs) => cs,
                None => continue,
            };
            let error = |e| CreateRenderPipelineError::ColorState(index as u8, e);
            let format_features = self.describe_format_features(cs.format)?;
            if !cs.format.has_color_aspect() {
                return Err(error(ColorStateError::FormatNotColor(cs.format)));
            }
            if !format_features
                .allowed_usages
                .contains(wgt::TextureUsages::RENDER_ATTACHMENT)
            {
                return Err(error(ColorStateError::FormatNotRenderable(cs.format)));
            }
            if sample_count > 1 && !format_features.flags.contains(Tfff::MULTISAMPLE_X4) {
                return Err(error(ColorStateError::InvalidSampleCount(
                    sample_count,
                    cs.format,
                )));
            }
        }

        if let Some(ref ds) = desc.depth_stencil {
            let format_features = self.describe_format_features(ds.format)?;
            if !format_features
                .allowed_usages
                .contains(wgt::TextureUsages::RENDER_ATTACHMENT)
            {
                return Err(DepthStencilStateError::FormatNotRenderable(ds.format).into());
            }
            let depth_enabled =
                ds.depth_write_enabled || ds.depth_compare != wgt::CompareFunction::Always;
            if !ds.format.is_depth_stencil_format()
                || (depth_enabled && !ds.format.has_depth_aspect())
            {
                return Err(DepthStencilStateError::FormatNotDepth(ds.format).into());
            }
            if sample_count > 1 && !format_features.flags.contains(Tfff::MULTISAMPLE_X4) {
                return Err(
                    DepthStencilStateError::InvalidSampleCount(sample_count, ds.format).into(),
                );
            }
        }

        if color_targets.iter().all(Option::is_none) && desc.depth_stencil.is_none() {
            return Err(CreateRenderPipelineError::NoTargets);
        }

        let vertex = &desc.vertex.stage;
        vertex.module.same_device(self)?;
        let vertex_entry = vertex
            .module
            .check_stage(
                layout,
                naga::ShaderStage::Vertex,
                vertex.entry_point.as_deref(),
            )
            .map_err(|error| CreateRenderPipelineError::Stage {
                stage: wgt::ShaderStages::VERTEX,
                error,
            })?;
        let vertex_raw =
            vertex
                .module
                .try_raw()
                .map_err(|_| CreateRenderPipelineError::Stage {
                    stage: wgt::ShaderStages::VERTEX,
                    error: validation::StageError::InvalidModule,
                })?;

        let fragment_stage = match desc.fragment {
            Some(ref fragment) => {
                let stage = &fragment.stage;
                stage.module.same_device(self)?;
                let entry = stage
                    .module
                    .check_stage(
                        layout,
                        naga::ShaderStage::Fragment,
                        stage.entry_point.as_deref(),
                    )
                    .map_err(|error| CreateRenderPipelineError::Stage {
                        stage: wgt::ShaderStages::FRAGMENT,
                        error,
                    })?;
                let raw = stage
                    .module
                    .try_raw()
                    .map_err(|_| CreateRenderPipelineError::Stage {
                        stage: wgt::ShaderStages::FRAGMENT,
                        error: validation::StageError::InvalidModule,
                    })?;
                Some(hal::ProgrammableStage {
                    module: raw,
                    entry_point: entry.name.as_str(),
                })
            }
            None => None,
        };

        let hal_desc = hal::RenderPipelineDescriptor {
            label: desc.label.to_hal(self.instance_flags),
            layout: layout_raw,
            vertex_stage: hal::ProgrammableStage {
                module: vertex_raw,
                entry_point: &vertex_entry.name,
            },
            topology: desc.topology,
            depth_stencil: desc.depth_stencil.clone(),
            multisample: desc.multisample,
            fragment_stage,
            color_targets,
        };
        let raw = unsafe { self.raw.create_render_pipeline(&hal_desc) }.map_err(
            |error| match error {
                hal::PipelineError::Device(error) => {
                    CreateRenderPipelineError::Device(self.handle_hal_error(error))
                }
                hal::PipelineError::Linkage(stage, message) => {
                    CreateRenderPipelineError::Internal {
                        stage,
                        error: message,
                    }
                }
                hal::PipelineError::EntryPoint(stage) => CreateRenderPipelineError::Internal {
                    stage: validation::shader_stage_bit(stage),
                    error: "The given entry point is invalid".to_string(),
                },
            },
        )?;

        let pass_context = RenderPassContext {
            attachments: AttachmentData {
                colors: color_targets
                    .iter()
                    .map(|target| target.as_ref().map(|cs| cs.format))
                    .collect(),
                resolves: ArrayVec::new(),
                depth_stencil: desc.depth_stencil.as_ref().map(|ds| ds.format),
            },
            sample_count,
        };

        Ok((raw, pass_context))
    }

    // Commands

    pub fn create_command_encoder(
        self: &Arc<Self>,
        desc: &CommandEncoderDescriptor,
    ) -> CommandEncoder<A> {
        profiling::scope!("Device::create_command_encoder");
        api_log!("Device::create_command_encoder {:?}", desc.label);

        let label = desc.label.borrow_or_default();
        let result = self.check_is_valid().and_then(|()| {
            let hal_desc = hal::CommandEncoderDescriptor {
                label: desc.label.to_hal(self.instance_flags),
            };
            unsafe { self.raw.create_command_encoder(&hal_desc) }
                .map_err(|error| self.handle_hal_error(error))
        });
        match result {
            Ok(raw) => CommandEncoder::new(Some(raw), self, label),
            Err(error) => {
                self.handle_error("Device::create_command_encoder", label, error);
                CommandEncoder::new(None, self, label)
            }
        }
    }
}

pub(crate) fn check_texture_dimension_size(
    dimension: wgt::TextureDimension,
    wgt::Extent3d {
        width,
        height,
        depth_or_array_layers,
    }: wgt::Extent3d,
    sample_size: u32,
    limits: &wgt::Limits,
) -> Result<(), TextureDimensionError> {
    use wgt::TextureDimension::*;

    let (extent_limits, sample_limit) = match dimension {
        D1 => ([limits.max_texture_dimension_1d, 1, 1], 1),
        D2 => (
            [
                limits.max_texture_dimension_2d,
                limits.max_texture_dimension_2d,
                limits.max_texture_array_layers,
            ],
            4,
        ),
        D3 => (
            [
                limits.max_texture_dimension_3d,
                limits.max_texture_dimension_3d,
                limits.max_texture_dimension_3d,
            ],
            1,
        ),
    };

    for (&dim, (&given, &limit)) in [
        TextureErrorDimension::X,
        TextureErrorDimension::Y,
        TextureErrorDimension::Z,
    ]
    .iter()
    .zip([width, height, depth_or_array_layers].iter().zip(extent_limits.iter()))
    {
        if given == 0 {
            return Err(TextureDimensionError::Zero(dim));
        }
        if given > limit {
            return Err(TextureDimensionError::LimitExceeded { dim, given, limit });
        }
    }
    if sample_size != 1 && !(sample_size == 4 && sample_size <= sample_limit) {
        return Err(TextureDimensionError::InvalidSampleCount(sample_size));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32, depth_or_array_layers: u32) -> wgt::Extent3d {
        wgt::Extent3d {
            width,
            height,
            depth_or_array_layers,
        }
    }

    #[test]
    fn texture_dimensions_against_limits() {
        let limits = wgt::Limits::default();
        let d2 = wgt::TextureDimension::D2;
        assert_eq!(
            check_texture_dimension_size(d2, extent(256, 256, 1), 4, &limits),
            Ok(())
        );
        assert_eq!(
            check_texture_dimension_size(d2, extent(256, 0, 1), 1, &limits),
            Err(TextureDimensionError::Zero(TextureErrorDimension::Y))
        );
        assert_eq!(
            check_texture_dimension_size(d2, extent(256, 256, 1), 2, &limits),
            Err(TextureDimensionError::InvalidSampleCount(2))
        );
        assert_eq!(
            check_texture_dimension_size(
                wgt::TextureDimension::D1,
                extent(limits.max_texture_dimension_1d + 1, 1, 1),
                1,
                &limits
            ),
            Err(TextureDimensionError::LimitExceeded {
                dim: TextureErrorDimension::X,
                given: limits.max_texture_dimension_1d + 1,
                limit: limits.max_texture_dimension_1d,
            })
        );
        // Multisampling is 2D only.
        assert!(check_texture_dimension_size(
            wgt::TextureDimension::D3,
            extent(4, 4, 4),
            4,
            &limits
        )
        .is_err());
    }
}
