use crate::{
    api_log,
    device::{Device, DeviceError},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource_log,
    signal::{Signal, SignalFuture},
    storage::ResourceId,
    Label, SubmissionIndex,
};

use parking_lot::Mutex;
use hal::Device as _;
use thiserror::Error;

use std::{
    borrow::Cow,
    fmt, mem,
    ops::Range,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

/// Information about the webgpu-core resource.
///
/// Each type representing a `webgpu-core` resource, like [`Device`],
/// [`Buffer`], etc., contains a `ResourceErrorIdent` which contains
/// the type and label of the resource, used in error messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceErrorIdent {
    r#type: Cow<'static, str>,
    label: String,
}

impl fmt::Display for ResourceErrorIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{} with '{}' label", self.r#type, self.label)
    }
}

impl ResourceErrorIdent {
    pub fn label(&self) -> &str {
        &self.label
    }
}

pub(crate) trait ResourceType {
    const TYPE: &'static str;
}

#[macro_export]
macro_rules! impl_resource_type {
    ($ty:ident) => {
        impl<A: $crate::hal_api::HalApi> $crate::resource::ResourceType for $ty<A> {
            const TYPE: &'static str = stringify!($ty);
        }
    };
}

pub(crate) trait Labeled: ResourceType {
    /// Returns a string identifying this resource for logging and errors.
    ///
    /// It is the user-provided label, empty if none was given.
    fn label(&self) -> &str;

    fn error_ident(&self) -> ResourceErrorIdent {
        ResourceErrorIdent {
            r#type: Cow::Borrowed(Self::TYPE),
            label: self.label().to_owned(),
        }
    }
}

#[macro_export]
macro_rules! impl_labeled {
    ($ty:ident) => {
        impl<A: $crate::hal_api::HalApi> $crate::resource::Labeled for $ty<A> {
            fn label(&self) -> &str {
                &self.label
            }
        }
    };
}

pub(crate) trait ParentDevice<A: HalApi>: Labeled {
    fn device(&self) -> &Arc<Device<A>>;

    fn same_device_as<O: ParentDevice<A>>(&self, other: &O) -> Result<(), DeviceError> {
        if Arc::ptr_eq(self.device(), other.device()) {
            Ok(())
        } else {
            Err(DeviceError::DeviceMismatch(Box::new(
                crate::device::DeviceMismatch {
                    res: self.error_ident(),
                    res_device: self.device().error_ident(),
                    target: Some(other.error_ident()),
                    target_device: other.device().error_ident(),
                },
            )))
        }
    }

    fn same_device(&self, device: &Device<A>) -> Result<(), DeviceError> {
        if std::ptr::eq(&**self.device(), device) {
            Ok(())
        } else {
            Err(DeviceError::DeviceMismatch(Box::new(
                crate::device::DeviceMismatch {
                    res: self.error_ident(),
                    res_device: self.device().error_ident(),
                    target: None,
                    target_device: device.error_ident(),
                },
            )))
        }
    }
}

#[macro_export]
macro_rules! impl_parent_device {
    ($ty:ident) => {
        impl<A: $crate::hal_api::HalApi> $crate::resource::ParentDevice<A> for $ty<A> {
            fn device(&self) -> &std::sync::Arc<$crate::device::Device<A>> {
                &self.device
            }
        }
    };
}

#[derive(Clone, Debug, Error)]
#[error("{0} is invalid")]
pub struct InvalidResourceError(pub ResourceErrorIdent);

impl WebGpuError for InvalidResourceError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

#[derive(Clone, Debug, Error)]
#[error("{0} has been destroyed")]
pub struct DestroyedResourceError(pub ResourceErrorIdent);

impl WebGpuError for DestroyedResourceError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

#[derive(Clone, Debug, Error)]
#[error("Usage flags {actual:?} of {res} do not contain required usage flags {expected:?}")]
pub struct MissingBufferUsageError {
    pub(crate) res: ResourceErrorIdent,
    pub(crate) actual: wgt::BufferUsages,
    pub(crate) expected: wgt::BufferUsages,
}

impl WebGpuError for MissingBufferUsageError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

#[derive(Clone, Debug, Error)]
#[error("Usage flags {actual:?} of {res} do not contain required usage flags {expected:?}")]
pub struct MissingTextureUsageError {
    pub(crate) res: ResourceErrorIdent,
    pub(crate) actual: wgt::TextureUsages,
    pub(crate) expected: wgt::TextureUsages,
}

impl WebGpuError for MissingTextureUsageError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BufferAccessError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Buffer map failed")]
    Failed,
    #[error(transparent)]
    Invalid(#[from] InvalidResourceError),
    #[error(transparent)]
    DestroyedResource(#[from] DestroyedResourceError),
    #[error("Buffer is already mapped")]
    AlreadyMapped,
    #[error("Buffer map is pending")]
    MapAlreadyPending,
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error("Buffer is not mapped")]
    NotMapped,
    #[error("Buffer offset invalid: offset {offset} must be multiple of 8")]
    UnalignedOffset { offset: wgt::BufferAddress },
    #[error("Buffer range size invalid: range_size {range_size} must be multiple of 4")]
    UnalignedRangeSize { range_size: wgt::BufferAddress },
    #[error("Buffer access out of bounds: index {index} would underrun the buffer (limit: {min})")]
    OutOfBoundsUnderrun {
        index: wgt::BufferAddress,
        min: wgt::BufferAddress,
    },
    #[error(
        "Buffer access out of bounds: last index {index} would overrun the buffer (limit: {max})"
    )]
    OutOfBoundsOverrun {
        index: wgt::BufferAddress,
        max: wgt::BufferAddress,
    },
    #[error("Buffer map range start {start} is greater than end {end}")]
    NegativeRange {
        start: wgt::BufferAddress,
        end: wgt::BufferAddress,
    },
    #[error("Buffer map aborted")]
    MapAborted,
    #[error("Mapped range was invalidated by unmapping the buffer")]
    Detached,
    #[error("Mapped range is read-only")]
    ReadOnly,
}

impl WebGpuError for BufferAccessError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::Failed => ErrorType::Internal,
            Self::MapAborted | Self::Detached | Self::ReadOnly => ErrorType::Usage,
            Self::Invalid(_)
            | Self::DestroyedResource(_)
            | Self::AlreadyMapped
            | Self::MapAlreadyPending
            | Self::MissingBufferUsage(_)
            | Self::NotMapped
            | Self::UnalignedOffset { .. }
            | Self::UnalignedRangeSize { .. }
            | Self::OutOfBoundsUnderrun { .. }
            | Self::OutOfBoundsOverrun { .. }
            | Self::NegativeRange { .. } => ErrorType::Validation,
        }
    }
}

pub type BufferAccessResult = Result<(), BufferAccessError>;

/// Future returned by [`Buffer::map_async`].
pub type MapFuture = SignalFuture<BufferAccessResult>;

/// The host-visible state of a buffer, as reported by [`Buffer::map_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapState {
    Unmapped,
    Pending,
    Mapped,
}

#[derive(Debug)]
pub(crate) struct BufferPendingMapping {
    pub(crate) range: Range<wgt::BufferAddress>,
    pub(crate) host: wgt::MapMode,
    pub(crate) signal: Signal<BufferAccessResult>,
}

#[derive(Debug)]
pub(crate) enum BufferMapState {
    /// Mapped at creation.
    Init { mapping: hal::BufferMapping },
    /// Waiting for GPU to be done before mapping
    Waiting(BufferPendingMapping),
    /// Mapped
    Active {
        mapping: hal::BufferMapping,
        range: hal::MemoryRange,
        host: wgt::MapMode,
    },
    /// Not mapped
    Idle,
}

// The mapping pointer is only dereferenced with the state locked.
unsafe impl Send for BufferMapState {}
unsafe impl Sync for BufferMapState {}

pub type BufferDescriptor<'a> = wgt::BufferDescriptor<Label<'a>>;

#[derive(Debug)]
pub struct Buffer<A: HalApi> {
    pub(crate) raw: Option<A::Buffer>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) usage: wgt::BufferUsages,
    pub(crate) size: wgt::BufferAddress,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
    pub(crate) destroyed: AtomicBool,
    /// Last submission that used this buffer.
    pub(crate) submission_index: AtomicU64,
    pub(crate) map_state: Mutex<BufferMapState>,
    /// Bumped whenever the buffer is unmapped, detaching every [`BufferView`].
    map_generation: AtomicU64,
}

impl<A: HalApi> Drop for Buffer<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            let mapped = !matches!(*self.map_state.get_mut(), BufferMapState::Idle);
            unsafe {
                if mapped {
                    let _ = self.device.raw().unmap_buffer(&raw);
                }
                self.device.raw().destroy_buffer(raw);
            }
        }
        self.device.store.lock().buffers.remove(self.id);
    }
}

impl<A: HalApi> Buffer<A> {
    pub(crate) fn new(
        raw: Option<A::Buffer>,
        device: &Arc<Device<A>>,
        id: ResourceId,
        desc: &BufferDescriptor,
        map_state: BufferMapState,
    ) -> Self {
        Self {
            raw,
            device: Arc::clone(device),
            usage: desc.usage,
            size: desc.size,
            label: desc.label.as_deref().unwrap_or_default().to_string(),
            id,
            destroyed: AtomicBool::new(false),
            submission_index: AtomicU64::new(0),
            map_state: Mutex::new(map_state),
            map_generation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> wgt::BufferAddress {
        self.size
    }

    pub fn usage(&self) -> wgt::BufferUsages {
        self.usage
    }

    /// Whether the buffer was created successfully.
    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn map_state(&self) -> MapState {
        match *self.map_state.lock() {
            BufferMapState::Idle => MapState::Unmapped,
            BufferMapState::Waiting(_) => MapState::Pending,
            BufferMapState::Init { .. } | BufferMapState::Active { .. } => MapState::Mapped,
        }
    }

    pub(crate) fn try_raw(&self) -> Result<&A::Buffer, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    pub(crate) fn check_destroyed(&self) -> Result<(), DestroyedResourceError> {
        if self.is_destroyed() {
            Err(DestroyedResourceError(self.error_ident()))
        } else {
            Ok(())
        }
    }

    /// The raw buffer, if it is valid and alive.
    pub(crate) fn raw_for_use(&self) -> Result<&A::Buffer, BufferUseError> {
        let raw = self.try_raw()?;
        self.check_destroyed()?;
        Ok(raw)
    }

    /// Checks that the given buffer usage contains the required buffer usage,
    /// returns an error otherwise.
    pub(crate) fn check_usage(
        &self,
        expected: wgt::BufferUsages,
    ) -> Result<(), MissingBufferUsageError> {
        if self.usage.contains(expected) {
            Ok(())
        } else {
            Err(MissingBufferUsageError {
                res: self.error_ident(),
                actual: self.usage,
                expected,
            })
        }
    }

    pub(crate) fn is_host_visible(&self) -> bool {
        !matches!(*self.map_state.lock(), BufferMapState::Idle)
    }

    /// Request host access to `size` bytes at `offset`.
    ///
    /// `size` defaults to the rest of the buffer. The future resolves once
    /// every submission using the buffer has completed and the range is
    /// mapped, or with the reason the request failed.
    pub fn map_async(
        self: &Arc<Self>,
        mode: wgt::MapMode,
        offset: wgt::BufferAddress,
        size: Option<wgt::BufferAddress>,
    ) -> MapFuture {
        profiling::scope!("Buffer::map_async");
        api_log!("Buffer::map_async {:?} offset {offset:?} size {size:?} op: {mode:?}", self.label);

        match self.map_async_inner(mode, offset, size) {
            Ok(signal) => signal.future_with_pump(self.device.pump_handle()),
            Err(err) => {
                self.device
                    .handle_error("Buffer::map_async", &self.label, err.clone());
                Signal::resolved(Err(err)).future()
            }
        }
    }

    fn map_async_inner(
        self: &Arc<Self>,
        mode: wgt::MapMode,
        offset: wgt::BufferAddress,
        size: Option<wgt::BufferAddress>,
    ) -> Result<Signal<BufferAccessResult>, BufferAccessError> {
        self.device.check_is_valid()?;
        self.try_raw()?;

        let range_size = match size {
            Some(size) => size,
            None => self.size.saturating_sub(offset),
        };
        if offset % wgt::MAP_ALIGNMENT != 0 {
            return Err(BufferAccessError::UnalignedOffset { offset });
        }
        if range_size % wgt::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(BufferAccessError::UnalignedRangeSize { range_size });
        }

        let pub_usage = match mode {
            wgt::MapMode::Read => wgt::BufferUsages::MAP_READ,
            wgt::MapMode::Write => wgt::BufferUsages::MAP_WRITE,
        };
        self.check_usage(pub_usage)?;

        let end = match offset.checked_add(range_size) {
            Some(end) if end <= self.size => end,
            _ => {
                return Err(BufferAccessError::OutOfBoundsOverrun {
                    index: offset.saturating_add(range_size),
                    max: self.size,
                })
            }
        };

        self.check_destroyed()?;

        let signal = Signal::new();
        {
            let mut map_state = self.map_state.lock();
            match *map_state {
                BufferMapState::Init { .. } | BufferMapState::Active { .. } => {
                    return Err(BufferAccessError::AlreadyMapped);
                }
                BufferMapState::Waiting(_) => {
                    return Err(BufferAccessError::MapAlreadyPending);
                }
                BufferMapState::Idle => {
                    *map_state = BufferMapState::Waiting(BufferPendingMapping {
                        range: offset..end,
                        host: mode,
                        signal: signal.clone(),
                    });
                }
            }
        }

        self.device.lock_life().map(self);
        Ok(signal)
    }

    /// Map the pending range, once the GPU is done with the buffer.
    ///
    /// Returns the signal to resolve, or `None` if the request was aborted
    /// in the meantime.
    pub(crate) fn map_pending(
        &self,
    ) -> Option<(Signal<BufferAccessResult>, BufferAccessResult)> {
        let mut map_state = self.map_state.lock();
        let pending = match mem::replace(&mut *map_state, BufferMapState::Idle) {
            BufferMapState::Waiting(pending) => pending,
            other => {
                *map_state = other;
                return None;
            }
        };
        let raw = match self.raw {
            Some(ref raw) => raw,
            None => return Some((pending.signal, Err(BufferAccessError::Failed))),
        };

        match unsafe { self.device.raw().map_buffer(raw, pending.range.clone()) } {
            Ok(mapping) => {
                *map_state = BufferMapState::Active {
                    mapping,
                    range: pending.range,
                    host: pending.host,
                };
                Some((pending.signal, Ok(())))
            }
            Err(error) => {
                drop(map_state);
                let error = self.device.handle_hal_error(error);
                Some((pending.signal, Err(error.into())))
            }
        }
    }

    /// Abort a pending request because the device went away.
    pub(crate) fn abort_pending(&self) -> Option<Signal<BufferAccessResult>> {
        let mut map_state = self.map_state.lock();
        match mem::replace(&mut *map_state, BufferMapState::Idle) {
            BufferMapState::Waiting(pending) => Some(pending.signal),
            other => {
                *map_state = other;
                None
            }
        }
    }

    /// Host access to a range of a mapped buffer.
    ///
    /// `size` defaults to the rest of the buffer. The view stays usable until
    /// the buffer is unmapped or destroyed.
    pub fn get_mapped_range(
        self: &Arc<Self>,
        offset: wgt::BufferAddress,
        size: Option<wgt::BufferAddress>,
    ) -> Result<BufferView<A>, BufferAccessError> {
        profiling::scope!("Buffer::get_mapped_range");
        api_log!("Buffer::get_mapped_range {:?} offset {offset:?} size {size:?}", self.label);

        self.try_raw()?;
        self.check_destroyed()?;

        let range_size = match size {
            Some(size) => size,
            None => self.size.saturating_sub(offset),
        };
        if offset % wgt::MAP_ALIGNMENT != 0 {
            return Err(BufferAccessError::UnalignedOffset { offset });
        }
        if range_size % wgt::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(BufferAccessError::UnalignedRangeSize { range_size });
        }

        let map_state = self.map_state.lock();
        let (mapped, writable) = match *map_state {
            BufferMapState::Init { .. } => (0..self.size, true),
            BufferMapState::Active {
                ref range, host, ..
            } => (range.clone(), host == wgt::MapMode::Write),
            BufferMapState::Waiting(_) => return Err(BufferAccessError::MapAlreadyPending),
            BufferMapState::Idle => return Err(BufferAccessError::NotMapped),
        };
        if offset < mapped.start {
            return Err(BufferAccessError::OutOfBoundsUnderrun {
                index: offset,
                min: mapped.start,
            });
        }
        let end = offset.saturating_add(range_size);
        if end > mapped.end {
            return Err(BufferAccessError::OutOfBoundsOverrun {
                index: end.saturating_sub(1),
                max: mapped.end,
            });
        }

        Ok(BufferView {
            buffer: Arc::clone(self),
            range: offset..end,
            generation: self.map_generation.load(Ordering::Acquire),
            writable,
        })
    }

    /// Give host memory back to the GPU.
    ///
    /// Every [`BufferView`] is detached, and a pending mapping request is
    /// aborted with [`BufferAccessError::MapAborted`].
    pub fn unmap(&self) -> BufferAccessResult {
        profiling::scope!("Buffer::unmap");
        api_log!("Buffer::unmap {:?}", self.label);

        if let Err(err) = self.try_raw() {
            let err = BufferAccessError::from(err);
            self.device
                .handle_error("Buffer::unmap", &self.label, err.clone());
            return Err(err);
        }
        self.unmap_inner()
    }

    fn unmap_inner(&self) -> BufferAccessResult {
        let mut hal_error = None;
        let aborted = {
            let mut map_state = self.map_state.lock();
            match mem::replace(&mut *map_state, BufferMapState::Idle) {
                BufferMapState::Idle => None,
                BufferMapState::Waiting(pending) => Some(pending.signal),
                BufferMapState::Init { .. } | BufferMapState::Active { .. } => {
                    self.map_generation.fetch_add(1, Ordering::AcqRel);
                    if let Some(ref raw) = self.raw {
                        if let Err(e) = unsafe { self.device.raw().unmap_buffer(raw) } {
                            hal_error = Some(e);
                        }
                    }
                    None
                }
            }
        };

        if let Some(signal) = aborted {
            signal.resolve(Err(BufferAccessError::MapAborted));
        }
        match hal_error {
            Some(error) => Err(self.device.handle_hal_error(error).into()),
            None => Ok(()),
        }
    }

    /// Destroy the buffer's contents.
    ///
    /// Destroying twice is a no-op. Backend memory is released when the last
    /// reference to the buffer goes away.
    pub fn destroy(&self) {
        profiling::scope!("Buffer::destroy");
        api_log!("Buffer::destroy {:?}", self.label);

        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.unmap_inner();
        self.device.store.lock().buffers.mark_destroyed(self.id);
    }

    pub(crate) fn set_submission_index(&self, index: SubmissionIndex) {
        self.submission_index.fetch_max(index, Ordering::AcqRel);
    }
}

crate::impl_resource_type!(Buffer);
crate::impl_labeled!(Buffer);
crate::impl_parent_device!(Buffer);

/// Reasons a buffer can't be used by a command.
#[derive(Clone, Debug, Error)]
pub enum BufferUseError {
    #[error(transparent)]
    Invalid(#[from] InvalidResourceError),
    #[error(transparent)]
    DestroyedResource(#[from] DestroyedResourceError),
}

impl WebGpuError for BufferUseError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

/// Host access to a range of a mapped [`Buffer`].
///
/// Contents are only reachable through the accessors, which check that the
/// buffer is still mapped by the mapping this view was created from.
#[derive(Debug)]
pub struct BufferView<A: HalApi> {
    buffer: Arc<Buffer<A>>,
    range: Range<wgt::BufferAddress>,
    generation: u64,
    writable: bool,
}

impl<A: HalApi> BufferView<A> {
    pub fn offset(&self) -> wgt::BufferAddress {
        self.range.start
    }

    pub fn len(&self) -> usize {
        (self.range.end - self.range.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Whether the mapping behind this view is still in place.
    pub fn is_attached(&self) -> bool {
        let _map_state = self.buffer.map_state.lock();
        self.generation == self.buffer.map_generation.load(Ordering::Acquire)
    }

    /// Run `f` over a copy of the view's contents.
    ///
    /// No lock is held while `f` runs, so it may unmap the buffer or open
    /// other views.
    pub fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, BufferAccessError> {
        let contents = self.read()?;
        Ok(f(&contents))
    }

    /// Run `f` over a copy of the view's contents, then write the copy back.
    ///
    /// Fails with [`BufferAccessError::Detached`] if the buffer was unmapped
    /// while `f` ran; the changes are lost in that case.
    pub fn with_slice_mut<R>(
        &self,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BufferAccessError> {
        if !self.writable {
            return Err(BufferAccessError::ReadOnly);
        }
        let mut contents = self.read()?;
        let result = f(&mut contents);
        self.copy_in(0, &contents)?;
        Ok(result)
    }

    /// Copy the contents of the view out.
    pub fn read(&self) -> Result<Vec<u8>, BufferAccessError> {
        let map_state = self.buffer.map_state.lock();
        let ptr = self.base_ptr(&map_state)?;
        let slice = unsafe { std::slice::from_raw_parts(ptr, self.len()) };
        Ok(slice.to_vec())
    }

    /// Write `data` at `offset` bytes into the view.
    pub fn write(&self, offset: usize, data: &[u8]) -> BufferAccessResult {
        if !self.writable {
            return Err(BufferAccessError::ReadOnly);
        }
        let end = offset.saturating_add(data.len());
        if end > self.len() {
            return Err(BufferAccessError::OutOfBoundsOverrun {
                index: self.range.start + end as u64 - 1,
                max: self.range.end,
            });
        }
        self.copy_in(offset, data)
    }

    fn copy_in(&self, offset: usize, data: &[u8]) -> BufferAccessResult {
        let map_state = self.buffer.map_state.lock();
        let ptr = self.base_ptr(&map_state)?;
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr, self.len()) };
        slice[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn base_ptr(&self, map_state: &BufferMapState) -> Result<*mut u8, BufferAccessError> {
        if self.generation != self.buffer.map_generation.load(Ordering::Acquire) {
            return Err(BufferAccessError::Detached);
        }
        let (mapping, mapped_start) = match *map_state {
            BufferMapState::Init { ref mapping } => (mapping, 0),
            BufferMapState::Active {
                ref mapping,
                ref range,
                ..
            } => (mapping, range.start),
            BufferMapState::Waiting(_) | BufferMapState::Idle => {
                return Err(BufferAccessError::Detached)
            }
        };
        let delta = (self.range.start - mapped_start) as usize;
        Ok(unsafe { mapping.ptr.as_ptr().add(delta) })
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateBufferError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Failed to map buffer while creating: {0}")]
    AccessError(#[from] BufferAccessError),
    #[error("Buffers that are mapped at creation have to be aligned to `COPY_BUFFER_ALIGNMENT`")]
    UnalignedSize,
    #[error("Invalid usage flags {0:?}")]
    InvalidUsage(wgt::BufferUsages),
    #[error("`MAP` usage can only be combined with the opposite `COPY`, requested {0:?}")]
    UsageMismatch(wgt::BufferUsages),
    #[error("Buffer size {requested} is greater than the maximum buffer size ({maximum})")]
    MaxBufferSize { requested: u64, maximum: u64 },
}

impl WebGpuError for CreateBufferError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::AccessError(ref e) => e.webgpu_error_type(),
            Self::UnalignedSize
            | Self::InvalidUsage(_)
            | Self::UsageMismatch(_)
            | Self::MaxBufferSize { .. } => ErrorType::Validation,
        }
    }
}

pub type TextureDescriptor<'a> = wgt::TextureDescriptor<Label<'a>>;

#[derive(Debug)]
pub struct Texture<A: HalApi> {
    pub(crate) raw: Option<A::Texture>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) desc: wgt::TextureDescriptor<()>,
    pub(crate) format_features: wgt::TextureFormatFeatures,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
    /// Cleared on destruction; shared with every view of the texture.
    pub(crate) alive: Arc<AtomicBool>,
}

impl<A: HalApi> Drop for Texture<A> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_texture(raw);
            }
        }
        self.device.store.lock().textures.remove(self.id);
    }
}

impl<A: HalApi> Texture<A> {
    pub(crate) fn new(
        raw: Option<A::Texture>,
        device: &Arc<Device<A>>,
        id: ResourceId,
        desc: &TextureDescriptor,
        format_features: wgt::TextureFormatFeatures,
    ) -> Self {
        Self {
            raw,
            device: Arc::clone(device),
            desc: desc.map_label(|_| ()),
            format_features,
            label: desc.label.as_deref().unwrap_or_default().to_string(),
            id,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> wgt::Extent3d {
        self.desc.size
    }

    pub fn format(&self) -> wgt::TextureFormat {
        self.desc.format
    }

    pub fn usage(&self) -> wgt::TextureUsages {
        self.desc.usage
    }

    pub fn dimension(&self) -> wgt::TextureDimension {
        self.desc.dimension
    }

    pub fn mip_level_count(&self) -> u32 {
        self.desc.mip_level_count
    }

    pub fn sample_count(&self) -> u32 {
        self.desc.sample_count
    }

    pub fn is_valid(&self) -> bool {
        self.raw.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn try_raw(&self) -> Result<&A::Texture, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    pub(crate) fn check_destroyed(&self) -> Result<(), DestroyedResourceError> {
        if self.is_destroyed() {
            Err(DestroyedResourceError(self.error_ident()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_usage(
        &self,
        expected: wgt::TextureUsages,
    ) -> Result<(), MissingTextureUsageError> {
        if self.desc.usage.contains(expected) {
            Ok(())
        } else {
            Err(MissingTextureUsageError {
                res: self.error_ident(),
                actual: self.desc.usage,
                expected,
            })
        }
    }

    pub fn create_view(self: &Arc<Self>, desc: &TextureViewDescriptor) -> Arc<TextureView<A>> {
        self.device.create_texture_view(self, desc)
    }

    /// Destroy the texture's contents; views of it become unusable.
    ///
    /// Destroying twice is a no-op.
    pub fn destroy(&self) {
        profiling::scope!("Texture::destroy");
        api_log!("Texture::destroy {:?}", self.label);

        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.device.store.lock().textures.mark_destroyed(self.id);
    }
}

crate::impl_resource_type!(Texture);
crate::impl_labeled!(Texture);
crate::impl_parent_device!(Texture);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextureErrorDimension {
    X,
    Y,
    Z,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum TextureDimensionError {
    #[error("Dimension {0:?} is zero")]
    Zero(TextureErrorDimension),
    #[error("Dimension {dim:?} value {given} exceeds the limit of {limit}")]
    LimitExceeded {
        dim: TextureErrorDimension,
        given: u32,
        limit: u32,
    },
    #[error("Sample count {0} is invalid")]
    InvalidSampleCount(u32),
    #[error("Multisampled texture depth or array layers must be 1, got {0}")]
    MultisampledDepthOrArrayLayer(u32),
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateTextureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Invalid usage flags {0:?}")]
    InvalidUsage(wgt::TextureUsages),
    #[error(transparent)]
    InvalidDimension(#[from] TextureDimensionError),
    #[error("Depth texture ({1:?}) can't be created as {0:?}")]
    InvalidDepthDimension(wgt::TextureDimension, wgt::TextureFormat),
    #[error("Textures of dimension {0:?} can't be used with {1:?}")]
    InvalidDimensionUsages(wgt::TextureUsages, wgt::TextureDimension),
    #[error(
        "Texture descriptor mip level count {requested} is invalid, maximum allowed is {maximum}"
    )]
    InvalidMipLevelCount { requested: u32, maximum: u32 },
    #[error("Texture usages {0:?} are not allowed on a texture of type {1:?}")]
    InvalidFormatUsages(wgt::TextureUsages, wgt::TextureFormat),
    #[error("Texture usage STORAGE_BINDING is not allowed for multisampled textures")]
    InvalidMultisampledStorageBinding,
    #[error("Format {0:?} does not support multisampling")]
    InvalidMultisampledFormat(wgt::TextureFormat),
    #[error("Multisampled textures must have RENDER_ATTACHMENT usage")]
    MultisampledNotRenderAttachment,
    #[error(transparent)]
    MissingFeatures(#[from] crate::device::MissingFeatures),
}

impl WebGpuError for CreateTextureError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}

pub type TextureViewDescriptor<'a> = wgt::TextureViewDescriptor<Label<'a>>;

#[derive(Debug)]
pub struct TextureView<A: HalApi> {
    pub(crate) raw: Option<A::TextureView>,
    pub(crate) parent: Weak<Texture<A>>,
    parent_alive: Arc<AtomicBool>,
    pub(crate) device: Arc<Device<A>>,
    pub(crate) format: wgt::TextureFormat,
    pub(crate) dimension: wgt::TextureViewDimension,
    pub(crate) aspects: hal::FormatAspects,
    pub(crate) mip_levels: Range<u32>,
    pub(crate) array_layers: Range<u32>,
    /// Size of the base mip level of the view.
    pub(crate) extent: wgt::Extent3d,
    pub(crate) samples: u32,
    /// Usages of the parent texture.
    pub(crate) usage: wgt::TextureUsages,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> Drop for TextureView<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe {
                self.device.raw().destroy_texture_view(raw);
            }
        }
        self.device.store.lock().texture_views.remove(self.id);
    }
}

/// Everything a view is built from, once validated.
#[derive(Debug)]
pub(crate) struct ResolvedTextureView {
    pub(crate) format: wgt::TextureFormat,
    pub(crate) dimension: wgt::TextureViewDimension,
    pub(crate) aspects: hal::FormatAspects,
    pub(crate) mip_levels: Range<u32>,
    pub(crate) array_layers: Range<u32>,
}

impl<A: HalApi> TextureView<A> {
    pub(crate) fn new(
        raw: Option<A::TextureView>,
        texture: &Arc<Texture<A>>,
        id: ResourceId,
        label: &Label,
        resolved: ResolvedTextureView,
    ) -> Self {
        Self {
            raw,
            parent: Arc::downgrade(texture),
            parent_alive: Arc::clone(&texture.alive),
            device: Arc::clone(&texture.device),
            extent: texture
                .desc
                .size
                .mip_level_size(resolved.mip_levels.start, texture.desc.dimension),
            samples: texture.desc.sample_count,
            usage: texture.desc.usage,
            format: resolved.format,
            dimension: resolved.dimension,
            aspects: resolved.aspects,
            mip_levels: resolved.mip_levels,
            array_layers: resolved.array_layers,
            label: label.as_deref().unwrap_or_default().to_string(),
            id,
        }
    }

    /// A view of an invalid or destroyed texture.
    pub(crate) fn new_invalid(
        texture: &Arc<Texture<A>>,
        id: ResourceId,
        label: &Label,
    ) -> Self {
        Self::new(
            None,
            texture,
            id,
            label,
            ResolvedTextureView {
                format: texture.desc.format,
                dimension: wgt::TextureViewDimension::D2,
                aspects: hal::FormatAspects::from(texture.desc.format),
                mip_levels: 0..0,
                array_layers: 0..0,
            },
        )
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self) -> wgt::TextureFormat {
        self.format
    }

    pub fn dimension(&self) -> wgt::TextureViewDimension {
        self.dimension
    }

    /// Whether the view was created successfully and its texture is alive.
    pub fn is_valid(&self) -> bool {
        self.raw.is_some() && self.parent_alive.load(Ordering::Acquire)
    }

    pub(crate) fn try_raw(&self) -> Result<&A::TextureView, InvalidResourceError> {
        self.raw
            .as_ref()
            .ok_or_else(|| InvalidResourceError(self.error_ident()))
    }

    /// The raw view, if it can be used by a command.
    pub(crate) fn raw_for_use(&self) -> Result<&A::TextureView, TextureViewUseError> {
        let raw = self.try_raw()?;
        self.check_destroyed()?;
        Ok(raw)
    }

    pub(crate) fn check_destroyed(&self) -> Result<(), DestroyedResourceError> {
        if self.parent_alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DestroyedResourceError(self.error_ident()))
        }
    }

    pub(crate) fn parent(&self) -> Option<Arc<Texture<A>>> {
        self.parent.upgrade()
    }

    pub(crate) fn is_single_subresource(&self) -> bool {
        self.mip_levels.len() == 1 && self.array_layers.len() == 1
    }
}

crate::impl_resource_type!(TextureView);
crate::impl_labeled!(TextureView);
crate::impl_parent_device!(TextureView);

/// Reasons a view can't be used by a command.
#[derive(Clone, Debug, Error)]
pub enum TextureViewUseError {
    #[error(transparent)]
    Invalid(#[from] InvalidResourceError),
    #[error(transparent)]
    DestroyedResource(#[from] DestroyedResourceError),
}

impl WebGpuError for TextureViewUseError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CreateTextureViewError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    InvalidTexture(#[from] InvalidResourceError),
    #[error(transparent)]
    DestroyedResource(#[from] DestroyedResourceError),
    #[error("Invalid texture view dimension `{view:?}` with texture of dimension `{texture:?}`")]
    InvalidTextureViewDimension {
        view: wgt::TextureViewDimension,
        texture: wgt::TextureDimension,
    },
    #[error("Invalid texture view dimension `{0:?}` of a multisampled texture")]
    InvalidMultisampledTextureViewDimension(wgt::TextureViewDimension),
    #[error("Invalid texture depth `{depth}` for texture view of dimension `Cubemap`. Cubemap views must use images of size 6.")]
    InvalidCubemapTextureDepth { depth: u32 },
    #[error("Invalid texture depth `{depth}` for texture view of dimension `CubemapArray`. Cubemap views must use images with sizes which are a multiple of 6.")]
    InvalidCubemapArrayTextureDepth { depth: u32 },
    #[error("Source texture width and height must be equal for a texture view of dimension `Cube`/`CubeArray`")]
    InvalidCubeTextureViewSize,
    #[error("Mip level count is 0")]
    ZeroMipLevelCount,
    #[error("Array layer count is 0")]
    ZeroArrayLayerCount,
    #[error(
        "TextureView mip level count + base mip level {requested} must be <= Texture mip level count {total}"
    )]
    TooManyMipLevels { requested: u32, total: u32 },
    #[error("TextureView array layer count + base array layer {requested} must be <= Texture depth/array layer count {total}")]
    TooManyArrayLayers { requested: u32, total: u32 },
    #[error("Requested array layer count {requested} is not valid for the target view dimension {dim:?}")]
    InvalidArrayLayerCount {
        requested: u32,
        dim: wgt::TextureViewDimension,
    },
    #[error("Aspect {requested_aspect:?} is not in the source texture format {texture_format:?}")]
    InvalidAspect {
        texture_format: wgt::TextureFormat,
        requested_aspect: wgt::TextureAspect,
    },
    #[error("Unable to view texture {texture:?} as {view:?}")]
    FormatReinterpretation {
        texture: wgt::TextureFormat,
        view: wgt::TextureFormat,
    },
}

impl WebGpuError for CreateTextureViewError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}
