//! Command encoding.
//!
//! Commands are validated as they are recorded and kept, together with the
//! resources they reference, until [`CommandEncoder::finish`] replays them
//! into a backend command buffer. Recording never touches the backend, so an
//! encoder poisoned halfway through leaves nothing behind.

mod bind;
mod compute;
mod render;
mod transfer;

use std::{fmt, sync::Arc};

pub use self::{
    bind::BinderError,
    compute::{ComputePass, ComputePassDescriptor, ComputePassError, ComputePassErrorInner},
    render::{
        RenderPass, RenderPassColorAttachment, RenderPassDepthStencilAttachment,
        RenderPassDescriptor, RenderPassError, RenderPassErrorInner,
    },
    transfer::{CopyError, CopySide, ImageCopyBuffer, ImageCopyTexture, TransferError},
};

use crate::{
    api_log,
    device::{Device, DeviceError},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource::{Buffer, InvalidResourceError, Labeled, Texture},
    resource_log,
    storage::ResourceId,
    FastHashMap, Label,
};

use hal::{CommandEncoder as _, Device as _};
use parking_lot::Mutex;
use thiserror::Error;

pub type CommandEncoderDescriptor<'a> = wgt::CommandEncoderDescriptor<Label<'a>>;

/// The current state of a [`CommandEncoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandEncoderStatus {
    /// Ready to record commands.
    Recording,
    /// A pass is open; commands go through the pass until it ends.
    Locked,
    /// `finish` produced a command buffer.
    Finished,
    /// A validation error was raised while recording.
    ///
    /// Every further call fails, `finish` included.
    Error,
}

/// A pass command list, with the label the pass was opened with.
#[derive(Debug)]
pub(crate) struct BasePass<C> {
    pub label: Option<String>,
    pub commands: Vec<C>,
}

impl<C> BasePass<C> {
    fn new(label: &Label) -> Self {
        Self {
            label: label.as_deref().map(str::to_string),
            commands: Vec::new(),
        }
    }
}

/// A validated encoder command, holding the resources it uses.
pub(crate) enum Command<A: HalApi> {
    ClearBuffer {
        dst: Arc<Buffer<A>>,
        range: hal::MemoryRange,
    },
    CopyBufferToBuffer {
        src: Arc<Buffer<A>>,
        dst: Arc<Buffer<A>>,
        region: hal::BufferCopy,
    },
    CopyBufferToTexture {
        src: Arc<Buffer<A>>,
        dst: Arc<Texture<A>>,
        region: hal::BufferTextureCopy,
    },
    CopyTextureToBuffer {
        src: Arc<Texture<A>>,
        dst: Arc<Buffer<A>>,
        region: hal::BufferTextureCopy,
    },
    RenderPass(render::RecordedRenderPass<A>),
    ComputePass(compute::RecordedComputePass<A>),
}

impl<A: HalApi> Command<A> {
    fn encode(&self, raw: &mut A::CommandEncoder) -> Result<(), InvalidResourceError> {
        match *self {
            Self::ClearBuffer { ref dst, ref range } => {
                let dst = dst.try_raw()?;
                unsafe { raw.clear_buffer(dst, range.clone()) };
            }
            Self::CopyBufferToBuffer {
                ref src,
                ref dst,
                region,
            } => {
                let (src, dst) = (src.try_raw()?, dst.try_raw()?);
                unsafe { raw.copy_buffer_to_buffer(src, dst, std::iter::once(region)) };
            }
            Self::CopyBufferToTexture {
                ref src,
                ref dst,
                ref region,
            } => {
                let (src, dst) = (src.try_raw()?, dst.try_raw()?);
                unsafe { raw.copy_buffer_to_texture(src, dst, std::iter::once(region.clone())) };
            }
            Self::CopyTextureToBuffer {
                ref src,
                ref dst,
                ref region,
            } => {
                let (src, dst) = (src.try_raw()?, dst.try_raw()?);
                unsafe { raw.copy_texture_to_buffer(src, dst, std::iter::once(region.clone())) };
            }
            Self::RenderPass(ref pass) => pass.encode(raw)?,
            Self::ComputePass(ref pass) => pass.encode(raw)?,
        }
        Ok(())
    }
}

struct EncoderData<A: HalApi> {
    status: CommandEncoderStatus,
    raw: Option<A::CommandEncoder>,
    commands: Vec<Command<A>>,
    /// Every buffer the commands touch, directly or through bind groups.
    used_buffers: FastHashMap<ResourceId, Arc<Buffer<A>>>,
}

impl<A: HalApi> EncoderData<A> {
    fn check_recording(&self) -> Result<(), CommandEncoderError> {
        match self.status {
            CommandEncoderStatus::Recording => Ok(()),
            CommandEncoderStatus::Locked => Err(CommandEncoderError::Locked),
            CommandEncoderStatus::Finished => Err(CommandEncoderError::NotRecording),
            CommandEncoderStatus::Error => Err(CommandEncoderError::Invalid),
        }
    }

    fn poison(&mut self) {
        self.status = CommandEncoderStatus::Error;
        self.commands.clear();
        self.used_buffers.clear();
    }

    fn use_buffer(&mut self, buffer: &Arc<Buffer<A>>) {
        self.used_buffers
            .entry(buffer.id)
            .or_insert_with(|| Arc::clone(buffer));
    }
}

/// Records commands into a [`CommandBuffer`].
///
/// An encoder is single-use: it produces at most one command buffer.
pub struct CommandEncoder<A: HalApi> {
    pub(crate) device: Arc<Device<A>>,
    data: Mutex<EncoderData<A>>,
    pub(crate) label: String,
}

impl<A: HalApi> fmt::Debug for CommandEncoder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEncoder")
            .field("label", &self.label)
            .field("status", &self.status())
            .finish()
    }
}

impl<A: HalApi> Drop for CommandEncoder<A> {
    fn drop(&mut self) {
        if let Some(raw) = self.data.get_mut().raw.take() {
            resource_log!("Destroy raw {}", self.error_ident());
            unsafe { self.device.raw().destroy_command_encoder(raw) };
        }
    }
}

crate::impl_resource_type!(CommandEncoder);
crate::impl_labeled!(CommandEncoder);
crate::impl_parent_device!(CommandEncoder);

impl<A: HalApi> CommandEncoder<A> {
    /// An encoder without a backend encoder starts out invalid.
    pub(crate) fn new(raw: Option<A::CommandEncoder>, device: &Arc<Device<A>>, label: &str) -> Self {
        let status = match raw {
            Some(_) => CommandEncoderStatus::Recording,
            None => CommandEncoderStatus::Error,
        };
        Self {
            device: Arc::clone(device),
            data: Mutex::new(EncoderData {
                status,
                raw,
                commands: Vec::new(),
                used_buffers: FastHashMap::default(),
            }),
            label: label.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> CommandEncoderStatus {
        self.data.lock().status
    }

    /// Run `f` on a recording encoder.
    ///
    /// A failure that is not a usage error poisons the encoder; every failure
    /// is routed to the device's error scopes.
    fn record<T, E>(
        &self,
        fn_ident: &'static str,
        f: impl FnOnce(&mut EncoderData<A>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: WebGpuError + Clone + From<CommandEncoderError>,
    {
        let result = {
            let mut data = self.data.lock();
            let result = data
                .check_recording()
                .map_err(E::from)
                .and_then(|()| {
                    self.device
                        .check_is_valid()
                        .map_err(|e| E::from(CommandEncoderError::from(e)))?;
                    f(&mut data)
                });
            if let Err(ref error) = result {
                if error.webgpu_error_type() != ErrorType::Usage {
                    data.poison();
                }
            }
            result
        };
        if let Err(ref error) = result {
            self.device.handle_error(fn_ident, &self.label, error.clone());
        }
        result
    }

    /// Leave the `Locked` state once a pass ends, appending what it recorded.
    ///
    /// Fails if the encoder was poisoned while the pass was open.
    fn unlock(&self, command: Command<A>, buffers: Vec<Arc<Buffer<A>>>) -> Result<(), CommandEncoderError> {
        let mut data = self.data.lock();
        match data.status {
            CommandEncoderStatus::Locked => {
                data.status = CommandEncoderStatus::Recording;
                data.commands.push(command);
                for buffer in buffers.iter() {
                    data.use_buffer(buffer);
                }
                Ok(())
            }
            CommandEncoderStatus::Finished => Err(CommandEncoderError::NotRecording),
            CommandEncoderStatus::Recording | CommandEncoderStatus::Error => {
                Err(CommandEncoderError::Invalid)
            }
        }
    }

    /// Poison the encoder after a pass failed.
    fn invalidate(&self) {
        let mut data = self.data.lock();
        if data.status != CommandEncoderStatus::Finished {
            data.poison();
        }
    }

    /// Fill `range` of `dst` with zeroes.
    ///
    /// `size` defaults to the rest of the buffer.
    pub fn clear_buffer(
        &self,
        dst: &Arc<Buffer<A>>,
        offset: wgt::BufferAddress,
        size: Option<wgt::BufferAddress>,
    ) -> Result<(), CopyError> {
        profiling::scope!("CommandEncoder::clear_buffer");
        api_log!("CommandEncoder::clear_buffer {:?} {offset} {size:?}", dst.label);

        self.record("CommandEncoder::clear_buffer", |data| {
            let range = transfer::validate_clear_buffer(&self.device, dst, offset, size)?;
            if !range.is_empty() {
                data.use_buffer(dst);
                data.commands.push(Command::ClearBuffer {
                    dst: Arc::clone(dst),
                    range,
                });
            }
            Ok(())
        })
    }

    /// Finish recording and return the command buffer.
    ///
    /// Finishing a finished encoder is a usage error. Finishing with a pass
    /// still open or after a validation error fails and poisons the encoder.
    pub fn finish(&self) -> Result<Arc<CommandBuffer<A>>, CommandEncoderError> {
        profiling::scope!("CommandEncoder::finish");
        api_log!("CommandEncoder::finish {:?}", self.label);

        let result = self.finish_inner();
        if let Err(ref error) = result {
            self.device
                .handle_error("CommandEncoder::finish", &self.label, error.clone());
        }
        result
    }

    fn finish_inner(&self) -> Result<Arc<CommandBuffer<A>>, CommandEncoderError> {
        let mut data = self.data.lock();
        if let Err(error) = data.check_recording() {
            if let CommandEncoderError::Locked = error {
                data.poison();
            }
            return Err(error);
        }
        if let Err(error) = self.device.check_is_valid() {
            data.poison();
            return Err(error.into());
        }

        let mut raw = match data.raw.take() {
            Some(raw) => raw,
            None => {
                data.poison();
                return Err(CommandEncoderError::Invalid);
            }
        };
        let commands = std::mem::take(&mut data.commands);
        let used_buffers = std::mem::take(&mut data.used_buffers);

        let encoded = self.encode(&mut raw, &commands);
        match encoded {
            Ok(cmd_buf) => {
                data.status = CommandEncoderStatus::Finished;
                drop(data);
                let cmd_buf_data = CommandBufferData {
                    encoder: raw,
                    raw: cmd_buf,
                    used_buffers: used_buffers.into_values().collect(),
                    commands,
                };
                Ok(CommandBuffer::register(&self.device, cmd_buf_data, &self.label))
            }
            Err(error) => {
                data.poison();
                drop(data);
                unsafe { self.device.raw().destroy_command_encoder(raw) };
                drop(commands);
                Err(error)
            }
        }
    }

    fn encode(
        &self,
        raw: &mut A::CommandEncoder,
        commands: &[Command<A>],
    ) -> Result<A::CommandBuffer, CommandEncoderError> {
        let label = crate::hal_label(Some(self.label.as_str()), self.device.instance_flags);
        unsafe { raw.begin_encoding(label) }
            .map_err(|error| self.device.handle_hal_error(error))?;
        for command in commands {
            if let Err(error) = command.encode(raw) {
                unsafe { raw.discard_encoding() };
                return Err(error.into());
            }
        }
        let cmd_buf = unsafe { raw.end_encoding() }
            .map_err(|error| self.device.handle_hal_error(error))?;
        log::trace!(
            "Encoded {} commands into {}",
            commands.len(),
            self.error_ident()
        );
        Ok(cmd_buf)
    }
}

/// Everything a submitted command buffer needs until the GPU is done with it.
pub(crate) struct CommandBufferData<A: HalApi> {
    pub(crate) encoder: A::CommandEncoder,
    pub(crate) raw: A::CommandBuffer,
    pub(crate) used_buffers: Vec<Arc<Buffer<A>>>,
    /// Keeps every resource the commands reference alive.
    commands: Vec<Command<A>>,
}

impl<A: HalApi> CommandBufferData<A> {
    pub(crate) fn destroy(self, device: &A::Device) {
        unsafe {
            device.destroy_command_buffer(self.raw);
            device.destroy_command_encoder(self.encoder);
        }
        drop(self.commands);
    }
}

/// The finished output of a [`CommandEncoder`], consumed by one submission.
pub struct CommandBuffer<A: HalApi> {
    pub(crate) device: Arc<Device<A>>,
    /// Taken by `Queue::submit`.
    pub(crate) data: Mutex<Option<CommandBufferData<A>>>,
    pub(crate) label: String,
    pub(crate) id: ResourceId,
}

impl<A: HalApi> fmt::Debug for CommandBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("label", &self.label)
            .field("id", &self.id)
            .field("submitted", &self.is_submitted())
            .finish()
    }
}

impl<A: HalApi> Drop for CommandBuffer<A> {
    fn drop(&mut self) {
        if let Some(data) = self.data.get_mut().take() {
            resource_log!("Destroy raw {}", self.error_ident());
            data.destroy(self.device.raw());
        }
        self.device.store.lock().command_buffers.remove(self.id);
    }
}

crate::impl_resource_type!(CommandBuffer);
crate::impl_labeled!(CommandBuffer);
crate::impl_parent_device!(CommandBuffer);

impl<A: HalApi> CommandBuffer<A> {
    fn register(device: &Arc<Device<A>>, data: CommandBufferData<A>, label: &str) -> Arc<Self> {
        let id = device.store.lock().command_buffers.insert_error(label);
        let cmd_buf = Arc::new(Self {
            device: Arc::clone(device),
            data: Mutex::new(Some(data)),
            label: label.to_string(),
            id,
        });
        device.store.lock().command_buffers.assign(id, &cmd_buf);
        resource_log!("Created {}", cmd_buf.error_ident());
        cmd_buf
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a queue has taken this command buffer already.
    pub fn is_submitted(&self) -> bool {
        self.data.lock().is_none()
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CommandEncoderError {
    #[error("Command encoder is invalid")]
    Invalid,
    #[error("Command encoder must be active")]
    NotRecording,
    #[error("Command encoder is locked by a previously created render/compute pass. Before recording any new commands, the pass must be ended.")]
    Locked,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    InvalidResource(#[from] InvalidResourceError),
}

impl WebGpuError for CommandEncoderError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::NotRecording => ErrorType::Usage,
            Self::Invalid | Self::Locked | Self::InvalidResource(_) => ErrorType::Validation,
        }
    }
}

/// The pass call an error was raised by.
#[derive(Clone, Copy, Debug, Error)]
pub enum PassErrorScope {
    #[error("In a render pass")]
    RenderPass,
    #[error("In a compute pass")]
    ComputePass,
    #[error("In a set_pipeline command")]
    SetPipeline,
    #[error("In a set_bind_group command")]
    SetBindGroup,
    #[error("In a set_viewport command")]
    SetViewport,
    #[error("In a draw command")]
    Draw,
    #[error("In a dispatch command")]
    Dispatch,
    #[error("In end of a pass")]
    EndPass,
}

trait MapPassErr<T, O> {
    fn map_pass_err(self, scope: PassErrorScope) -> Result<T, O>;
}
