use crate::{
    api_log,
    command::{CommandBuffer, CommandBufferData},
    device::{life::WorkDoneSignal, Device, DeviceError},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource::{Labeled, ParentDevice, ResourceErrorIdent},
    signal::{Signal, SignalFuture},
    SubmissionIndex,
};

use hal::Queue as _;
use smallvec::SmallVec;
use thiserror::Error;

use std::{fmt, sync::Arc};

/// The submission queue of a [`Device`].
///
/// Every device has exactly one queue, handed out together with it by
/// [`Adapter::request_device`](crate::instance::Adapter::request_device).
pub struct Queue<A: HalApi> {
    device: Arc<Device<A>>,
}

impl<A: HalApi> fmt::Debug for Queue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("device", &self.device.label)
            .finish()
    }
}

impl<A: HalApi> Drop for Queue<A> {
    fn drop(&mut self) {
        // Submissions in flight own command buffers that reference the
        // device, so they have to be retired here.
        if !self.device.is_valid() {
            return;
        }
        match self.device.poll(wgt::Maintain::Wait) {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "Work is still in flight on {} after its queue was dropped",
                self.device.error_ident()
            ),
            Err(error) => log::error!(
                "Failed to wait for {} while dropping its queue: {error}",
                self.device.error_ident()
            ),
        }
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum QueueSubmitError {
    #[error(transparent)]
    Queue(#[from] DeviceError),
    #[error("{0} was already submitted")]
    AlreadySubmitted(ResourceErrorIdent),
    #[error("{0} is still mapped")]
    BufferStillMapped(ResourceErrorIdent),
}

impl WebGpuError for QueueSubmitError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Queue(ref e) => e.webgpu_error_type(),
            Self::AlreadySubmitted(_) | Self::BufferStillMapped(_) => ErrorType::Validation,
        }
    }
}

impl<A: HalApi> Queue<A> {
    pub(crate) fn new(device: &Arc<Device<A>>) -> Self {
        Self {
            device: Arc::clone(device),
        }
    }

    pub fn get_device(&self) -> &Arc<Device<A>> {
        &self.device
    }

    /// Hand `command_buffers` to the backend in one ordered submission.
    ///
    /// Every command buffer is consumed, whether the submission succeeds or
    /// not. Nothing reaches the backend unless all of them are valid.
    pub fn submit<I>(&self, command_buffers: I) -> Result<SubmissionIndex, QueueSubmitError>
    where
        I: IntoIterator<Item = Arc<CommandBuffer<A>>>,
    {
        profiling::scope!("Queue::submit");
        api_log!("Queue::submit");

        let command_buffers = command_buffers.into_iter().collect::<Vec<_>>();
        let mut datas = SmallVec::<[CommandBufferData<A>; 1]>::new();
        let mut result: Result<(), QueueSubmitError> = Ok(());
        for cmd_buf in command_buffers.iter() {
            // A foreign command buffer is left to its own device.
            if let Err(error) = cmd_buf.same_device(&self.device) {
                result = result.and(Err(error.into()));
                continue;
            }
            let data = cmd_buf.data.lock().take();
            match data {
                Some(data) => datas.push(data),
                None => {
                    result = result.and(Err(QueueSubmitError::AlreadySubmitted(
                        cmd_buf.error_ident(),
                    )));
                }
            }
        }
        let result = result
            .and_then(|()| self.device.check_is_valid().map_err(QueueSubmitError::from))
            .and_then(|()| Self::validate(&datas));

        let index = result.and_then(|()| self.submit_raw(&datas));
        match index {
            Ok(index) => {
                log::trace!(
                    "Submitted {} command buffers as submission {index}",
                    datas.len()
                );
                self.device.lock_life().track_submission(index, datas);
                Ok(index)
            }
            Err(error) => {
                for data in datas {
                    data.destroy(self.device.raw());
                }
                self.device
                    .handle_error("Queue::submit", &self.device.label, error.clone());
                Err(error)
            }
        }
    }

    fn validate(datas: &[CommandBufferData<A>]) -> Result<(), QueueSubmitError> {
        for data in datas {
            if let Some(buffer) = data.used_buffers.iter().find(|b| b.is_host_visible()) {
                return Err(QueueSubmitError::BufferStillMapped(buffer.error_ident()));
            }
        }
        Ok(())
    }

    fn submit_raw(&self, datas: &[CommandBufferData<A>]) -> Result<SubmissionIndex, QueueSubmitError> {
        let mut queue = self.device.queue_raw.lock();
        let mut fence = self.device.fence.lock();
        let index = self.device.next_submission_index();
        for data in datas {
            for buffer in data.used_buffers.iter() {
                buffer.set_submission_index(index);
            }
        }
        let raws = datas.iter().map(|data| &data.raw).collect::<Vec<_>>();
        let submitted = unsafe { queue.submit(&raws, (&mut **fence, index)) };
        drop(fence);
        drop(queue);
        submitted.map_err(|error| QueueSubmitError::from(self.device.handle_hal_error(error)))?;
        Ok(index)
    }

    /// Resolves once everything submitted so far has completed.
    ///
    /// Resolves right away if nothing is in flight. On device loss the
    /// future resolves with [`DeviceError::Lost`].
    pub fn on_submitted_work_done(&self) -> SignalFuture<Result<(), DeviceError>> {
        api_log!("Queue::on_submitted_work_done");
        if let Err(error) = self.device.check_is_valid() {
            return Signal::resolved(Err(error)).future();
        }
        let signal: WorkDoneSignal = Signal::new();
        if !self.device.lock_life().add_work_done_signal(signal.clone()) {
            signal.resolve(Ok(()));
        }
        signal.future_with_pump(self.device.pump_handle())
    }
}
