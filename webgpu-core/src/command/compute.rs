use std::sync::Arc;

use hal::CommandEncoder as _;
use thiserror::Error;

use crate::{
    api_log,
    binding_model::{BindGroup, BindGroupUseError, PipelineLayout},
    command::{
        bind::{Binder, BinderError},
        BasePass, Command, CommandEncoder, CommandEncoderError, CommandEncoderStatus, MapPassErr,
        PassErrorScope,
    },
    device::{Device, DeviceError},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    pipeline::ComputePipeline,
    resource::{Buffer, InvalidResourceError, Labeled, ParentDevice},
    Label,
};

#[derive(Clone, Debug, Default)]
pub struct ComputePassDescriptor<'a> {
    pub label: Label<'a>,
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ComputePassErrorInner {
    #[error(transparent)]
    Encoder(#[from] CommandEncoderError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    InvalidResource(#[from] InvalidResourceError),
    #[error(transparent)]
    BindGroup(#[from] BindGroupUseError),
    #[error("Bind group index {index} is greater than the device's requested `max_bind_group` limit {max}")]
    BindGroupIndexOutOfRange { index: u32, max: u32 },
    #[error("A compute pipeline must be set")]
    MissingPipeline,
    #[error(transparent)]
    IncompatibleBindGroup(#[from] BinderError),
    #[error(
        "Each current dispatch group size dimension ({current:?}) must be less or equal to {limit}"
    )]
    InvalidGroupSize { current: [u32; 3], limit: u32 },
}

/// Error encountered when performing a compute pass.
#[derive(Clone, Debug, Error)]
#[error("{scope}")]
pub struct ComputePassError {
    pub scope: PassErrorScope,
    #[source]
    pub(super) inner: ComputePassErrorInner,
}

impl ComputePassError {
    pub fn inner(&self) -> &ComputePassErrorInner {
        &self.inner
    }
}

impl From<CommandEncoderError> for ComputePassError {
    fn from(error: CommandEncoderError) -> Self {
        Self {
            scope: PassErrorScope::ComputePass,
            inner: error.into(),
        }
    }
}

impl WebGpuError for ComputePassError {
    fn webgpu_error_type(&self) -> ErrorType {
        match self.inner {
            ComputePassErrorInner::Encoder(ref e) => e.webgpu_error_type(),
            ComputePassErrorInner::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}

impl<T, E> MapPassErr<T, ComputePassError> for Result<T, E>
where
    E: Into<ComputePassErrorInner>,
{
    fn map_pass_err(self, scope: PassErrorScope) -> Result<T, ComputePassError> {
        self.map_err(|inner| ComputePassError {
            scope,
            inner: inner.into(),
        })
    }
}

#[derive(Debug)]
pub(crate) enum ComputeCommand<A: HalApi> {
    SetPipeline(Arc<ComputePipeline<A>>),
    SetBindGroup {
        layout: Arc<PipelineLayout<A>>,
        index: u32,
        group: Arc<BindGroup<A>>,
    },
    Dispatch([u32; 3]),
}

/// A compute pass that ended successfully, waiting for `finish`.
#[derive(Debug)]
pub(crate) struct RecordedComputePass<A: HalApi> {
    label: Option<String>,
    commands: Vec<ComputeCommand<A>>,
}

impl<A: HalApi> RecordedComputePass<A> {
    pub(super) fn encode(&self, raw: &mut A::CommandEncoder) -> Result<(), InvalidResourceError> {
        let desc = hal::ComputePassDescriptor {
            label: self.label.as_deref(),
        };
        unsafe { raw.begin_compute_pass(&desc) };
        for command in self.commands.iter() {
            match *command {
                ComputeCommand::SetPipeline(ref pipeline) => unsafe {
                    raw.set_compute_pipeline(pipeline.try_raw()?)
                },
                ComputeCommand::SetBindGroup {
                    ref layout,
                    index,
                    ref group,
                } => unsafe { raw.set_bind_group(layout.try_raw()?, index, group.try_raw()?, &[]) },
                ComputeCommand::Dispatch(groups) => unsafe { raw.dispatch(groups) },
            }
        }
        unsafe { raw.end_compute_pass() };
        Ok(())
    }
}

/// An open compute pass.
///
/// Behaves like [`RenderPass`](super::RenderPass): the first failing command
/// is kept and reported by [`ComputePass::end`].
#[derive(Debug)]
pub struct ComputePass<'e, A: HalApi> {
    encoder: &'e CommandEncoder<A>,
    base: BasePass<ComputeCommand<A>>,
    binder: Binder<A>,
    pipeline: Option<Arc<ComputePipeline<A>>>,
    used_buffers: Vec<Arc<Buffer<A>>>,
    error: Option<ComputePassError>,
}

impl<A: HalApi> CommandEncoder<A> {
    /// Open a compute pass, locking the encoder until the pass ends.
    pub fn begin_compute_pass<'e>(
        &'e self,
        desc: &ComputePassDescriptor,
    ) -> Result<ComputePass<'e, A>, ComputePassError> {
        profiling::scope!("CommandEncoder::begin_compute_pass");
        api_log!("CommandEncoder::begin_compute_pass {:?}", desc.label);

        let locked: Result<(), ComputePassError> =
            self.record("CommandEncoder::begin_compute_pass", |data| {
                data.status = CommandEncoderStatus::Locked;
                Ok(())
            });
        locked?;

        Ok(ComputePass {
            encoder: self,
            base: BasePass::new(&desc.label),
            binder: Binder::new(),
            pipeline: None,
            used_buffers: Vec::new(),
            error: None,
        })
    }
}

impl<'e, A: HalApi> ComputePass<'e, A> {
    pub fn label(&self) -> Option<&str> {
        self.base.label.as_deref()
    }

    fn device(&self) -> &Device<A> {
        &self.encoder.device
    }

    fn store_error(&mut self, scope: PassErrorScope, result: Result<(), ComputePassErrorInner>) {
        if let Err(inner) = result {
            log::trace!("Compute pass {:?} failed {scope}: {inner}", self.base.label);
            self.error = Some(ComputePassError { scope, inner });
        }
    }

    pub fn set_pipeline(&mut self, pipeline: &Arc<ComputePipeline<A>>) {
        api_log!("ComputePass::set_pipeline {}", pipeline.error_ident());
        if self.error.is_none() {
            let result = self.set_pipeline_inner(pipeline);
            self.store_error(PassErrorScope::SetPipeline, result);
        }
    }

    fn set_pipeline_inner(
        &mut self,
        pipeline: &Arc<ComputePipeline<A>>,
    ) -> Result<(), ComputePassErrorInner> {
        pipeline.same_device(self.device())?;
        pipeline.try_raw()?;

        self.binder.change_pipeline_layout(&pipeline.layout);
        self.pipeline = Some(Arc::clone(pipeline));
        self.base
            .commands
            .push(ComputeCommand::SetPipeline(Arc::clone(pipeline)));
        Ok(())
    }

    pub fn set_bind_group(&mut self, index: u32, group: &Arc<BindGroup<A>>) {
        api_log!("ComputePass::set_bind_group {index} {}", group.error_ident());
        if self.error.is_none() {
            let result = self.set_bind_group_inner(index, group);
            self.store_error(PassErrorScope::SetBindGroup, result);
        }
    }

    fn set_bind_group_inner(
        &mut self,
        index: u32,
        group: &Arc<BindGroup<A>>,
    ) -> Result<(), ComputePassErrorInner> {
        let max = self.device().capabilities.limits().max_bind_groups;
        if index >= max || index as usize >= crate::MAX_BIND_GROUPS {
            return Err(ComputePassErrorInner::BindGroupIndexOutOfRange { index, max });
        }
        group.same_device(self.device())?;
        group.try_raw()?;
        group.check_resources()?;

        self.used_buffers
            .extend(group.used_buffers.iter().map(Arc::clone));
        self.binder.assign_group(index as usize, group);
        Ok(())
    }

    pub fn dispatch_workgroups(&mut self, x: u32, y: u32, z: u32) {
        api_log!("ComputePass::dispatch_workgroups {x} {y} {z}");
        if self.error.is_none() {
            let result = self.dispatch_inner([x, y, z]);
            self.store_error(PassErrorScope::Dispatch, result);
        }
    }

    fn dispatch_inner(&mut self, groups: [u32; 3]) -> Result<(), ComputePassErrorInner> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(ComputePassErrorInner::MissingPipeline)?;
        self.binder.check_compatibility(&**pipeline)?;

        let limit = self
            .device()
            .capabilities
            .limits()
            .max_compute_workgroups_per_dimension;
        if groups.iter().any(|&count| count > limit) {
            return Err(ComputePassErrorInner::InvalidGroupSize {
                current: groups,
                limit,
            });
        }

        if let Some((layout, rebinds)) = self.binder.take_rebinds() {
            self.base
                .commands
                .extend(rebinds.into_iter().map(|(index, group)| ComputeCommand::SetBindGroup {
                    layout: Arc::clone(&layout),
                    index,
                    group,
                }));
        }
        self.base.commands.push(ComputeCommand::Dispatch(groups));
        Ok(())
    }

    /// End the pass and unlock the encoder.
    pub fn end(self) -> Result<(), ComputePassError> {
        profiling::scope!("ComputePass::end");
        api_log!("ComputePass::end {:?}", self.base.label);

        let ComputePass {
            encoder,
            base,
            used_buffers,
            error,
            ..
        } = self;

        let result: Result<(), ComputePassError> = match error {
            Some(error) => {
                encoder.invalidate();
                Err(error)
            }
            None => {
                let recorded = RecordedComputePass {
                    label: crate::hal_label(base.label.as_deref(), encoder.device.instance_flags)
                        .map(str::to_string),
                    commands: base.commands,
                };
                encoder
                    .unlock(Command::ComputePass(recorded), used_buffers)
                    .map_pass_err(PassErrorScope::EndPass)
            }
        };
        if let Err(ref error) = result {
            encoder
                .device
                .handle_error("ComputePass::end", &encoder.label, error.clone());
        }
        result
    }
}
