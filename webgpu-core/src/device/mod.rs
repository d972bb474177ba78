use crate::{
    error::{ErrorType, WebGpuError},
    resource::ResourceErrorIdent,
    Label, MAX_COLOR_ATTACHMENTS,
};

use arrayvec::ArrayVec;
use thiserror::Error;
use wgt::TextureFormat;

use std::fmt;

pub(crate) mod life;
pub mod queue;
pub mod resource;

pub use queue::{Queue, QueueSubmitError};
pub use resource::Device;

/// How long a blocking poll waits for the GPU before giving up.
pub const CLEANUP_WAIT_MS: u32 = 60000;

pub type DeviceDescriptor<'a> = wgt::DeviceDescriptor<Label<'a>>;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct AttachmentData<T> {
    pub colors: ArrayVec<Option<T>, MAX_COLOR_ATTACHMENTS>,
    pub resolves: ArrayVec<T, MAX_COLOR_ATTACHMENTS>,
    pub depth_stencil: Option<T>,
}

#[derive(Debug, Copy, Clone)]
pub enum RenderPassCompatibilityCheckType {
    RenderPipeline,
}

/// The attachment formats and sample count a pipeline renders into.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct RenderPassContext {
    pub attachments: AttachmentData<TextureFormat>,
    pub sample_count: u32,
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RenderPassCompatibilityError {
    #[error(
        "Incompatible color attachments at indices {indices:?}: the {ty:?} uses attachments with formats {expected:?} but the render pass uses {actual:?}"
    )]
    IncompatibleColorAttachment {
        indices: Vec<usize>,
        expected: Vec<Option<TextureFormat>>,
        actual: Vec<Option<TextureFormat>>,
        ty: RenderPassCompatibilityCheckType,
    },
    #[error(
        "Incompatible depth-stencil attachment format: the {ty:?} uses an attachment with format {expected:?} but the render pass uses {actual:?}"
    )]
    IncompatibleDepthStencilAttachment {
        expected: Option<TextureFormat>,
        actual: Option<TextureFormat>,
        ty: RenderPassCompatibilityCheckType,
    },
    #[error(
        "Incompatible sample count: the {ty:?} uses {expected:?} but the render pass uses {actual:?}"
    )]
    IncompatibleSampleCount {
        expected: u32,
        actual: u32,
        ty: RenderPassCompatibilityCheckType,
    },
}

impl RenderPassContext {
    // Assumes the renderpass only contains one subpass
    pub(crate) fn check_compatible(
        &self,
        other: &Self,
        ty: RenderPassCompatibilityCheckType,
    ) -> Result<(), RenderPassCompatibilityError> {
        if self.attachments.colors != other.attachments.colors {
            let indices = self
                .attachments
                .colors
                .iter()
                .zip(&other.attachments.colors)
                .enumerate()
                .filter_map(|(idx, (left, right))| (left != right).then_some(idx))
                .collect();
            return Err(RenderPassCompatibilityError::IncompatibleColorAttachment {
                indices,
                expected: self.attachments.colors.iter().copied().collect(),
                actual: other.attachments.colors.iter().copied().collect(),
                ty,
            });
        }
        if self.attachments.depth_stencil != other.attachments.depth_stencil {
            return Err(
                RenderPassCompatibilityError::IncompatibleDepthStencilAttachment {
                    expected: self.attachments.depth_stencil,
                    actual: other.attachments.depth_stencil,
                    ty,
                },
            );
        }
        if self.sample_count != other.sample_count {
            return Err(RenderPassCompatibilityError::IncompatibleSampleCount {
                expected: self.sample_count,
                actual: other.sample_count,
                ty,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("Parent device is lost")]
    Lost,
    #[error("Not enough memory left.")]
    OutOfMemory,
    #[error("Creation of a resource failed for a reason other than running out of memory.")]
    ResourceCreationFailed,
    #[error(transparent)]
    DeviceMismatch(#[from] Box<DeviceMismatch>),
}

impl DeviceError {
    pub(crate) fn from_hal(error: hal::DeviceError) -> Self {
        match error {
            hal::DeviceError::Lost => Self::Lost,
            hal::DeviceError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

impl WebGpuError for DeviceError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Lost => ErrorType::DeviceLost,
            Self::OutOfMemory => ErrorType::OutOfMemory,
            Self::ResourceCreationFailed => ErrorType::Internal,
            Self::DeviceMismatch(_) => ErrorType::Validation,
        }
    }
}

#[derive(Clone, Debug, Error)]
#[error(
    "{res} of {res_device} doesn't match {}",
    match target {
        Some(target) => format!("{target} of {target_device}"),
        None => format!("{target_device}"),
    }
)]
pub struct DeviceMismatch {
    pub(super) res: ResourceErrorIdent,
    pub(super) res_device: ResourceErrorIdent,
    pub(super) target: Option<ResourceErrorIdent>,
    pub(super) target_device: ResourceErrorIdent,
}

#[derive(Clone, Debug, Error)]
#[error("Features {0:?} are required but not enabled on the device")]
pub struct MissingFeatures(pub wgt::Features);

impl WebGpuError for MissingFeatures {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

#[derive(Clone, Debug, Error)]
pub enum WaitIdleError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("GPU got stuck :(")]
    StuckGpu,
}

impl WebGpuError for WaitIdleError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::StuckGpu => ErrorType::Internal,
        }
    }
}

/// Why and how a device was lost, as delivered by [`Device::lost`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLostInfo {
    pub reason: wgt::DeviceLostReason,
    pub message: String,
}

impl fmt::Display for DeviceLostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device lost ({:?}): {}", self.reason, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(colors: &[Option<TextureFormat>], samples: u32) -> RenderPassContext {
        RenderPassContext {
            attachments: AttachmentData {
                colors: colors.iter().copied().collect(),
                resolves: ArrayVec::new(),
                depth_stencil: None,
            },
            sample_count: samples,
        }
    }

    #[test]
    fn pass_compatibility_names_the_mismatch() {
        let pipeline = context(&[Some(TextureFormat::Rgba8Unorm), None], 1);
        let pass = context(&[Some(TextureFormat::Rgba8Unorm), None], 1);
        assert!(pipeline
            .check_compatible(&pass, RenderPassCompatibilityCheckType::RenderPipeline)
            .is_ok());

        let other = context(&[Some(TextureFormat::Bgra8Unorm), None], 1);
        match pipeline.check_compatible(&other, RenderPassCompatibilityCheckType::RenderPipeline)
        {
            Err(RenderPassCompatibilityError::IncompatibleColorAttachment { indices, .. }) => {
                assert_eq!(indices, vec![0])
            }
            other => panic!("unexpected result {other:?}"),
        }

        let multisampled = context(&[Some(TextureFormat::Rgba8Unorm), None], 4);
        assert!(matches!(
            pipeline.check_compatible(
                &multisampled,
                RenderPassCompatibilityCheckType::RenderPipeline
            ),
            Err(RenderPassCompatibilityError::IncompatibleSampleCount { .. })
        ));
    }
}
