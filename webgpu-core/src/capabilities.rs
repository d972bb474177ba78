//! What an adapter, and the devices opened from it, can do.

use thiserror::Error;

use crate::{
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    FastHashMap,
};

#[derive(Clone, Debug, Error)]
#[error("Limit '{name}' value {requested} is better than allowed {allowed}")]
pub struct FailedLimit {
    name: &'static str,
    requested: u64,
    allowed: u64,
}

impl FailedLimit {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RequestDeviceError {
    #[error(transparent)]
    Device(#[from] crate::device::DeviceError),
    #[error(transparent)]
    LimitsExceeded(#[from] FailedLimit),
    #[error("Unsupported features were requested: {0:?}")]
    UnsupportedFeature(wgt::Features),
}

impl WebGpuError for RequestDeviceError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            Self::LimitsExceeded(_) | Self::UnsupportedFeature(_) => ErrorType::Validation,
        }
    }
}

/// Features, limits and per-format capabilities.
///
/// One registry is built per adapter; every device gets a copy narrowed to
/// the features and limits it was requested with.
#[derive(Clone, Debug)]
pub struct CapabilityRegistry {
    features: wgt::Features,
    limits: wgt::Limits,
    formats: FastHashMap<wgt::TextureFormat, hal::TextureFormatCapabilities>,
}

impl CapabilityRegistry {
    pub(crate) fn from_hal<A: HalApi>(exposed: &hal::ExposedAdapter<A>) -> Self {
        use hal::Adapter as _;

        let formats = wgt::TextureFormat::ALL
            .iter()
            .map(|&format| {
                let caps = unsafe { exposed.adapter.texture_format_capabilities(format) };
                (format, caps)
            })
            .collect();
        Self {
            features: exposed.features,
            limits: exposed.capabilities.limits.clone(),
            formats,
        }
    }

    /// The registry of a device requested with `features` and `limits`.
    pub(crate) fn for_device(&self, features: wgt::Features, limits: wgt::Limits) -> Self {
        Self {
            features,
            limits,
            formats: self.formats.clone(),
        }
    }

    pub fn features(&self) -> wgt::Features {
        self.features
    }

    pub fn limits(&self) -> &wgt::Limits {
        &self.limits
    }

    /// Raw backend capabilities of `format`, regardless of enabled features.
    pub fn format_capabilities(&self, format: wgt::TextureFormat) -> hal::TextureFormatCapabilities {
        self.formats
            .get(&format)
            .copied()
            .unwrap_or(hal::TextureFormatCapabilities::empty())
    }

    /// What textures of `format` may be used for with the enabled features.
    pub fn format_features(&self, format: wgt::TextureFormat) -> wgt::TextureFormatFeatures {
        if !self.features.contains(format.required_features()) {
            return wgt::TextureFormatFeatures::none();
        }

        let caps = self.format_capabilities(format);
        let guaranteed = format.guaranteed_format_features(self.features);

        let mut flags = guaranteed.flags;
        flags.set(
            wgt::TextureFormatFeatureFlags::FILTERABLE,
            guaranteed
                .flags
                .contains(wgt::TextureFormatFeatureFlags::FILTERABLE)
                && caps.contains(hal::TextureFormatCapabilities::SAMPLED_LINEAR),
        );
        flags.set(
            wgt::TextureFormatFeatureFlags::MULTISAMPLE_X4,
            guaranteed
                .flags
                .contains(wgt::TextureFormatFeatureFlags::MULTISAMPLE_X4)
                && caps.contains(hal::TextureFormatCapabilities::MULTISAMPLE_X4),
        );
        flags.set(
            wgt::TextureFormatFeatureFlags::BLENDABLE,
            guaranteed
                .flags
                .contains(wgt::TextureFormatFeatureFlags::BLENDABLE)
                && caps.contains(hal::TextureFormatCapabilities::COLOR_ATTACHMENT_BLEND),
        );
        flags.set(
            wgt::TextureFormatFeatureFlags::STORAGE_READ_WRITE,
            guaranteed
                .flags
                .contains(wgt::TextureFormatFeatureFlags::STORAGE_READ_WRITE)
                && caps.contains(hal::TextureFormatCapabilities::STORAGE_READ_WRITE),
        );

        wgt::TextureFormatFeatures {
            allowed_usages: guaranteed.allowed_usages & caps.allowed_usages(),
            flags,
        }
    }

    /// Whether `format` can be a render pass attachment.
    pub fn is_renderable(&self, format: wgt::TextureFormat) -> bool {
        self.format_features(format)
            .allowed_usages
            .contains(wgt::TextureUsages::RENDER_ATTACHMENT)
    }

    /// Check that a device with `desc` can be opened from this registry.
    pub fn check_request<L>(&self, desc: &wgt::DeviceDescriptor<L>) -> Result<(), RequestDeviceError> {
        if !self.features.contains(desc.required_features) {
            return Err(RequestDeviceError::UnsupportedFeature(
                desc.required_features - self.features,
            ));
        }

        let mut failed = None;
        desc.required_limits
            .check_limits_with_fail_fn(&self.limits, true, |name, requested, allowed| {
                failed = Some(FailedLimit {
                    name,
                    requested,
                    allowed,
                });
            });
        match failed {
            Some(failed) => Err(failed.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::Instance as _;

    fn registry(config: hal::noop::AdapterConfig) -> CapabilityRegistry {
        let instance = hal::noop::Instance::with_adapters(vec![config]);
        let exposed = unsafe { instance.enumerate_adapters() }.pop().unwrap();
        CapabilityRegistry::from_hal(&exposed)
    }

    #[test]
    fn formats_follow_device_features() {
        let adapter = registry(hal::noop::AdapterConfig::default());
        let plain = adapter.for_device(wgt::Features::empty(), wgt::Limits::default());
        assert!(!plain.is_renderable(wgt::TextureFormat::Rg11b10Float));
        let enabled = adapter.for_device(
            wgt::Features::RG11B10UFLOAT_RENDERABLE,
            wgt::Limits::default(),
        );
        assert!(enabled.is_renderable(wgt::TextureFormat::Rg11b10Float));
        assert!(plain.is_renderable(wgt::TextureFormat::Bgra8Unorm));
    }

    #[test]
    fn unsupported_formats_have_no_usages() {
        let adapter = registry(hal::noop::AdapterConfig {
            unsupported_formats: vec![wgt::TextureFormat::Rgba16Float],
            ..Default::default()
        });
        assert_eq!(
            adapter.format_features(wgt::TextureFormat::Rgba16Float),
            wgt::TextureFormatFeatures {
                allowed_usages: wgt::TextureUsages::empty(),
                flags: wgt::TextureFormatFeatureFlags::empty(),
            }
        );
    }

    #[test]
    fn rejects_requests_beyond_the_adapter() {
        let adapter = registry(hal::noop::AdapterConfig {
            features: wgt::Features::empty(),
            ..Default::default()
        });

        let too_many_features = wgt::DeviceDescriptor {
            label: (),
            required_features: wgt::Features::SHADER_F16,
            required_limits: wgt::Limits::default(),
        };
        assert!(matches!(
            adapter.check_request(&too_many_features),
            Err(RequestDeviceError::UnsupportedFeature(f)) if f == wgt::Features::SHADER_F16
        ));

        let too_big = wgt::DeviceDescriptor {
            label: (),
            required_features: wgt::Features::empty(),
            required_limits: wgt::Limits {
                max_bind_groups: 64,
                ..Default::default()
            },
        };
        match adapter.check_request(&too_big) {
            Err(RequestDeviceError::LimitsExceeded(failed)) => {
                assert_eq!(failed.name(), "max_bind_groups")
            }
            other => panic!("unexpected result {other:?}"),
        }

        assert!(adapter
            .check_request(&wgt::DeviceDescriptor::<()>::default())
            .is_ok());
    }
}
