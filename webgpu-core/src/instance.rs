use std::{fmt, future::Ready, sync::Arc};

use crate::{
    api_log,
    capabilities::{CapabilityRegistry, RequestDeviceError},
    device::{Device, DeviceDescriptor, DeviceError, Queue},
    hal_api::HalApi,
    resource_log, LabelHelpers,
};

use hal::{Adapter as _, Instance as _};
use wgt::PowerPreference;

/// Entry point: enumerates the adapters of one backend.
pub struct Instance<A: HalApi> {
    /// `None` if the backend is disabled or failed to initialize.
    raw: Option<A::Instance>,
    flags: wgt::InstanceFlags,
}

impl<A: HalApi> fmt::Debug for Instance<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("backend", &A::VARIANT)
            .field("enabled", &self.raw.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

impl<A: HalApi> Instance<A> {
    pub fn new(desc: &wgt::InstanceDescriptor) -> Self {
        let raw = if desc.backends.contains(A::VARIANT.into()) {
            let hal_desc = hal::InstanceDescriptor {
                name: "webgpu",
                flags: desc.flags,
            };
            match unsafe { A::Instance::init(&hal_desc) } {
                Ok(raw) => {
                    log::debug!("Instance::new: created {:?} backend", A::VARIANT);
                    Some(raw)
                }
                Err(error) => {
                    log::debug!("Instance::new: failed to create {:?} backend: {error}", A::VARIANT);
                    None
                }
            }
        } else {
            log::trace!("Instance::new: backend {:?} not requested", A::VARIANT);
            None
        };
        Self {
            raw,
            flags: desc.flags,
        }
    }

    /// Wrap an already initialized backend instance.
    pub fn from_hal(raw: A::Instance, flags: wgt::InstanceFlags) -> Self {
        Self {
            raw: Some(raw),
            flags,
        }
    }

    pub fn flags(&self) -> wgt::InstanceFlags {
        self.flags
    }

    pub fn enumerate_adapters(&self) -> Vec<Arc<Adapter<A>>> {
        profiling::scope!("Instance::enumerate_adapters");
        api_log!("Instance::enumerate_adapters");

        let raw = match self.raw {
            Some(ref raw) => raw,
            None => return Vec::new(),
        };
        unsafe { raw.enumerate_adapters() }
            .into_iter()
            .map(|exposed| Arc::new(Adapter::new(exposed, self.flags)))
            .collect()
    }

    /// Pick an adapter matching `options`.
    ///
    /// Resolves to `None` when no adapter fits; that is not an error.
    pub fn request_adapter(
        &self,
        options: &wgt::RequestAdapterOptions,
    ) -> Ready<Option<Arc<Adapter<A>>>> {
        profiling::scope!("Instance::request_adapter");
        api_log!("Instance::request_adapter {options:?}");

        let mut adapters = self.enumerate_adapters();
        if options.force_fallback_adapter {
            adapters.retain(|adapter| adapter.is_fallback_adapter());
        }
        let selected = pick_adapter(
            adapters.iter().map(|adapter| adapter.raw.info.device_type),
            options.power_preference,
        );
        let adapter = match selected {
            Some(index) => {
                let adapter = adapters.swap_remove(index);
                log::info!("Adapter {:?} {:?}", A::VARIANT, adapter.raw.info);
                Some(adapter)
            }
            None => {
                log::info!("No adapter matches {options:?}");
                None
            }
        };
        std::future::ready(adapter)
    }
}

/// Index of the preferred adapter among `device_types`.
fn pick_adapter(
    device_types: impl Iterator<Item = wgt::DeviceType>,
    power_preference: PowerPreference,
) -> Option<usize> {
    let (mut integrated, mut discrete, mut virt, mut cpu, mut other) =
        (None, None, None, None, None);
    let mut first = None;

    for (i, ty) in device_types.enumerate() {
        first = first.or(Some(i));
        match ty {
            wgt::DeviceType::IntegratedGpu => integrated = integrated.or(Some(i)),
            wgt::DeviceType::DiscreteGpu => discrete = discrete.or(Some(i)),
            wgt::DeviceType::VirtualGpu => virt = virt.or(Some(i)),
            wgt::DeviceType::Cpu => cpu = cpu.or(Some(i)),
            wgt::DeviceType::Other => other = other.or(Some(i)),
        }
    }

    match power_preference {
        PowerPreference::LowPower => integrated.or(other).or(discrete).or(virt).or(cpu),
        PowerPreference::HighPerformance => discrete.or(other).or(integrated).or(virt).or(cpu),
        PowerPreference::None => first,
    }
}

/// A physical adapter, with the capabilities it exposes.
pub struct Adapter<A: HalApi> {
    pub(crate) raw: hal::ExposedAdapter<A>,
    pub(crate) capabilities: CapabilityRegistry,
    instance_flags: wgt::InstanceFlags,
}

impl<A: HalApi> fmt::Debug for Adapter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("info", &self.raw.info)
            .finish()
    }
}

impl<A: HalApi> Drop for Adapter<A> {
    fn drop(&mut self) {
        resource_log!("Drop Adapter {:?}", self.raw.info.name);
    }
}

impl<A: HalApi> Adapter<A> {
    fn new(raw: hal::ExposedAdapter<A>, instance_flags: wgt::InstanceFlags) -> Self {
        let capabilities = CapabilityRegistry::from_hal(&raw);
        Self {
            raw,
            capabilities,
            instance_flags,
        }
    }

    pub fn get_info(&self) -> wgt::AdapterInfo {
        self.raw.info.clone()
    }

    /// Whether this is a software implementation.
    pub fn is_fallback_adapter(&self) -> bool {
        self.raw.info.device_type == wgt::DeviceType::Cpu
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

    pub fn get_texture_format_features(
        &self,
        format: wgt::TextureFormat,
    ) -> wgt::TextureFormatFeatures {
        self.capabilities.format_features(format)
    }

    /// Open a device with the features and limits of `desc`.
    ///
    /// Fails if the adapter cannot provide them; limits are never lowered
    /// silently.
    pub fn request_device(
        self: &Arc<Self>,
        desc: &DeviceDescriptor,
    ) -> Ready<Result<(Arc<Device<A>>, Arc<Queue<A>>), RequestDeviceError>> {
        profiling::scope!("Adapter::request_device");
        api_log!("Adapter::request_device {:?}", desc.label);

        let result = self.create_device_and_queue(desc);
        match result {
            Ok((ref device, _)) => log::info!("Created {:?}", device),
            Err(ref error) => log::warn!("Failed to request a device: {error}"),
        }
        std::future::ready(result)
    }

    fn create_device_and_queue(
        self: &Arc<Self>,
        desc: &DeviceDescriptor,
    ) -> Result<(Arc<Device<A>>, Arc<Queue<A>>), RequestDeviceError> {
        self.capabilities.check_request(desc)?;

        let open = unsafe {
            self.raw
                .adapter
                .open(desc.required_features, &desc.required_limits)
        }
        .map_err(DeviceError::from_hal)?;
        log::trace!(
            "Opened device {:?} on {:?}",
            desc.label.borrow_or_default(),
            self.raw.info.name
        );

        let device = Arc::new(Device::new(open, self, desc, self.instance_flags)?);
        let queue = Arc::new(Queue::new(&device));
        Ok((device, queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgt::DeviceType::*;

    #[test]
    fn power_preference_order() {
        let types = [Cpu, IntegratedGpu, DiscreteGpu];
        assert_eq!(
            pick_adapter(types.into_iter(), PowerPreference::HighPerformance),
            Some(2)
        );
        assert_eq!(
            pick_adapter(types.into_iter(), PowerPreference::LowPower),
            Some(1)
        );
        assert_eq!(pick_adapter(types.into_iter(), PowerPreference::None), Some(0));
        assert_eq!(
            pick_adapter([Cpu, VirtualGpu].into_iter(), PowerPreference::HighPerformance),
            Some(1)
        );
        assert_eq!(
            pick_adapter(std::iter::empty(), PowerPreference::LowPower),
            None
        );
    }
}
