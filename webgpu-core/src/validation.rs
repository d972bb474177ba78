//! Matching shader interfaces against pipeline layouts.

use crate::binding_model::PipelineLayout;
use crate::hal_api::HalApi;

use thiserror::Error;

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BindingError {
    #[error("Binding is missing from the pipeline layout")]
    Missing,
    #[error("Visibility flags don't include the shader stage")]
    Invisible,
    #[error("Type on the shader side ({shader}) does not match the pipeline binding {binding:?}")]
    WrongType {
        shader: &'static str,
        binding: wgt::BindingType,
    },
    #[error("Shader writes to the binding, but the layout declares it read-only")]
    WrongUsage,
    #[error("View dimension {dim:?} (is array: {is_array}) doesn't match the binding")]
    WrongTextureViewDimension {
        dim: naga::ImageDimension,
        is_array: bool,
    },
    #[error("Multisampled flag doesn't match the shader")]
    WrongTextureMultisampled,
}

/// Errors produced when validating a programmable stage of a pipeline.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum StageError {
    #[error("Shader module is invalid")]
    InvalidModule,
    #[error("Unable to find entry point '{0}' for this stage")]
    MissingEntryPoint(String),
    #[error("Shader module has no entry point for the {0:?} stage")]
    NoEntryPointFound(naga::ShaderStage),
    #[error("Shader module has multiple entry points for the {0:?} stage, one must be named")]
    MultipleEntryPointsFound(naga::ShaderStage),
    #[error("Shader global at group {group}, binding {binding} does not match the pipeline layout")]
    Binding {
        group: u32,
        binding: u32,
        #[source]
        error: BindingError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ResourceKind {
    Buffer {
        space: naga::AddressSpace,
    },
    Texture {
        dim: naga::ImageDimension,
        arrayed: bool,
        class: naga::ImageClass,
    },
    Sampler,
    Other,
}

#[derive(Clone, Debug)]
struct Resource {
    group: u32,
    binding: u32,
    kind: ResourceKind,
}

#[derive(Clone, Debug)]
pub(crate) struct EntryPoint {
    pub(crate) name: String,
    pub(crate) stage: naga::ShaderStage,
    pub(crate) workgroup_size: [u32; 3],
    resources: Vec<Resource>,
}

/// Entry points of a shader module and the resources each of them uses.
#[derive(Clone, Debug, Default)]
pub(crate) struct Interface {
    entry_points: Vec<EntryPoint>,
}

impl Interface {
    pub(crate) fn new(module: &naga::Module, info: &naga::valid::ModuleInfo) -> Self {
        let globals = module
            .global_variables
            .iter()
            .filter_map(|(handle, var)| {
                let bind = var.binding.as_ref()?;
                let kind = match module.types[var.ty].inner {
                    naga::TypeInner::Image {
                        dim,
                        arrayed,
                        class,
                    } => ResourceKind::Texture {
                        dim,
                        arrayed,
                        class,
                    },
                    naga::TypeInner::Sampler { .. } => ResourceKind::Sampler,
                    _ => match var.space {
                        naga::AddressSpace::Uniform | naga::AddressSpace::Storage { .. } => {
                            ResourceKind::Buffer { space: var.space }
                        }
                        _ => ResourceKind::Other,
                    },
                };
                Some((
                    handle,
                    Resource {
                        group: bind.group,
                        binding: bind.binding,
                        kind,
                    },
                ))
            })
            .collect::<Vec<_>>();

        let entry_points = module
            .entry_points
            .iter()
            .enumerate()
            .map(|(index, ep)| {
                let ep_info = info.get_entry_point(index);
                EntryPoint {
                    name: ep.name.clone(),
                    stage: ep.stage,
                    workgroup_size: ep.workgroup_size,
                    resources: globals
                        .iter()
                        .filter(|&&(handle, _)| !ep_info[handle].is_empty())
                        .map(|(_, resource)| resource.clone())
                        .collect(),
                }
            })
            .collect();

        Self { entry_points }
    }

    pub(crate) fn entry_points(&self) -> impl Iterator<Item = (&str, naga::ShaderStage)> {
        self.entry_points
            .iter()
            .map(|ep| (ep.name.as_str(), ep.stage))
    }

    /// Find the entry point a pipeline stage refers to.
    ///
    /// Without a name, the module must have exactly one entry point for `stage`.
    pub(crate) fn resolve_entry_point(
        &self,
        stage: naga::ShaderStage,
        name: Option<&str>,
    ) -> Result<&EntryPoint, StageError> {
        match name {
            Some(name) => self
                .entry_points
                .iter()
                .find(|ep| ep.stage == stage && ep.name == name)
                .ok_or_else(|| StageError::MissingEntryPoint(name.to_string())),
            None => {
                let mut candidates = self.entry_points.iter().filter(|ep| ep.stage == stage);
                match (candidates.next(), candidates.next()) {
                    (Some(ep), None) => Ok(ep),
                    (None, _) => Err(StageError::NoEntryPointFound(stage)),
                    (Some(_), Some(_)) => Err(StageError::MultipleEntryPointsFound(stage)),
                }
            }
        }
    }

    /// Check every resource the entry point uses against `layout`.
    pub(crate) fn check_stage<A: HalApi>(
        &self,
        layout: &PipelineLayout<A>,
        stage: naga::ShaderStage,
        name: Option<&str>,
    ) -> Result<&EntryPoint, StageError> {
        let entry_point = self.resolve_entry_point(stage, name)?;
        let stage_bit = shader_stage_bit(stage);

        for resource in entry_point.resources.iter() {
            let result = match layout.entry(resource.group, resource.binding) {
                Some(entry) if !entry.visibility.contains(stage_bit) => {
                    Err(BindingError::Invisible)
                }
                Some(entry) => resource.check_binding(&entry.ty),
                None => Err(BindingError::Missing),
            };
            result.map_err(|error| StageError::Binding {
                group: resource.group,
                binding: resource.binding,
                error,
            })?;
        }
        Ok(entry_point)
    }
}

pub(crate) fn shader_stage_bit(stage: naga::ShaderStage) -> wgt::ShaderStages {
    match stage {
        naga::ShaderStage::Vertex => wgt::ShaderStages::VERTEX,
        naga::ShaderStage::Fragment => wgt::ShaderStages::FRAGMENT,
        naga::ShaderStage::Compute => wgt::ShaderStages::COMPUTE,
    }
}

impl Resource {
    fn check_binding(&self, ty: &wgt::BindingType) -> Result<(), BindingError> {
        let wrong_type = |shader| BindingError::WrongType {
            shader,
            binding: *ty,
        };
        match (self.kind, *ty) {
            (
                ResourceKind::Buffer {
                    space: naga::AddressSpace::Uniform,
                },
                wgt::BindingType::Buffer {
                    ty: wgt::BufferBindingType::Uniform,
                    ..
                },
            ) => Ok(()),
            (
                ResourceKind::Buffer {
                    space: naga::AddressSpace::Storage { access },
                },
                wgt::BindingType::Buffer {
                    ty: wgt::BufferBindingType::Storage { read_only },
                    ..
                },
            ) => {
                if read_only && access.contains(naga::StorageAccess::STORE) {
                    Err(BindingError::WrongUsage)
                } else {
                    Ok(())
                }
            }
            (ResourceKind::Buffer { .. }, _) => Err(wrong_type("buffer")),
            (
                ResourceKind::Texture {
                    dim,
                    arrayed,
                    class,
                },
                wgt::BindingType::Texture {
                    view_dimension,
                    multisampled,
                    sample_type,
                },
            ) => {
                let multi = match class {
                    naga::ImageClass::Sampled { multi, .. } => multi,
                    naga::ImageClass::Depth { multi } => {
                        if sample_type != wgt::TextureSampleType::Depth {
                            return Err(wrong_type("depth texture"));
                        }
                        multi
                    }
                    naga::ImageClass::Storage { .. } => return Err(wrong_type("storage texture")),
                };
                if multi != multisampled {
                    return Err(BindingError::WrongTextureMultisampled);
                }
                check_view_dimension(dim, arrayed, view_dimension)
            }
            (
                ResourceKind::Texture {
                    dim,
                    arrayed,
                    class: naga::ImageClass::Storage { access, .. },
                },
                wgt::BindingType::StorageTexture {
                    access: binding_access,
                    view_dimension,
                    ..
                },
            ) => {
                if binding_access == wgt::StorageTextureAccess::ReadOnly
                    && access.contains(naga::StorageAccess::STORE)
                {
                    return Err(BindingError::WrongUsage);
                }
                check_view_dimension(dim, arrayed, view_dimension)
            }
            (ResourceKind::Texture { .. }, _) => Err(wrong_type("texture")),
            (ResourceKind::Sampler, _) => Err(wrong_type("sampler")),
            (ResourceKind::Other, _) => Err(wrong_type("unknown")),
        }
    }
}

fn check_view_dimension(
    dim: naga::ImageDimension,
    arrayed: bool,
    view_dimension: wgt::TextureViewDimension,
) -> Result<(), BindingError> {
    use naga::ImageDimension as Id;
    use wgt::TextureViewDimension as Tvd;
    let matches = match (dim, arrayed) {
        (Id::D1, false) => view_dimension == Tvd::D1,
        (Id::D2, false) => view_dimension == Tvd::D2,
        (Id::D2, true) => view_dimension == Tvd::D2Array,
        (Id::D3, false) => view_dimension == Tvd::D3,
        (Id::Cube, false) => view_dimension == Tvd::Cube,
        (Id::Cube, true) => view_dimension == Tvd::CubeArray,
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(BindingError::WrongTextureViewDimension {
            dim,
            is_array: arrayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(source: &str) -> Interface {
        let module = naga::front::wgsl::parse_str(source).unwrap();
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        )
        .validate(&module)
        .unwrap();
        Interface::new(&module, &info)
    }

    const SHADER: &str = "
        @group(0) @binding(0) var<storage, read_write> data: array<u32>;
        @group(0) @binding(1) var<uniform> scale: u32;

        @compute @workgroup_size(8, 1, 1)
        fn double(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = data[id.x] * 2u;
        }

        @compute @workgroup_size(1)
        fn scaled(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = data[id.x] * scale;
        }
    ";

    #[test]
    fn entry_points_are_resolved_by_name_and_stage() {
        let interface = interface(SHADER);
        let ep = interface
            .resolve_entry_point(naga::ShaderStage::Compute, Some("double"))
            .unwrap();
        assert_eq!(ep.workgroup_size, [8, 1, 1]);
        assert!(matches!(
            interface.resolve_entry_point(naga::ShaderStage::Vertex, Some("double")),
            Err(StageError::MissingEntryPoint(_))
        ));
        assert!(matches!(
            interface.resolve_entry_point(naga::ShaderStage::Compute, None),
            Err(StageError::MultipleEntryPointsFound(_))
        ));
        assert!(matches!(
            interface.resolve_entry_point(naga::ShaderStage::Fragment, None),
            Err(StageError::NoEntryPointFound(_))
        ));
    }

    #[test]
    fn only_used_globals_are_recorded() {
        let interface = interface(SHADER);
        let double = interface
            .resolve_entry_point(naga::ShaderStage::Compute, Some("double"))
            .unwrap();
        let scaled = interface
            .resolve_entry_point(naga::ShaderStage::Compute, Some("scaled"))
            .unwrap();
        assert_eq!(double.resources.len(), 1);
        assert_eq!(scaled.resources.len(), 2);
    }

    #[test]
    fn writable_storage_needs_writable_binding() {
        let interface = interface(SHADER);
        let ep = interface
            .resolve_entry_point(naga::ShaderStage::Compute, Some("double"))
            .unwrap();
        let read_only = wgt::BindingType::Buffer {
            ty: wgt::BufferBindingType::Storage { read_only: true },
            min_binding_size: None,
        };
        assert!(matches!(
            ep.resources[0].check_binding(&read_only),
            Err(BindingError::WrongUsage)
        ));
        let uniform = wgt::BindingType::Buffer {
            ty: wgt::BufferBindingType::Uniform,
            min_binding_size: None,
        };
        assert!(matches!(
            ep.resources[0].check_binding(&uniform),
            Err(BindingError::WrongType { .. })
        ));
    }
}
