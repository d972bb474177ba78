use std::{
    fmt, mem,
    sync::{Arc, Weak},
};

use crate::{
    binding_model::{BindGroup, BindGroupLayout, PipelineLayout},
    command::CommandBuffer,
    hal_api::HalApi,
    pipeline::{ComputePipeline, RenderPipeline, ShaderModule},
    resource::{Buffer, Texture, TextureView},
};

pub type Index = u32;
pub type Epoch = u32;

/// Handle of one entry in a [`Storage`] table.
///
/// The epoch changes every time an index is reused, so a stale id never
/// matches a newer resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceId {
    index: Index,
    epoch: Epoch,
}

impl ResourceId {
    pub fn index(self) -> Index {
        self.index
    }

    pub fn epoch(self) -> Epoch {
        self.epoch
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.epoch)
    }
}

/// An entry in a `Storage::map` table.
#[derive(Debug)]
pub(crate) enum Element<T> {
    /// There are no live ids with this index.
    Vacant,

    /// There is one live id with this index.
    Occupied(Weak<T>),

    /// Like `Occupied`, but the resource has been marked as destroyed
    /// and hasn't been dropped yet.
    Destroyed,

    /// Like `Occupied`, but an error occurred when creating the
    /// resource.
    ///
    /// The given `String` is the resource's descriptor label.
    Error(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageReport {
    pub num_occupied: usize,
    pub num_vacant: usize,
    pub num_error: usize,
    pub num_destroyed: usize,
    pub element_size: usize,
}

impl StorageReport {
    pub fn is_empty(&self) -> bool {
        self.num_occupied + self.num_error + self.num_destroyed == 0
    }
}

/// A table of one resource type, indexed by [`ResourceId`].
///
/// The table only observes its resources: users own them through `Arc`s
/// and every resource removes its own entry when dropped.
pub(crate) struct Storage<T> {
    map: Vec<Element<T>>,
    epochs: Vec<Epoch>,
    free: Vec<Index>,
    kind: &'static str,
}

impl<T> fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("len", &self.map.len())
            .finish()
    }
}

impl<T> Storage<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            map: Vec::new(),
            epochs: Vec::new(),
            free: Vec::new(),
            kind,
        }
    }

    fn alloc(&mut self) -> ResourceId {
        match self.free.pop() {
            Some(index) => {
                let epoch = &mut self.epochs[index as usize];
                *epoch += 1;
                ResourceId {
                    index,
                    epoch: *epoch,
                }
            }
            None => {
                let index = self.map.len() as Index;
                self.map.push(Element::Vacant);
                self.epochs.push(1);
                ResourceId { index, epoch: 1 }
            }
        }
    }

    fn slot(&mut self, id: ResourceId) -> Option<&mut Element<T>> {
        if self.epochs.get(id.index as usize) != Some(&id.epoch) {
            return None;
        }
        self.map.get_mut(id.index as usize)
    }

    /// Reserve an entry for a resource being created.
    ///
    /// The entry starts out as an error, and becomes occupied once the
    /// resource passes validation, see [`Storage::assign`].
    pub(crate) fn insert_error(&mut self, label: &str) -> ResourceId {
        let id = self.alloc();
        self.map[id.index as usize] = Element::Error(label.to_string());
        id
    }

    pub(crate) fn assign(&mut self, id: ResourceId, value: &Arc<T>) {
        if let Some(slot) = self.slot(id) {
            *slot = Element::Occupied(Arc::downgrade(value));
        }
    }

    pub(crate) fn mark_destroyed(&mut self, id: ResourceId) {
        if let Some(slot) = self.slot(id) {
            if let Element::Occupied(_) = *slot {
                *slot = Element::Destroyed;
            }
        }
    }

    pub(crate) fn remove(&mut self, id: ResourceId) {
        let kind = self.kind;
        if let Some(slot) = self.slot(id) {
            match mem::replace(slot, Element::Vacant) {
                Element::Vacant => {
                    log::warn!("Removing an already vacant {kind}");
                    return;
                }
                Element::Error(label) => log::trace!("Removing invalid {kind} {label:?}"),
                Element::Occupied(_) | Element::Destroyed => {}
            }
            self.free.push(id.index);
        }
    }

    /// Every resource that is still alive and not destroyed.
    pub(crate) fn live(&self) -> Vec<Arc<T>> {
        self.map
            .iter()
            .filter_map(|element| match *element {
                Element::Occupied(ref weak) => weak.upgrade(),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn generate_report(&self) -> StorageReport {
        let mut report = StorageReport {
            element_size: mem::size_of::<T>(),
            ..Default::default()
        };
        for element in self.map.iter() {
            match *element {
                Element::Occupied(..) => report.num_occupied += 1,
                Element::Destroyed => report.num_destroyed += 1,
                Element::Vacant => report.num_vacant += 1,
                Element::Error(..) => report.num_error += 1,
            }
        }
        report
    }
}

/// Every resource of one device, one table per type.
#[derive(Debug)]
pub(crate) struct ResourceStore<A: HalApi> {
    pub(crate) buffers: Storage<Buffer<A>>,
    pub(crate) textures: Storage<Texture<A>>,
    pub(crate) texture_views: Storage<TextureView<A>>,
    pub(crate) shader_modules: Storage<ShaderModule<A>>,
    pub(crate) bind_group_layouts: Storage<BindGroupLayout<A>>,
    pub(crate) bind_groups: Storage<BindGroup<A>>,
    pub(crate) pipeline_layouts: Storage<PipelineLayout<A>>,
    pub(crate) render_pipelines: Storage<RenderPipeline<A>>,
    pub(crate) compute_pipelines: Storage<ComputePipeline<A>>,
    pub(crate) command_buffers: Storage<CommandBuffer<A>>,
}

impl<A: HalApi> ResourceStore<A> {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Storage::new("Buffer"),
            textures: Storage::new("Texture"),
            texture_views: Storage::new("TextureView"),
            shader_modules: Storage::new("ShaderModule"),
            bind_group_layouts: Storage::new("BindGroupLayout"),
            bind_groups: Storage::new("BindGroup"),
            pipeline_layouts: Storage::new("PipelineLayout"),
            render_pipelines: Storage::new("RenderPipeline"),
            compute_pipelines: Storage::new("ComputePipeline"),
            command_buffers: Storage::new("CommandBuffer"),
        }
    }

    pub(crate) fn generate_report(&self) -> StoreReport {
        StoreReport {
            buffers: self.buffers.generate_report(),
            textures: self.textures.generate_report(),
            texture_views: self.texture_views.generate_report(),
            shader_modules: self.shader_modules.generate_report(),
            bind_group_layouts: self.bind_group_layouts.generate_report(),
            bind_groups: self.bind_groups.generate_report(),
            pipeline_layouts: self.pipeline_layouts.generate_report(),
            render_pipelines: self.render_pipelines.generate_report(),
            compute_pipelines: self.compute_pipelines.generate_report(),
            command_buffers: self.command_buffers.generate_report(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreReport {
    pub buffers: StorageReport,
    pub textures: StorageReport,
    pub texture_views: StorageReport,
    pub shader_modules: StorageReport,
    pub bind_group_layouts: StorageReport,
    pub bind_groups: StorageReport,
    pub pipeline_layouts: StorageReport,
    pub render_pipelines: StorageReport,
    pub compute_pipelines: StorageReport,
    pub command_buffers: StorageReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_cycle_through_states() {
        let mut storage = Storage::<u32>::new("Number");
        let value = Arc::new(5);

        let id = storage.insert_error("five");
        assert_eq!(storage.generate_report().num_error, 1);

        assert!(storage.live().is_empty());

        storage.assign(id, &value);
        let report = storage.generate_report();
        assert_eq!((report.num_error, report.num_occupied), (0, 1));
        assert_eq!(storage.live(), vec![Arc::clone(&value)]);

        storage.mark_destroyed(id);
        assert!(storage.live().is_empty());
        let report = storage.generate_report();
        assert_eq!((report.num_occupied, report.num_destroyed), (0, 1));

        storage.remove(id);
        let report = storage.generate_report();
        assert_eq!(report.num_vacant, 1);
        assert!(report.is_empty());
    }

    #[test]
    fn reused_index_gets_new_epoch() {
        let mut storage = Storage::<u32>::new("Number");
        let first = storage.insert_error("");
        storage.remove(first);
        let second = storage.insert_error("");
        assert_eq!(first.index(), second.index());
        assert_ne!(first.epoch(), second.epoch());

        // Operations through the stale id leave the new entry alone.
        storage.remove(first);
        assert_eq!(storage.generate_report().num_error, 1);
        assert_eq!(format!("{second}"), "0v2");
    }
}
