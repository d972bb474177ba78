use std::sync::Arc;

use thiserror::Error;

use crate::{
    binding_model::{BindGroup, PipelineLayout},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource::{Labeled, ResourceErrorIdent},
    MAX_BIND_GROUPS,
};

type BindGroupMask = u8;

#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BinderError {
    #[error("The current set {pipeline} expects a bind group at index {index}, but none is set")]
    MissingBindGroup {
        index: u32,
        pipeline: ResourceErrorIdent,
    },
    #[error("{group} set at index {index} is not compatible with the layout the current set {pipeline} expects")]
    IncompatibleBindGroup {
        index: u32,
        group: ResourceErrorIdent,
        pipeline: ResourceErrorIdent,
    },
}

impl WebGpuError for BinderError {
    fn webgpu_error_type(&self) -> ErrorType {
        ErrorType::Validation
    }
}

/// Indices set in `mask`, below `count`.
fn mask_indices(mask: BindGroupMask, count: usize) -> impl Iterator<Item = usize> {
    (0..count.min(MAX_BIND_GROUPS)).filter(move |&index| mask & (1 << index) != 0)
}

/// Tracks the bind groups of a pass against the layout of its pipeline.
///
/// Groups are only sent to the backend right before a draw or dispatch,
/// and only those that changed since the last one.
#[derive(Debug)]
pub(super) struct Binder<A: HalApi> {
    layout: Option<Arc<PipelineLayout<A>>>,
    groups: [Option<Arc<BindGroup<A>>>; MAX_BIND_GROUPS],
    /// Groups assigned since they were last sent.
    dirty: BindGroupMask,
}

impl<A: HalApi> Binder<A> {
    pub(super) fn new() -> Self {
        Self {
            layout: None,
            groups: std::array::from_fn(|_| None),
            dirty: 0,
        }
    }

    pub(super) fn assign_group(&mut self, index: usize, group: &Arc<BindGroup<A>>) {
        log::trace!("\tBinding [{}] = {}", index, group.error_ident());
        self.groups[index] = Some(Arc::clone(group));
        self.dirty |= 1 << index;
    }

    /// Switch to the layout of a newly set pipeline.
    ///
    /// Changing the layout requires every group to be sent again.
    pub(super) fn change_pipeline_layout(&mut self, layout: &Arc<PipelineLayout<A>>) {
        let unchanged = self
            .layout
            .as_ref()
            .map_or(false, |old| Arc::ptr_eq(old, layout));
        if !unchanged {
            self.layout = Some(Arc::clone(layout));
            self.dirty = self
                .groups
                .iter()
                .enumerate()
                .filter(|&(_, group)| group.is_some())
                .fold(0, |mask, (index, _)| mask | 1 << index);
        }
    }

    /// Check every group the current layout expects against what is set.
    pub(super) fn check_compatibility<T: Labeled>(&self, pipeline: &T) -> Result<(), BinderError> {
        let layout = match self.layout {
            Some(ref layout) => layout,
            None => return Ok(()),
        };
        for (index, expected) in layout.bind_group_layouts.iter().enumerate() {
            match self.groups[index] {
                None => {
                    return Err(BinderError::MissingBindGroup {
                        index: index as u32,
                        pipeline: pipeline.error_ident(),
                    })
                }
                Some(ref group) if !group.layout.is_compatible(expected) => {
                    return Err(BinderError::IncompatibleBindGroup {
                        index: index as u32,
                        group: group.error_ident(),
                        pipeline: pipeline.error_ident(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// The groups to send before the next draw or dispatch, with the layout
    /// to send them against.
    pub(super) fn take_rebinds(
        &mut self,
    ) -> Option<(Arc<PipelineLayout<A>>, Vec<(u32, Arc<BindGroup<A>>)>)> {
        let layout = self.layout.as_ref()?;
        let rebinds = mask_indices(self.dirty, layout.bind_group_layouts.len())
            .filter_map(|index| {
                self.groups[index]
                    .as_ref()
                    .map(|group| (index as u32, Arc::clone(group)))
            })
            .collect::<Vec<_>>();
        self.dirty = 0;
        Some((Arc::clone(layout), rebinds))
    }
}

#[test]
fn test_mask_indices() {
    assert_eq!(mask_indices(0b1011, 4).collect::<Vec<_>>(), vec![0, 1, 3]);
    assert_eq!(mask_indices(0b1011, 2).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(mask_indices(0, 8).count(), 0);
    assert_eq!(mask_indices(0xff, 100).count(), MAX_BIND_GROUPS);
}
