//! Resource view cache - CPU-side record of what is bound where
//!
//! Every stage keeps one slot array per resource kind plus a dirty bitmask.
//! Binding a view only touches the cache; the descriptors reach GPU-visible
//! memory when a table covering the slot is rebuilt.

use crate::binding::{ResourceKind, ShaderVisibility};
use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::{Error, Result};

/// Mask of `length` slots starting at `start`, clipped to 64 slots
fn range_mask(start: u32, length: u32) -> u64 {
    if length == 0 || start >= 64 {
        return 0;
    }
    let end = (start + length).min(64);
    let upper = if end == 64 { u64::MAX } else { (1u64 << end) - 1 };
    let lower = (1u64 << start) - 1;
    upper & !lower
}

fn descriptor_kind(kind: ResourceKind) -> DescriptorKind {
    match kind {
        ResourceKind::ConstantBuffer => DescriptorKind::ConstantBuffer,
        ResourceKind::ShaderResource => DescriptorKind::ShaderResource,
        ResourceKind::UnorderedAccess => DescriptorKind::UnorderedAccess,
        ResourceKind::Sampler => DescriptorKind::Sampler,
    }
}

#[derive(Debug, Clone)]
struct SlotArray {
    views: Vec<Option<Descriptor>>,
    dirty: u64,
}

impl SlotArray {
    fn new(kind: ResourceKind) -> Self {
        Self {
            views: vec![None; kind.max_per_stage() as usize],
            dirty: 0,
        }
    }

    fn bound_mask(&self) -> u64 {
        self.views
            .iter()
            .enumerate()
            .filter(|(_, view)| view.is_some())
            .fold(0, |mask, (slot, _)| mask | (1u64 << slot))
    }
}

/// Per-stage, per-slot dirty-tracked bound views
#[derive(Debug, Clone)]
pub struct ResourceViewCache {
    stages: Vec<[SlotArray; ResourceKind::COUNT]>,
}

impl Default for ResourceViewCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceViewCache {
    pub fn new() -> Self {
        Self {
            stages: (0..ShaderVisibility::COUNT)
                .map(|_| ResourceKind::ALL.map(SlotArray::new))
                .collect(),
        }
    }

    fn array(&self, stage: ShaderVisibility, kind: ResourceKind) -> &SlotArray {
        &self.stages[stage.index()][kind.index()]
    }

    fn array_mut(&mut self, stage: ShaderVisibility, kind: ResourceKind) -> &mut SlotArray {
        &mut self.stages[stage.index()][kind.index()]
    }

    fn check_slot(stage: ShaderVisibility, kind: ResourceKind, slot: u32) -> Result<()> {
        if slot >= kind.max_per_stage() {
            return Err(Error::InvalidResource(format!(
                "{:?} slot {} of stage {:?} is out of range (max {})",
                kind,
                slot,
                stage,
                kind.max_per_stage()
            )));
        }
        Ok(())
    }

    /// Bind `view` to a slot and mark the slot dirty
    ///
    /// # Errors
    ///
    /// - The slot is beyond the per-stage maximum of its kind
    /// - The descriptor does not describe a view of `kind`
    pub fn bind(
        &mut self,
        stage: ShaderVisibility,
        kind: ResourceKind,
        slot: u32,
        view: Descriptor,
    ) -> Result<()> {
        Self::check_slot(stage, kind, slot)?;
        if view.kind() != descriptor_kind(kind) {
            return Err(Error::InvalidResource(format!(
                "{:?} descriptor bound to a {:?} slot",
                view.kind(),
                kind
            )));
        }

        let array = self.array_mut(stage, kind);
        array.views[slot as usize] = Some(view);
        array.dirty |= 1u64 << slot;
        Ok(())
    }

    /// Clear a slot; the table covering it will carry a null descriptor
    pub fn unbind(&mut self, stage: ShaderVisibility, kind: ResourceKind, slot: u32) -> Result<()> {
        Self::check_slot(stage, kind, slot)?;
        let array = self.array_mut(stage, kind);
        if array.views[slot as usize].take().is_some() {
            array.dirty |= 1u64 << slot;
        }
        Ok(())
    }

    pub fn view(&self, stage: ShaderVisibility, kind: ResourceKind, slot: u32) -> Option<&Descriptor> {
        self.array(stage, kind)
            .views
            .get(slot as usize)
            .and_then(|view| view.as_ref())
    }

    pub fn is_dirty(&self, stage: ShaderVisibility, kind: ResourceKind, slot: u32) -> bool {
        slot < 64 && self.array(stage, kind).dirty & (1u64 << slot) != 0
    }

    pub fn dirty_mask(&self, stage: ShaderVisibility, kind: ResourceKind) -> u64 {
        self.array(stage, kind).dirty
    }

    /// Whether any slot in `start..start + length` changed since it was last copied
    pub fn is_range_dirty(&self, stage: ShaderVisibility, kind: ResourceKind, start: u32, length: u32) -> bool {
        self.array(stage, kind).dirty & range_mask(start, length) != 0
    }

    /// Mark every slot of every stage dirty (new layout or new command buffer)
    pub fn mark_all_dirty(&mut self) {
        for stage in &mut self.stages {
            for array in stage.iter_mut() {
                array.dirty = u64::MAX;
            }
        }
    }

    /// Mark every slot of the given kinds dirty in all stages
    pub fn mark_kinds_dirty(&mut self, kinds: &[ResourceKind]) {
        for stage in &mut self.stages {
            for kind in kinds {
                stage[kind.index()].dirty = u64::MAX;
            }
        }
    }

    /// Mark one slot clean without copying it (directly bound slots)
    pub fn mark_clean(&mut self, stage: ShaderVisibility, kind: ResourceKind, slot: u32) {
        if slot < 64 {
            self.array_mut(stage, kind).dirty &= !(1u64 << slot);
        }
    }

    /// Descriptors of `start..start + length` for a table copy
    ///
    /// Unbound slots yield null descriptors. The copied range becomes clean;
    /// bound slots beyond it become dirty again, since the table that was
    /// just built does not cover them.
    pub fn clean_range(
        &mut self,
        stage: ShaderVisibility,
        kind: ResourceKind,
        start: u32,
        length: u32,
    ) -> Vec<Descriptor> {
        let array = self.array_mut(stage, kind);
        let descriptors = (start..start + length)
            .map(|slot| {
                array
                    .views
                    .get(slot as usize)
                    .copied()
                    .flatten()
                    .unwrap_or_else(Descriptor::null)
            })
            .collect();

        let covered = range_mask(start, length);
        let beyond = !range_mask(0, start + length);
        array.dirty &= !covered;
        array.dirty |= array.bound_mask() & beyond;
        descriptors
    }

    /// First slot below `count` with nothing bound
    pub fn first_unbound(&self, stage: ShaderVisibility, kind: ResourceKind, count: u32) -> Option<u32> {
        let views = &self.array(stage, kind).views;
        (0..count.min(views.len() as u32)).find(|slot| views[*slot as usize].is_none())
    }

    /// Drop every bound view
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "view_cache_tests.rs"]
mod tests;
