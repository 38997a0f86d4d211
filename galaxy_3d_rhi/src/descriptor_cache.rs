//! Descriptor cache - one per command context
//!
//! Owns the context's shader-visible heaps (a block of the device-wide view
//! heap when one is available, else a private ring, plus a private sampler
//! ring) and turns the dirty slots of the `ResourceViewCache` into descriptor
//! tables right before GPU work is recorded.

use std::fmt;
use std::sync::Arc;

use crate::binding::{BindingLayout, BindingSlot, ResourceKind, ShaderVisibility, SlotScope};
use crate::command_buffer::{CommandBuffer, GpuCommand};
use crate::config::{RhiConfig, RollOverPolicy};
use crate::descriptor::{Descriptor, DescriptorHeap, DescriptorHeapType, HeapId};
use crate::error::{Error, Result};
use crate::online_heap::{GlobalOnlineHeap, LocalOnlineHeap, OnlineHeap, RollOver, SubAllocatedOnlineHeap};
use crate::sync::SyncPointRef;
use crate::view_cache::ResourceViewCache;

/// Upper bound on make-room rounds; each round after the first starts fully dirty
const MAX_ROOM_ROUNDS: u32 = 4;

/// Table rebuild counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DescriptorCacheStats {
    pub tables_written: u64,
    pub descriptors_copied: u64,
    pub heap_binds: u64,
    pub direct_constant_buffers: u64,
    pub roll_overs: u64,
    pub fallbacks: u64,
}

/// Per-context descriptor heaps and table rebuild state
pub struct DescriptorCache {
    view_heap: Box<dyn OnlineHeap>,
    view_heap_is_global: bool,
    sampler_heap: LocalOnlineHeap,
    local_view_heap_size: u32,
    roll_over_policy: RollOverPolicy,
    views: ResourceViewCache,
    layout: Option<Arc<BindingLayout>>,
    layout_recorded: bool,
    bound_heaps: Option<(HeapId, HeapId)>,
    session: Option<SyncPointRef>,
    stats: DescriptorCacheStats,
}

impl DescriptorCache {
    /// Create the heaps of a new context
    ///
    /// Views come from `global` when it still has a free block, else from a
    /// private heap of `config.local_view_heap_size` slots.
    pub fn new(global: Option<Arc<GlobalOnlineHeap>>, config: &RhiConfig) -> Result<Self> {
        let sub_allocated = match global {
            Some(pool) => {
                let heap = SubAllocatedOnlineHeap::new(pool);
                if heap.is_none() {
                    crate::engine_warn!(
                        "galaxy3d::rhi::DescriptorCache",
                        "Global view heap has no free block, context uses a local heap"
                    );
                }
                heap
            }
            None => None,
        };

        let (view_heap, view_heap_is_global): (Box<dyn OnlineHeap>, bool) = match sub_allocated {
            Some(heap) => (Box::new(heap), true),
            None => (
                Box::new(LocalOnlineHeap::new(
                    DescriptorHeapType::View,
                    config.local_view_heap_size,
                    config.roll_over_policy,
                )?),
                false,
            ),
        };

        Ok(Self {
            view_heap,
            view_heap_is_global,
            sampler_heap: LocalOnlineHeap::new(
                DescriptorHeapType::Sampler,
                config.local_sampler_heap_size,
                config.roll_over_policy,
            )?,
            local_view_heap_size: config.local_view_heap_size,
            roll_over_policy: config.roll_over_policy,
            views: ResourceViewCache::new(),
            layout: None,
            layout_recorded: false,
            bound_heaps: None,
            session: None,
            stats: DescriptorCacheStats::default(),
        })
    }

    pub fn stats(&self) -> DescriptorCacheStats {
        self.stats
    }

    /// Whether views are sub-allocated from the device-wide heap
    pub fn uses_global_heap(&self) -> bool {
        self.view_heap_is_global
    }

    pub fn view_heap(&self) -> &Arc<DescriptorHeap> {
        self.view_heap.heap()
    }

    pub fn sampler_heap(&self) -> &Arc<DescriptorHeap> {
        self.sampler_heap.heap()
    }

    pub fn views(&self) -> &ResourceViewCache {
        &self.views
    }

    pub fn layout(&self) -> Option<&Arc<BindingLayout>> {
        self.layout.as_ref()
    }

    /// Heaps last exposed to the command buffer, `None` if the next table forces a rebind
    pub fn bound_heaps(&self) -> Option<(HeapId, HeapId)> {
        self.bound_heaps
    }

    // ===== SESSION =====

    /// Start a recording session retired by `session`
    ///
    /// A fresh command buffer has no heaps, layout or tables bound, so all
    /// of them are recorded again before the next GPU work.
    pub fn open(&mut self, session: SyncPointRef) {
        self.view_heap.open_for_recording(session.clone());
        self.sampler_heap.open_for_recording(session.clone());
        self.session = Some(session);
        self.bound_heaps = None;
        self.layout_recorded = false;
        self.views.mark_all_dirty();
    }

    /// End the session; heap regions written during it retire with its sync point
    pub fn close(&mut self) {
        self.view_heap.close_after_recording();
        self.sampler_heap.close_after_recording();
        self.session = None;
        self.bound_heaps = None;
        self.layout_recorded = false;
    }

    // ===== BINDING =====

    /// Make `layout` current, recording the switch if it changed
    ///
    /// Returns whether anything was recorded. Every bound slot becomes dirty
    /// on a switch since tables are laid out differently.
    pub fn set_layout(&mut self, buffer: &mut CommandBuffer, layout: &Arc<BindingLayout>) -> Result<bool> {
        let same = self
            .layout
            .as_ref()
            .map(|current| Arc::ptr_eq(current, layout))
            .unwrap_or(false);
        if same && self.layout_recorded {
            return Ok(false);
        }

        buffer.record(GpuCommand::SetBindingLayout(layout.id()))?;
        self.layout = Some(layout.clone());
        self.layout_recorded = true;
        self.views.mark_all_dirty();
        Ok(true)
    }

    pub fn bind(&mut self, stage: ShaderVisibility, kind: ResourceKind, slot: u32, view: Descriptor) -> Result<()> {
        self.views.bind(stage, kind, slot, view)
    }

    pub fn unbind(&mut self, stage: ShaderVisibility, kind: ResourceKind, slot: u32) -> Result<()> {
        self.views.unbind(stage, kind, slot)
    }

    fn current_layout(&self) -> Result<Arc<BindingLayout>> {
        self.layout.clone().ok_or_else(|| {
            crate::engine_report!(
                "galaxy3d::rhi::DescriptorCache",
                Error::InvalidState("no binding layout set before recording binding tables".to_string())
            )
        })
    }

    fn ensure_layout_recorded(&mut self, buffer: &mut CommandBuffer, layout: &Arc<BindingLayout>) -> Result<()> {
        if !self.layout_recorded {
            self.set_layout(buffer, layout)?;
        }
        Ok(())
    }

    // ===== HEAPS =====

    fn heap_mut(&mut self, heap_type: DescriptorHeapType) -> &mut dyn OnlineHeap {
        match heap_type {
            DescriptorHeapType::View => self.view_heap.as_mut(),
            DescriptorHeapType::Sampler => &mut self.sampler_heap,
        }
    }

    /// Replace the exhausted sub-allocated view heap by a private one
    fn fall_back_to_local(&mut self) -> Result<()> {
        let mut local = LocalOnlineHeap::new(
            DescriptorHeapType::View,
            self.local_view_heap_size,
            self.roll_over_policy,
        )?;
        if let Some(session) = &self.session {
            local.open_for_recording(session.clone());
        }
        crate::engine_warn!(
            "galaxy3d::rhi::DescriptorCache",
            "Global view heap exhausted, context falls back to a local heap of {} slots",
            self.local_view_heap_size
        );
        // Dropping the sub-allocated heap hands its block back to the pool
        self.view_heap = Box::new(local);
        self.view_heap_is_global = false;
        self.stats.fallbacks += 1;
        Ok(())
    }

    /// Make room for `count` contiguous slots; returns whether the heap rolled over
    fn ensure_room(&mut self, heap_type: DescriptorHeapType, count: u32) -> Result<bool> {
        if self.heap_mut(heap_type).can_reserve(count) {
            return Ok(false);
        }

        let outcome = self.heap_mut(heap_type).roll_over(count)?;
        if outcome == RollOver::Exhausted {
            if heap_type != DescriptorHeapType::View || !self.view_heap_is_global {
                return Err(Error::InvalidState(format!(
                    "{:?} heap reported exhaustion for {} slots",
                    heap_type, count
                )));
            }
            self.fall_back_to_local()?;
        }

        crate::engine_debug!(
            "galaxy3d::rhi::DescriptorCache",
            "{:?} heap rolled over ({:?}) to fit {} slots",
            heap_type,
            outcome,
            count
        );
        self.stats.roll_overs += 1;
        // Rebinding heaps drops every table set so far
        self.bound_heaps = None;
        self.views.mark_all_dirty();
        Ok(true)
    }

    fn ensure_heaps_bound(&mut self, buffer: &mut CommandBuffer) -> Result<()> {
        let heaps = (self.view_heap.heap().id(), self.sampler_heap.heap().id());
        if self.bound_heaps != Some(heaps) {
            buffer.record(GpuCommand::SetDescriptorHeaps {
                view: heaps.0,
                sampler: heaps.1,
            })?;
            self.bound_heaps = Some(heaps);
            self.stats.heap_binds += 1;
        }
        Ok(())
    }

    // ===== TABLE REBUILD =====

    fn write_table(
        &mut self,
        buffer: &mut CommandBuffer,
        stage: ShaderVisibility,
        slot: &BindingSlot,
        length: u32,
    ) -> Result<()> {
        let heap_type = slot.kind.heap_type();
        self.ensure_room(heap_type, length)?;
        let heap = self.heap_mut(heap_type);
        let base = heap.reserve(length)?;
        let target = heap.heap().clone();

        let descriptors = self.views.clean_range(stage, slot.kind, slot.base_register, length);
        target.write(base, &descriptors)?;

        self.ensure_heaps_bound(buffer)?;
        buffer.record(GpuCommand::SetDescriptorTable {
            root_index: slot.root_index,
            heap: target.id(),
            base_slot: base,
        })?;
        self.stats.tables_written += 1;
        self.stats.descriptors_copied += length as u64;
        Ok(())
    }

    /// Rebuild the dirty tables and direct constant buffers of one stage
    ///
    /// Returns the number of tables written; a stage with nothing dirty
    /// records nothing.
    pub fn record_binding_table(&mut self, buffer: &mut CommandBuffer, stage: ShaderVisibility) -> Result<u32> {
        let layout = self.current_layout()?;
        self.ensure_layout_recorded(buffer, &layout)?;
        if layout.is_stage_denied(stage) {
            return Ok(0);
        }

        let mut written = 0;
        for slot in layout.slots().iter().filter(|s| s.visibility == stage && !s.reserved) {
            let length = match slot.scope {
                SlotScope::Table { length, .. } => length,
                _ => continue,
            };
            if self.views.is_range_dirty(stage, slot.kind, slot.base_register, length) {
                self.write_table(buffer, stage, slot, length)?;
                written += 1;
            }
        }

        for register in 0..layout.direct_constant_buffer_count(stage) {
            if !self.views.is_dirty(stage, ResourceKind::ConstantBuffer, register) {
                continue;
            }
            let Some(view) = self.views.view(stage, ResourceKind::ConstantBuffer, register).copied() else {
                return Err(crate::engine_report!(
                    "galaxy3d::rhi::DescriptorCache",
                    Error::MissingBinding {
                        stage,
                        kind: ResourceKind::ConstantBuffer,
                        slot: register,
                    }
                ));
            };
            if let Some(slot) = layout.direct_constant_buffer_slot(stage, register) {
                buffer.record(GpuCommand::SetDirectConstantBuffer {
                    root_index: slot.root_index,
                    gpu_address: view.gpu_address,
                })?;
                self.stats.direct_constant_buffers += 1;
            }
            self.views.mark_clean(stage, ResourceKind::ConstantBuffer, register);
        }

        Ok(written)
    }

    /// Slots the dirty tables of `heap_type` need across every exposed stage
    fn pending_slots(&self, layout: &BindingLayout, heap_type: DescriptorHeapType) -> u32 {
        layout
            .slots()
            .iter()
            .filter(|slot| !slot.reserved && slot.kind.heap_type() == heap_type)
            .filter_map(|slot| match slot.scope {
                SlotScope::Table { length, .. }
                    if self.views.is_range_dirty(slot.visibility, slot.kind, slot.base_register, length) =>
                {
                    Some(length)
                }
                _ => None,
            })
            .sum()
    }

    fn out_of_room(&mut self, heap_type: DescriptorHeapType, layout: &BindingLayout) -> Error {
        let requested = self.pending_slots(layout, heap_type);
        let capacity = self.heap_mut(heap_type).heap().capacity();
        crate::engine_report!(
            "galaxy3d::rhi::DescriptorCache",
            Error::OutOfDescriptors {
                heap_type,
                requested,
                capacity,
            }
        )
    }

    /// Make room for every dirty table of both heaps
    ///
    /// A roll-over dirties every table, so the view heap is checked again
    /// whenever the sampler heap rolled.
    fn make_room(&mut self, layout: &BindingLayout) -> Result<()> {
        for _ in 0..MAX_ROOM_ROUNDS {
            let views = self.pending_slots(layout, DescriptorHeapType::View);
            if views > 0 {
                self.ensure_room(DescriptorHeapType::View, views)?;
            }
            let samplers = self.pending_slots(layout, DescriptorHeapType::Sampler);
            if samplers == 0 || !self.ensure_room(DescriptorHeapType::Sampler, samplers)? {
                return Ok(());
            }
        }
        Err(self.out_of_room(DescriptorHeapType::View, layout))
    }

    /// Rebuild every dirty table of the current layout before GPU work
    ///
    /// Room for all tables is made up front so that a roll-over cannot strand
    /// tables bound earlier in the same rebuild. Returns the number of tables
    /// written.
    pub fn commit(&mut self, buffer: &mut CommandBuffer) -> Result<u32> {
        let layout = self.current_layout()?;
        self.ensure_layout_recorded(buffer, &layout)?;

        let mut written = 0;
        for _ in 0..MAX_ROOM_ROUNDS {
            self.make_room(&layout)?;
            let roll_overs = self.stats.roll_overs;
            for stage in ShaderVisibility::PRIORITY {
                written += self.record_binding_table(buffer, stage)?;
            }
            if self.stats.roll_overs == roll_overs {
                return Ok(written);
            }
        }
        Err(self.out_of_room(DescriptorHeapType::View, &layout))
    }
}

impl fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("view_heap", &self.view_heap.heap().id())
            .field("view_heap_is_global", &self.view_heap_is_global)
            .field("sampler_heap", &self.sampler_heap.heap().id())
            .field("bound_heaps", &self.bound_heaps)
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "descriptor_cache_tests.rs"]
mod tests;
