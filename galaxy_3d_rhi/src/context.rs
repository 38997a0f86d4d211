//! Command context - records GPU work for one queue
//!
//! A context owns at most one open command buffer. Each open/close pair is a
//! session: a GPU-only sync point is created at open and signaled right after
//! the session's command buffer, so every descriptor heap region written
//! during the session retires with it.
//!
//! Sessions end on `close`/`flush`, when the work threshold is reached, on
//! any sync point operation, and when the context is dropped.

use std::fmt;
use std::sync::Arc;

use crate::binding::{BindingLayout, ResourceKind, ShaderMetadataProvider, ShaderResourceCounts, ShaderVisibility};
use crate::command_buffer::{CommandBuffer, GpuCommand, ResourceBarrier, ResourceState};
use crate::descriptor::Descriptor;
use crate::descriptor_cache::{DescriptorCache, DescriptorCacheStats};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::payload::{CompletionCallback, PendingPayloads};
use crate::queue::QueueType;
use crate::sync::{SyncPoint, SyncPointKind, SyncPointRef};
use crate::view_cache::ResourceViewCache;

/// A binding layout plus the exact counts the shaders declare
///
/// Quantization may widen tables; the exact counts decide which slots must
/// have a view bound before GPU work is recorded.
#[derive(Debug, Clone)]
pub struct BoundShaderState {
    layout: Arc<BindingLayout>,
    counts: [Option<ShaderResourceCounts>; ShaderVisibility::COUNT],
}

impl BoundShaderState {
    pub fn new(layout: Arc<BindingLayout>, provider: &dyn ShaderMetadataProvider) -> Self {
        Self::from_layout(layout).with_counts(provider)
    }

    /// State whose required slots are every slot the layout exposes
    ///
    /// Used when no shader declares exact counts: each table entry and each
    /// direct constant buffer of a visible stage must have a view bound.
    pub fn from_layout(layout: Arc<BindingLayout>) -> Self {
        let mut counts = [None; ShaderVisibility::COUNT];
        for stage in ShaderVisibility::PRIORITY {
            if layout.is_stage_denied(stage) {
                continue;
            }
            counts[stage.index()] = Some(ShaderResourceCounts::new(
                layout.direct_constant_buffer_count(stage)
                    + layout.table_length(stage, ResourceKind::ConstantBuffer),
                layout.table_length(stage, ResourceKind::ShaderResource),
                layout.table_length(stage, ResourceKind::UnorderedAccess),
                layout.table_length(stage, ResourceKind::Sampler),
            ));
        }
        Self { layout, counts }
    }

    fn with_counts(mut self, provider: &dyn ShaderMetadataProvider) -> Self {
        for stage in ShaderVisibility::PRIORITY {
            self.counts[stage.index()] = provider.resource_counts(stage);
        }
        self
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn counts(&self, stage: ShaderVisibility) -> Option<&ShaderResourceCounts> {
        self.counts[stage.index()].as_ref()
    }

    /// First declared slot with no view bound, in stage priority order
    pub fn first_missing(&self, views: &ResourceViewCache) -> Option<(ShaderVisibility, ResourceKind, u32)> {
        ShaderVisibility::PRIORITY
            .iter()
            .find_map(|stage| self.first_missing_in(*stage, views))
    }

    /// First declared slot of `stage` with no view bound
    pub fn first_missing_in(
        &self,
        stage: ShaderVisibility,
        views: &ResourceViewCache,
    ) -> Option<(ShaderVisibility, ResourceKind, u32)> {
        let counts = self.counts[stage.index()]?;
        ResourceKind::ALL.iter().find_map(|kind| {
            views
                .first_unbound(stage, *kind, counts.get(*kind))
                .map(|slot| (stage, *kind, slot))
        })
    }
}

/// Recording counters of a context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub sessions: u64,
    pub splits: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub barriers: u64,
    pub waits: u64,
    pub elided_waits: u64,
    pub signals: u64,
    pub submissions: u64,
    pub descriptors: DescriptorCacheStats,
}

/// Per-thread recorder of GPU work for one queue
pub struct CommandContext {
    device: Arc<Device>,
    queue: QueueType,
    buffer: Option<CommandBuffer>,
    session: Option<SyncPointRef>,
    payloads: PendingPayloads,
    descriptors: DescriptorCache,
    pending_barriers: Vec<ResourceBarrier>,
    shader: Option<BoundShaderState>,
    root_constants: Option<[u32; 4]>,
    root_constants_recorded: bool,
    open_events: u32,
    stats: ContextStats,
}

impl CommandContext {
    pub(crate) fn new(device: Arc<Device>, queue: QueueType) -> Result<Self> {
        let descriptors = DescriptorCache::new(device.global_view_heap().cloned(), device.config())?;
        crate::engine_trace!(
            "galaxy3d::rhi::Context",
            "Context created on the {:?} queue (global view heap: {})",
            queue,
            descriptors.uses_global_heap()
        );
        Ok(Self {
            device,
            queue,
            buffer: None,
            session: None,
            payloads: PendingPayloads::new(queue),
            descriptors,
            pending_barriers: Vec::new(),
            shader: None,
            root_constants: None,
            root_constants_recorded: false,
            open_events: 0,
            stats: ContextStats::default(),
        })
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    /// Sync point of the open session
    pub fn session(&self) -> Option<&SyncPointRef> {
        self.session.as_ref()
    }

    /// Command buffer being recorded
    pub fn command_buffer(&self) -> Option<&CommandBuffer> {
        self.buffer.as_ref()
    }

    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    /// Payloads closed but not yet handed to the scheduler
    pub fn pending_payloads(&self) -> usize {
        self.payloads.len()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            descriptors: self.descriptors.stats(),
            ..self.stats
        }
    }

    // ===== LIFECYCLE =====

    /// Start a session; no-op if one is already open
    pub fn open(&mut self) -> Result<()> {
        if self.buffer.is_some() {
            return Ok(());
        }

        let mut buffer = self.device.scheduler().command_buffer_pool().acquire(self.queue);
        if self.device.config().emit_timestamps {
            buffer.record(GpuCommand::BeginTimestamp)?;
        }
        let session = SyncPoint::create(SyncPointKind::GpuOnly);
        session.claim_signal()?;

        self.descriptors.open(session.clone());
        self.root_constants_recorded = false;
        self.buffer = Some(buffer);
        self.session = Some(session);
        self.stats.sessions += 1;
        Ok(())
    }

    /// End the session; its command buffer and sync point join the pending payloads
    pub fn close(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            return Ok(());
        }

        self.flush_barriers()?;
        if self.open_events > 0 {
            crate::engine_debug!(
                "galaxy3d::rhi::Context",
                "Closing {} debug events left open at the end of the command buffer",
                self.open_events
            );
            for _ in 0..self.open_events {
                self.record(GpuCommand::EndEvent)?;
            }
            self.open_events = 0;
        }
        if self.device.config().emit_timestamps {
            self.record(GpuCommand::EndTimestamp)?;
        }

        let (Some(mut buffer), Some(session)) = (self.buffer.take(), self.session.take()) else {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::Context",
                Error::InvalidState("open context has no session".to_string())
            ));
        };
        buffer.close();
        self.descriptors.close();
        self.payloads.command_buffer(buffer)?;
        self.payloads.signal(session);
        Ok(())
    }

    /// Close and hand every pending payload to the scheduler
    pub fn flush(&mut self) -> Result<()> {
        self.close()?;
        let payloads = self.payloads.take();
        if payloads.is_empty() {
            return Ok(());
        }

        let count = payloads.len();
        self.device.scheduler().submit(payloads)?;
        self.stats.submissions += count as u64;
        crate::engine_trace!(
            "galaxy3d::rhi::Context",
            "Flushed {} payloads to the {:?} queue",
            count,
            self.queue
        );
        Ok(())
    }

    /// Close and reopen once the command buffer holds the configured amount of work
    pub fn conditional_split(&mut self) -> Result<bool> {
        let limit = self.device.config().max_commands_per_command_buffer;
        let full = self
            .buffer
            .as_ref()
            .map(|buffer| buffer.work_count() >= limit)
            .unwrap_or(false);
        if !full {
            return Ok(false);
        }

        self.close()?;
        self.open()?;
        self.stats.splits += 1;
        crate::engine_trace!(
            "galaxy3d::rhi::Context",
            "Command buffer split after {} operations",
            limit
        );
        Ok(true)
    }

    /// Run `callback` once everything recorded so far retired on the GPU
    pub fn on_completion(&mut self, callback: CompletionCallback) -> Result<()> {
        self.close()?;
        self.payloads.callback(callback);
        Ok(())
    }

    // ===== SYNC POINTS =====

    /// Signal `sync_point` once the GPU retired everything recorded so far
    ///
    /// # Errors
    ///
    /// The sync point was already signaled by another operation.
    pub fn signal_sync_point(&mut self, sync_point: &SyncPointRef) -> Result<()> {
        sync_point.claim_signal()?;
        self.close()?;
        self.payloads.signal(sync_point.clone());
        self.stats.signals += 1;
        Ok(())
    }

    /// Make work recorded after this call wait for `sync_point` on the GPU
    ///
    /// The open session is closed either way. Waiting on a complete sync
    /// point then records no wait; waiting on a failed one returns its failure.
    pub fn wait_sync_point(&mut self, sync_point: &SyncPointRef) -> Result<()> {
        if let Some(error) = sync_point.failure() {
            return Err(crate::engine_report!("galaxy3d::rhi::Context", error));
        }

        self.close()?;
        if sync_point.is_complete() {
            self.stats.elided_waits += 1;
            return Ok(());
        }
        self.payloads.wait(sync_point.clone())?;
        self.stats.waits += 1;
        Ok(())
    }

    // ===== RECORDING =====

    fn record(&mut self, command: GpuCommand) -> Result<()> {
        self.open()?;
        match self.buffer.as_mut() {
            Some(buffer) => buffer.record(command),
            None => Err(Error::InvalidState("context failed to open".to_string())),
        }
    }

    /// Open command buffer and descriptor cache, borrowed together
    fn recording(&mut self) -> Result<(&mut CommandBuffer, &mut DescriptorCache)> {
        self.open()?;
        match self.buffer.as_mut() {
            Some(buffer) => Ok((buffer, &mut self.descriptors)),
            None => Err(Error::InvalidState("context failed to open".to_string())),
        }
    }

    fn flush_barriers(&mut self) -> Result<()> {
        if self.pending_barriers.is_empty() {
            return Ok(());
        }
        let barriers = std::mem::take(&mut self.pending_barriers);
        self.stats.barriers += barriers.len() as u64;
        self.record(GpuCommand::ResourceBarriers(barriers))
    }

    /// Queue a state transition; barriers are batched until the next GPU work or close
    pub fn transition(&mut self, resource: u64, before: ResourceState, after: ResourceState) -> Result<()> {
        self.open()?;
        if before != after {
            self.pending_barriers.push(ResourceBarrier::Transition { resource, before, after });
        }
        Ok(())
    }

    /// Queue a barrier between two read/write passes over `resource`
    pub fn uav_barrier(&mut self, resource: u64) -> Result<()> {
        self.open()?;
        self.pending_barriers.push(ResourceBarrier::UnorderedAccess { resource });
        Ok(())
    }

    pub fn begin_event(&mut self, name: &str) -> Result<()> {
        self.record(GpuCommand::BeginEvent(name.to_string()))?;
        self.open_events += 1;
        Ok(())
    }

    pub fn end_event(&mut self) -> Result<()> {
        if self.open_events == 0 {
            crate::engine_warn!(
                "galaxy3d::rhi::Context",
                "end_event without a matching begin_event in this command buffer"
            );
            return Ok(());
        }
        self.open_events -= 1;
        self.record(GpuCommand::EndEvent)
    }

    /// Set the four root constants read by the next GPU work
    pub fn set_root_constants(&mut self, values: [u32; 4]) {
        self.root_constants = Some(values);
        self.root_constants_recorded = false;
    }

    // ===== BINDING =====

    /// Bind a shader combination: its layout and the counts draws are checked against
    pub fn set_shader_state(&mut self, state: BoundShaderState) -> Result<()> {
        let (buffer, descriptors) = self.recording()?;
        if descriptors.set_layout(buffer, state.layout())? {
            self.root_constants_recorded = false;
        }
        self.shader = Some(state);
        Ok(())
    }

    /// Bind a layout without declared counts
    ///
    /// Keeps the current shader state when `layout` is already bound, so
    /// declared counts survive; otherwise every slot of the layout is required.
    pub fn set_binding_layout(&mut self, layout: &Arc<BindingLayout>) -> Result<()> {
        if self.is_current_layout(layout) {
            return Ok(());
        }
        self.set_shader_state(BoundShaderState::from_layout(layout.clone()))
    }

    fn is_current_layout(&self, layout: &Arc<BindingLayout>) -> bool {
        self.shader
            .as_ref()
            .map(|state| Arc::ptr_eq(state.layout(), layout))
            .unwrap_or(false)
    }

    pub fn shader_state(&self) -> Option<&BoundShaderState> {
        self.shader.as_ref()
    }

    /// Bind a view or sampler; the descriptor reaches the GPU with the next table rebuild
    pub fn bind_view(&mut self, stage: ShaderVisibility, kind: ResourceKind, slot: u32, view: Descriptor) -> Result<()> {
        self.descriptors.bind(stage, kind, slot, view)
    }

    pub fn unbind_view(&mut self, stage: ShaderVisibility, kind: ResourceKind, slot: u32) -> Result<()> {
        self.descriptors.unbind(stage, kind, slot)
    }

    /// Rebuild the dirty tables of `stage` for `layout`
    ///
    /// Switches to `layout` first if it is not current. Fails with
    /// `MissingBinding` when a required slot of `stage` has no view. Returns
    /// the number of tables written.
    pub fn record_binding_table(&mut self, stage: ShaderVisibility, layout: &Arc<BindingLayout>) -> Result<u32> {
        self.set_binding_layout(layout)?;
        let missing = self
            .shader
            .as_ref()
            .and_then(|state| state.first_missing_in(stage, self.descriptors.views()));
        if let Some((stage, kind, slot)) = missing {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::Context",
                Error::MissingBinding { stage, kind, slot }
            ));
        }
        let (buffer, descriptors) = self.recording()?;
        descriptors.record_binding_table(buffer, stage)
    }

    // ===== GPU WORK =====

    fn prepare_work(&mut self, graphics: bool) -> Result<()> {
        let supported = if graphics {
            self.queue.supports_graphics()
        } else {
            self.queue.supports_compute()
        };
        if !supported {
            crate::engine_bail!(
                "galaxy3d::rhi::Context",
                "{} work cannot be recorded on the {:?} queue",
                if graphics { "Graphics" } else { "Compute" },
                self.queue
            );
        }

        let Some(shader) = self.shader.as_ref() else {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::Context",
                Error::InvalidState("no shader state bound before GPU work".to_string())
            ));
        };
        if let Some((stage, kind, slot)) = shader.first_missing(self.descriptors.views()) {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::Context",
                Error::MissingBinding { stage, kind, slot }
            ));
        }
        let layout = shader.layout().clone();

        self.flush_barriers()?;
        let (buffer, descriptors) = self.recording()?;
        descriptors.commit(buffer)?;

        if let (Some(values), false) = (self.root_constants, self.root_constants_recorded) {
            let Some(slot) = layout.root_constants_slot() else {
                return Err(crate::engine_report!(
                    "galaxy3d::rhi::Context",
                    Error::InvalidState("binding layout has no root constants slot".to_string())
                ));
            };
            self.record(GpuCommand::SetRootConstants {
                root_index: slot.root_index,
                values,
            })?;
            self.root_constants_recorded = true;
        }
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.prepare_work(true)?;
        self.record(GpuCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })?;
        self.stats.draws += 1;
        self.conditional_split()?;
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.prepare_work(true)?;
        self.record(GpuCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        })?;
        self.stats.draws += 1;
        self.conditional_split()?;
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.prepare_work(false)?;
        self.record(GpuCommand::Dispatch { x, y, z })?;
        self.stats.dispatches += 1;
        self.conditional_split()?;
        Ok(())
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        if self.buffer.is_none() && self.payloads.is_empty() {
            return;
        }
        if let Err(error) = self.flush() {
            crate::engine_error!(
                "galaxy3d::rhi::Context",
                "Flush on context teardown failed: {}",
                error
            );
        }
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("queue", &self.queue)
            .field("open", &self.is_open())
            .field("pending_payloads", &self.payloads.len())
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
