//! Command buffers - ordered GPU operations recorded by one context
//!
//! A command buffer is recorded by exactly one context, closed, moved into a
//! payload and consumed by the scheduler. Retired buffers come back through
//! `CommandBufferPool` so their storage is reused.

use std::sync::Mutex;

use crate::binding::LayoutId;
use crate::descriptor::HeapId;
use crate::error::{Error, Result};
use crate::queue::QueueType;

/// Resource usage state tracked by barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    VertexOrConstantBuffer,
    IndexBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    DepthRead,
    CopySource,
    CopyDest,
    Present,
}

/// One resource barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// Usage transition of a resource
    Transition {
        resource: u64,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders read/write accesses to the same resource between two operations
    UnorderedAccess { resource: u64 },
}

/// One recorded GPU operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCommand {
    /// Timestamp written when the GPU starts the buffer
    BeginTimestamp,
    /// Timestamp written when the GPU finishes the buffer
    EndTimestamp,
    BeginEvent(String),
    EndEvent,
    ResourceBarriers(Vec<ResourceBarrier>),
    SetBindingLayout(LayoutId),
    /// Exposes the two heaps to the GPU; tables may only point into the bound heaps
    SetDescriptorHeaps { view: HeapId, sampler: HeapId },
    SetDescriptorTable {
        root_index: u32,
        heap: HeapId,
        base_slot: u32,
    },
    SetDirectConstantBuffer { root_index: u32, gpu_address: u64 },
    SetRootConstants { root_index: u32, values: [u32; 4] },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
}

impl GpuCommand {
    /// Whether the command is GPU work counted against the split threshold
    pub fn is_work(&self) -> bool {
        matches!(
            self,
            GpuCommand::Draw { .. } | GpuCommand::DrawIndexed { .. } | GpuCommand::Dispatch { .. }
        )
    }
}

/// Ordered list of GPU operations submitted as a unit
#[derive(Debug)]
pub struct CommandBuffer {
    queue: QueueType,
    commands: Vec<GpuCommand>,
    work_count: u32,
    closed: bool,
}

impl CommandBuffer {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            commands: Vec::new(),
            work_count: 0,
            closed: false,
        }
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Number of draws and dispatches recorded
    pub fn work_count(&self) -> u32 {
        self.work_count
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append a command
    pub fn record(&mut self, command: GpuCommand) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState(
                "cannot record into a closed command buffer".to_string(),
            ));
        }
        if command.is_work() {
            self.work_count += 1;
        }
        self.commands.push(command);
        Ok(())
    }

    /// Finish recording; the buffer becomes read-only
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Clear the buffer for reuse, keeping its storage
    fn reset(&mut self, queue: QueueType) {
        self.queue = queue;
        self.commands.clear();
        self.work_count = 0;
        self.closed = false;
    }
}

/// Recycles retired command buffers
///
/// Shared by every context of a device and by the scheduler that hands
/// buffers back once the GPU retired them.
#[derive(Debug, Default)]
pub struct CommandBufferPool {
    free: Mutex<Vec<CommandBuffer>>,
}

impl CommandBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reset buffer for `queue`, reusing a retired one when available
    pub fn acquire(&self, queue: QueueType) -> CommandBuffer {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        match recycled {
            Some(mut buffer) => {
                buffer.reset(queue);
                buffer
            }
            None => CommandBuffer::new(queue),
        }
    }

    /// Give retired buffers back
    pub fn recycle(&self, buffers: impl IntoIterator<Item = CommandBuffer>) {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(buffers);
    }

    /// Number of buffers waiting for reuse
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "command_buffer_tests.rs"]
mod tests;
