/*!
# Galaxy 3D RHI

GPU command submission and shader resource binding for the Galaxy 3D engine.

The crate records GPU work into command buffers, hands finished batches to a
scheduler, and keeps descriptor ("binding slot") memory alive exactly as long
as in-flight GPU work may read it. Shader resource needs are compiled into
cached binding layouts that fit the device's binding budget.

## Architecture

- **Device**: capabilities, configuration, layout cache, shared view heap
- **CommandContext**: per-thread recorder; open/close sessions, draws, dispatches
- **SyncPoint**: the only ordering primitive between contexts, queues and the CPU
- **Payload / SubmissionScheduler**: batches of waits, command buffers and signals
- **OnlineHeap**: sub-allocated (shared) and local (ring) descriptor heap strategies
- **BindingLayout / BindingLayoutCache**: quantized shapes compiled into slot layouts
- **ResourceViewCache / DescriptorCache**: dirty tracking and table rebuilds

No GPU API is bound: descriptor heaps are plain memory and command buffers
are lists of `GpuCommand` values, executed by whatever implements
`SubmissionScheduler`.
*/

// Internal modules
mod error;
mod engine;
mod config;
mod sync;
mod queue;
mod payload;
mod command_buffer;
mod scheduler;
mod descriptor;
mod view_cache;
mod descriptor_cache;
mod context;
mod device;
pub mod log;
pub mod binding;
pub mod online_heap;
pub mod utils;

// Main galaxy3d namespace module
pub mod galaxy3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Process-wide registry
    pub use crate::engine::Engine;

    // Device and recording
    pub use crate::config::{DeviceCapabilities, ResourceBindingTier, RhiConfig, RollOverPolicy};
    pub use crate::context::{BoundShaderState, CommandContext, ContextStats};
    pub use crate::device::Device;

    // Submission
    pub use crate::command_buffer::{CommandBuffer, CommandBufferPool, GpuCommand, ResourceBarrier, ResourceState};
    pub use crate::payload::{CompletionCallback, Payload, PendingPayloads};
    pub use crate::queue::{Fence, GpuQueue, QueueType, RetireOutcome};
    pub use crate::scheduler::{ManualScheduler, SubmissionScheduler};
    pub use crate::sync::{SyncPoint, SyncPointId, SyncPointKind, SyncPointRef, SyncPointState};

    // Descriptors
    pub use crate::descriptor::{
        Descriptor, DescriptorHeap, DescriptorHeapType, DescriptorKind, HeapId, DESCRIPTOR_SIZE,
    };
    pub use crate::descriptor_cache::{DescriptorCache, DescriptorCacheStats};
    pub use crate::view_cache::ResourceViewCache;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they are internal only
    }

    // Binding layout sub-module
    pub mod binding {
        pub use crate::binding::*;
    }

    // Descriptor heap strategies sub-module
    pub mod heap {
        pub use crate::online_heap::*;
    }
}
