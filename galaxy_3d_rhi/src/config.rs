//! Device capabilities and RHI tunables
//!
//! `DeviceCapabilities` is filled by whoever enumerates the adapter (outside
//! this crate). `RhiConfig` holds the tunables of the submission engine itself.

use std::time::Duration;

use crate::error::{Error, Result};

/// Hardware resource binding tier
///
/// Decides how binding layouts are quantized and whether descriptor tables
/// are volatile or static while set at execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceBindingTier {
    /// Table sizes for read views and samplers must match the layout
    Tier1,
    /// Table sizes for constant buffers and read/write views must match the layout
    Tier2,
    /// Table sizes only need to cover what the shader reads
    Tier3,
}

impl ResourceBindingTier {
    /// Descriptors may change after being bound (tiers 1 and 2)
    pub fn descriptors_volatile(&self) -> bool {
        *self <= ResourceBindingTier::Tier2
    }
}

/// Limits reported by the device
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Resource binding tier
    pub resource_binding_tier: ResourceBindingTier,
    /// Ceiling of a binding layout, in binding units
    /// (table = 1, direct descriptor = 2, one root constant = 1)
    pub max_binding_cost: u32,
    /// Constant buffers per stage that may be bound directly instead of through a table
    pub max_direct_constant_buffers: u32,
    /// Largest shader-visible view heap the device can create
    pub max_view_heap_size: u32,
    /// Largest shader-visible sampler heap the device can create
    pub max_sampler_heap_size: u32,
    /// Four 32-bit root constants can be reserved in every layout
    pub supports_root_constants: bool,
    /// A diagnostic read/write buffer can be reserved in every layout
    pub supports_diagnostic_buffer: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            resource_binding_tier: ResourceBindingTier::Tier3,
            max_binding_cost: 64,
            max_direct_constant_buffers: 4,
            max_view_heap_size: 1_000_000,
            max_sampler_heap_size: 2048,
            supports_root_constants: true,
            supports_diagnostic_buffer: false,
        }
    }
}

/// What a context-local heap does when its cursor reaches the end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOverPolicy {
    /// Loop the cursor back to slot 0 once everything before it has retired,
    /// else switch to another heap instance
    Wrap,
    /// Always switch to another heap instance
    AlwaysNewHeap,
}

/// RHI configuration
#[derive(Debug, Clone)]
pub struct RhiConfig {
    /// Recorded operations after which a context splits its command buffer
    pub max_commands_per_command_buffer: u32,
    /// Slots in the shared suballocated view heap (0 disables it)
    pub global_view_heap_size: u32,
    /// Slots per block handed out by the shared view heap
    pub global_view_block_size: u32,
    /// Slots in each context-local view heap
    pub local_view_heap_size: u32,
    /// Slots in each context-local sampler heap
    pub local_sampler_heap_size: u32,
    /// Context-local heap overflow behavior
    pub roll_over_policy: RollOverPolicy,
    /// How long a CPU drain waits on a sync point before reporting a GPU timeout
    pub cpu_wait_timeout: Duration,
    /// Record begin/end timestamps around each command buffer
    pub emit_timestamps: bool,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            max_commands_per_command_buffer: 10_000,
            global_view_heap_size: 500_000,
            global_view_block_size: 2_000,
            local_view_heap_size: 16_384,
            local_sampler_heap_size: 2048,
            roll_over_policy: RollOverPolicy::Wrap,
            cpu_wait_timeout: Duration::from_secs(30),
            emit_timestamps: true,
        }
    }
}

impl RhiConfig {
    /// Check the configuration against the device limits
    pub fn validate(&self, caps: &DeviceCapabilities) -> Result<()> {
        if self.max_commands_per_command_buffer == 0 {
            return Err(Error::InitializationFailed(
                "max_commands_per_command_buffer must be greater than zero".to_string(),
            ));
        }
        if self.local_view_heap_size == 0 || self.local_sampler_heap_size == 0 {
            return Err(Error::InitializationFailed(
                "local descriptor heaps need at least one slot".to_string(),
            ));
        }
        if self.local_view_heap_size > caps.max_view_heap_size {
            return Err(Error::InitializationFailed(format!(
                "local view heap of {} slots exceeds the device limit of {}",
                self.local_view_heap_size, caps.max_view_heap_size
            )));
        }
        if self.local_sampler_heap_size > caps.max_sampler_heap_size {
            return Err(Error::InitializationFailed(format!(
                "local sampler heap of {} slots exceeds the device limit of {}",
                self.local_sampler_heap_size, caps.max_sampler_heap_size
            )));
        }
        if self.global_view_heap_size > 0 {
            if self.global_view_heap_size > caps.max_view_heap_size {
                return Err(Error::InitializationFailed(format!(
                    "global view heap of {} slots exceeds the device limit of {}",
                    self.global_view_heap_size, caps.max_view_heap_size
                )));
            }
            if self.global_view_block_size == 0
                || self.global_view_block_size > self.global_view_heap_size
            {
                return Err(Error::InitializationFailed(format!(
                    "global view block size {} does not fit a heap of {} slots",
                    self.global_view_block_size, self.global_view_heap_size
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
