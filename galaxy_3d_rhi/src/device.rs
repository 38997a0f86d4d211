//! Device - owner of everything contexts share
//!
//! A device holds the capabilities reported for the adapter, the RHI
//! configuration, the binding layout cache, the shared view heap pool and the
//! scheduler contexts submit to. Contexts keep an `Arc<Device>`.

use std::fmt;
use std::sync::Arc;

use crate::binding::{BindingLayout, BindingLayoutCache, QuantizedBindingShape, ShaderMetadataProvider};
use crate::config::{DeviceCapabilities, RhiConfig};
use crate::context::{BoundShaderState, CommandContext};
use crate::error::Result;
use crate::online_heap::GlobalOnlineHeap;
use crate::queue::QueueType;
use crate::scheduler::SubmissionScheduler;
use crate::sync::SyncPoint;

pub struct Device {
    caps: DeviceCapabilities,
    config: RhiConfig,
    layout_cache: BindingLayoutCache,
    global_view_heap: Option<Arc<GlobalOnlineHeap>>,
    scheduler: Arc<dyn SubmissionScheduler>,
}

impl Device {
    /// Create a device
    ///
    /// # Errors
    ///
    /// `Error::InitializationFailed` if `config` does not fit `caps`.
    pub fn new(
        caps: DeviceCapabilities,
        config: RhiConfig,
        scheduler: Arc<dyn SubmissionScheduler>,
    ) -> Result<Arc<Self>> {
        if let Err(error) = config.validate(&caps) {
            crate::engine_error!("galaxy3d::rhi::Device", "{}", error);
            return Err(error);
        }

        let global_view_heap = if config.global_view_heap_size > 0 {
            Some(GlobalOnlineHeap::new(
                config.global_view_heap_size,
                config.global_view_block_size,
            )?)
        } else {
            None
        };

        crate::engine_info!(
            "galaxy3d::rhi::Device",
            "Device created: {:?}, {} binding units, global view heap {}",
            caps.resource_binding_tier,
            caps.max_binding_cost,
            if global_view_heap.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Arc::new(Self {
            layout_cache: BindingLayoutCache::new(caps.clone()),
            caps,
            config,
            global_view_heap,
            scheduler,
        }))
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    pub fn layout_cache(&self) -> &BindingLayoutCache {
        &self.layout_cache
    }

    /// Shared view heap pool, `None` when disabled by configuration
    pub fn global_view_heap(&self) -> Option<&Arc<GlobalOnlineHeap>> {
        self.global_view_heap.as_ref()
    }

    pub fn scheduler(&self) -> &Arc<dyn SubmissionScheduler> {
        &self.scheduler
    }

    /// Create a recording context for `queue`
    pub fn create_context(self: &Arc<Self>, queue: QueueType) -> Result<CommandContext> {
        CommandContext::new(self.clone(), queue)
    }

    /// Cached binding layout for what `provider` declares
    pub fn binding_layout(&self, provider: &dyn ShaderMetadataProvider) -> Result<Arc<BindingLayout>> {
        let shape = QuantizedBindingShape::quantize(&self.caps, provider)?;
        self.layout_cache.get_or_create(&shape)
    }

    /// Layout plus exact counts, ready for `CommandContext::set_shader_state`
    pub fn bound_shader_state(&self, provider: &dyn ShaderMetadataProvider) -> Result<BoundShaderState> {
        let layout = self.binding_layout(provider)?;
        Ok(BoundShaderState::new(layout, provider))
    }

    /// Block until `sync_point` completes, up to the configured CPU wait timeout
    pub fn wait_for(&self, sync_point: &SyncPoint) -> Result<()> {
        sync_point.wait(self.config.cpu_wait_timeout)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("caps", &self.caps)
            .field("config", &self.config)
            .field("layouts", &self.layout_cache.len())
            .field("global_view_heap", &self.global_view_heap)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
