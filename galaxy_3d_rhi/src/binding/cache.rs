//! Process-lifetime cache of compiled binding layouts

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::{BindingLayout, LayoutId, QuantizedBindingShape};
use crate::config::DeviceCapabilities;
use crate::error::{Error, Result};

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingLayoutCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
struct CacheInner {
    layouts: SlotMap<LayoutId, Arc<BindingLayout>>,
    by_shape: FxHashMap<QuantizedBindingShape, LayoutId>,
}

/// Binding layouts keyed by quantized shape
///
/// Identical shapes always yield the same `Arc`. Entries are never evicted.
pub struct BindingLayoutCache {
    caps: DeviceCapabilities,
    inner: RwLock<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BindingLayoutCache {
    pub fn new(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            inner: RwLock::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn poisoned() -> Error {
        Error::BackendError("binding layout cache lock poisoned".to_string())
    }

    /// Cached layout for `shape`, compiling it on first use
    ///
    /// A shape that does not fit the device fails every time and is never cached.
    pub fn get_or_create(&self, shape: &QuantizedBindingShape) -> Result<Arc<BindingLayout>> {
        {
            let inner = self.inner.read().map_err(|_| Self::poisoned())?;
            if let Some(id) = inner.by_shape.get(shape) {
                if let Some(layout) = inner.layouts.get(*id) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(layout.clone());
                }
            }
        }

        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        // Another thread may have compiled it between the two locks
        if let Some(layout) = inner.by_shape.get(shape).and_then(|id| inner.layouts.get(*id)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(layout.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let layout = BindingLayout::build(shape, &self.caps)?;
        let id = inner
            .layouts
            .insert_with_key(|id| Arc::new(layout.with_id(id)));
        inner.by_shape.insert(shape.clone(), id);

        let layout = inner.layouts[id].clone();
        crate::engine_debug!(
            "galaxy3d::rhi::BindingLayoutCache",
            "Compiled binding layout {:?}: {} slots, {}/{} binding units",
            id,
            layout.slots().len(),
            layout.cost(),
            layout.budget()
        );
        Ok(layout)
    }

    /// Layout by identity
    pub fn get(&self, id: LayoutId) -> Option<Arc<BindingLayout>> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.layouts.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.layouts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BindingLayoutCacheStats {
        BindingLayoutCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
