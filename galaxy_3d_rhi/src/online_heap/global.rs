//! Device-wide view heap carved into fixed-size blocks

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{OnlineHeap, RollOver};
use crate::descriptor::{DescriptorHeap, DescriptorHeapType};
use crate::error::{Error, Result};
use crate::sync::SyncPointRef;
use crate::utils::SlotAllocator;

/// A contiguous range of the global heap owned by one context
#[derive(Debug)]
pub struct HeapBlock {
    heap: Arc<DescriptorHeap>,
    index: u32,
    base: u32,
    capacity: u32,
}

impl HeapBlock {
    pub fn heap(&self) -> &Arc<DescriptorHeap> {
        &self.heap
    }

    /// First slot of the block in the heap
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

struct BlockPool {
    allocator: SlotAllocator,
    /// Blocks given back, reusable once their sync point completes
    released: VecDeque<(u32, Option<SyncPointRef>)>,
}

impl BlockPool {
    fn reclaim(&mut self) {
        let mut still_pending = VecDeque::with_capacity(self.released.len());
        while let Some((index, retire)) = self.released.pop_front() {
            match &retire {
                Some(sync_point) if !sync_point.is_complete() => {
                    still_pending.push_back((index, retire));
                }
                _ => self.allocator.free(index),
            }
        }
        self.released = still_pending;
    }
}

/// Shared suballocated view heap
///
/// The only allocator touched by several recording threads; every block
/// allocation and release goes through one mutex.
pub struct GlobalOnlineHeap {
    heap: Arc<DescriptorHeap>,
    block_size: u32,
    pool: Mutex<BlockPool>,
}

impl GlobalOnlineHeap {
    /// Create a view heap of `capacity` slots split into blocks of `block_size`
    pub fn new(capacity: u32, block_size: u32) -> Result<Arc<Self>> {
        if block_size == 0 || block_size > capacity {
            return Err(Error::InitializationFailed(format!(
                "block size {} does not fit a global heap of {} slots",
                block_size, capacity
            )));
        }

        let block_count = capacity / block_size;
        crate::engine_debug!(
            "galaxy3d::rhi::GlobalHeap",
            "Global view heap created: {} blocks of {} slots",
            block_count,
            block_size
        );
        Ok(Arc::new(Self {
            heap: DescriptorHeap::new(DescriptorHeapType::View, capacity),
            block_size,
            pool: Mutex::new(BlockPool {
                allocator: SlotAllocator::with_capacity(block_count),
                released: VecDeque::new(),
            }),
        }))
    }

    fn lock_pool(&self) -> MutexGuard<'_, BlockPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn heap(&self) -> &Arc<DescriptorHeap> {
        &self.heap
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.lock_pool().allocator.capacity()
    }

    /// Blocks that can be handed out right now
    pub fn free_blocks(&self) -> u32 {
        let mut pool = self.lock_pool();
        pool.reclaim();
        pool.allocator.available()
    }

    /// Take a block, or `None` if every block is in use or still read by the GPU
    pub fn allocate_block(&self) -> Option<HeapBlock> {
        let mut pool = self.lock_pool();
        pool.reclaim();
        let index = pool.allocator.try_alloc()?;
        Some(HeapBlock {
            heap: self.heap.clone(),
            index,
            base: index * self.block_size,
            capacity: self.block_size,
        })
    }

    /// Give a block back; it is handed out again once `retire` completes
    pub fn release_block(&self, block: HeapBlock, retire: Option<SyncPointRef>) {
        self.lock_pool().released.push_back((block.index, retire));
    }
}

impl fmt::Debug for GlobalOnlineHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalOnlineHeap")
            .field("heap", &self.heap.id())
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// A context's view of the global heap: one block at a time
///
/// A context submits to a single queue, so its sessions retire in order and
/// the latest session sync point covers everything written into the block.
pub struct SubAllocatedOnlineHeap {
    pool: Arc<GlobalOnlineHeap>,
    block: Option<HeapBlock>,
    cursor: u32,
    session: Option<SyncPointRef>,
    session_start: u32,
    last_writer: Option<SyncPointRef>,
}

impl SubAllocatedOnlineHeap {
    /// Take a first block from `pool`, or `None` if the pool is exhausted
    pub fn new(pool: Arc<GlobalOnlineHeap>) -> Option<Self> {
        let block = pool.allocate_block()?;
        Some(Self {
            pool,
            block: Some(block),
            cursor: 0,
            session: None,
            session_start: 0,
            last_writer: None,
        })
    }

    pub fn block(&self) -> Option<&HeapBlock> {
        self.block.as_ref()
    }

    /// Sync point retiring the block's current contents
    fn retire_point(&self) -> Option<SyncPointRef> {
        if self.session.is_some() && self.cursor > self.session_start {
            self.session.clone()
        } else {
            self.last_writer.clone()
        }
    }

    fn release_current(&mut self) {
        let retire = self.retire_point();
        if let Some(block) = self.block.take() {
            self.pool.release_block(block, retire);
        }
        self.cursor = 0;
        self.session_start = 0;
        self.last_writer = None;
    }
}

impl OnlineHeap for SubAllocatedOnlineHeap {
    fn heap(&self) -> &Arc<DescriptorHeap> {
        self.pool.heap()
    }

    fn can_reserve(&self, count: u32) -> bool {
        self.block
            .as_ref()
            .map(|block| self.cursor + count <= block.capacity)
            .unwrap_or(false)
    }

    fn reserve(&mut self, count: u32) -> Result<u32> {
        let block = self.block.as_ref().ok_or_else(|| {
            Error::InvalidState("suballocated heap has no block; roll over first".to_string())
        })?;
        if self.cursor + count > block.capacity {
            return Err(Error::InvalidState(format!(
                "{} slots do not fit the {} left in the block",
                count,
                block.capacity - self.cursor
            )));
        }

        let base = block.base + self.cursor;
        self.cursor += count;
        Ok(base)
    }

    fn roll_over(&mut self, count: u32) -> Result<RollOver> {
        if count > self.pool.block_size() {
            return Ok(RollOver::Exhausted);
        }

        self.release_current();
        match self.pool.allocate_block() {
            Some(block) => {
                crate::engine_trace!(
                    "galaxy3d::rhi::GlobalHeap",
                    "Context moved to block at slot {}",
                    block.base
                );
                self.block = Some(block);
                Ok(RollOver::NewBlock)
            }
            None => Ok(RollOver::Exhausted),
        }
    }

    fn open_for_recording(&mut self, session: SyncPointRef) {
        self.session = Some(session);
        self.session_start = self.cursor;
    }

    fn close_after_recording(&mut self) {
        if let Some(session) = self.session.take() {
            if self.cursor > self.session_start {
                self.last_writer = Some(session);
            }
        }
        self.session_start = self.cursor;
    }
}

impl Drop for SubAllocatedOnlineHeap {
    fn drop(&mut self) {
        self.release_current();
    }
}

impl fmt::Debug for SubAllocatedOnlineHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubAllocatedOnlineHeap")
            .field("block", &self.block.as_ref().map(|b| b.base))
            .field("cursor", &self.cursor)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "global_tests.rs"]
mod tests;
