/// Allocates and recycles `u32` indices below a fixed capacity.
///
/// Used for the block indices of the shared suballocated descriptor heap:
/// a block index is handed out once, returned when the GPU has retired
/// every read of the block, and recycled on a later allocation.
///
/// # Example
///
/// ```ignore
/// let mut alloc = SlotAllocator::with_capacity(2);
/// let a = alloc.try_alloc(); // Some(0)
/// let b = alloc.try_alloc(); // Some(1)
/// let c = alloc.try_alloc(); // None, pool exhausted
/// alloc.free(0);
/// let d = alloc.try_alloc(); // Some(0), recycled
/// ```
pub struct SlotAllocator {
    free_list: Vec<u32>,
    next_id: u32,
    len: u32,
    capacity: u32,
}

impl SlotAllocator {
    /// Create an allocator handing out indices in `0..capacity`
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            free_list: Vec::new(),
            next_id: 0,
            len: 0,
            capacity,
        }
    }

    /// Allocate the next available index, or `None` when all are in use
    pub fn try_alloc(&mut self) -> Option<u32> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None if self.next_id < self.capacity => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
            None => return None,
        };
        self.len += 1;
        Some(id)
    }

    /// Return an index to the pool for reuse
    pub fn free(&mut self, id: u32) {
        debug_assert!(id < self.next_id, "freeing an unallocated slot: {}", id);
        debug_assert!(!self.free_list.contains(&id), "double free of slot: {}", id);
        self.len -= 1;
        self.free_list.push(id);
    }

    /// Highest index ever allocated + 1
    pub fn high_water_mark(&self) -> u32 {
        self.next_id
    }

    /// Number of indices this allocator can hand out at once
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of indices that can still be allocated
    pub fn available(&self) -> u32 {
        self.capacity - self.len
    }

    /// Number of currently allocated indices
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether no indices are currently allocated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "slot_allocator_tests.rs"]
mod tests;
