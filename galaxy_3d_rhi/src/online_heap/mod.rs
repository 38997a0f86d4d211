//! Shader-visible descriptor heap strategies
//!
//! A context never writes a descriptor table into a slot the GPU may still
//! read. Both strategies hand out contiguous slot ranges and only reuse a
//! range once a session sync point proves the GPU work reading it retired:
//!
//! - `SubAllocatedOnlineHeap` takes fixed-size blocks from a device-wide
//!   `GlobalOnlineHeap` pool.
//! - `LocalOnlineHeap` is a private ring over its own heap instance.

mod global;
mod local;

pub use global::{GlobalOnlineHeap, HeapBlock, SubAllocatedOnlineHeap};
pub use local::{LocalHeapStats, LocalOnlineHeap};

use std::sync::Arc;

use crate::descriptor::{DescriptorHeap, HeapId};
use crate::error::Result;
use crate::sync::SyncPointRef;

/// What `roll_over` did to make room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOver {
    /// The ring cursor went back to slot 0 of the same heap
    LoopedAround,
    /// A new block of the shared heap replaced the exhausted one
    NewBlock,
    /// Another heap instance replaced the exhausted one
    NewHeap { previous: HeapId, current: HeapId },
    /// No room can be made; the caller must switch strategy
    Exhausted,
}

/// Contract shared by the heap strategies
///
/// A reservation sequence looks like:
///
/// ```ignore
/// if !heap.can_reserve(n) {
///     heap.roll_over(n)?; // the heap bound on the GPU may have changed
/// }
/// let base = heap.reserve(n)?;
/// ```
pub trait OnlineHeap: Send {
    /// Heap the next reservation is taken from
    fn heap(&self) -> &Arc<DescriptorHeap>;

    /// Whether `count` contiguous slots are available without rolling over
    fn can_reserve(&self, count: u32) -> bool;

    /// Reserve `count` contiguous slots and return the first one
    fn reserve(&mut self, count: u32) -> Result<u32>;

    /// Make room for `count` contiguous slots
    fn roll_over(&mut self, count: u32) -> Result<RollOver>;

    /// Start a recording session; slots reserved until the matching close are
    /// retired by `session`
    fn open_for_recording(&mut self, session: SyncPointRef);

    /// End the recording session
    fn close_after_recording(&mut self);
}
