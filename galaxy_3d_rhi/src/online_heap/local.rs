//! Context-private descriptor heap used as a ring
//!
//! Positions are virtual and only ever grow: the slot of a position is its
//! offset from the start of the current pass over the heap. Every closed
//! session leaves a marker (session sync point, cursor at close); once the
//! sync point completes, everything before the marker may be overwritten.
//! `tail` is the oldest position possibly read by the GPU, so
//! `head - tail <= capacity` always holds.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::{OnlineHeap, RollOver};
use crate::config::RollOverPolicy;
use crate::descriptor::{DescriptorHeap, DescriptorHeapType};
use crate::error::{Error, Result};
use crate::sync::SyncPointRef;

struct InFlightRegion {
    end: u64,
    sync_point: SyncPointRef,
}

/// A heap instance given up while the GPU may still read it
struct RetiredHeap {
    heap: Arc<DescriptorHeap>,
    retire: Vec<SyncPointRef>,
}

impl RetiredHeap {
    fn is_reusable(&self) -> bool {
        self.retire.iter().all(|sync_point| sync_point.is_complete())
    }
}

/// Allocation counters of a local heap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalHeapStats {
    pub reservations: u64,
    pub slots_reserved: u64,
    pub loop_arounds: u64,
    pub heaps_created: u64,
    pub heaps_recycled: u64,
}

/// Private ring allocator over a heap instance owned by one context
pub struct LocalOnlineHeap {
    heap_type: DescriptorHeapType,
    capacity: u32,
    policy: RollOverPolicy,
    heap: Arc<DescriptorHeap>,
    pass_start: u64,
    head: u64,
    tail: u64,
    in_flight: VecDeque<InFlightRegion>,
    session: Option<SyncPointRef>,
    session_start: u64,
    retired: Vec<RetiredHeap>,
    stats: LocalHeapStats,
}

impl LocalOnlineHeap {
    pub fn new(heap_type: DescriptorHeapType, capacity: u32, policy: RollOverPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InitializationFailed(format!(
                "{:?} local heap needs at least one slot",
                heap_type
            )));
        }

        Ok(Self {
            heap_type,
            capacity,
            policy,
            heap: DescriptorHeap::new(heap_type, capacity),
            pass_start: 0,
            head: 0,
            tail: 0,
            in_flight: VecDeque::new(),
            session: None,
            session_start: 0,
            retired: Vec::new(),
            stats: LocalHeapStats {
                heaps_created: 1,
                ..LocalHeapStats::default()
            },
        })
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn policy(&self) -> RollOverPolicy {
        self.policy
    }

    pub fn stats(&self) -> LocalHeapStats {
        self.stats
    }

    /// Next slot handed out in the current heap
    pub fn cursor(&self) -> u32 {
        (self.head - self.pass_start) as u32
    }

    /// Slots possibly read by in-flight or still-recording work
    pub fn slots_in_use(&self) -> u32 {
        (self.head - self.effective_tail()) as u32
    }

    /// Tail after every completed marker, without consuming them
    fn effective_tail(&self) -> u64 {
        self.in_flight
            .iter()
            .take_while(|region| region.sync_point.is_complete())
            .last()
            .map(|region| region.end)
            .unwrap_or(self.tail)
    }

    fn reclaim(&mut self) {
        while let Some(region) = self.in_flight.front() {
            if !region.sync_point.is_complete() {
                break;
            }
            self.tail = region.end;
            self.in_flight.pop_front();
        }
    }

    fn fits(&self, count: u32, tail: u64) -> bool {
        let count = count as u64;
        self.head - self.pass_start + count <= self.capacity as u64
            && self.head + count - tail <= self.capacity as u64
    }

    fn out_of_descriptors(&self, count: u32) -> Error {
        crate::engine_report!(
            "galaxy3d::rhi::LocalHeap",
            Error::OutOfDescriptors {
                heap_type: self.heap_type,
                requested: count,
                capacity: self.capacity,
            }
        )
    }

    /// Replace the heap instance, keeping the old one until the GPU is done with it
    fn switch_heap(&mut self) -> RollOver {
        let mut retire: Vec<SyncPointRef> = self
            .in_flight
            .drain(..)
            .map(|region| region.sync_point)
            .collect();
        if let Some(session) = &self.session {
            if self.head > self.session_start {
                retire.push(session.clone());
            }
        }

        let next = match self.retired.iter().position(RetiredHeap::is_reusable) {
            Some(index) => {
                self.stats.heaps_recycled += 1;
                self.retired.swap_remove(index).heap
            }
            None => {
                self.stats.heaps_created += 1;
                DescriptorHeap::new(self.heap_type, self.capacity)
            }
        };

        let previous = std::mem::replace(&mut self.heap, next);
        let outcome = RollOver::NewHeap {
            previous: previous.id(),
            current: self.heap.id(),
        };
        crate::engine_debug!(
            "galaxy3d::rhi::LocalHeap",
            "{:?} heap {} full, switched to {} ({} heaps retired)",
            self.heap_type,
            previous.id(),
            self.heap.id(),
            self.retired.len() + 1
        );
        self.retired.push(RetiredHeap { heap: previous, retire });

        self.pass_start = 0;
        self.head = 0;
        self.tail = 0;
        self.session_start = 0;
        outcome
    }
}

impl OnlineHeap for LocalOnlineHeap {
    fn heap(&self) -> &Arc<DescriptorHeap> {
        &self.heap
    }

    fn can_reserve(&self, count: u32) -> bool {
        self.fits(count, self.effective_tail())
    }

    fn reserve(&mut self, count: u32) -> Result<u32> {
        if count > self.capacity {
            return Err(self.out_of_descriptors(count));
        }
        self.reclaim();
        if !self.fits(count, self.tail) {
            return Err(Error::InvalidState(format!(
                "{} slots are not free in {}; roll over first",
                count,
                self.heap.id()
            )));
        }

        let base = self.cursor();
        self.head += count as u64;
        self.stats.reservations += 1;
        self.stats.slots_reserved += count as u64;
        Ok(base)
    }

    fn roll_over(&mut self, count: u32) -> Result<RollOver> {
        if count > self.capacity {
            return Err(self.out_of_descriptors(count));
        }
        self.reclaim();

        if self.policy == RollOverPolicy::Wrap {
            // Slots 0..count of the current pass must no longer be read
            let next_pass = self.pass_start + self.capacity as u64;
            if self.tail >= self.pass_start + count as u64 {
                self.pass_start = next_pass;
                self.head = next_pass;
                self.stats.loop_arounds += 1;
                crate::engine_trace!(
                    "galaxy3d::rhi::LocalHeap",
                    "{:?} heap {} looped around",
                    self.heap_type,
                    self.heap.id()
                );
                return Ok(RollOver::LoopedAround);
            }
        }

        Ok(self.switch_heap())
    }

    fn open_for_recording(&mut self, session: SyncPointRef) {
        self.reclaim();
        self.session = Some(session);
        self.session_start = self.head;
    }

    fn close_after_recording(&mut self) {
        if let Some(session) = self.session.take() {
            if self.head > self.session_start {
                self.in_flight.push_back(InFlightRegion {
                    end: self.head,
                    sync_point: session,
                });
            }
        }
        self.session_start = self.head;
    }
}

impl fmt::Debug for LocalOnlineHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalOnlineHeap")
            .field("heap", &self.heap.id())
            .field("heap_type", &self.heap_type)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor())
            .field("in_flight", &self.in_flight.len())
            .field("retired_heaps", &self.retired.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
