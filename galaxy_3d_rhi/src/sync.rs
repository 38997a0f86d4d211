//! Sync points - the only ordering primitive between contexts and queues
//!
//! A sync point is created unsignaled, handed to exactly one context to be
//! signaled, and shared (`Arc`) with any number of waiters. Once the
//! scheduler reports that the GPU work before the signal retired, the sync
//! point is complete forever.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::queue::QueueType;

static NEXT_SYNC_POINT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique sync point identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncPointId(pub u64);

impl fmt::Display for SyncPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who may wait on a sync point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPointKind {
    /// Only queues wait on it
    GpuOnly,
    /// Queues and CPU threads wait on it
    GpuAndCpu,
}

/// Shared handle to a sync point
pub type SyncPointRef = Arc<SyncPoint>;

/// Completion state, only ever moves forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPointState {
    /// Not yet submitted to a queue
    Pending,
    /// Submitted: completes when `queue` reaches `fence_value`
    Resolved { queue: QueueType, fence_value: u64 },
    /// GPU work before the signal retired
    Complete,
    /// GPU work before the signal never retired
    Failed(Error),
}

/// Cross-queue / cross-thread completion signal
pub struct SyncPoint {
    id: SyncPointId,
    kind: SyncPointKind,
    signal_claimed: AtomicBool,
    state: Mutex<SyncPointState>,
    condvar: Condvar,
}

impl SyncPoint {
    /// Create a new unsignaled sync point
    pub fn create(kind: SyncPointKind) -> SyncPointRef {
        Arc::new(Self {
            id: SyncPointId(NEXT_SYNC_POINT_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            signal_claimed: AtomicBool::new(false),
            state: Mutex::new(SyncPointState::Pending),
            condvar: Condvar::new(),
        })
    }

    pub fn id(&self) -> SyncPointId {
        self.id
    }

    pub fn kind(&self) -> SyncPointKind {
        self.kind
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncPointState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SyncPointState {
        self.lock_state().clone()
    }

    /// Whether the GPU work before the signal retired
    pub fn is_complete(&self) -> bool {
        matches!(*self.lock_state(), SyncPointState::Complete)
    }

    /// The error the sync point failed with, if any
    pub fn failure(&self) -> Option<Error> {
        match &*self.lock_state() {
            SyncPointState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Queue and fence value the sync point was resolved to
    pub fn resolved_fence(&self) -> Option<(QueueType, u64)> {
        match *self.lock_state() {
            SyncPointState::Resolved { queue, fence_value } => Some((queue, fence_value)),
            _ => None,
        }
    }

    /// Reserve the right to signal; a sync point is signaled by exactly one context
    pub(crate) fn claim_signal(&self) -> Result<()> {
        if self.signal_claimed.swap(true, Ordering::AcqRel) {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::SyncPoint",
                Error::InvalidState(format!("sync point {} is already signaled", self.id))
            ));
        }
        Ok(())
    }

    /// Bind the sync point to a queue fence value (called at submission)
    pub(crate) fn resolve(&self, queue: QueueType, fence_value: u64) -> Result<()> {
        let mut state = self.lock_state();
        match *state {
            SyncPointState::Pending => {
                *state = SyncPointState::Resolved { queue, fence_value };
                Ok(())
            }
            _ => Err(Error::InvalidState(format!(
                "sync point {} was already submitted",
                self.id
            ))),
        }
    }

    /// Mark the signal as retired and wake CPU waiters
    pub(crate) fn complete(&self) {
        let mut state = self.lock_state();
        if !matches!(*state, SyncPointState::Failed(_)) {
            *state = SyncPointState::Complete;
        }
        self.condvar.notify_all();
    }

    /// Mark the signal as never retiring and wake CPU waiters
    pub(crate) fn fail(&self, error: Error) {
        let mut state = self.lock_state();
        if !matches!(*state, SyncPointState::Complete) {
            *state = SyncPointState::Failed(error);
        }
        self.condvar.notify_all();
    }

    /// Block the calling thread until the sync point completes
    ///
    /// Only `GpuAndCpu` sync points can be waited on from the CPU. A timeout
    /// is reported as `Error::GpuTimeout` and is not recoverable.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        if self.kind == SyncPointKind::GpuOnly {
            return Err(crate::engine_report!(
                "galaxy3d::rhi::SyncPoint",
                Error::InvalidState(format!(
                    "sync point {} is GPU-only and cannot be waited on by the CPU",
                    self.id
                ))
            ));
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        loop {
            match &*state {
                SyncPointState::Complete => return Ok(()),
                SyncPointState::Failed(error) => return Err(error.clone()),
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                drop(state);
                return Err(crate::engine_report!(
                    "galaxy3d::rhi::SyncPoint",
                    Error::GpuTimeout { sync_point: self.id }
                ));
            }

            state = self
                .condvar
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPoint")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &*self.lock_state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
