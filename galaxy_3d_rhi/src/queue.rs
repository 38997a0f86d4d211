//! GPU queues - hardware execution lanes consuming payloads in order
//!
//! Each queue owns a monotonically advancing fence. Submitting a payload
//! assigns it the next fence value and resolves its signal sync points to
//! that value; retiring it advances the fence and completes them. A queue
//! never retires a payload while one of its waits is incomplete, which is how
//! cross-queue ordering is expressed.

use std::collections::VecDeque;
use std::fmt;

use crate::command_buffer::CommandBuffer;
use crate::error::{Error, Result};
use crate::payload::{CompletionCallback, Payload};
use crate::sync::{SyncPointId, SyncPointRef};

/// Hardware queue family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics, compute and copy
    Direct,
    /// Compute and copy
    Compute,
    /// Copy only
    Copy,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Direct, QueueType::Compute, QueueType::Copy];

    /// Whether draws can be recorded for this queue
    pub fn supports_graphics(&self) -> bool {
        *self == QueueType::Direct
    }

    /// Whether dispatches can be recorded for this queue
    pub fn supports_compute(&self) -> bool {
        *self != QueueType::Copy
    }
}

/// Monotonic counter of retired work on one queue
#[derive(Debug, Clone, Default)]
pub struct Fence {
    last_signaled: u64,
    completed: u64,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next value to be signaled
    pub fn next_value(&mut self) -> u64 {
        self.last_signaled += 1;
        self.last_signaled
    }

    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    pub fn completed_value(&self) -> u64 {
        self.completed
    }

    pub fn is_reached(&self, value: u64) -> bool {
        self.completed >= value
    }

    /// Record that the GPU reached `value`
    pub fn advance_to(&mut self, value: u64) -> Result<()> {
        if value < self.completed || value > self.last_signaled {
            return Err(Error::BackendError(format!(
                "fence cannot move to {} (completed {}, last signaled {})",
                value, self.completed, self.last_signaled
            )));
        }
        self.completed = value;
        Ok(())
    }
}

/// A payload resolved to a fence value, waiting on its queue
struct SubmittedBatch {
    fence_value: u64,
    waits: Vec<SyncPointRef>,
    command_buffers: Vec<CommandBuffer>,
    signals: Vec<SyncPointRef>,
    callbacks: Vec<CompletionCallback>,
}

/// What happened when the queue tried to retire its oldest batch
#[derive(Debug)]
pub enum RetireOutcome {
    /// Nothing is queued
    Idle,
    /// The oldest batch waits on an incomplete sync point
    Blocked { waiting_on: SyncPointId },
    /// The oldest batch retired; its command buffers can be recycled
    Retired {
        fence_value: u64,
        command_buffers: Vec<CommandBuffer>,
    },
    /// The oldest batch can never retire; its signals were failed with `error`
    Failed {
        fence_value: u64,
        error: Error,
        command_buffers: Vec<CommandBuffer>,
    },
}

/// One hardware execution lane
///
/// Callbacks of retired batches are held until `take_completed_callbacks`,
/// so the owner decides where they run.
pub struct GpuQueue {
    queue_type: QueueType,
    fence: Fence,
    pending: VecDeque<SubmittedBatch>,
    completed_callbacks: Vec<CompletionCallback>,
}

impl GpuQueue {
    pub fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            fence: Fence::new(),
            pending: VecDeque::new(),
            completed_callbacks: Vec::new(),
        }
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Number of submitted batches not yet retired
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queue a payload behind everything already submitted
    ///
    /// Returns the fence value the payload will signal.
    pub fn submit(&mut self, payload: Payload) -> Result<u64> {
        if payload.queue() != self.queue_type {
            return Err(Error::InvalidState(format!(
                "{:?} payload submitted to the {:?} queue",
                payload.queue(),
                self.queue_type
            )));
        }

        let parts = payload.into_parts();
        let fence_value = self.fence.next_value();
        for signal in &parts.signals {
            signal.resolve(self.queue_type, fence_value)?;
        }

        self.pending.push_back(SubmittedBatch {
            fence_value,
            waits: parts.waits,
            command_buffers: parts.command_buffers,
            signals: parts.signals,
            callbacks: parts.callbacks,
        });
        Ok(fence_value)
    }

    /// Retire the oldest batch if its waits are satisfied
    ///
    /// A wait on a failed sync point fails the batch with the same error.
    pub fn retire_next(&mut self) -> Result<RetireOutcome> {
        let Some(front) = self.pending.front() else {
            return Ok(RetireOutcome::Idle);
        };

        if let Some(error) = front.waits.iter().find_map(|wait| wait.failure()) {
            return self.fail_next(error);
        }
        if let Some(blocking) = front.waits.iter().find(|wait| !wait.is_complete()) {
            return Ok(RetireOutcome::Blocked {
                waiting_on: blocking.id(),
            });
        }

        let Some(batch) = self.pending.pop_front() else {
            return Ok(RetireOutcome::Idle);
        };
        self.fence.advance_to(batch.fence_value)?;
        for signal in &batch.signals {
            signal.complete();
        }
        self.completed_callbacks.extend(batch.callbacks);

        Ok(RetireOutcome::Retired {
            fence_value: batch.fence_value,
            command_buffers: batch.command_buffers,
        })
    }

    /// Drop the oldest batch without executing it, failing its signals
    ///
    /// A timeout fails each signal with a timeout naming that signal; any other
    /// error is shared by all of them. Callbacks are not run.
    pub fn fail_next(&mut self, error: Error) -> Result<RetireOutcome> {
        let Some(batch) = self.pending.pop_front() else {
            return Ok(RetireOutcome::Idle);
        };

        // The fence still moves so later batches keep their ordering
        self.fence.advance_to(batch.fence_value)?;
        for signal in &batch.signals {
            let failure = match error {
                Error::GpuTimeout { .. } => Error::GpuTimeout {
                    sync_point: signal.id(),
                },
                ref other => other.clone(),
            };
            signal.fail(failure);
        }

        Ok(RetireOutcome::Failed {
            fence_value: batch.fence_value,
            error,
            command_buffers: batch.command_buffers,
        })
    }

    /// Callbacks of every batch retired since the last call, in retirement order
    pub fn take_completed_callbacks(&mut self) -> Vec<CompletionCallback> {
        std::mem::take(&mut self.completed_callbacks)
    }

    /// Id of the oldest batch's first signal, used to name timeouts
    pub(crate) fn front_signal(&self) -> Option<SyncPointId> {
        self.pending
            .front()
            .and_then(|batch| batch.signals.first().map(|signal| signal.id()))
    }
}

impl fmt::Debug for GpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuQueue")
            .field("queue_type", &self.queue_type)
            .field("fence", &self.fence)
            .field("pending", &self.pending.len())
            .field("completed_callbacks", &self.completed_callbacks.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
