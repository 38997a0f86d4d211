//! Submission scheduler - the collaborator that executes finished payloads
//!
//! Contexts hand closed payloads to a `SubmissionScheduler`; the scheduler
//! resolves their signal sync points, executes them on its queues and reports
//! completion through the sync points and callbacks. `ManualScheduler` is the
//! in-process implementation: work retires only when its owner says so, which
//! lets tools and tests model arbitrarily lagging GPU completion.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::command_buffer::CommandBufferPool;
use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::queue::{GpuQueue, QueueType, RetireOutcome};

/// Accepts finished payloads and reports their completion
pub trait SubmissionScheduler: Send + Sync {
    /// Queue payloads behind previously submitted work, in order
    fn submit(&self, payloads: Vec<Payload>) -> Result<()>;

    /// Pool that retired command buffers are returned to
    fn command_buffer_pool(&self) -> Arc<CommandBufferPool>;
}

/// Scheduler whose queues retire work only on request
///
/// Completion callbacks run on the thread that retires their payload, after
/// the queues are unlocked, so they may submit more work.
pub struct ManualScheduler {
    queues: Mutex<Vec<GpuQueue>>,
    pool: Arc<CommandBufferPool>,
}

fn queue_index(queue: QueueType) -> usize {
    match queue {
        QueueType::Direct => 0,
        QueueType::Compute => 1,
        QueueType::Copy => 2,
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(QueueType::ALL.iter().map(|q| GpuQueue::new(*q)).collect()),
            pool: Arc::new(CommandBufferPool::new()),
        }
    }

    fn lock_queues(&self) -> MutexGuard<'_, Vec<GpuQueue>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Batches submitted to `queue` and not yet retired
    pub fn pending_count(&self, queue: QueueType) -> usize {
        self.lock_queues()[queue_index(queue)].pending_count()
    }

    /// Last fence value `queue` reached
    pub fn completed_fence(&self, queue: QueueType) -> u64 {
        self.lock_queues()[queue_index(queue)].fence().completed_value()
    }

    fn finish(&self, outcome: RetireOutcome) -> RetireOutcome {
        match outcome {
            RetireOutcome::Retired { fence_value, command_buffers } => {
                self.pool.recycle(command_buffers);
                RetireOutcome::Retired {
                    fence_value,
                    command_buffers: Vec::new(),
                }
            }
            RetireOutcome::Failed { fence_value, error, command_buffers } => {
                crate::engine_error!(
                    "galaxy3d::rhi::Scheduler",
                    "Payload at fence {} failed: {}",
                    fence_value,
                    error
                );
                self.pool.recycle(command_buffers);
                RetireOutcome::Failed {
                    fence_value,
                    error,
                    command_buffers: Vec::new(),
                }
            }
            other => other,
        }
    }

    /// Let `queue` retire its oldest batch
    ///
    /// Retired command buffers go back to the pool, so the returned outcome
    /// never carries any.
    pub fn retire_next(&self, queue: QueueType) -> Result<RetireOutcome> {
        let (outcome, callbacks) = {
            let mut queues = self.lock_queues();
            let gpu_queue = &mut queues[queue_index(queue)];
            let outcome = gpu_queue.retire_next()?;
            (outcome, gpu_queue.take_completed_callbacks())
        };
        let outcome = self.finish(outcome);
        for callback in callbacks {
            callback();
        }
        Ok(outcome)
    }

    /// Retire work on every queue until none can make progress
    ///
    /// Returns the number of batches retired or failed. Batches blocked on a
    /// sync point nobody will signal stay queued.
    pub fn retire_all(&self) -> Result<usize> {
        let mut retired = 0;
        loop {
            let mut progressed = false;
            for queue in QueueType::ALL {
                loop {
                    match self.retire_next(queue)? {
                        RetireOutcome::Retired { .. } | RetireOutcome::Failed { .. } => {
                            retired += 1;
                            progressed = true;
                        }
                        RetireOutcome::Idle | RetireOutcome::Blocked { .. } => break,
                    }
                }
            }
            if !progressed {
                return Ok(retired);
            }
        }
    }

    /// Simulate the GPU hanging on the oldest batch of `queue`
    ///
    /// Every sync point the batch signals fails with `Error::GpuTimeout`.
    /// Returns the reported error, or `None` if the queue was idle.
    pub fn fail_next_with_timeout(&self, queue: QueueType) -> Result<Option<Error>> {
        let mut queues = self.lock_queues();
        let gpu_queue = &mut queues[queue_index(queue)];
        let fence_value = gpu_queue.fence().last_signaled();
        let error = match gpu_queue.front_signal() {
            Some(sync_point) => Error::GpuTimeout { sync_point },
            None => Error::DeviceLost(format!(
                "{:?} queue stopped responding before fence {}",
                queue, fence_value
            )),
        };

        let outcome = gpu_queue.fail_next(error)?;
        drop(queues);
        match self.finish(outcome) {
            RetireOutcome::Failed { error, .. } => Ok(Some(error)),
            _ => Ok(None),
        }
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionScheduler for ManualScheduler {
    fn submit(&self, payloads: Vec<Payload>) -> Result<()> {
        let mut queues = self.lock_queues();
        for payload in payloads {
            let queue = payload.queue();
            let fence_value = queues[queue_index(queue)].submit(payload)?;
            crate::engine_trace!(
                "galaxy3d::rhi::Scheduler",
                "Payload submitted to {:?} queue at fence {}",
                queue,
                fence_value
            );
        }
        Ok(())
    }

    fn command_buffer_pool(&self) -> Arc<CommandBufferPool> {
        self.pool.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
