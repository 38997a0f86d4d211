//! Payloads - batches of work handed to the submission scheduler
//!
//! A payload runs in three stages on its queue: wait for every wait sync
//! point, execute its command buffers in order, then signal its sync points
//! and run its completion callbacks. A context accumulates payloads in
//! `PendingPayloads`, which starts a new payload whenever an addition would
//! break that stage order.

use std::fmt;

use crate::command_buffer::CommandBuffer;
use crate::error::{Error, Result};
use crate::queue::QueueType;
use crate::sync::SyncPointRef;

/// Callback invoked once the payload retired on the GPU
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Ordered batch of waits, command buffers, signals and callbacks for one queue
pub struct Payload {
    queue: QueueType,
    waits: Vec<SyncPointRef>,
    command_buffers: Vec<CommandBuffer>,
    signals: Vec<SyncPointRef>,
    callbacks: Vec<CompletionCallback>,
}

/// A payload taken apart by the scheduler
pub(crate) struct PayloadParts {
    pub waits: Vec<SyncPointRef>,
    pub command_buffers: Vec<CommandBuffer>,
    pub signals: Vec<SyncPointRef>,
    pub callbacks: Vec<CompletionCallback>,
}

impl Payload {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            waits: Vec::new(),
            command_buffers: Vec::new(),
            signals: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    pub fn waits(&self) -> &[SyncPointRef] {
        &self.waits
    }

    pub fn command_buffers(&self) -> &[CommandBuffer] {
        &self.command_buffers
    }

    pub fn signals(&self) -> &[SyncPointRef] {
        &self.signals
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
            && self.command_buffers.is_empty()
            && self.signals.is_empty()
            && self.callbacks.is_empty()
    }

    /// Waits run first, so they can only be added before any other stage
    pub fn can_add_wait(&self) -> bool {
        self.command_buffers.is_empty() && self.signals.is_empty() && self.callbacks.is_empty()
    }

    pub fn can_add_command_buffer(&self) -> bool {
        self.signals.is_empty() && self.callbacks.is_empty()
    }

    pub fn add_wait(&mut self, sync_point: SyncPointRef) -> Result<()> {
        if !self.can_add_wait() {
            return Err(Error::InvalidState(format!(
                "wait on sync point {} would run after work already in the payload",
                sync_point.id()
            )));
        }
        self.waits.push(sync_point);
        Ok(())
    }

    pub fn add_command_buffer(&mut self, buffer: CommandBuffer) -> Result<()> {
        if buffer.queue() != self.queue {
            return Err(Error::InvalidState(format!(
                "{:?} command buffer cannot be submitted to the {:?} queue",
                buffer.queue(),
                self.queue
            )));
        }
        if !self.can_add_command_buffer() {
            return Err(Error::InvalidState(
                "command buffer would run after the payload's signals".to_string(),
            ));
        }
        self.command_buffers.push(buffer);
        Ok(())
    }

    pub fn add_signal(&mut self, sync_point: SyncPointRef) {
        self.signals.push(sync_point);
    }

    pub fn add_callback(&mut self, callback: CompletionCallback) {
        self.callbacks.push(callback);
    }

    pub(crate) fn into_parts(self) -> PayloadParts {
        PayloadParts {
            waits: self.waits,
            command_buffers: self.command_buffers,
            signals: self.signals,
            callbacks: self.callbacks,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("queue", &self.queue)
            .field("waits", &self.waits.iter().map(|sp| sp.id()).collect::<Vec<_>>())
            .field("command_buffers", &self.command_buffers.len())
            .field("signals", &self.signals.iter().map(|sp| sp.id()).collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Payloads accumulated by a context between two flushes
#[derive(Debug)]
pub struct PendingPayloads {
    queue: QueueType,
    payloads: Vec<Payload>,
}

impl PendingPayloads {
    pub fn new(queue: QueueType) -> Self {
        Self {
            queue,
            payloads: Vec::new(),
        }
    }

    /// Last payload if `accepts` allows it, else a fresh one
    fn current(&mut self, accepts: impl Fn(&Payload) -> bool) -> &mut Payload {
        let reuse = self.payloads.last().map(|p| accepts(p)).unwrap_or(false);
        if !reuse {
            self.payloads.push(Payload::new(self.queue));
        }
        let last = self.payloads.len() - 1;
        &mut self.payloads[last]
    }

    pub fn wait(&mut self, sync_point: SyncPointRef) -> Result<()> {
        self.current(Payload::can_add_wait).add_wait(sync_point)
    }

    pub fn command_buffer(&mut self, buffer: CommandBuffer) -> Result<()> {
        self.current(Payload::can_add_command_buffer)
            .add_command_buffer(buffer)
    }

    pub fn signal(&mut self, sync_point: SyncPointRef) {
        self.current(|_| true).add_signal(sync_point);
    }

    pub fn callback(&mut self, callback: CompletionCallback) {
        self.current(|_| true).add_callback(callback);
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.iter().all(Payload::is_empty)
    }

    /// Take every accumulated payload, dropping empty ones
    pub fn take(&mut self) -> Vec<Payload> {
        std::mem::take(&mut self.payloads)
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
