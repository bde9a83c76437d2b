//! Process-wide log buffer.
//!
//! Logs accumulate until either `max_batch_size` messages are buffered or
//! `batch_timeout_ms` has passed since the first one arrived. A flush groups
//! the buffer by execution, keeping the order in which executions first
//! appeared and the order of messages within each execution.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::BatchingConfig;
use crate::protocol::OutboundMessage;

/// Buffered messages for one execution, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionBatch {
    pub execution_id: String,
    pub messages: Vec<OutboundMessage>,
}

impl ExecutionBatch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// A single message goes out as itself; more are wrapped in a `batch` envelope.
    pub fn into_message(mut self) -> Option<OutboundMessage> {
        match self.messages.len() {
            0 => None,
            1 => self.messages.pop(),
            _ => Some(OutboundMessage::batch(self.execution_id, self.messages)),
        }
    }
}

#[derive(Debug, Default)]
struct BatchBuffer {
    entries: Vec<OutboundMessage>,
    first_at: Option<Instant>,
}

impl BatchBuffer {
    fn take(&mut self) -> Vec<ExecutionBatch> {
        self.first_at = None;
        group_by_execution(std::mem::take(&mut self.entries))
    }
}

fn group_by_execution(entries: Vec<OutboundMessage>) -> Vec<ExecutionBatch> {
    let mut groups: Vec<ExecutionBatch> = Vec::new();
    for message in entries {
        let execution_id = message.execution_id.clone().unwrap_or_default();
        match groups.iter_mut().find(|g| g.execution_id == execution_id) {
            Some(group) => group.messages.push(message),
            None => groups.push(ExecutionBatch {
                execution_id,
                messages: vec![message],
            }),
        }
    }
    groups
}

pub struct Batcher {
    buffer: Mutex<BatchBuffer>,
    max_batch_size: usize,
    timeout: Duration,
    wakeup: Notify,
}

impl Batcher {
    pub fn new(config: &BatchingConfig) -> Self {
        Self {
            buffer: Mutex::new(BatchBuffer::default()),
            max_batch_size: config.max_batch_size.max(1),
            timeout: Duration::from_millis(config.batch_timeout_ms),
            wakeup: Notify::new(),
        }
    }

    /// Buffer a message. Returns the flushed groups if the size threshold was reached.
    pub fn push(&self, message: OutboundMessage) -> Option<Vec<ExecutionBatch>> {
        let mut buffer = self.buffer.lock();
        let first = buffer.entries.is_empty();
        if first {
            buffer.first_at = Some(Instant::now());
        }
        buffer.entries.push(message);

        if buffer.entries.len() >= self.max_batch_size {
            return Some(buffer.take());
        }
        drop(buffer);

        if first {
            self.wakeup.notify_one();
        }
        None
    }

    /// Take everything buffered.
    pub fn drain(&self) -> Vec<ExecutionBatch> {
        self.buffer.lock().take()
    }

    /// Take everything buffered if the timeout has passed at `now`.
    pub fn drain_due(&self, now: Instant) -> Vec<ExecutionBatch> {
        let mut buffer = self.buffer.lock();
        match buffer.first_at {
            Some(first) if now >= first + self.timeout => buffer.take(),
            _ => Vec::new(),
        }
    }

    /// When the current buffer must be flushed, if anything is buffered.
    pub fn deadline(&self) -> Option<Instant> {
        self.buffer.lock().first_at.map(|first| first + self.timeout)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after a message lands in an empty buffer.
    pub async fn notified(&self) {
        self.wakeup.notified().await
    }
}
