//! Priority-ordered outbound queue for a single client.
//!
//! Entries are kept sorted by descending priority; equal priorities keep
//! arrival order. Byte accounting tracks the serialized frame length.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::Instant;

use crate::protocol::{MessageKind, Priority};

/// One serialized message waiting for a writable socket.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Monotonic per-handler sequence number.
    pub id: u64,
    pub kind: MessageKind,
    pub execution_id: Option<Arc<str>>,
    pub frame: Arc<str>,
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Failed send attempts so far.
    pub retries: u32,
}

impl QueuedMessage {
    pub fn size(&self) -> usize {
        self.frame.len()
    }
}

#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: VecDeque<QueuedMessage>,
    bytes: usize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Insert behind every entry of equal or higher priority.
    pub fn push(&mut self, message: QueuedMessage) {
        let at = self
            .entries
            .partition_point(|m| m.priority >= message.priority);
        self.bytes += message.size();
        self.entries.insert(at, message);
    }

    /// Put a message back ahead of everything of equal or lower priority.
    pub fn push_front(&mut self, message: QueuedMessage) {
        let at = self
            .entries
            .partition_point(|m| m.priority > message.priority);
        self.bytes += message.size();
        self.entries.insert(at, message);
    }

    /// Raise every entry of `execution_id` below `priority` to it. Raised
    /// entries keep their arrival order and land behind existing entries of
    /// that priority. Returns how many moved.
    pub fn promote(&mut self, execution_id: &str, priority: Priority) -> usize {
        let (raised, kept): (VecDeque<QueuedMessage>, VecDeque<QueuedMessage>) =
            self.entries.drain(..).partition(|m| {
                m.priority < priority && m.execution_id.as_deref() == Some(execution_id)
            });
        let mut raised: Vec<QueuedMessage> = raised.into();
        self.entries = kept;
        if raised.is_empty() {
            return 0;
        }

        raised.sort_by_key(|m| m.id);
        let at = self.entries.partition_point(|m| m.priority >= priority);
        let moved = raised.len();
        for (offset, mut message) in raised.into_iter().enumerate() {
            message.priority = priority;
            self.entries.insert(at + offset, message);
        }
        moved
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        let message = self.entries.pop_front()?;
        self.bytes -= message.size();
        Some(message)
    }

    /// Remove the oldest entry of the lowest priority below `threshold`.
    pub fn evict_one_below(&mut self, threshold: Priority) -> Option<QueuedMessage> {
        let lowest = self.entries.back()?.priority;
        if lowest >= threshold {
            return None;
        }
        let at = self.entries.partition_point(|m| m.priority > lowest);
        let message = self.entries.remove(at)?;
        self.bytes -= message.size();
        Some(message)
    }

    /// Count and bytes of entries that could be evicted for a never-drop message.
    pub fn evictable(&self, threshold: Priority) -> (usize, usize) {
        self.entries
            .iter()
            .rev()
            .take_while(|m| m.priority < threshold)
            .fold((0, 0), |(n, b), m| (n + 1, b + m.size()))
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.bytes = 0;
        n
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }
}
