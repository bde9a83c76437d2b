//! Per-client outbound queueing with priority-aware dropping.
//!
//! # Responsibilities
//! - Send directly while a client's socket keeps up
//! - Queue by priority once the socket reports buffered output
//! - Enforce hard count and byte bounds per client
//! - Drain queues in priority order when the socket recovers
//!
//! # Design Decisions
//! - Queue state exists only between `register_client` and `remove_client`
//! - A message is never sent around a non-empty queue, so per-client order
//!   within a priority is preserved
//! - Never-drop messages make room by evicting the oldest entries of the
//!   lowest priority; if that cannot make room they are dropped too

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::backpressure::queue::{MessageQueue, QueuedMessage};
use crate::config::BackpressureConfig;
use crate::net::{ClientId, ClientSocket, SocketError};
use crate::observability::metrics;
use crate::protocol::{MessageKind, Priority};

/// Backpressure state for one client.
#[derive(Debug, Default)]
pub struct ClientQueue {
    queue: MessageQueue,
    paused: bool,
    dropped: u64,
    total: u64,
    sent: u64,
}

impl ClientQueue {
    fn drop_messages(&mut self, n: usize, reason: &'static str) {
        self.dropped += n as u64;
        metrics::record_messages_dropped(reason, n as u64);
    }
}

/// Per-client queue statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientQueueStats {
    pub queued: usize,
    pub queued_bytes: usize,
    pub paused: bool,
    pub dropped: u64,
    pub total: u64,
    pub sent: u64,
    pub oldest_age_ms: Option<u64>,
}

/// Aggregate statistics across all clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackpressureStats {
    pub clients: usize,
    pub paused_clients: usize,
    pub queued_messages: usize,
    pub queued_bytes: usize,
    pub total_messages: u64,
    pub dropped_messages: u64,
}

pub struct BackpressureHandler {
    clients: DashMap<ClientId, ClientQueue>,
    config: BackpressureConfig,
    next_id: AtomicU64,
}

impl BackpressureHandler {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            clients: DashMap::new(),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    pub fn register_client(&self, client_id: ClientId) {
        self.clients.entry(client_id).or_default();
    }

    /// Forget a client; anything still queued is discarded.
    pub fn remove_client(&self, client_id: &ClientId) -> usize {
        match self.clients.remove(client_id) {
            Some((_, mut state)) => {
                let discarded = state.queue.clear();
                if discarded > 0 {
                    state.drop_messages(discarded, "client_removed");
                }
                discarded
            }
            None => 0,
        }
    }

    /// Deliver or queue one serialized message. Returns false if it was dropped.
    pub fn enqueue_message(
        &self,
        client_id: ClientId,
        socket: &dyn ClientSocket,
        kind: MessageKind,
        execution_id: Option<&str>,
        frame: Arc<str>,
        priority: Priority,
    ) -> bool {
        let Some(mut state) = self.clients.get_mut(&client_id) else {
            return false;
        };
        state.total += 1;

        if !socket.is_open() {
            state.drop_messages(1, "socket_closed");
            return false;
        }

        let writable = socket.buffered_amount() == 0;
        if writable && state.queue.is_empty() {
            match socket.send(Arc::clone(&frame)) {
                Ok(()) => {
                    state.sent += 1;
                    state.paused = false;
                    return true;
                }
                Err(SocketError::Full) => state.paused = true,
                Err(SocketError::Closed) => {
                    state.drop_messages(1, "socket_closed");
                    return false;
                }
            }
        } else {
            state.paused = !writable;
        }

        let message = QueuedMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            execution_id: execution_id.map(Arc::from),
            frame,
            priority,
            enqueued_at: Instant::now(),
            retries: 0,
        };
        if !self.make_room(client_id, &mut state, &message) {
            return false;
        }
        state.queue.push(message);

        // The socket recovered but older messages are still waiting.
        if writable && !state.paused {
            self.flush_state(client_id, &mut state, socket);
        }
        true
    }

    fn fits(&self, queue: &MessageQueue, size: usize) -> bool {
        queue.len() + 1 <= self.config.max_queue_size
            && queue.bytes() + size <= self.config.max_queue_bytes
    }

    /// Returns false (and counts the drop) if `message` cannot be queued.
    fn make_room(&self, client_id: ClientId, state: &mut ClientQueue, message: &QueuedMessage) -> bool {
        let size = message.size();
        if self.fits(&state.queue, size) {
            return true;
        }

        let threshold = self.config.priority_threshold;
        if message.priority < threshold {
            let count_util = state.queue.len() as f64 / self.config.max_queue_size.max(1) as f64;
            let byte_util = state.queue.bytes() as f64 / self.config.max_queue_bytes.max(1) as f64;
            let utilization = count_util.max(byte_util);
            if utilization > self.config.drop_threshold {
                tracing::warn!(
                    client_id = %client_id,
                    kind = %message.kind,
                    priority = message.priority,
                    queued = state.queue.len(),
                    utilization,
                    "Dropping message, queue saturated"
                );
            } else {
                tracing::warn!(
                    client_id = %client_id,
                    kind = %message.kind,
                    size,
                    queued_bytes = state.queue.bytes(),
                    "Dropping message, exceeds remaining capacity"
                );
            }
            state.drop_messages(1, "queue_full");
            return false;
        }

        let (evictable, evictable_bytes) = state.queue.evictable(threshold);
        let count_after = state.queue.len() - evictable + 1;
        let bytes_after = state.queue.bytes() - evictable_bytes + size;
        if count_after > self.config.max_queue_size || bytes_after > self.config.max_queue_bytes {
            tracing::error!(
                client_id = %client_id,
                kind = %message.kind,
                priority = message.priority,
                size,
                "Dropping high-priority message, no evictable room"
            );
            state.drop_messages(1, "no_evictable_room");
            return false;
        }

        let mut evicted = 0usize;
        while !self.fits(&state.queue, size) {
            if state.queue.evict_one_below(threshold).is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            state.drop_messages(evicted, "evicted");
            tracing::debug!(
                client_id = %client_id,
                evicted,
                kind = %message.kind,
                "Evicted low-priority messages for high-priority delivery"
            );
        }
        true
    }

    /// Raise one execution's queued messages to `priority` in every client's
    /// queue, keeping their order. Anything enqueued for it afterwards at that
    /// priority queues behind them.
    pub fn promote_execution(&self, execution_id: &str, priority: Priority) -> usize {
        let moved: usize = self
            .clients
            .iter_mut()
            .map(|mut state| state.queue.promote(execution_id, priority))
            .sum();
        if moved > 0 {
            tracing::debug!(execution_id, moved, priority, "Promoted queued messages");
        }
        moved
    }

    /// Drain up to one flush batch. Returns the number of messages sent.
    pub fn flush_client(&self, client_id: ClientId, socket: &dyn ClientSocket) -> usize {
        match self.clients.get_mut(&client_id) {
            Some(mut state) => self.flush_state(client_id, &mut state, socket),
            None => 0,
        }
    }

    fn flush_state(&self, client_id: ClientId, state: &mut ClientQueue, socket: &dyn ClientSocket) -> usize {
        if state.queue.is_empty() {
            return 0;
        }

        if !socket.is_open() {
            let discarded = state.queue.clear();
            state.drop_messages(discarded, "socket_closed");
            state.paused = false;
            tracing::debug!(client_id = %client_id, discarded, "Discarded queue for closed socket");
            return 0;
        }

        if socket.buffered_amount() > 0 {
            state.paused = true;
            return 0;
        }
        state.paused = false;

        let mut sent = 0;
        while sent < self.config.flush_batch_size {
            let Some(mut message) = state.queue.pop_front() else {
                break;
            };
            match socket.send(Arc::clone(&message.frame)) {
                Ok(()) => {
                    sent += 1;
                    state.sent += 1;
                }
                Err(SocketError::Full) => {
                    state.queue.push_front(message);
                    state.paused = true;
                    break;
                }
                Err(SocketError::Closed) => {
                    message.retries += 1;
                    if message.retries > self.config.max_retries {
                        tracing::warn!(
                            client_id = %client_id,
                            kind = %message.kind,
                            retries = self.config.max_retries,
                            "Dropping message after send retries"
                        );
                        state.drop_messages(1, "retries_exhausted");
                    } else {
                        state.queue.push_front(message);
                    }
                    break;
                }
            }
            if socket.buffered_amount() > 0 {
                state.paused = true;
                break;
            }
        }

        if sent > 0 {
            tracing::trace!(client_id = %client_id, sent, remaining = state.queue.len(), "Flushed queue");
        }
        sent
    }

    /// Flush every client with queued messages. Returns total messages sent.
    pub fn flush_all<F>(&self, lookup: F) -> usize
    where
        F: Fn(&ClientId) -> Option<Arc<dyn ClientSocket>>,
    {
        let pending: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|entry| !entry.queue.is_empty())
            .map(|entry| *entry.key())
            .collect();

        pending
            .into_iter()
            .filter_map(|id| lookup(&id).map(|socket| (id, socket)))
            .map(|(id, socket)| self.flush_client(id, socket.as_ref()))
            .sum()
    }

    pub fn has_queued(&self, client_id: &ClientId) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|state| !state.queue.is_empty())
    }

    pub fn client_stats(&self, client_id: &ClientId) -> Option<ClientQueueStats> {
        let state = self.clients.get(client_id)?;
        let now = Instant::now();
        let oldest_age_ms = state
            .queue
            .iter()
            .map(|m| m.enqueued_at)
            .min()
            .map(|t| now.duration_since(t).as_millis() as u64);
        Some(ClientQueueStats {
            queued: state.queue.len(),
            queued_bytes: state.queue.bytes(),
            paused: state.paused,
            dropped: state.dropped,
            total: state.total,
            sent: state.sent,
            oldest_age_ms,
        })
    }

    pub fn stats(&self) -> BackpressureStats {
        self.clients
            .iter()
            .fold(BackpressureStats::default(), |mut acc, entry| {
                acc.clients += 1;
                acc.paused_clients += usize::from(entry.paused);
                acc.queued_messages += entry.queue.len();
                acc.queued_bytes += entry.queue.bytes();
                acc.total_messages += entry.total;
                acc.dropped_messages += entry.dropped;
                acc
            })
    }
}
