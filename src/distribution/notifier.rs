//! Execution event fan-out.
//!
//! # Responsibilities
//! - Expose one typed method per execution event
//! - Route system status to every client and everything else to subscribers
//! - Batch log lines and keep them ahead of the execution's terminal event
//!
//! # Design Decisions
//! - All notify methods are synchronous; only the batch timer is async
//! - A terminal event first raises the execution's already-queued messages to
//!   the terminal priority, then drains the whole buffer with that
//!   execution's logs at the same priority, then sends the outcome. A
//!   backed-up client's priority queue cannot reorder logs behind it

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};

use crate::config::BatchingConfig;
use crate::distribution::batcher::{Batcher, ExecutionBatch};
use crate::hub::ConnectionManager;
use crate::observability::metrics;
use crate::protocol::outbound::{
    CostUpdate, ExecutionCompleted, ExecutionFailed, ExecutionStarted, LogEntry, OutboundPayload,
    ProgressUpdate, SystemStatus,
};
use crate::protocol::{OutboundMessage, Priority};

pub struct Notifier {
    manager: Arc<ConnectionManager>,
    batcher: Batcher,
    batching: bool,
}

impl Notifier {
    pub fn new(manager: Arc<ConnectionManager>, config: &BatchingConfig) -> Self {
        Self {
            manager,
            batcher: Batcher::new(config),
            batching: config.enabled,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn notify_execution_started(
        &self,
        execution_id: &str,
        agent_id: impl Into<String>,
        agent_name: Option<String>,
        input: Option<Value>,
    ) -> usize {
        let payload = OutboundPayload::ExecutionStarted(ExecutionStarted {
            agent_id: agent_id.into(),
            agent_name,
            input,
        });
        self.to_execution(execution_id, payload)
    }

    /// Buffer a log line. Returns the clients reached by any flush this triggered.
    pub fn stream_log(&self, execution_id: &str, entry: LogEntry) -> usize {
        let message =
            OutboundMessage::for_execution(execution_id, OutboundPayload::ExecutionLog(entry));
        if !self.batching {
            return self.manager.broadcast_to_execution(execution_id, &message);
        }
        match self.batcher.push(message) {
            Some(groups) => self.send_groups(groups, None),
            None => 0,
        }
    }

    pub fn update_execution_progress(&self, execution_id: &str, update: ProgressUpdate) -> usize {
        self.to_execution(execution_id, OutboundPayload::ExecutionProgress(update))
    }

    pub fn notify_execution_completed(&self, execution_id: &str, outcome: ExecutionCompleted) -> usize {
        self.terminal(execution_id, OutboundPayload::ExecutionCompleted(outcome))
    }

    pub fn notify_execution_failed(&self, execution_id: &str, failure: ExecutionFailed) -> usize {
        self.terminal(execution_id, OutboundPayload::ExecutionFailed(failure))
    }

    pub fn update_execution_cost(&self, execution_id: &str, cost: CostUpdate) -> usize {
        self.to_execution(execution_id, OutboundPayload::CostUpdated(cost))
    }

    /// System status goes to every connected client.
    pub fn broadcast_system_status(&self, status: SystemStatus) -> usize {
        let message = OutboundMessage::new(OutboundPayload::SystemStatus(status));
        self.manager.broadcast_to_all(&message)
    }

    /// Send whatever is buffered right now.
    pub fn flush_pending(&self) -> usize {
        self.send_groups(self.batcher.drain(), None)
    }

    pub fn pending(&self) -> usize {
        self.batcher.len()
    }

    fn to_execution(&self, execution_id: &str, payload: OutboundPayload) -> usize {
        let message = OutboundMessage::for_execution(execution_id, payload);
        self.manager.broadcast_to_execution(execution_id, &message)
    }

    fn terminal(&self, execution_id: &str, payload: OutboundPayload) -> usize {
        let message = OutboundMessage::for_execution(execution_id, payload);
        let priority = message.priority();
        self.manager.promote_execution(execution_id, priority);
        self.send_groups(self.batcher.drain(), Some((execution_id, priority)));
        let reached = self.manager.broadcast_to_execution(execution_id, &message);
        tracing::debug!(execution_id, kind = %message.kind(), reached, "Terminal event delivered");
        reached
    }

    /// Deliver flushed groups; `elevate` raises one execution's group to a priority.
    fn send_groups(&self, groups: Vec<ExecutionBatch>, elevate: Option<(&str, Priority)>) -> usize {
        let mut reached = 0;
        for group in groups {
            let execution_id = group.execution_id.clone();
            let size = group.len();
            let Some(message) = group.into_message() else {
                continue;
            };
            let priority = match elevate {
                Some((id, priority)) if id == execution_id => priority.max(message.priority()),
                _ => message.priority(),
            };
            if size > 1 {
                metrics::record_batch_flushed(size);
            }
            reached += self
                .manager
                .broadcast_to_execution_with_priority(&execution_id, &message, priority);
        }
        reached
    }

    /// Own the batch timer until shutdown, then flush what is left.
    pub async fn run_flush_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let deadline = self.batcher.deadline();
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.batcher.notified() => {}
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let groups = self.batcher.drain_due(Instant::now());
                    self.send_groups(groups, None);
                }
            }
        }

        let remaining = self.flush_pending();
        tracing::debug!(remaining, "Batch flush loop stopped");
    }
}
