//! Connection manager: the hub every socket and notifier talks to.
//!
//! # Responsibilities
//! - Register and clean up clients together with their rate and queue state
//! - Validate, rate limit and dispatch inbound frames
//! - Route outbound messages to one client, all clients or an execution's subscribers
//! - Detect dead peers through heartbeats
//! - Close every connection on shutdown
//!
//! # Design Decisions
//! - One mutex guards the client table and the subscription index, so a
//!   disconnect can never leave a dangling index entry
//! - Lock order is registry first, then rate or queue state
//! - Outbound frames are serialized once per send, whatever the fan-out

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::backpressure::{BackpressureHandler, BackpressureStats};
use crate::config::{RelayConfig, WebSocketConfig};
use crate::hub::client::{Client, ClientSnapshot};
use crate::hub::registry::Registry;
use crate::net::socket::{CLOSE_GOING_AWAY, CLOSE_TRY_AGAIN_LATER};
use crate::net::{ClientId, ClientSocket, ConnectionState, DisconnectReason, Liveness};
use crate::observability::metrics;
use crate::protocol::{ErrorCode, InboundMessage, OutboundMessage, Priority};
use crate::security::RateLimiter;

/// Hub-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("connection limit reached ({max})")]
    AtCapacity { max: usize },
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
}

impl HubError {
    /// WebSocket close code for a refused connection.
    pub fn close_code(&self) -> u16 {
        CLOSE_TRY_AGAIN_LATER
    }
}

/// Result of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub timed_out: usize,
}

/// Aggregate hub statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub clients: usize,
    pub executions: usize,
    pub subscriptions: usize,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub rate_limited: u64,
    pub banned_clients: usize,
    pub backpressure: BackpressureStats,
}

/// Subscriber count for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub subscribers: usize,
}

#[derive(Debug, Default)]
struct Totals {
    accepted: AtomicU64,
    rejected: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    rate_limited: AtomicU64,
}

pub struct ConnectionManager {
    registry: Mutex<Registry>,
    rate_limiter: RateLimiter,
    backpressure: BackpressureHandler,
    websocket: WebSocketConfig,
    max_connections: usize,
    totals: Totals,
}

impl ConnectionManager {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            backpressure: BackpressureHandler::new(config.backpressure.clone()),
            websocket: config.websocket.clone(),
            max_connections: config.listener.max_connections,
            totals: Totals::default(),
        }
    }

    pub fn websocket_config(&self) -> &WebSocketConfig {
        &self.websocket
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn backpressure(&self) -> &BackpressureHandler {
        &self.backpressure
    }

    /// Admit a new connection and greet it with a `connection` frame.
    pub fn register(
        &self,
        socket: Arc<dyn ClientSocket>,
        remote_addr: SocketAddr,
    ) -> Result<ClientId, HubError> {
        let id = ClientId::new();
        let clients = {
            let mut registry = self.registry.lock();
            if registry.len() >= self.max_connections {
                drop(registry);
                self.totals.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_connection_rejected("at_capacity");
                tracing::warn!(
                    remote_addr = %remote_addr,
                    max_connections = self.max_connections,
                    "Connection rejected, at capacity"
                );
                return Err(HubError::AtCapacity {
                    max: self.max_connections,
                });
            }

            let mut client = Client::new(id, socket, remote_addr);
            self.rate_limiter.register_client(id);
            self.backpressure.register_client(id);
            client.transition(ConnectionState::Open);
            registry.insert(client);
            registry.len()
        };

        self.totals.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_opened();
        metrics::set_active_clients(clients);
        tracing::info!(client_id = %id, remote_addr = %remote_addr, clients, "Client connected");

        self.send_to_client(id, &OutboundMessage::connection(id.as_uuid().to_string()));
        Ok(id)
    }

    /// Handle one inbound text frame.
    pub fn handle_message(&self, client_id: ClientId, text: &str) {
        if !self.admit(client_id, text.len()) {
            return;
        }

        match InboundMessage::parse(text) {
            Ok(message) => self.dispatch(client_id, message),
            Err(e) => {
                metrics::record_protocol_error(e.code().as_str());
                tracing::debug!(client_id = %client_id, error = %e, "Rejected inbound frame");
                self.send_error(client_id, e.code(), e.to_string(), None);
            }
        }
    }

    /// Binary frames are accepted only if they carry UTF-8 JSON.
    pub fn handle_binary(&self, client_id: ClientId, data: &[u8]) {
        match std::str::from_utf8(data) {
            Ok(text) => self.handle_message(client_id, text),
            Err(_) => {
                if !self.admit(client_id, data.len()) {
                    return;
                }
                metrics::record_protocol_error(ErrorCode::InvalidMessageFormat.as_str());
                self.send_error(
                    client_id,
                    ErrorCode::InvalidMessageFormat,
                    "binary frames must contain UTF-8 JSON",
                    None,
                );
            }
        }
    }

    /// Record activity and apply the rate limit. Returns false if the frame is rejected.
    fn admit(&self, client_id: ClientId, bytes: usize) -> bool {
        {
            let mut registry = self.registry.lock();
            let Some(client) = registry.get_mut(&client_id) else {
                return false;
            };
            client.record_inbound(bytes, Instant::now());
        }
        self.totals.messages_in.fetch_add(1, Ordering::Relaxed);
        metrics::record_inbound(bytes);

        let decision = self.rate_limiter.check_limit(client_id, bytes);
        if decision.allowed {
            return true;
        }

        let reason = decision.reason.map(|r| r.as_str()).unwrap_or("unknown");
        self.totals.rate_limited.fetch_add(1, Ordering::Relaxed);
        metrics::record_rate_limited(reason);
        self.send_error(
            client_id,
            ErrorCode::RateLimitExceeded,
            format!("rate limit exceeded ({reason})"),
            Some(decision.retry_after_ms),
        );
        false
    }

    fn dispatch(&self, client_id: ClientId, message: InboundMessage) {
        match message {
            InboundMessage::Ping {} => {
                self.send_to_client(client_id, &OutboundMessage::pong());
            }
            InboundMessage::Subscribe { execution_id } => {
                if let Err(e) = self.subscribe(client_id, &execution_id) {
                    tracing::debug!(execution_id, error = %e, "Subscribe from departed client ignored");
                }
            }
            InboundMessage::Unsubscribe { execution_id } => {
                if let Err(e) = self.unsubscribe(client_id, &execution_id) {
                    tracing::debug!(execution_id, error = %e, "Unsubscribe from departed client ignored");
                }
            }
            other @ (InboundMessage::AgentExecute {}
            | InboundMessage::AgentCancel {}
            | InboundMessage::AgentStatus {}) => {
                self.send_error(
                    client_id,
                    ErrorCode::NotImplemented,
                    format!("'{}' is not handled over this connection", other.kind()),
                    None,
                );
            }
        }
    }

    /// Mark a client alive after a protocol-level pong.
    pub fn record_pong(&self, client_id: ClientId) {
        if let Some(client) = self.registry.lock().get_mut(&client_id) {
            client.mark_alive(Instant::now());
        }
    }

    /// Returns whether a new subscription was created.
    pub fn subscribe(&self, client_id: ClientId, execution_id: &str) -> Result<bool, HubError> {
        let (added, executions) = {
            let mut registry = self.registry.lock();
            let added = registry
                .subscribe(&client_id, execution_id)
                .ok_or(HubError::UnknownClient(client_id))?;
            (added, registry.execution_count())
        };
        if added {
            metrics::set_active_executions(executions);
            tracing::debug!(client_id = %client_id, execution_id, "Subscribed");
        }
        Ok(added)
    }

    /// Returns whether a subscription was removed. Unknown subscriptions are a no-op.
    pub fn unsubscribe(&self, client_id: ClientId, execution_id: &str) -> Result<bool, HubError> {
        let (removed, executions) = {
            let mut registry = self.registry.lock();
            let removed = registry
                .unsubscribe(&client_id, execution_id)
                .ok_or(HubError::UnknownClient(client_id))?;
            (removed, registry.execution_count())
        };
        if removed {
            metrics::set_active_executions(executions);
            tracing::debug!(client_id = %client_id, execution_id, "Unsubscribed");
        }
        Ok(removed)
    }

    pub fn subscribers(&self, execution_id: &str) -> Vec<ClientId> {
        self.registry.lock().subscribers(execution_id).copied().collect()
    }

    pub fn is_subscribed(&self, client_id: ClientId, execution_id: &str) -> bool {
        self.registry.lock().is_subscribed(&client_id, execution_id)
    }

    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.registry.lock().contains(&client_id)
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn execution_count(&self) -> usize {
        self.registry.lock().execution_count()
    }

    pub fn socket(&self, client_id: &ClientId) -> Option<Arc<dyn ClientSocket>> {
        self.registry
            .lock()
            .get(client_id)
            .map(|client| Arc::clone(&client.socket))
    }

    pub fn send_to_client(&self, client_id: ClientId, message: &OutboundMessage) -> bool {
        self.send_to_client_with_priority(client_id, message, message.priority())
    }

    pub fn send_to_client_with_priority(
        &self,
        client_id: ClientId,
        message: &OutboundMessage,
        priority: Priority,
    ) -> bool {
        self.deliver(message, priority, |registry| {
            registry.contains(&client_id).then_some(client_id).into_iter().collect()
        }) > 0
    }

    /// Send to every connected client. Returns how many accepted it.
    pub fn broadcast_to_all(&self, message: &OutboundMessage) -> usize {
        self.broadcast_to_all_with_priority(message, message.priority())
    }

    pub fn broadcast_to_all_with_priority(&self, message: &OutboundMessage, priority: Priority) -> usize {
        self.deliver(message, priority, Registry::ids)
    }

    /// Send to the subscribers of one execution. Returns how many accepted it.
    pub fn broadcast_to_execution(&self, execution_id: &str, message: &OutboundMessage) -> usize {
        self.broadcast_to_execution_with_priority(execution_id, message, message.priority())
    }

    pub fn broadcast_to_execution_with_priority(
        &self,
        execution_id: &str,
        message: &OutboundMessage,
        priority: Priority,
    ) -> usize {
        self.deliver(message, priority, |registry| {
            registry.subscribers(execution_id).copied().collect()
        })
    }

    fn deliver<F>(&self, message: &OutboundMessage, priority: Priority, targets: F) -> usize
    where
        F: FnOnce(&Registry) -> Vec<ClientId>,
    {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(kind = %message.kind(), error = %e, "Failed to serialize outbound message");
                return 0;
            }
        };
        let kind = message.kind();

        let mut registry = self.registry.lock();
        let mut accepted = 0;
        for id in targets(&*registry) {
            let Some(client) = registry.get_mut(&id) else {
                continue;
            };
            if client.state != ConnectionState::Open {
                continue;
            }
            let socket = Arc::clone(&client.socket);
            if self
                .backpressure
                .enqueue_message(
                    id,
                    socket.as_ref(),
                    kind,
                    message.execution_id.as_deref(),
                    Arc::clone(&frame),
                    priority,
                )
            {
                client.record_outbound(frame.len());
                accepted += 1;
            }
        }
        drop(registry);

        self.totals
            .messages_out
            .fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }

    fn send_error(
        &self,
        client_id: ClientId,
        code: ErrorCode,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) {
        self.send_to_client(client_id, &OutboundMessage::error(code, message, retry_after_ms));
    }

    /// Raise an execution's already-queued messages so nothing sent next at
    /// `priority` can overtake them.
    pub fn promote_execution(&self, execution_id: &str, priority: Priority) -> usize {
        self.backpressure.promote_execution(execution_id, priority)
    }

    /// Drain a client's queue. Called when its writer has caught up.
    pub fn flush_client(&self, client_id: ClientId) -> usize {
        match self.socket(&client_id) {
            Some(socket) => self.backpressure.flush_client(client_id, socket.as_ref()),
            None => 0,
        }
    }

    /// Periodic sweep over every client with queued messages.
    pub fn flush_all(&self) -> usize {
        self.backpressure.flush_all(|id| self.socket(id))
    }

    /// Remove a client and all of its state. Returns false if it was already gone.
    pub fn disconnect(&self, client_id: ClientId, reason: DisconnectReason) -> bool {
        let (mut client, remaining, executions, discarded) = {
            let mut registry = self.registry.lock();
            let Some(client) = registry.remove(&client_id) else {
                return false;
            };
            self.rate_limiter.remove_client(&client_id);
            let discarded = self.backpressure.remove_client(&client_id);
            (client, registry.len(), registry.execution_count(), discarded)
        };

        // Also ends the session tasks of a client stuck in a close handshake.
        client.socket.terminate();
        client.transition(ConnectionState::Closed);

        let duration = client.connected_instant.elapsed();
        metrics::record_connection_closed(reason.as_str(), duration.as_secs_f64());
        metrics::set_active_clients(remaining);
        metrics::set_active_executions(executions);
        tracing::info!(
            client_id = %client_id,
            reason = %reason,
            duration_ms = duration.as_millis() as u64,
            messages_in = client.counters.messages_in,
            messages_out = client.counters.messages_out,
            subscriptions = client.subscriptions.len(),
            discarded,
            "Client disconnected"
        );
        true
    }

    /// One heartbeat sweep: ping live clients, terminate unresponsive ones.
    pub fn heartbeat_tick(&self) -> HeartbeatReport {
        let max_missed = self.websocket.max_missed_heartbeats.max(1);
        let mut report = HeartbeatReport::default();
        let mut expired = Vec::new();
        {
            let mut registry = self.registry.lock();
            for client in registry.clients_mut() {
                if client.state != ConnectionState::Open {
                    continue;
                }
                if client.liveness == Liveness::AwaitingPong {
                    client.missed_heartbeats += 1;
                    if client.missed_heartbeats >= max_missed {
                        expired.push((client.id, Arc::clone(&client.socket)));
                        continue;
                    }
                }
                client.liveness = Liveness::AwaitingPong;
                if let Err(e) = client.socket.ping() {
                    tracing::debug!(client_id = %client.id, error = %e, "Heartbeat ping failed");
                }
                report.pinged += 1;
            }
        }

        for (id, socket) in expired {
            tracing::warn!(client_id = %id, "Heartbeat timeout, terminating connection");
            socket.terminate();
            if self.disconnect(id, DisconnectReason::HeartbeatTimeout) {
                report.timed_out += 1;
            }
        }
        report
    }

    /// Close every connection with 1001, then force whatever is left after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        let sockets: Vec<Arc<dyn ClientSocket>> = {
            let mut registry = self.registry.lock();
            registry
                .clients_mut()
                .filter_map(|client| {
                    client
                        .transition(ConnectionState::Closing)
                        .then(|| Arc::clone(&client.socket))
                })
                .collect()
        };
        tracing::info!(clients = sockets.len(), "Closing client connections");
        for socket in &sockets {
            socket.close(CLOSE_GOING_AWAY, "Server shutting down");
        }

        let deadline = Instant::now() + timeout;
        while self.client_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.registry.lock().ids();
        if !remaining.is_empty() {
            tracing::warn!(clients = remaining.len(), "Terminating connections that did not close in time");
        }
        for id in remaining {
            self.disconnect(id, DisconnectReason::Shutdown);
        }
    }

    /// Apply the hot-reloadable parts of a new config.
    pub fn apply_config(&self, config: &RelayConfig) {
        self.rate_limiter.update_config(config.rate_limit.clone());
        tracing::info!(
            max_messages = config.rate_limit.max_messages,
            window_ms = config.rate_limit.window_ms,
            "Rate limits updated"
        );
    }

    pub fn stats(&self) -> HubStats {
        let (clients, executions, subscriptions) = {
            let registry = self.registry.lock();
            (
                registry.len(),
                registry.execution_count(),
                registry.subscription_count(),
            )
        };
        HubStats {
            clients,
            executions,
            subscriptions,
            connections_accepted: self.totals.accepted.load(Ordering::Relaxed),
            connections_rejected: self.totals.rejected.load(Ordering::Relaxed),
            messages_in: self.totals.messages_in.load(Ordering::Relaxed),
            messages_out: self.totals.messages_out.load(Ordering::Relaxed),
            rate_limited: self.totals.rate_limited.load(Ordering::Relaxed),
            banned_clients: self.rate_limiter.banned_clients(),
            backpressure: self.backpressure.stats(),
        }
    }

    pub fn client_snapshots(&self) -> Vec<ClientSnapshot> {
        let registry = self.registry.lock();
        let mut snapshots: Vec<ClientSnapshot> = registry
            .clients()
            .map(|client| client.snapshot(self.backpressure.client_stats(&client.id)))
            .collect();
        snapshots.sort_by_key(|s| s.connected_at);
        snapshots
    }

    pub fn execution_snapshots(&self) -> Vec<ExecutionSnapshot> {
        let registry = self.registry.lock();
        let mut snapshots: Vec<ExecutionSnapshot> = registry
            .executions()
            .map(|(execution_id, subscribers)| ExecutionSnapshot {
                execution_id: execution_id.clone(),
                subscribers: subscribers.len(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
        snapshots
    }
}
