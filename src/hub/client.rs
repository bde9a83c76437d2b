//! Per-connection record held in the registry.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::backpressure::ClientQueueStats;
use crate::net::{ClientId, ClientSocket, ConnectionState, Liveness};

/// Traffic counters for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientCounters {
    pub messages_in: u64,
    pub bytes_in: u64,
    pub messages_out: u64,
    pub bytes_out: u64,
}

pub struct Client {
    pub id: ClientId,
    pub socket: Arc<dyn ClientSocket>,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub connected_instant: Instant,
    pub last_activity: Instant,
    pub state: ConnectionState,
    pub liveness: Liveness,
    pub missed_heartbeats: u32,
    pub subscriptions: HashSet<String>,
    pub counters: ClientCounters,
}

impl Client {
    pub fn new(id: ClientId, socket: Arc<dyn ClientSocket>, remote_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            socket,
            remote_addr,
            connected_at: Utc::now(),
            connected_instant: now,
            last_activity: now,
            state: ConnectionState::Connecting,
            liveness: Liveness::Alive,
            missed_heartbeats: 0,
            subscriptions: HashSet::new(),
            counters: ClientCounters::default(),
        }
    }

    /// Apply a state transition if it is legal.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Any traffic from the peer proves it is alive.
    pub fn mark_alive(&mut self, now: Instant) {
        self.last_activity = now;
        self.liveness = Liveness::Alive;
        self.missed_heartbeats = 0;
    }

    pub fn record_inbound(&mut self, bytes: usize, now: Instant) {
        self.counters.messages_in += 1;
        self.counters.bytes_in += bytes as u64;
        self.mark_alive(now);
    }

    pub fn record_outbound(&mut self, bytes: usize) {
        self.counters.messages_out += 1;
        self.counters.bytes_out += bytes as u64;
    }

    pub fn snapshot(&self, queue: Option<ClientQueueStats>) -> ClientSnapshot {
        let now = Instant::now();
        let mut subscriptions: Vec<String> = self.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        ClientSnapshot {
            id: self.id,
            remote_addr: self.remote_addr.to_string(),
            connected_at: self.connected_at,
            connected_secs: now.duration_since(self.connected_instant).as_secs(),
            idle_ms: now.duration_since(self.last_activity).as_millis() as u64,
            state: self.state,
            liveness: self.liveness,
            missed_heartbeats: self.missed_heartbeats,
            subscriptions,
            counters: self.counters,
            queue,
        }
    }
}

/// Read-only view of a client for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub id: ClientId,
    pub remote_addr: String,
    pub connected_at: DateTime<Utc>,
    pub connected_secs: u64,
    pub idle_ms: u64,
    pub state: ConnectionState,
    pub liveness: Liveness,
    pub missed_heartbeats: u32,
    pub subscriptions: Vec<String>,
    pub counters: ClientCounters,
    pub queue: Option<ClientQueueStats>,
}
