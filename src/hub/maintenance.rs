//! Periodic hub work.
//!
//! One task owns every timer the hub needs, so all of them stop together
//! when the shutdown signal fires.
//!
//! ```text
//! heartbeat  (websocket.heartbeat_interval_ms)  → ping / terminate
//! flush      (backpressure.flush_interval_ms)   → drain queued messages
//! rate sweep (rate_limit.window_ms)             → lift bans, reset windows
//! stats      (observability.stats_interval_secs) → log line + gauges
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::RelayConfig;
use crate::hub::ConnectionManager;
use crate::observability::metrics;

/// Timer periods for the maintenance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceSchedule {
    pub heartbeat: Duration,
    pub flush: Duration,
    pub rate_sweep: Duration,
    pub stats: Duration,
}

impl MaintenanceSchedule {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            heartbeat: Duration::from_millis(config.websocket.heartbeat_interval_ms.max(1)),
            flush: Duration::from_millis(config.backpressure.flush_interval_ms.max(1)),
            rate_sweep: Duration::from_millis(config.rate_limit.window_ms.max(1)),
            stats: Duration::from_secs(config.observability.stats_interval_secs.max(1)),
        }
    }
}

fn ticker(period: Duration) -> Interval {
    // First tick one period from now, not immediately.
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Run until `shutdown` fires.
pub async fn run_maintenance(
    manager: Arc<ConnectionManager>,
    schedule: MaintenanceSchedule,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut heartbeat = ticker(schedule.heartbeat);
    let mut flush = ticker(schedule.flush);
    let mut rate_sweep = ticker(schedule.rate_sweep);
    let mut stats = ticker(schedule.stats);

    tracing::debug!(?schedule, "Maintenance loop started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = heartbeat.tick() => {
                let report = manager.heartbeat_tick();
                if report.timed_out > 0 {
                    tracing::info!(
                        pinged = report.pinged,
                        timed_out = report.timed_out,
                        "Heartbeat sweep terminated unresponsive clients"
                    );
                }
            }
            _ = flush.tick() => {
                manager.flush_all();
            }
            _ = rate_sweep.tick() => {
                manager.rate_limiter().sweep();
            }
            _ = stats.tick() => {
                log_stats(&manager);
            }
        }
    }

    tracing::debug!("Maintenance loop stopped");
}

fn log_stats(manager: &ConnectionManager) {
    let stats = manager.stats();
    metrics::set_active_clients(stats.clients);
    metrics::set_active_executions(stats.executions);
    metrics::set_queued_messages(stats.backpressure.queued_messages);
    tracing::info!(
        clients = stats.clients,
        executions = stats.executions,
        subscriptions = stats.subscriptions,
        messages_in = stats.messages_in,
        messages_out = stats.messages_out,
        rate_limited = stats.rate_limited,
        queued = stats.backpressure.queued_messages,
        dropped = stats.backpressure.dropped_messages,
        paused_clients = stats.backpressure.paused_clients,
        "Relay stats"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::mock::MockSocket;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timer_evicts_silent_client() {
        let manager = Arc::new(ConnectionManager::new(&RelayConfig::default()));
        let socket = MockSocket::new();
        let id = manager
            .register(socket.clone(), "127.0.0.1:1".parse().unwrap())
            .unwrap();
        manager.subscribe(id, "exec-1").unwrap();

        let (tx, rx) = broadcast::channel(1);
        let schedule = MaintenanceSchedule {
            heartbeat: Duration::from_secs(30),
            flush: Duration::from_millis(100),
            rate_sweep: Duration::from_secs(60),
            stats: Duration::from_secs(60),
        };
        let task = tokio::spawn(run_maintenance(manager.clone(), schedule, rx));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(socket.ping_count(), 1);
        assert!(manager.is_connected(id));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!manager.is_connected(id));
        assert!(manager.subscribers("exec-1").is_empty());

        tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn flush_timer_drains_recovered_client() {
        let manager = Arc::new(ConnectionManager::new(&RelayConfig::default()));
        let socket = MockSocket::new();
        let id = manager
            .register(socket.clone(), "127.0.0.1:1".parse().unwrap())
            .unwrap();
        socket.clear();
        socket.set_buffered(1);
        manager.send_to_client(id, &crate::protocol::OutboundMessage::pong());
        socket.set_buffered(0);

        let (tx, rx) = broadcast::channel(1);
        let schedule = MaintenanceSchedule::from_config(&RelayConfig::default());
        let task = tokio::spawn(run_maintenance(manager.clone(), schedule, rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(socket.types(), vec!["pong"]);

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
