//! Per-client inbound rate limiting.
//!
//! # Responsibilities
//! - Enforce a sustained message and byte budget per rolling window
//! - Enforce a short burst allowance on top of the sustained budget
//! - Escalate repeated violations into a temporary ban
//!
//! # Design Decisions
//! - Fixed windows that restart on the first message after they elapse
//! - Rejected messages do not consume budget
//! - A window counts at most one violation, so only overflow repeated across
//!   windows escalates to a ban
//! - Limits live behind `ArcSwap` so a config reload applies to the next check
//! - Only inbound traffic is limited; outbound sends never pass through here

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::net::ClientId;

/// Which limit rejected a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    Banned,
    MessageRate,
    ByteRate,
    Burst,
}

impl RateLimitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitReason::Banned => "banned",
            RateLimitReason::MessageRate => "message_rate",
            RateLimitReason::ByteRate => "byte_rate",
            RateLimitReason::Burst => "burst",
        }
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub reason: Option<RateLimitReason>,
    /// Milliseconds until the violated window (or ban) ends. Zero when allowed.
    pub retry_after_ms: u64,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_ms: 0,
        }
    }

    fn deny(reason: RateLimitReason, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_ms: retry_after_ms.max(1),
        }
    }
}

/// Counters for one client.
#[derive(Debug, Clone)]
struct RateState {
    window_start: Instant,
    messages: u32,
    bytes: u64,
    burst_start: Instant,
    burst_count: u32,
    violations: u32,
    /// Start of the last window that counted a violation.
    window_violated: Option<Instant>,
    burst_violated: Option<Instant>,
    banned_until: Option<Instant>,
}

impl RateState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            messages: 0,
            bytes: 0,
            burst_start: now,
            burst_count: 0,
            violations: 0,
            window_violated: None,
            burst_violated: None,
            banned_until: None,
        }
    }

    /// Count a violation unless the violated window already has one.
    fn record_violation(&mut self, reason: RateLimitReason) -> bool {
        let (mark, start) = match reason {
            RateLimitReason::Burst => (&mut self.burst_violated, self.burst_start),
            _ => (&mut self.window_violated, self.window_start),
        };
        if *mark == Some(start) {
            return false;
        }
        *mark = Some(start);
        self.violations += 1;
        true
    }

    fn roll_windows(&mut self, config: &RateLimitConfig, now: Instant) {
        if now.duration_since(self.window_start) >= Duration::from_millis(config.window_ms) {
            self.window_start = now;
            self.messages = 0;
            self.bytes = 0;
        }
        if now.duration_since(self.burst_start) >= Duration::from_millis(config.burst_window_ms) {
            self.burst_start = now;
            self.burst_count = 0;
        }
    }

    /// Returns true if an expired ban was lifted.
    fn lift_expired_ban(&mut self, now: Instant) -> bool {
        match self.banned_until {
            Some(until) if now >= until => {
                *self = RateState::new(now);
                true
            }
            _ => false,
        }
    }
}

fn remaining_ms(deadline: Instant, now: Instant) -> u64 {
    deadline.saturating_duration_since(now).as_millis() as u64
}

/// Inbound rate limiter keyed by client.
pub struct RateLimiter {
    clients: DashMap<ClientId, RateState>,
    config: ArcSwap<RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            clients: DashMap::new(),
            config: ArcSwap::from_pointee(config),
        }
    }

    /// Check and record one inbound message of `byte_size` bytes.
    pub fn check_limit(&self, client_id: ClientId, byte_size: usize) -> RateDecision {
        self.check_limit_at(client_id, byte_size, Instant::now())
    }

    pub(crate) fn check_limit_at(
        &self,
        client_id: ClientId,
        byte_size: usize,
        now: Instant,
    ) -> RateDecision {
        let config = self.config.load();
        if !config.enabled {
            return RateDecision::allow();
        }

        let mut state = self
            .clients
            .entry(client_id)
            .or_insert_with(|| RateState::new(now));

        if let Some(until) = state.banned_until {
            if now < until {
                return RateDecision::deny(RateLimitReason::Banned, remaining_ms(until, now));
            }
            state.lift_expired_ban(now);
            tracing::info!(client_id = %client_id, "Rate limit ban expired");
        }

        state.roll_windows(&config, now);

        let byte_size = byte_size as u64;
        let window_end = state.window_start + Duration::from_millis(config.window_ms);
        let burst_end = state.burst_start + Duration::from_millis(config.burst_window_ms);

        let violation = if state.messages + 1 > config.max_messages {
            Some((RateLimitReason::MessageRate, remaining_ms(window_end, now)))
        } else if state.bytes + byte_size > config.max_bytes {
            Some((RateLimitReason::ByteRate, remaining_ms(window_end, now)))
        } else if config.burst_messages > 0 && state.burst_count + 1 > config.burst_messages {
            Some((RateLimitReason::Burst, remaining_ms(burst_end, now)))
        } else {
            None
        };

        match violation {
            None => {
                state.messages += 1;
                state.bytes += byte_size;
                state.burst_count += 1;
                RateDecision::allow()
            }
            Some((reason, retry_after_ms)) => {
                let counted = state.record_violation(reason);
                if counted && state.violations >= config.violation_threshold {
                    let ban = Duration::from_millis(config.ban_duration_ms);
                    state.banned_until = Some(now + ban);
                    tracing::warn!(
                        client_id = %client_id,
                        violations = state.violations,
                        ban_ms = config.ban_duration_ms,
                        "Client banned for repeated rate limit violations"
                    );
                    return RateDecision::deny(RateLimitReason::Banned, config.ban_duration_ms);
                }
                tracing::debug!(
                    client_id = %client_id,
                    reason = reason.as_str(),
                    violations = state.violations,
                    "Rate limit exceeded"
                );
                RateDecision::deny(reason, retry_after_ms)
            }
        }
    }

    /// Start tracking a newly connected client with fresh windows.
    pub fn register_client(&self, client_id: ClientId) {
        if self.config.load().enabled {
            self.clients.insert(client_id, RateState::new(Instant::now()));
        }
    }

    /// Drop all state for a disconnected client.
    pub fn remove_client(&self, client_id: &ClientId) {
        self.clients.remove(client_id);
    }

    /// Periodic cleanup: lift expired bans and reset elapsed windows.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    pub(crate) fn sweep_at(&self, now: Instant) {
        let config = self.config.load();
        let mut lifted = 0usize;
        for mut entry in self.clients.iter_mut() {
            if entry.lift_expired_ban(now) {
                lifted += 1;
            } else if entry.banned_until.is_none() {
                entry.roll_windows(&config, now);
            }
        }
        if lifted > 0 {
            tracing::debug!(lifted, "Rate limit sweep lifted expired bans");
        }
    }

    /// Swap in new limits; existing counters are kept.
    pub fn update_config(&self, config: RateLimitConfig) {
        self.config.store(Arc::new(config));
    }

    pub fn config(&self) -> Arc<RateLimitConfig> {
        self.config.load_full()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn banned_clients(&self) -> usize {
        let now = Instant::now();
        self.clients
            .iter()
            .filter(|s| s.banned_until.is_some_and(|until| until > now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sustained_only() -> RateLimitConfig {
        RateLimitConfig {
            burst_messages: 0,
            violation_threshold: 1_000,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn rejects_over_message_rate_then_recovers() {
        let limiter = RateLimiter::new(sustained_only());
        let client = ClientId::new();
        let start = Instant::now();

        for i in 1..=150u64 {
            let now = start + Duration::from_millis(i * 100);
            let decision = limiter.check_limit_at(client, 20, now);
            if i <= 120 {
                assert!(decision.allowed, "message {i} should pass");
            } else {
                assert!(!decision.allowed, "message {i} should be rejected");
                assert_eq!(decision.reason, Some(RateLimitReason::MessageRate));
                assert!(decision.retry_after_ms > 0);
            }
        }

        // The window opened with the first message, 100 ms after `start`.
        let after = start + Duration::from_millis(100 + 60_000);
        assert!(limiter.check_limit_at(client, 20, after).allowed);
    }

    #[test]
    fn default_limits_recover_after_one_window_of_overflow() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let client = ClientId::new();
        let start = Instant::now();

        let mut allowed = 0;
        for i in 0..150u64 {
            let decision = limiter.check_limit_at(client, 20, start + Duration::from_millis(i * 390));
            if decision.allowed {
                allowed += 1;
            } else {
                assert_eq!(decision.reason, Some(RateLimitReason::MessageRate));
                assert!(decision.retry_after_ms > 0);
            }
        }
        assert_eq!(allowed, 120);
        assert_eq!(limiter.banned_clients(), 0);

        let decision = limiter.check_limit_at(client, 20, start + Duration::from_secs(120));
        assert!(decision.allowed);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn retry_after_counts_down_to_window_end() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_messages: 1,
            ..sustained_only()
        });
        let client = ClientId::new();
        let start = Instant::now();

        assert!(limiter.check_limit_at(client, 1, start).allowed);
        let decision = limiter.check_limit_at(client, 1, start + Duration::from_millis(15_000));
        assert_eq!(decision.retry_after_ms, 45_000);
    }

    #[test]
    fn byte_budget_is_enforced() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_bytes: 100,
            ..sustained_only()
        });
        let client = ClientId::new();
        let now = Instant::now();

        assert!(limiter.check_limit_at(client, 60, now).allowed);
        assert!(limiter.check_limit_at(client, 40, now).allowed);
        let decision = limiter.check_limit_at(client, 1, now);
        assert_eq!(decision.reason, Some(RateLimitReason::ByteRate));
    }

    #[test]
    fn rejected_messages_do_not_consume_budget() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_bytes: 100,
            ..sustained_only()
        });
        let client = ClientId::new();
        let now = Instant::now();

        assert!(!limiter.check_limit_at(client, 500, now).allowed);
        assert!(limiter.check_limit_at(client, 100, now).allowed);
    }

    #[test]
    fn burst_limit_resets_after_burst_window() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst_messages: 5,
            violation_threshold: 1_000,
            ..RateLimitConfig::default()
        });
        let client = ClientId::new();
        let start = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_limit_at(client, 10, start).allowed);
        }
        let decision = limiter.check_limit_at(client, 10, start + Duration::from_millis(400));
        assert_eq!(decision.reason, Some(RateLimitReason::Burst));
        assert_eq!(decision.retry_after_ms, 600);

        assert!(limiter
            .check_limit_at(client, 10, start + Duration::from_millis(1_000))
            .allowed);
    }

    #[test]
    fn violations_repeated_across_windows_ban_until_expiry() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window_ms: 1_000,
            max_messages: 1,
            burst_messages: 0,
            violation_threshold: 3,
            ban_duration_ms: 10_000,
            ..RateLimitConfig::default()
        });
        let client = ClientId::new();
        let start = Instant::now();

        // Two windows of overflow: many rejections, two violations.
        for window in 0..2u64 {
            let at = start + Duration::from_millis(window * 1_000);
            assert!(limiter.check_limit_at(client, 1, at).allowed);
            for _ in 0..5 {
                assert_eq!(
                    limiter.check_limit_at(client, 1, at).reason,
                    Some(RateLimitReason::MessageRate)
                );
            }
        }
        assert_eq!(limiter.banned_clients(), 0);

        let third = start + Duration::from_millis(2_000);
        assert!(limiter.check_limit_at(client, 1, third).allowed);
        let banned = limiter.check_limit_at(client, 1, third);
        assert_eq!(banned.reason, Some(RateLimitReason::Banned));
        assert_eq!(banned.retry_after_ms, 10_000);
        assert_eq!(limiter.banned_clients(), 1);

        let during = limiter.check_limit_at(client, 1, third + Duration::from_millis(4_000));
        assert_eq!(during.reason, Some(RateLimitReason::Banned));
        assert_eq!(during.retry_after_ms, 6_000);

        // Ban expiry also resets the window and violations.
        let after = third + Duration::from_millis(10_000);
        assert!(limiter.check_limit_at(client, 1, after).allowed);
        assert_eq!(
            limiter.check_limit_at(client, 1, after).reason,
            Some(RateLimitReason::MessageRate)
        );
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_messages: 1,
            ..sustained_only()
        });
        let now = Instant::now();
        let (a, b) = (ClientId::new(), ClientId::new());

        assert!(limiter.check_limit_at(a, 1, now).allowed);
        assert!(!limiter.check_limit_at(a, 1, now).allowed);
        assert!(limiter.check_limit_at(b, 1, now).allowed);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            max_messages: 1,
            ..RateLimitConfig::default()
        });
        let client = ClientId::new();
        for _ in 0..10 {
            assert!(limiter.check_limit(client, 1).allowed);
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn update_config_applies_to_next_check() {
        let limiter = RateLimiter::new(sustained_only());
        let client = ClientId::new();
        let now = Instant::now();
        assert!(limiter.check_limit_at(client, 1, now).allowed);

        limiter.update_config(RateLimitConfig {
            max_messages: 1,
            ..sustained_only()
        });
        assert!(!limiter.check_limit_at(client, 1, now).allowed);
        assert_eq!(limiter.config().max_messages, 1);
    }

    #[test]
    fn sweep_lifts_expired_bans_and_remove_forgets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_messages: 0,
            burst_messages: 0,
            violation_threshold: 1,
            ban_duration_ms: 1_000,
            ..RateLimitConfig::default()
        });
        let client = ClientId::new();
        let start = Instant::now();

        assert!(!limiter.check_limit_at(client, 1, start).allowed);
        limiter.sweep_at(start + Duration::from_millis(1_500));
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.remove_client(&client);
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
