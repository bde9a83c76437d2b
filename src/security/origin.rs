//! WebSocket origin allow-list.
//!
//! Origins are compared in their serialized `scheme://host[:port]` form, so
//! `http://Localhost:80/` and `http://localhost` are the same origin.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use url::Url;

use crate::config::WebSocketConfig;

#[derive(Debug, Default)]
struct OriginRules {
    allowed: HashSet<String>,
    allow_all: bool,
    allow_missing: bool,
}

/// Hot-swappable origin check for upgrade requests.
#[derive(Debug)]
pub struct OriginPolicy {
    rules: ArcSwap<OriginRules>,
}

/// Normalize an origin string; `None` if it is not a tuple origin.
pub fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn build_rules(config: &WebSocketConfig) -> OriginRules {
    let allowed = config
        .allowed_origins
        .iter()
        .filter_map(|o| normalize_origin(o))
        .collect();
    OriginRules {
        allowed,
        allow_all: config.allowed_origins.is_empty(),
        allow_missing: config.allow_missing_origin,
    }
}

impl OriginPolicy {
    pub fn new(config: &WebSocketConfig) -> Self {
        Self {
            rules: ArcSwap::from_pointee(build_rules(config)),
        }
    }

    /// Whether an upgrade with this `Origin` header may proceed.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        let rules = self.rules.load();
        match origin {
            None => rules.allow_missing,
            Some(_) if rules.allow_all => true,
            Some(origin) => normalize_origin(origin).is_some_and(|o| rules.allowed.contains(&o)),
        }
    }

    pub fn update(&self, config: &WebSocketConfig) {
        self.rules.store(Arc::new(build_rules(config)));
        tracing::info!(origins = config.allowed_origins.len(), "Origin allow-list updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(origins: &[&str], allow_missing: bool) -> OriginPolicy {
        OriginPolicy::new(&WebSocketConfig {
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            allow_missing_origin: allow_missing,
            ..WebSocketConfig::default()
        })
    }

    #[test]
    fn normalizes_case_default_port_and_path() {
        assert_eq!(
            normalize_origin("HTTP://LocalHost:80/dashboard").as_deref(),
            Some("http://localhost")
        );
        assert_eq!(
            normalize_origin("https://app.example.com:8443").as_deref(),
            Some("https://app.example.com:8443")
        );
        assert_eq!(normalize_origin("null"), None);
    }

    #[test]
    fn only_listed_origins_pass() {
        let policy = policy(&["http://localhost:3000"], false);
        assert!(policy.is_allowed(Some("http://localhost:3000")));
        assert!(policy.is_allowed(Some("http://localhost:3000/")));
        assert!(!policy.is_allowed(Some("http://localhost:3001")));
        assert!(!policy.is_allowed(Some("https://evil.example")));
        assert!(!policy.is_allowed(Some("null")));
        assert!(!policy.is_allowed(None));
    }

    #[test]
    fn empty_list_allows_any_origin() {
        let policy = policy(&[], false);
        assert!(policy.is_allowed(Some("https://anything.example")));
        assert!(!policy.is_allowed(None));
    }

    #[test]
    fn missing_origin_follows_flag() {
        assert!(policy(&["http://localhost:3000"], true).is_allowed(None));
    }

    #[test]
    fn update_swaps_rules() {
        let policy = policy(&["http://localhost:3000"], true);
        policy.update(&WebSocketConfig {
            allowed_origins: vec!["https://dash.example.com".into()],
            allow_missing_origin: false,
            ..WebSocketConfig::default()
        });
        assert!(!policy.is_allowed(Some("http://localhost:3000")));
        assert!(policy.is_allowed(Some("https://dash.example.com")));
        assert!(!policy.is_allowed(None));
    }
}
