//! Hot reload of the relay's config file.
//!
//! Editors often fire several events per save, so a reload is forwarded
//! only when the parsed config differs from the last one seen. An invalid
//! file is logged and ignored; the running config stays in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RelayConfig;

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<RelayConfig>,
}

/// Reload `path`, returning the config only if it changed since `last`.
fn reload_changed(path: &Path, last: &mut Option<RelayConfig>) -> Option<RelayConfig> {
    match load_config(path) {
        Ok(config) if last.as_ref() == Some(&config) => {
            tracing::debug!(path = ?path, "Config file touched without changes");
            None
        }
        Ok(config) => {
            *last = Some(config.clone());
            Some(config)
        }
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Rejected config reload, keeping current configuration");
            None
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

impl ConfigWatcher {
    /// Returns the watcher and the receiver reloaded configs arrive on.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RelayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Reloads stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let mut last = load_config(&path).ok();
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => {
                    if let Some(config) = reload_changed(&watched, &mut last) {
                        tracing::info!(path = ?watched, "Config file changed, applying");
                        if update_tx.send(config).is_err() {
                            tracing::debug!("Config receiver gone, dropping reload");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("relay-watch-{}-{name}.toml", std::process::id()));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn unchanged_file_is_not_forwarded() {
        let path = temp_config("same", "[rate_limit]\nmax_messages = 50\n");
        let mut last = None;

        let first = reload_changed(&path, &mut last).unwrap();
        assert_eq!(first.rate_limit.max_messages, 50);
        assert!(reload_changed(&path, &mut last).is_none());

        fs::write(&path, "[rate_limit]\nmax_messages = 70\n").unwrap();
        assert_eq!(reload_changed(&path, &mut last).unwrap().rate_limit.max_messages, 70);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn invalid_file_keeps_previous() {
        let path = temp_config("invalid", "[rate_limit]\nmax_messages = 50\n");
        let mut last = None;
        reload_changed(&path, &mut last).unwrap();

        fs::write(&path, "[backpressure]\nmax_queue_size = 0\n").unwrap();
        assert!(reload_changed(&path, &mut last).is_none());
        assert_eq!(last.unwrap().rate_limit.max_messages, 50);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn only_content_events_trigger_reload() {
        use notify::event::{AccessKind, CreateKind, ModifyKind};
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }
}
