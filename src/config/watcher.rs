//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::{load_config, ConfigError};
use crate::config::store::ConfigStore;

/// Reload the file at `path` into `store`.
///
/// An invalid file leaves the current configuration in place.
pub fn reload(path: &Path, store: &ConfigStore) -> Result<(), ConfigError> {
    let config = load_config(path)?;
    store.replace(config);
    tracing::info!(path = %path.display(), "Configuration reloaded");
    Ok(())
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    store: ConfigStore,
}

impl ConfigWatcher {
    pub fn new(path: &Path, store: ConfigStore) -> Self {
        Self {
            path: path.to_path_buf(),
            store,
        }
    }

    /// Start watching the file in a background thread.
    ///
    /// Watching stops when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let store = self.store.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = %path.display(), "Config file change detected, reloading");
                        if let Err(e) = reload(&path, &store) {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reload_replaces_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xmppd.toml");
        fs::write(&path, "[node]\nname = \"reloaded@host\"\n").unwrap();

        let store = ConfigStore::default();
        reload(&path, &store).unwrap();
        assert_eq!(store.current().node.name, "reloaded@host");
    }

    #[test]
    fn invalid_reload_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xmppd.toml");
        fs::write(&path, "[node]\nname = \"\"\n").unwrap();

        let store = ConfigStore::default();
        assert!(reload(&path, &store).is_err());
        assert_eq!(store.current().node.name, "xmppd@localhost");
    }
}
