//! Process-wide configuration store.
//!
//! Readers call [`ConfigStore::current`] on every pass instead of caching a copy, so a
//! reload between two passes is observed by the second one.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::ServiceConfig;

/// Shared, atomically swappable configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<ArcSwap<ServiceConfig>>,
}

impl ConfigStore {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Snapshot of the configuration as of now.
    pub fn current(&self) -> Arc<ServiceConfig> {
        self.inner.load_full()
    }

    /// Atomically replace the configuration.
    pub fn replace(&self, config: ServiceConfig) {
        self.inner.store(Arc::new(config));
    }

    /// Apply an edit to a copy of the current configuration and publish it.
    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut ServiceConfig),
    {
        let mut next = ServiceConfig::clone(&self.current());
        edit(&mut next);
        self.replace(next);
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}
