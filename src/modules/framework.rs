//! Module framework contract and the in-process catalog.

use std::collections::HashSet;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use thiserror::Error;

use crate::config::ModuleArgs;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("unknown module `{0}`")]
    Unknown(String),

    #[error("module `{module}` is already running on `{host}`")]
    AlreadyRunning { host: String, module: String },

    #[error("module `{module}` is not running on `{host}`")]
    NotRunning { host: String, module: String },

    #[error("module `{module}` failed on `{host}`: {reason}")]
    Failed {
        host: String,
        module: String,
        reason: String,
    },
}

/// Starts and stops feature modules on behalf of the registry.
pub trait ModuleFramework: Send + Sync {
    fn start_module<'a>(
        &'a self,
        host: &'a str,
        module: &'a str,
        args: &'a ModuleArgs,
    ) -> BoxFuture<'a, Result<(), ModuleError>>;

    fn stop_module<'a>(&'a self, host: &'a str, module: &'a str) -> BoxFuture<'a, Result<(), ModuleError>>;
}

/// Identifies one module instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ModuleKey {
    pub host: String,
    pub module: String,
}

impl ModuleKey {
    pub fn new(host: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            module: module.into(),
        }
    }
}

impl std::fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.module)
    }
}

/// In-process framework that keeps track of active module instances.
///
/// Accepts any module id unless restricted to a known set.
#[derive(Debug, Default)]
pub struct ModuleCatalog {
    known: Option<HashSet<String>>,
    active: DashMap<ModuleKey, ModuleArgs>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restricted_to<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(ids.into_iter().map(Into::into).collect()),
            active: DashMap::new(),
        }
    }

    /// Arguments of a running instance.
    pub fn args(&self, host: &str, module: &str) -> Option<ModuleArgs> {
        self.active
            .get(&ModuleKey::new(host, module))
            .map(|entry| entry.value().clone())
    }

    pub fn active(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = self.active.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Stop every instance still active. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let count = self.active.len();
        self.active.clear();
        if count > 0 {
            tracing::info!(count, "Stopped remaining module instances");
        }
        count
    }

    fn start_sync(&self, host: &str, module: &str, args: &ModuleArgs) -> Result<(), ModuleError> {
        if let Some(known) = &self.known {
            if !known.contains(module) {
                return Err(ModuleError::Unknown(module.to_string()));
            }
        }
        let key = ModuleKey::new(host, module);
        if self.active.contains_key(&key) {
            return Err(ModuleError::AlreadyRunning {
                host: host.to_string(),
                module: module.to_string(),
            });
        }
        self.active.insert(key, args.clone());
        Ok(())
    }

    fn stop_sync(&self, host: &str, module: &str) -> Result<(), ModuleError> {
        self.active
            .remove(&ModuleKey::new(host, module))
            .map(|_| ())
            .ok_or_else(|| ModuleError::NotRunning {
                host: host.to_string(),
                module: module.to_string(),
            })
    }
}

impl ModuleFramework for ModuleCatalog {
    fn start_module<'a>(
        &'a self,
        host: &'a str,
        module: &'a str,
        args: &'a ModuleArgs,
    ) -> BoxFuture<'a, Result<(), ModuleError>> {
        Box::pin(future::ready(self.start_sync(host, module, args)))
    }

    fn stop_module<'a>(&'a self, host: &'a str, module: &'a str) -> BoxFuture<'a, Result<(), ModuleError>> {
        Box::pin(future::ready(self.stop_sync(host, module)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_instances_per_host() {
        let catalog = ModuleCatalog::new();
        let mut args = ModuleArgs::new();
        args.insert("interval".into(), 60.into());

        catalog.start_module("a.example", "mod_ping", &args).await.unwrap();
        catalog.start_module("b.example", "mod_ping", &ModuleArgs::new()).await.unwrap();
        assert_eq!(catalog.active_count(), 2);
        assert_eq!(catalog.args("a.example", "mod_ping"), Some(args));

        let err = catalog.start_module("a.example", "mod_ping", &ModuleArgs::new()).await.unwrap_err();
        assert!(matches!(err, ModuleError::AlreadyRunning { .. }));

        catalog.stop_module("a.example", "mod_ping").await.unwrap();
        assert!(catalog.stop_module("a.example", "mod_ping").await.is_err());
        assert_eq!(catalog.active(), [ModuleKey::new("b.example", "mod_ping")]);
        assert_eq!(catalog.stop_all(), 1);
    }

    #[tokio::test]
    async fn restricted_catalog_rejects_unknown_ids() {
        let catalog = ModuleCatalog::restricted_to(["mod_ping"]);
        let err = catalog.start_module("a.example", "mod_bogus", &ModuleArgs::new()).await.unwrap_err();
        assert_eq!(err, ModuleError::Unknown("mod_bogus".into()));
    }
}
