//! Per-host module activation.
//!
//! # Responsibilities
//! - Start every configured module on every configured host, in list order
//! - Stop them again while leaving their configuration entries untouched
//! - Keep one module's failure from affecting any other module or host
//!
//! # Design Decisions
//! - The module list is read from the [`ConfigStore`] on every pass, never cached,
//!   so edits made between a start and a later stop are honoured by the stop
//! - Instances that are running but no longer configured are stopped at the end of
//!   a stop pass, so a config edit cannot leave them behind

use std::sync::Arc;

use dashmap::DashSet;

use crate::config::ConfigStore;
use crate::modules::framework::{ModuleFramework, ModuleKey};
use crate::observability::metrics;

/// One module that failed to start or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    pub key: ModuleKey,
    pub error: String,
}

/// Outcome of a start or stop pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReport {
    pub succeeded: Vec<ModuleKey>,
    pub failures: Vec<ModuleFailure>,
}

pub struct ModuleRegistry {
    store: ConfigStore,
    framework: Arc<dyn ModuleFramework>,
    running: DashSet<ModuleKey>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("running", &self.running.len())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new(store: ConfigStore, framework: Arc<dyn ModuleFramework>) -> Self {
        Self {
            store,
            framework,
            running: DashSet::new(),
        }
    }

    /// Instances this registry started and has not stopped, sorted.
    pub fn running(&self) -> Vec<ModuleKey> {
        let mut keys: Vec<ModuleKey> = self.running.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Start every configured module on every host.
    ///
    /// Never fails as a whole; failures are logged and listed in the report.
    pub async fn start_modules(&self) -> ModuleReport {
        let config = self.store.current();
        let mut report = ModuleReport::default();

        for host in &config.hosts {
            for entry in &host.modules {
                let key = ModuleKey::new(&host.name, &entry.id);
                match self.framework.start_module(&host.name, &entry.id, &entry.args).await {
                    Ok(()) => {
                        tracing::info!(host = %host.name, module = %entry.id, "Module started");
                        metrics::record_module(&host.name, &entry.id, "start", "ok");
                        self.running.insert(key.clone());
                        report.succeeded.push(key);
                    }
                    Err(e) => {
                        tracing::error!(host = %host.name, module = %entry.id, error = %e, "Module failed to start");
                        metrics::record_module(&host.name, &entry.id, "start", "error");
                        report.failures.push(ModuleFailure {
                            key,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            hosts = config.hosts.len(),
            started = report.succeeded.len(),
            failed = report.failures.len(),
            "Module start pass complete"
        );
        report
    }

    /// Stop every configured module on every host, keeping the configuration.
    pub async fn stop_modules(&self) -> ModuleReport {
        let config = self.store.current();
        let mut report = ModuleReport::default();

        let configured = config
            .hosts
            .iter()
            .flat_map(|host| host.modules.iter().map(|entry| ModuleKey::new(&host.name, &entry.id)));
        let configured: Vec<ModuleKey> = configured.collect();
        let orphans: Vec<ModuleKey> = self
            .running()
            .into_iter()
            .filter(|key| !configured.contains(key))
            .collect();
        if !orphans.is_empty() {
            tracing::warn!(count = orphans.len(), "Running modules no longer configured, stopping them too");
        }

        for key in configured.into_iter().chain(orphans) {
            match self.framework.stop_module(&key.host, &key.module).await {
                Ok(()) => {
                    tracing::info!(host = %key.host, module = %key.module, "Module stopped");
                    metrics::record_module(&key.host, &key.module, "stop", "ok");
                    self.running.remove(&key);
                    report.succeeded.push(key);
                }
                Err(e) => {
                    tracing::warn!(host = %key.host, module = %key.module, error = %e, "Module failed to stop");
                    metrics::record_module(&key.host, &key.module, "stop", "error");
                    report.failures.push(ModuleFailure {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            stopped = report.succeeded.len(),
            failed = report.failures.len(),
            "Module stop pass complete"
        );
        report
    }
}
