//! Shared utilities for integration tests.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use xmppd::config::{ConfigStore, HostConfig, ModuleArgs, ModuleEntry, ServiceConfig};
use xmppd::modules::{ModuleCatalog, ModuleError, ModuleFramework, ModuleKey};

/// Config bound to loopback with a short grace period and a scratch data dir.
pub fn test_config(data_dir: &std::path::Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.node.name = "xmppd@test".to_string();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.shutdown.grace_period_secs = 1;
    config.storage.data_dir = data_dir.to_path_buf();
    config
}

pub fn store(config: ServiceConfig) -> ConfigStore {
    ConfigStore::new(config)
}

/// `hosts` × `modules`, each module carrying its host as an argument.
pub fn hosts(hosts: &[&str], modules: &[&str]) -> Vec<HostConfig> {
    hosts
        .iter()
        .map(|host| HostConfig {
            name: host.to_string(),
            modules: modules
                .iter()
                .map(|id| ModuleEntry::new(*id).with_arg("vhost", *host))
                .collect(),
        })
        .collect()
}

/// Module framework backed by a catalog that fails the listed instances on start.
pub struct FlakyFramework {
    pub catalog: ModuleCatalog,
    fail: Vec<ModuleKey>,
    pub starts: Mutex<Vec<(ModuleKey, ModuleArgs)>>,
}

impl FlakyFramework {
    pub fn new(fail: Vec<ModuleKey>) -> Arc<Self> {
        Arc::new(Self {
            catalog: ModuleCatalog::new(),
            fail,
            starts: Mutex::new(Vec::new()),
        })
    }
}

impl ModuleFramework for FlakyFramework {
    fn start_module<'a>(
        &'a self,
        host: &'a str,
        module: &'a str,
        args: &'a ModuleArgs,
    ) -> BoxFuture<'a, Result<(), ModuleError>> {
        let key = ModuleKey::new(host, module);
        self.starts.lock().unwrap().push((key.clone(), args.clone()));
        if self.fail.contains(&key) {
            return Box::pin(async move {
                Err(ModuleError::Failed {
                    host: host.to_string(),
                    module: module.to_string(),
                    reason: "injected failure".to_string(),
                })
            });
        }
        self.catalog.start_module(host, module, args)
    }

    fn stop_module<'a>(&'a self, host: &'a str, module: &'a str) -> BoxFuture<'a, Result<(), ModuleError>> {
        self.catalog.stop_module(host, module)
    }
}

/// Poll `check` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}
