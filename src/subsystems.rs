//! Built-in subsystems of the daemon.
//!
//! # Data Flow
//! ```text
//! Sequenced steps (start order):
//!     storage → security → administration → module_framework → configuration
//!
//! Under the supervision root:
//!     data_backend   (checks the data directory)
//!     authentication (checks the AuthProvider collaborator)
//!     tls_handshake  (re-checks TLS material; idles without TLS)
//! ```
//!
//! Each child re-checks every `storage.probe_interval_secs` and exits with an error on a failed
//! check, leaving the restart decision to the root.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use notify::RecommendedWatcher;
use tokio::sync::Mutex;

use crate::admin::AdminServer;
use crate::config::watcher::ConfigWatcher;
use crate::config::ConfigStore;
use crate::lifecycle::sequencer::{SubsystemError, SubsystemStep};
use crate::lifecycle::startup::ServiceContext;
use crate::lifecycle::supervisor::{ChildContext, ChildSpec, RestartPolicy};
use crate::modules::ModuleCatalog;
use crate::net::tls::check_tls_material;

pub const DATA_BACKEND_CHILD: &str = "data_backend";
pub const AUTHENTICATION_CHILD: &str = "authentication";
pub const TLS_HANDSHAKE_CHILD: &str = "tls_handshake";

/// Authentication backend the `authentication` child keeps watch over.
pub trait AuthProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Resolves to `Ok` while the backend can serve authentication requests.
    fn check(&self) -> BoxFuture<'static, Result<(), SubsystemError>>;
}

/// Built-in account store kept alongside the data directory; always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct InternalAuth;

impl AuthProvider for InternalAuth {
    fn name(&self) -> &str {
        "internal"
    }

    fn check(&self) -> BoxFuture<'static, Result<(), SubsystemError>> {
        Box::pin(async { Ok(()) })
    }
}

/// The fixed step list, in start order.
pub fn builtin_steps(
    context: &ServiceContext,
    catalog: Arc<ModuleCatalog>,
    config_path: Option<PathBuf>,
) -> Vec<SubsystemStep> {
    vec![
        storage_step(context.store.clone()),
        security_step(context.store.clone()),
        administration_step(context.clone()),
        module_framework_step(catalog),
        configuration_step(context.store.clone(), config_path),
    ]
}

/// Dependent subsystems started under the supervision root.
pub fn builtin_children(context: &ServiceContext) -> Vec<ChildSpec> {
    vec![
        data_backend_child(context.store.clone()),
        authentication_child(Arc::new(InternalAuth), context.store.clone()),
        tls_handshake_child(context.store.clone()),
    ]
}

pub fn storage_step(store: ConfigStore) -> SubsystemStep {
    SubsystemStep::new("storage", move || {
        let store = store.clone();
        async move {
            let dir = store.current().storage.data_dir.clone();
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| SubsystemError::wrap(format!("creating data directory {}", dir.display()), e))?;
            tracing::info!(data_dir = %dir.display(), "Storage ready");
            Ok(())
        }
    })
}

pub fn security_step(store: ConfigStore) -> SubsystemStep {
    SubsystemStep::new("security", move || {
        let store = store.clone();
        async move {
            match &store.current().tls {
                Some(tls) => {
                    check_tls_material(&tls.cert_path, &tls.key_path)?;
                }
                None => tracing::info!("No TLS material configured"),
            }
            Ok(())
        }
    })
}

pub fn administration_step(context: ServiceContext) -> SubsystemStep {
    let slot: Arc<Mutex<Option<AdminServer>>> = Arc::new(Mutex::new(None));
    let stop_slot = slot.clone();

    SubsystemStep::new("administration", move || {
        let context = context.clone();
        let slot = slot.clone();
        async move {
            let config = context.store.current();
            if !config.admin.enabled {
                tracing::info!("Admin endpoint disabled");
                return Ok(());
            }
            let server = AdminServer::start(&config.admin, context.clone())
                .await
                .map_err(|e| SubsystemError::wrap("starting admin endpoint", e))?;
            *slot.lock().await = Some(server);
            Ok(())
        }
    })
    .with_stop(move || {
        let slot = stop_slot.clone();
        async move {
            if let Some(server) = slot.lock().await.take() {
                server
                    .shutdown()
                    .await
                    .map_err(|e| SubsystemError::wrap("stopping admin endpoint", e))?;
            }
            Ok(())
        }
    })
}

pub fn module_framework_step(catalog: Arc<ModuleCatalog>) -> SubsystemStep {
    let stop_catalog = catalog.clone();
    SubsystemStep::new("module_framework", move || {
        let active = catalog.active_count();
        async move {
            tracing::info!(active, "Module framework ready");
            Ok(())
        }
    })
    .with_stop(move || {
        stop_catalog.stop_all();
        async { Ok(()) }
    })
}

pub fn configuration_step(store: ConfigStore, config_path: Option<PathBuf>) -> SubsystemStep {
    let slot: Arc<Mutex<Option<RecommendedWatcher>>> = Arc::new(Mutex::new(None));
    let stop_slot = slot.clone();

    SubsystemStep::new("configuration", move || {
        let store = store.clone();
        let path = config_path.clone();
        let slot = slot.clone();
        async move {
            let Some(path) = path else {
                tracing::info!("No configuration file to watch");
                return Ok(());
            };
            let watcher = ConfigWatcher::new(&path, store)
                .run()
                .map_err(|e| SubsystemError::wrap(format!("watching {}", path.display()), e))?;
            *slot.lock().await = Some(watcher);
            Ok(())
        }
    })
    .with_stop(move || {
        let slot = stop_slot.clone();
        async move {
            if slot.lock().await.take().is_some() {
                tracing::info!("Config watcher stopped");
            }
            Ok(())
        }
    })
}

/// Sleep one check interval. Returns `true` if the child was told to stop instead.
async fn pause(ctx: &mut ChildContext, store: &ConfigStore) -> bool {
    let interval = Duration::from_secs(store.current().storage.probe_interval_secs.max(1));
    tokio::select! {
        _ = ctx.stopped() => true,
        _ = tokio::time::sleep(interval) => false,
    }
}

/// Watches the data directory; a failed check makes the child exit for the root to restart.
pub fn data_backend_child(store: ConfigStore) -> ChildSpec {
    ChildSpec::new(DATA_BACKEND_CHILD, RestartPolicy::Permanent, move |ctx| {
        watch_data_dir(ctx, store.clone())
    })
}

async fn watch_data_dir(mut ctx: ChildContext, store: ConfigStore) -> Result<(), SubsystemError> {
    loop {
        let dir = store.current().storage.data_dir.clone();
        let metadata = tokio::fs::metadata(&dir)
            .await
            .map_err(|e| SubsystemError::wrap(format!("probing {}", dir.display()), e))?;
        if !metadata.is_dir() {
            return Err(SubsystemError::msg(format!("{} is not a directory", dir.display())));
        }
        tracing::trace!(data_dir = %dir.display(), "Data backend check ok");

        if pause(&mut ctx, &store).await {
            return Ok(());
        }
    }
}

pub fn authentication_child(provider: Arc<dyn AuthProvider>, store: ConfigStore) -> ChildSpec {
    ChildSpec::new(AUTHENTICATION_CHILD, RestartPolicy::Permanent, move |ctx| {
        watch_auth(ctx, provider.clone(), store.clone())
    })
}

async fn watch_auth(
    mut ctx: ChildContext,
    provider: Arc<dyn AuthProvider>,
    store: ConfigStore,
) -> Result<(), SubsystemError> {
    tracing::info!(provider = provider.name(), "Authentication backend up");
    loop {
        provider.check().await.map_err(|e| {
            tracing::warn!(provider = provider.name(), error = %e, "Authentication backend check failed");
            e
        })?;
        if pause(&mut ctx, &store).await {
            return Ok(());
        }
    }
}

/// Handshake layer; re-reads the configured certificate and key so a broken rotation surfaces.
pub fn tls_handshake_child(store: ConfigStore) -> ChildSpec {
    ChildSpec::new(TLS_HANDSHAKE_CHILD, RestartPolicy::Permanent, move |ctx| {
        watch_tls(ctx, store.clone())
    })
}

async fn watch_tls(mut ctx: ChildContext, store: ConfigStore) -> Result<(), SubsystemError> {
    loop {
        if let Some(tls) = store.current().tls.clone() {
            let certificates = check_tls_material(&tls.cert_path, &tls.key_path)?;
            tracing::trace!(certificates, "TLS material check ok");
        }
        if pause(&mut ctx, &store).await {
            return Ok(());
        }
    }
}
