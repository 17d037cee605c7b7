//! xmppd
//!
//! Lifecycle orchestrator for a multi-subsystem XMPP service.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                               xmppd                                  │
//!   │                                                                      │
//!   │  PidFileGuard ─▶ SubsystemSequencer ─▶ SupervisionRoot ─▶ Cluster    │
//!   │                  storage                ├ liveness_anchor  links     │
//!   │                  security               ├ data_backend       │       │
//!   │                  administration         ├ authentication     │       │
//!   │                  module_framework       ├ tls_handshake      ▼       │
//!   │                  configuration          └ c2s_listener ModuleRegistry│
//!   │                                                 │          (per host)│
//!   │                                                 ▼                    │
//!   │                                       ConnectionSupervisor           │
//!   │                                                 ▲                    │
//!   │                                          ShutdownDrainer             │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use xmppd::config::{load_config, watcher, ConfigStore, ServiceConfig};
use xmppd::lifecycle::signals::{SignalEvent, Signals};
use xmppd::lifecycle::{ServiceBuilder, StartMode};
use xmppd::modules::ModuleCatalog;
use xmppd::observability::{logging, metrics};
use xmppd::subsystems;

#[derive(Debug, Parser)]
#[command(name = "xmppd", version, about = "XMPP service lifecycle orchestrator")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start mode.
    #[arg(short, long, default_value = "normal")]
    mode: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("xmppd: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ServiceConfig::default(),
    };

    let _logging = match logging::init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("xmppd: cannot initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), node = %config.node.name, "xmppd starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mode: StartMode = match cli.mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            tracing::error!(error = %e, "Refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let mut signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let store = ConfigStore::new(config);
    let catalog = Arc::new(ModuleCatalog::new());
    let builder = ServiceBuilder::new(store.clone(), catalog.clone());
    let steps = subsystems::builtin_steps(builder.context(), catalog, cli.config.clone());
    let children = subsystems::builtin_children(builder.context());
    let builder = children.into_iter().fold(builder.steps(steps), ServiceBuilder::child);

    let mut service = match builder.start(mode).await {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    let root = service.root().clone();
    let mut exit = ExitCode::SUCCESS;
    loop {
        tokio::select! {
            event = signals.recv() => match event {
                SignalEvent::Terminate => break,
                SignalEvent::Reload => match &cli.config {
                    Some(path) => {
                        if let Err(e) = watcher::reload(path, &store) {
                            tracing::error!(error = %e, "Reload failed, keeping current configuration");
                        }
                    }
                    None => tracing::warn!("No configuration file to reload"),
                },
            },
            outcome = root.wait() => {
                if let Err(e) = outcome {
                    tracing::error!(error = %e, "Supervision root stopped");
                    exit = ExitCode::FAILURE;
                }
                break;
            }
        }
    }

    service.prepare_stop().await;
    let report = service.stop().await;
    if !report.is_clean() {
        exit = ExitCode::FAILURE;
    }
    exit
}
