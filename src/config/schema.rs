//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::drain::DEFAULT_GRACE_PERIOD;

/// Free-form argument set handed to a feature module on start.
pub type ModuleArgs = toml::Table;

/// Root configuration for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identity of this node.
    pub node: NodeConfig,

    /// Where to record the process id. `None` disables the PID file.
    pub pid_file: Option<PathBuf>,

    /// Log destination and backend.
    pub logging: LoggingConfig,

    /// Client listener (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Graceful shutdown timings.
    pub shutdown: ShutdownConfig,

    /// Restart policy of the supervision root.
    pub supervisor: SupervisorConfig,

    /// Peer nodes to link with at startup.
    pub cluster: ClusterConfig,

    /// Storage backend settings.
    pub storage: StorageConfig,

    /// Optional TLS material for client connections.
    pub tls: Option<TlsConfig>,

    /// Admin status endpoint.
    pub admin: AdminConfig,

    /// Metrics exporter.
    pub observability: ObservabilityConfig,

    /// Served virtual hosts and their feature modules.
    pub hosts: Vec<HostConfig>,
}

/// Node identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name, reported in logs and the admin endpoint.
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "xmppd@localhost".to_string(),
        }
    }
}

/// Which sink receives log output besides the console.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogBackendKind {
    /// Console only.
    #[default]
    None,
    /// Console plus an append-only log file.
    File,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit log file path. Falls back to `XMPPD_LOG_PATH`, then the built-in default.
    pub path: Option<PathBuf>,

    /// Extra log sink.
    pub backend: LogBackendKind,

    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            backend: LogBackendKind::None,
            level: "xmppd=info".to_string(),
        }
    }
}

/// Client listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5222").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5222".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Graceful shutdown timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long the drain waits after signalling connections, in seconds.
    pub grace_period_secs: u64,

    /// How long the root waits for a child to stop before aborting it, in milliseconds.
    pub child_stop_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn child_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.child_stop_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
            child_stop_timeout_ms: 2_000,
        }
    }
}

/// Restart intensity of the supervision root.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Restarts tolerated within `restart_window_secs` before the root gives up.
    pub max_restarts: u32,

    /// Sliding window for `max_restarts`, in seconds.
    pub restart_window_secs: u64,

    /// Base delay for exponential restart backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Maximum restart backoff in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_window_secs: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 2_000,
        }
    }
}

/// Cluster bootstrap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Peer nodes, as `name@host:port` or `host:port`.
    pub nodes: Vec<String>,

    /// Per-peer connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            connect_timeout_ms: 3_000,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the node's data files.
    pub data_dir: PathBuf,

    /// Interval between health checks of the supervised subsystems, in seconds.
    pub probe_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/xmppd"),
            probe_interval_secs: 30,
        }
    }
}

/// TLS material for client connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Path to private key (PEM).
    pub key_path: PathBuf,
}

/// Placeholder key shipped in the defaults; a warning is logged while it is in use.
pub const DEFAULT_ADMIN_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Admin status endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin endpoint.
    pub enabled: bool,

    /// Admin endpoint bind address.
    pub bind_address: String,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:5280".to_string(),
            api_key: DEFAULT_ADMIN_API_KEY.to_string(),
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A served virtual host.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Host name (e.g., "example.org").
    pub name: String,

    /// Feature modules in start order.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

/// One `(module id, argument set)` pair.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModuleEntry {
    pub id: String,

    #[serde(default)]
    pub args: ModuleArgs,
}

impl ModuleEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            args: ModuleArgs::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}
