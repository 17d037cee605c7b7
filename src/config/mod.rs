//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → store.rs (ConfigStore, atomically swappable)
//!     → read on every pass by the module registry and the admin endpoint
//!
//! On change or SIGHUP:
//!     watcher.rs reloads the file
//!     → validation.rs validates
//!     → atomic swap inside ConfigStore
//! ```
//!
//! # Design Decisions
//! - A loaded config is never mutated in place; reload swaps the whole value
//! - All fields have defaults to allow minimal configs
//! - Malformed module entries are rejected here, never by the module registry

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ClusterConfig, HostConfig, ListenerConfig, LogBackendKind, LoggingConfig,
    ModuleArgs, ModuleEntry, ServiceConfig, ShutdownConfig, StorageConfig, SupervisorConfig,
    TlsConfig,
};
pub use store::ConfigStore;
