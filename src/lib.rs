//! XMPP service lifecycle orchestrator library

pub mod admin;
pub mod cluster;
pub mod config;
pub mod lifecycle;
pub mod modules;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod subsystems;

pub use config::schema::ServiceConfig;
pub use lifecycle::{RootHandle, Service, ServiceBuilder, StartMode, StartupError};
