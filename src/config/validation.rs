//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic shape of module entries)
//! - Reject duplicate hosts and duplicate modules within a host
//! - Validate addresses and peer node identifiers
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on reload

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::cluster::PeerNode;
use crate::config::schema::ServiceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("node name must not be empty")]
    EmptyNodeName,

    #[error("host name must not be empty")]
    EmptyHostName,

    #[error("host `{0}` is configured more than once")]
    DuplicateHost(String),

    #[error("host `{host}` has a module with an empty id")]
    EmptyModuleId { host: String },

    #[error("host `{host}` lists module `{module}` more than once")]
    DuplicateModule { host: String, module: String },

    #[error("{field} `{value}` is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("supervisor.restart_window_secs must be greater than zero")]
    ZeroRestartWindow,

    #[error("cluster node `{node}` is invalid: {reason}")]
    InvalidPeer { node: String, reason: String },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.node.name.trim().is_empty() {
        errors.push(ValidationError::EmptyNodeName);
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.supervisor.restart_window_secs == 0 {
        errors.push(ValidationError::ZeroRestartWindow);
    }

    let mut hosts = HashSet::new();
    for host in &config.hosts {
        if host.name.trim().is_empty() {
            errors.push(ValidationError::EmptyHostName);
        } else if !hosts.insert(host.name.as_str()) {
            errors.push(ValidationError::DuplicateHost(host.name.clone()));
        }

        let mut modules = HashSet::new();
        for entry in &host.modules {
            if entry.id.trim().is_empty() {
                errors.push(ValidationError::EmptyModuleId { host: host.name.clone() });
            } else if !modules.insert(entry.id.as_str()) {
                errors.push(ValidationError::DuplicateModule {
                    host: host.name.clone(),
                    module: entry.id.clone(),
                });
            }
        }
    }

    for node in &config.cluster.nodes {
        if let Err(reason) = PeerNode::parse(node) {
            errors.push(ValidationError::InvalidPeer {
                node: node.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
