//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.pid_file.is_none());
        assert!(config.hosts.is_empty());
        assert!(config.cluster.nodes.is_empty());
        assert_eq!(config.shutdown.grace_period_secs, 5);
        assert_eq!(
            config.shutdown.grace_period(),
            crate::lifecycle::drain::DEFAULT_GRACE_PERIOD
        );
    }

    #[test]
    fn parses_hosts_and_modules() {
        let config = parse_config(
            r#"
            pid_file = "/run/xmppd.pid"

            [[hosts]]
            name = "example.org"
            modules = [
                { id = "mod_ping", args = { interval = 60 } },
                { id = "mod_roster" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.pid_file.as_deref(), Some(Path::new("/run/xmppd.pid")));
        let host = &config.hosts[0];
        assert_eq!(host.name, "example.org");
        assert_eq!(host.modules[0].id, "mod_ping");
        assert_eq!(host.modules[0].args.get("interval").and_then(|v| v.as_integer()), Some(60));
        assert!(host.modules[1].args.is_empty());
    }

    #[test]
    fn malformed_module_entry_is_rejected() {
        let err = parse_config(
            r#"
            [[hosts]]
            name = "example.org"
            modules = [ "mod_ping" ]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_are_reported() {
        let err = parse_config(
            r#"
            [[hosts]]
            name = "example.org"
            modules = [ { id = "" } ]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("example.org"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/xmppd.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/xmppd.toml"));
    }
}
