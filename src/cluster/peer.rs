//! Peer node identifiers.

use std::fmt;

/// A configured peer, written `name@host:port` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerNode {
    name: Option<String>,
    host: String,
    port: u16,
}

impl PeerNode {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty node identifier".to_string());
        }

        let (name, address) = match raw.split_once('@') {
            Some((name, address)) if !name.is_empty() => (Some(name.to_string()), address),
            Some(_) => return Err("missing node name before `@`".to_string()),
            None => (None, raw),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| format!("`{address}` has no port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("`{address}` has no host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| format!("`{port}` is not a valid port"))?;
        if port == 0 {
            return Err("port 0 is not connectable".to_string());
        }

        Ok(Self {
            name,
            host: host.to_string(),
            port,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for PeerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}@{}", name, self.address()),
            None => f.write_str(&self.address()),
        }
    }
}
