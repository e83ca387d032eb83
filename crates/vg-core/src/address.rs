//! Service address parsing and normalization
//!
//! Targets are addressed with JMX-style service URLs:
//! `service:jmx:<protocol>://[host[:port]][/url-path]`. A bare `host:port`
//! connection string is expanded to the RMI registry form
//! `service:jmx:rmi:///jndi/rmi://host:port/jmxrmi`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AddressError;

const SERVICE_PREFIX: &str = "service:jmx:";
const JNDI_RMI_PREFIX: &str = "/jndi/rmi://";

/// A validated, normalized service address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetAddress {
    url: String,
    protocol: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl TargetAddress {
    /// Normalize and parse a connection string
    pub fn parse(connection: &str) -> Result<Self, AddressError> {
        let url = normalize_connection_string(connection);
        if url.is_empty() {
            return Err(AddressError::Empty);
        }

        let rest = url
            .strip_prefix(SERVICE_PREFIX)
            .ok_or_else(|| AddressError::Malformed(url.clone()))?;
        let (protocol, rest) = rest
            .split_once("://")
            .ok_or_else(|| AddressError::Malformed(url.clone()))?;
        if protocol.is_empty() || !protocol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AddressError::UnsupportedProtocol(protocol.to_string()));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let (host, port) = split_host_port(authority)
            .ok_or_else(|| AddressError::InvalidPort(authority.to_string()))?;

        Ok(Self {
            protocol: protocol.to_string(),
            host,
            port,
            path: path.to_string(),
            url,
        })
    }

    /// The full normalized URL
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Transport protocol (`rmi`, `jmxmp`, ...)
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Port from the URL authority, if present
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// URL path following the authority
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve the host this address points at.
    ///
    /// Uses the URL authority when present, otherwise the registry host
    /// embedded in a `/jndi/rmi://` path. Returns `None` when no host can be
    /// determined.
    pub fn host_name(&self) -> Option<String> {
        if !self.host.is_empty() {
            return Some(self.host.clone());
        }
        if self.protocol != "rmi" {
            return None;
        }
        let registry = self.path.strip_prefix(JNDI_RMI_PREFIX)?;
        if registry.is_empty() || registry.starts_with('/') {
            return Some("localhost".to_string());
        }
        if registry.starts_with('[') {
            let end = registry.find(']')?;
            return Some(registry[..=end].to_string());
        }
        let end = registry.find([':', '/']).unwrap_or(registry.len());
        let host = &registry[..end];
        if host.is_empty() {
            Some("localhost".to_string())
        } else {
            Some(host.to_string())
        }
    }

    /// Host and port a plain socket should dial to reach this target
    pub fn socket_address(&self) -> Option<String> {
        if !self.host.is_empty() {
            return self.port.map(|port| format!("{}:{}", self.host, port));
        }
        let registry = self.path.strip_prefix(JNDI_RMI_PREFIX)?;
        let authority = registry.split('/').next()?;
        let (host, port) = split_host_port(authority)?;
        let host = if host.is_empty() {
            "localhost".to_string()
        } else {
            host
        };
        port.map(|port| format!("{}:{}", host, port))
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl TryFrom<String> for TargetAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TargetAddress> for String {
    fn from(address: TargetAddress) -> Self {
        address.url
    }
}

/// Expand a bare `host:port` into the RMI registry service URL
pub fn normalize_connection_string(connection: &str) -> String {
    let connection = connection.trim();
    if connection.is_empty() || connection.starts_with(SERVICE_PREFIX) {
        return connection.to_string();
    }
    format!("service:jmx:rmi:///jndi/rmi://{}/jmxrmi", connection)
}

/// Name shown for a target that was registered without a display name.
///
/// A user-provided display name always wins; otherwise the connection string,
/// prefixed with `user@` when a username is known.
pub fn suggested_name(
    display_name: Option<&str>,
    connection: &str,
    username: Option<&str>,
) -> String {
    if let Some(name) = display_name {
        return name.to_string();
    }
    match username {
        Some(user) if !user.is_empty() => format!("{}@{}", user, connection),
        _ => connection.to_string(),
    }
}

fn split_host_port(authority: &str) -> Option<(String, Option<u16>)> {
    if authority.is_empty() {
        return Some((String::new(), None));
    }
    if authority.starts_with('[') {
        let end = authority.find(']')?;
        let host = &authority[..=end];
        return match &authority[end + 1..] {
            "" => Some((host.to_string(), None)),
            rest => {
                let port = rest.strip_prefix(':')?.parse().ok()?;
                Some((host.to_string(), Some(port)))
            }
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse().ok()?))),
        None => Some((authority.to_string(), None)),
    }
}
