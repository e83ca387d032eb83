//! Core error types for Vigil

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the Vigil ecosystem
#[derive(Error, Debug)]
pub enum VgError {
    /// Address error
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Settings error
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid connection strings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Nothing to parse
    #[error("Connection string is empty")]
    Empty,

    /// Not a `service:jmx:<protocol>://...` URL
    #[error("Malformed service URL: {0}")]
    Malformed(String),

    /// Protocol segment is missing or contains invalid characters
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Port is not a number in range
    #[error("Invalid port in: {0}")]
    InvalidPort(String),
}

/// Kind of security failure reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityFailureKind {
    /// Missing or rejected credentials
    Authorization,
    /// The transport or registry could not be trusted (e.g. SSL stub check)
    TransportTrust,
}

/// Failures of a single transport-level connect
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Authorization or trust failure; may be recovered by prompting
    #[error("Security failure ({kind:?}): {message}")]
    Security {
        kind: SecurityFailureKind,
        message: String,
    },

    /// Host unreachable, refused, timed out
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl ConnectError {
    /// Authorization failure with a message
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Security {
            kind: SecurityFailureKind::Authorization,
            message: message.into(),
        }
    }

    /// Transport-trust failure with a message
    pub fn transport_trust(message: impl Into<String>) -> Self {
        Self::Security {
            kind: SecurityFailureKind::TransportTrust,
            message: message.into(),
        }
    }

    /// Plain transport failure with a message
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// The security failure kind, if this is a security failure
    pub fn security_kind(&self) -> Option<SecurityFailureKind> {
        match self {
            Self::Security { kind, .. } => Some(*kind),
            Self::Transport(_) => None,
        }
    }
}

/// Settings persistence errors
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Reading or writing the settings file failed
    #[error("Failed to access settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_kind() {
        assert_eq!(
            ConnectError::transport_trust("stub check").security_kind(),
            Some(SecurityFailureKind::TransportTrust)
        );
        assert_eq!(
            ConnectError::authorization("bad password").security_kind(),
            Some(SecurityFailureKind::Authorization)
        );
        assert_eq!(ConnectError::transport("refused").security_kind(), None);
    }

    #[test]
    fn test_error_conversion() {
        let err: VgError = AddressError::Empty.into();
        assert!(err.to_string().contains("empty"));
    }
}
