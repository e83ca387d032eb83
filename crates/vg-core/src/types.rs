//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::TargetAddress;

/// Stable identity of a monitored target.
///
/// Two targets are the same target when both the normalized address and the
/// environment provider match, regardless of which object represents them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId {
    address: TargetAddress,
    env_provider: Option<String>,
}

impl TargetId {
    /// Create a target ID from an address and an optional environment provider
    pub fn new(address: TargetAddress, env_provider: Option<String>) -> Self {
        Self {
            address,
            env_provider,
        }
    }

    /// The normalized service address
    pub fn address(&self) -> &TargetAddress {
        &self.address
    }

    /// Identifier of the environment/credential provider, if any
    pub fn env_provider(&self) -> Option<&str> {
        self.env_provider.as_deref()
    }

    /// Key used by settings stores
    pub fn storage_key(&self) -> String {
        match &self.env_provider {
            Some(provider) => format!("{}#{}", self.address, provider),
            None => self.address.to_string(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Lifecycle state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    /// No live connection
    Unavailable,
    /// A live connection is established
    Available,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Unavailable => write!(f, "unavailable"),
            TargetState::Available => write!(f, "available"),
        }
    }
}

/// Connection status of a single connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport is open
    Disconnected,
    /// A connect sequence is running
    Connecting,
    /// The transport is open and ready
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Username and secret supplied by a credential prompt.
///
/// Only ever held in memory. The secret is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password or token
    pub secret: String,
}

impl Credentials {
    /// Create a new credential pair
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}
