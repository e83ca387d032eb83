//! vg-core: Core abstractions and configuration for Vigil
//!
//! This crate provides the shared types, collaborator traits, persisted
//! settings and configuration structures used by the monitor.

pub mod address;
pub mod config;
pub mod error;
pub mod settings;
pub mod traits;
pub mod types;

pub use address::TargetAddress;
pub use error::{ConnectError, SecurityFailureKind, VgError};
pub use types::{ConnectionState, Credentials, TargetId, TargetState};
