//! Collaborator traits consumed by the monitor

mod descriptor;
mod prompt;

pub use descriptor::{ConnectEnv, RawConnection, TargetDescriptor};
pub use prompt::{CredentialPrompt, InsecureDecision, InsecureRetryPrompt};
