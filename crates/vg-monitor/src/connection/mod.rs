//! Connection management

mod handle;
mod tcp;

#[cfg(test)]
pub(crate) mod testing;

pub use handle::{ConnectionHandle, ConnectionObserver};
pub use tcp::{TcpConnection, TcpDescriptor};

use std::sync::Arc;

use vg_core::settings::SettingsStore;
use vg_core::traits::{CredentialPrompt, InsecureRetryPrompt};

use crate::events::EventBus;

/// Collaborators shared by every connection handle
#[derive(Clone)]
pub struct ConnectContext {
    /// Asked when the target rejects the credentials
    pub credential_prompt: Arc<dyn CredentialPrompt>,
    /// Asked when the transport trust check fails
    pub insecure_prompt: Arc<dyn InsecureRetryPrompt>,
    /// Persisted per-target flags
    pub settings: Arc<dyn SettingsStore>,
    /// State change notifications
    pub events: EventBus,
}

impl std::fmt::Debug for ConnectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectContext")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
