//! Global monitor state

use std::sync::Arc;

use vg_core::config::MonitorConfig;
use vg_core::settings::SettingsStore;
use vg_core::traits::{CredentialPrompt, InsecureRetryPrompt, TargetDescriptor};

use crate::connection::ConnectContext;
use crate::events::EventBus;
use crate::heartbeat::{Heartbeat, HeartbeatError};
use crate::registry::TargetRegistry;

/// Global state for the monitor daemon
pub struct MonitorState {
    /// Configuration
    pub config: MonitorConfig,
    /// State change notifications
    pub events: EventBus,
    /// Reconnection scheduler
    pub heartbeat: Heartbeat,
    /// Registered targets
    pub targets: Arc<TargetRegistry>,
}

impl MonitorState {
    /// Wire the scheduler and registry to the given collaborators
    pub fn new(
        config: MonitorConfig,
        settings: Arc<dyn SettingsStore>,
        credential_prompt: Arc<dyn CredentialPrompt>,
        insecure_prompt: Arc<dyn InsecureRetryPrompt>,
        descriptor: Arc<dyn TargetDescriptor>,
    ) -> Self {
        let events = EventBus::default();
        let heartbeat = Heartbeat::new(config.heartbeat.clone(), events.clone());
        let ctx = ConnectContext {
            credential_prompt,
            insecure_prompt,
            settings,
            events: events.clone(),
        };
        let targets = Arc::new(TargetRegistry::new(ctx, heartbeat.clone(), descriptor));

        Self {
            config,
            events,
            heartbeat,
            targets,
        }
    }

    /// Start the heartbeat and register the configured targets
    pub fn start(&self) -> Result<(), HeartbeatError> {
        self.heartbeat.start()?;

        for (config, e) in self.targets.register_all(&self.config.targets) {
            tracing::error!("Failed to register {}: {}", config.connection, e);
        }
        Ok(())
    }

    /// Stop scheduling and close every connection
    pub async fn shutdown(&self) {
        self.heartbeat.stop();
        self.targets.close_all().await;
    }
}
