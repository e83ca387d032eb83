//! Target registry

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use vg_core::address::suggested_name;
use vg_core::config::TargetConfig;
use vg_core::error::{AddressError, SettingsError};
use vg_core::traits::TargetDescriptor;
use vg_core::{TargetAddress, TargetId};

use crate::connection::ConnectContext;
use crate::events::MonitorEvent;
use crate::heartbeat::{Heartbeat, ProbeRef};
use crate::target::Target;

/// Registration errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection string is not a usable service URL
    #[error("Invalid connection string: {0}")]
    InvalidAddress(#[from] AddressError),

    /// A target with the same identity is already registered
    #[error("Target {id} is already registered as {name}")]
    AlreadyExists { id: TargetId, name: String },

    /// Persisted settings could not be updated
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// All monitored targets, indexed by identity
pub struct TargetRegistry {
    targets: DashMap<TargetId, Arc<Target>>,
    ctx: ConnectContext,
    heartbeat: Heartbeat,
    descriptor: Arc<dyn TargetDescriptor>,
}

impl TargetRegistry {
    /// Create an empty registry; `descriptor` is used for targets registered
    /// without their own
    pub fn new(
        ctx: ConnectContext,
        heartbeat: Heartbeat,
        descriptor: Arc<dyn TargetDescriptor>,
    ) -> Self {
        Self {
            targets: DashMap::new(),
            ctx,
            heartbeat,
            descriptor,
        }
    }

    /// Register a target and probe it right away
    pub fn register(&self, config: &TargetConfig) -> Result<Arc<Target>, RegistryError> {
        self.register_with(config, Arc::clone(&self.descriptor))
    }

    /// Register a target reached through a specific descriptor
    pub fn register_with(
        &self,
        config: &TargetConfig,
        descriptor: Arc<dyn TargetDescriptor>,
    ) -> Result<Arc<Target>, RegistryError> {
        let target = self.insert(config, descriptor)?;
        self.heartbeat
            .immediate()
            .schedule(vec![Arc::clone(&target) as ProbeRef]);
        Ok(target)
    }

    /// Register many targets and probe them in one batch.
    ///
    /// Returns the configurations that could not be registered.
    pub fn register_all(&self, configs: &[TargetConfig]) -> Vec<(TargetConfig, RegistryError)> {
        let mut batch: Vec<ProbeRef> = Vec::with_capacity(configs.len());
        let mut failed = Vec::new();

        for config in configs {
            match self.insert(config, Arc::clone(&self.descriptor)) {
                Ok(target) => batch.push(target),
                Err(e) => {
                    tracing::warn!("Skipping target {}: {}", config.connection, e);
                    failed.push((config.clone(), e));
                }
            }
        }

        tracing::info!("Registered {} targets", batch.len());
        self.heartbeat.immediate().schedule(batch);
        failed
    }

    /// Remove a target, close its connection and forget its settings.
    ///
    /// A connect sequence already running on the target finishes first, so
    /// an open prompt delays the removal until it is answered.
    ///
    /// Returns false if no such target was registered.
    pub async fn remove(&self, id: &TargetId) -> Result<bool, RegistryError> {
        let Some((_, target)) = self.targets.remove(id) else {
            return Ok(false);
        };

        target.mark_removed().await;
        self.ctx.settings.forget(id)?;

        tracing::info!("Removed target {}", target.display_name());
        self.ctx
            .events
            .publish(MonitorEvent::TargetRemoved { target: id.clone() });
        Ok(true)
    }

    /// Get a target by identity
    pub fn get(&self, id: &TargetId) -> Option<Arc<Target>> {
        self.targets.get(id).map(|r| Arc::clone(&r))
    }

    /// List all targets
    pub fn list(&self) -> Vec<Arc<Target>> {
        self.targets.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Targets grouped by the host their service URL points at
    pub fn by_host(&self) -> BTreeMap<String, Vec<Arc<Target>>> {
        let mut hosts: BTreeMap<String, Vec<Arc<Target>>> = BTreeMap::new();
        for target in self.list() {
            let host = target
                .id()
                .address()
                .host_name()
                .unwrap_or_else(|| "localhost".to_string());
            hosts.entry(host).or_default().push(target);
        }
        hosts
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Re-enable reconnection and probe the given targets right away
    pub fn connect_now(&self, ids: &[TargetId]) {
        let batch: Vec<ProbeRef> = ids
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|target| !target.is_removed())
            .map(|target| {
                target.set_reconnect_disabled(false);
                target as ProbeRef
            })
            .collect();
        self.heartbeat.immediate().schedule(batch);
    }

    /// Close every connection, e.g. at shutdown
    pub async fn close_all(&self) {
        for target in self.list() {
            target.close().await;
        }
    }

    fn insert(
        &self,
        config: &TargetConfig,
        descriptor: Arc<dyn TargetDescriptor>,
    ) -> Result<Arc<Target>, RegistryError> {
        let address = TargetAddress::parse(&config.connection)?;
        let id = TargetId::new(address, config.env_provider.clone());

        let target = match self.targets.entry(id.clone()) {
            Entry::Occupied(existing) => {
                return Err(RegistryError::AlreadyExists {
                    id,
                    name: existing.get().display_name().to_string(),
                });
            }
            Entry::Vacant(slot) => {
                if config.allow_insecure {
                    self.ctx.settings.set_insecure_approved(&id, true)?;
                }
                let name = suggested_name(
                    config.display_name.as_deref(),
                    config.connection.trim(),
                    config.username.as_deref(),
                );
                let target = Target::new(
                    id.clone(),
                    name,
                    descriptor,
                    self.ctx.clone(),
                    self.heartbeat.clone(),
                );
                slot.insert(Arc::clone(&target));
                target
            }
        };

        tracing::info!("Registered {} ({})", target.display_name(), id);
        self.ctx
            .events
            .publish(MonitorEvent::TargetRegistered { target: id });
        Ok(target)
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.targets.len())
            .finish()
    }
}
