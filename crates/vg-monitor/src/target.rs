//! Monitored target
//!
//! A target owns at most one connection handle and the AVAILABLE/UNAVAILABLE
//! lifecycle state. Connect attempts run on heartbeat tasks; a lost
//! connection sends the target back to the lazy sweep unless reconnection is
//! disabled or the target was removed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;

use vg_core::traits::TargetDescriptor;
use vg_core::{TargetId, TargetState};

use crate::connection::{ConnectContext, ConnectionHandle, ConnectionObserver};
use crate::events::MonitorEvent;
use crate::heartbeat::{Heartbeat, Probe, ProbeRef};

/// A registered remote endpoint
pub struct Target {
    me: Weak<Target>,
    id: TargetId,
    display_name: String,
    descriptor: Arc<dyn TargetDescriptor>,
    ctx: ConnectContext,
    heartbeat: Heartbeat,
    state: Mutex<TargetState>,
    removed: AtomicBool,
    pid: Mutex<Option<u32>>,
    handle: Mutex<Option<Arc<ConnectionHandle>>>,
    /// Serializes connect sequences
    connect_lock: tokio::sync::Mutex<()>,
}

impl Target {
    /// Create an unavailable target
    pub fn new(
        id: TargetId,
        display_name: impl Into<String>,
        descriptor: Arc<dyn TargetDescriptor>,
        ctx: ConnectContext,
        heartbeat: Heartbeat,
    ) -> Arc<Self> {
        let display_name = display_name.into();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            display_name,
            descriptor,
            ctx,
            heartbeat,
            state: Mutex::new(TargetState::Unavailable),
            removed: AtomicBool::new(false),
            pid: Mutex::new(None),
            handle: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// Name used in logs and prompts
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Current lifecycle state
    pub fn state(&self) -> TargetState {
        *lock(&self.state)
    }

    pub fn is_available(&self) -> bool {
        self.state() == TargetState::Available
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Whether automatic reconnection is turned off
    pub fn reconnect_disabled(&self) -> bool {
        self.ctx.settings.reconnect_disabled(&self.id)
    }

    /// The live connection handle, if any
    pub fn connection(&self) -> Option<Arc<ConnectionHandle>> {
        lock(&self.handle).clone()
    }

    /// Run one connect sequence.
    ///
    /// Returns true when the target is available afterwards. Removed targets
    /// are never connected.
    pub async fn try_connect(&self) -> bool {
        if self.is_removed() {
            return false;
        }
        if self.is_available() {
            return true;
        }

        let _guard = self.connect_lock.lock().await;
        if self.is_removed() {
            return false;
        }
        if self.is_available() {
            return true;
        }

        let handle = self.handle_for_attempt();
        if !handle.connect().await {
            return false;
        }

        if self.is_removed() {
            tracing::debug!("{} was removed while connecting", self.display_name);
            self.release_handle().await;
            return false;
        }

        // The connection may already be gone again; the batch then reports
        // this target as unresolved
        let promoted = self.transition(TargetState::Available, false, || handle.is_connected());
        if !promoted && !self.is_available() {
            tracing::debug!("{} lost its connection while connecting", self.display_name);
            return false;
        }
        true
    }

    /// Connect right away; re-enables automatic reconnection first
    pub fn connect_now(&self) {
        if self.is_removed() {
            return;
        }
        self.set_reconnect_disabled(false);
        if let Some(me) = self.as_probe() {
            self.heartbeat.immediate().schedule(vec![me]);
        }
    }

    /// Close the connection and stop reconnecting
    pub async fn disconnect(&self) {
        self.set_reconnect_disabled(true);
        self.release_handle().await;
        self.clear_pid();
        self.set_state(TargetState::Unavailable, true);
    }

    /// Allow the heartbeat to reconnect this target
    pub fn enable_heartbeat(&self) {
        self.set_reconnect_disabled(false);
        if !self.is_available() && !self.is_removed() {
            if let Some(me) = self.as_probe() {
                self.heartbeat.immediate().schedule(vec![me]);
            }
        }
    }

    /// Stop automatic reconnection; an open connection stays open
    pub fn disable_heartbeat(&self) {
        self.set_reconnect_disabled(true);
    }

    /// Take the target out of monitoring for good.
    ///
    /// Waits for a connect sequence already in progress, so nothing it
    /// persists lands after this returns.
    pub async fn mark_removed(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.release_handle().await;
        drop(self.connect_lock.lock().await);
        self.clear_pid();
        self.set_state(TargetState::Unavailable, true);
    }

    /// Close the connection at shutdown without touching persisted flags
    pub async fn close(&self) {
        self.release_handle().await;
        self.clear_pid();
        self.set_state(TargetState::Unavailable, true);
    }

    /// Process id of the remote endpoint, resolved once per connection
    pub async fn pid(&self) -> Option<u32> {
        let cached = *lock(&self.pid);
        if cached.is_some() {
            return cached;
        }
        let raw = self.connection()?.raw()?;
        let pid = raw.process_id().await?;
        if self.is_available() {
            *lock(&self.pid) = Some(pid);
        }
        Some(pid)
    }

    fn as_probe(&self) -> Option<ProbeRef> {
        self.me.upgrade().map(|me| me as ProbeRef)
    }

    fn handle_for_attempt(&self) -> Arc<ConnectionHandle> {
        let mut slot = lock(&self.handle);
        if let Some(handle) = slot.as_ref() {
            if !handle.is_retired() {
                return Arc::clone(handle);
            }
        }

        let credentials = slot.as_ref().and_then(|h| h.credentials());
        let observer: Weak<dyn ConnectionObserver> = self.me.clone();
        let handle = Arc::new(
            ConnectionHandle::new(
                self.id.clone(),
                self.display_name.clone(),
                Arc::clone(&self.descriptor),
                self.ctx.clone(),
            )
            .with_observer(observer)
            .with_credentials(credentials),
        );
        *slot = Some(Arc::clone(&handle));
        handle
    }

    /// Tear down the handle, keeping it in the slot so its credentials
    /// carry over to the next one
    async fn release_handle(&self) {
        let handle = lock(&self.handle).clone();
        if let Some(handle) = handle {
            handle.disconnect().await;
        }
    }

    pub(crate) fn set_reconnect_disabled(&self, disabled: bool) {
        if let Err(e) = self.ctx.settings.set_reconnect_disabled(&self.id, disabled) {
            tracing::warn!(
                "Failed to persist reconnect flag for {}: {}",
                self.display_name,
                e
            );
        }
    }

    fn set_state(&self, new: TargetState, explicit: bool) {
        self.transition(new, explicit, || true);
    }

    /// Move to `new` if `allowed` holds while the state lock is held.
    ///
    /// Returns true if the state changed.
    fn transition(
        &self,
        new: TargetState,
        explicit: bool,
        allowed: impl FnOnce() -> bool,
    ) -> bool {
        let old = {
            let mut state = lock(&self.state);
            let old = *state;
            if old == new || !allowed() {
                return false;
            }
            *state = new;
            old
        };

        tracing::info!("{} is now {}", self.display_name, new);
        self.ctx.events.publish(MonitorEvent::TargetStateChanged {
            target: self.id.clone(),
            old,
            new,
            explicit,
        });
        true
    }

    fn clear_pid(&self) {
        *lock(&self.pid) = None;
    }
}

#[async_trait]
impl Probe for Target {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn is_available(&self) -> bool {
        Target::is_available(self)
    }

    fn is_removed(&self) -> bool {
        Target::is_removed(self)
    }

    fn reconnect_disabled(&self) -> bool {
        Target::reconnect_disabled(self)
    }

    async fn try_connect(&self) -> bool {
        Target::try_connect(self).await
    }
}

impl ConnectionObserver for Target {
    fn connection_lost(&self) {
        self.clear_pid();
        // A newer handle may have connected before this notification arrived
        self.transition(TargetState::Unavailable, false, || {
            !lock(&self.handle).as_ref().is_some_and(|h| h.is_connected())
        });

        if self.is_removed() || self.reconnect_disabled() {
            return;
        }
        if let Some(me) = self.as_probe() {
            tracing::debug!("Queueing {} for reconnection", self.display_name);
            self.heartbeat.lazy().schedule(vec![me]);
        }
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .field("removed", &self.is_removed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
