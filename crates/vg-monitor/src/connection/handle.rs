//! Connection handle: the connect state machine for one target
//!
//! A handle walks DISCONNECTED -> CONNECTING -> {CONNECTED, DISCONNECTED}.
//! Security failures are recovered in place by prompting (credentials or an
//! insecure retry); transport failures end the attempt and leave retrying to
//! the heartbeat.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;

use vg_core::traits::{ConnectEnv, InsecureDecision, RawConnection, TargetDescriptor};
use vg_core::{ConnectError, ConnectionState, Credentials, SecurityFailureKind, TargetId};

use super::ConnectContext;
use crate::events::MonitorEvent;

/// Receives asynchronous connection loss from a handle
pub trait ConnectionObserver: Send + Sync {
    /// The transport reported the connection failed or closed
    fn connection_lost(&self);
}

/// What to do after a failed attempt
enum Recovery {
    Retry,
    Abort,
}

struct HandleInner {
    state: ConnectionState,
    insecure: bool,
    credentials: Option<Credentials>,
    raw: Option<Arc<dyn RawConnection>>,
    listener: Option<CancellationToken>,
    /// Torn down; this handle never connects again
    retired: bool,
}

/// One target's transport connection and its connect protocol
pub struct ConnectionHandle {
    target: TargetId,
    display_name: String,
    descriptor: Arc<dyn TargetDescriptor>,
    ctx: ConnectContext,
    observer: Option<Weak<dyn ConnectionObserver>>,
    inner: Mutex<HandleInner>,
}

impl ConnectionHandle {
    /// Create a disconnected handle
    pub fn new(
        target: TargetId,
        display_name: impl Into<String>,
        descriptor: Arc<dyn TargetDescriptor>,
        ctx: ConnectContext,
    ) -> Self {
        Self {
            target,
            display_name: display_name.into(),
            descriptor,
            ctx,
            observer: None,
            inner: Mutex::new(HandleInner {
                state: ConnectionState::Disconnected,
                insecure: false,
                credentials: None,
                raw: None,
                listener: None,
                retired: false,
            }),
        }
    }

    /// Notify `observer` when the transport drops the connection
    pub fn with_observer(mut self, observer: Weak<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Seed the in-memory credentials, e.g. from a previous handle
    pub fn with_credentials(self, credentials: Option<Credentials>) -> Self {
        self.lock().credentials = credentials;
        self
    }

    /// Target this handle connects to
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Whether the transport is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether insecure mode is enabled on this handle
    pub fn is_insecure(&self) -> bool {
        self.lock().insecure
    }

    /// Whether the handle has been torn down
    pub fn is_retired(&self) -> bool {
        self.lock().retired
    }

    /// Credentials collected by prompts so far
    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }

    /// The open transport, while connected
    pub fn raw(&self) -> Option<Arc<dyn RawConnection>> {
        self.lock().raw.clone()
    }

    /// Run a connect sequence.
    ///
    /// Returns true when the handle ends up CONNECTED. Calling this on a
    /// handle that is not DISCONNECTED is a no-op.
    pub async fn connect(self: &Arc<Self>) -> bool {
        loop {
            let env = {
                let mut inner = self.lock();
                if inner.retired || inner.state != ConnectionState::Disconnected {
                    return inner.state == ConnectionState::Connected;
                }
                self.set_state(&mut inner, ConnectionState::Connecting);
                ConnectEnv {
                    credentials: inner.credentials.clone(),
                    insecure: inner.insecure,
                    env_provider: self.target.env_provider().map(str::to_string),
                }
            };

            tracing::debug!(
                "Connecting to {} (insecure: {}, credentials: {})",
                self.target,
                env.insecure,
                env.credentials.is_some()
            );

            match self
                .descriptor
                .open_connection(self.target.address(), &env)
                .await
            {
                Ok(raw) => return self.attach(raw).await,
                Err(err) => {
                    {
                        let mut inner = self.lock();
                        self.set_state(&mut inner, ConnectionState::Disconnected);
                    }
                    match self.recover(&err).await {
                        Recovery::Retry => continue,
                        Recovery::Abort => return false,
                    }
                }
            }
        }
    }

    /// Close the transport and move to DISCONNECTED.
    ///
    /// Idempotent: only a real transition publishes an event.
    pub async fn disconnect(&self) {
        if self.teardown().await {
            tracing::info!("Disconnected from {}", self.target);
        }
    }

    async fn attach(self: &Arc<Self>, raw: Arc<dyn RawConnection>) -> bool {
        let token = {
            let mut inner = self.lock();
            if inner.retired {
                None
            } else {
                let token = CancellationToken::new();
                inner.raw = Some(Arc::clone(&raw));
                inner.listener = Some(token.clone());
                self.set_state(&mut inner, ConnectionState::Connected);
                Some(token)
            }
        };

        let Some(token) = token else {
            // Torn down while the transport was still connecting
            raw.close().await;
            let mut inner = self.lock();
            self.set_state(&mut inner, ConnectionState::Disconnected);
            return false;
        };

        tracing::info!("Connected to {}", self.target);

        let handle = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = raw.closed() => {
                    if let Some(handle) = handle.upgrade() {
                        handle.connection_lost().await;
                    }
                }
            }
        });

        true
    }

    async fn connection_lost(&self) {
        if !self.teardown().await {
            return;
        }

        tracing::warn!("Connection to {} lost", self.target);

        if let Some(observer) = self.observer.as_ref().and_then(Weak::upgrade) {
            observer.connection_lost();
        }
    }

    /// Returns true if this call moved the handle out of CONNECTED/CONNECTING
    async fn teardown(&self) -> bool {
        let (raw, changed) = {
            let mut inner = self.lock();
            inner.retired = true;
            if let Some(listener) = inner.listener.take() {
                listener.cancel();
            }
            let raw = inner.raw.take();
            let changed = self.set_state(&mut inner, ConnectionState::Disconnected);
            (raw, changed)
        };

        if let Some(raw) = raw {
            raw.close().await;
        }

        changed
    }

    async fn recover(&self, err: &ConnectError) -> Recovery {
        let Some(kind) = err.security_kind() else {
            tracing::debug!("Connect to {} failed: {}", self.target, err);
            return Recovery::Abort;
        };

        tracing::info!("Connect to {} rejected: {}", self.target, err);

        let insecure = self.lock().insecure;

        // Re-read on every attempt so external changes take effect
        if !insecure && self.ctx.settings.insecure_approved(&self.target) == Some(true) {
            tracing::debug!("Retrying {} without the trust check (approved)", self.target);
            self.lock().insecure = true;
            return Recovery::Retry;
        }

        if kind == SecurityFailureKind::TransportTrust && !insecure {
            return match self.ctx.insecure_prompt.ask(&self.display_name).await {
                InsecureDecision::Approved { remember } => {
                    if let Err(e) = self
                        .ctx
                        .settings
                        .set_insecure_approved(&self.target, remember)
                    {
                        tracing::warn!(
                            "Failed to persist insecure approval for {}: {}",
                            self.target,
                            e
                        );
                    }
                    self.lock().insecure = true;
                    Recovery::Retry
                }
                InsecureDecision::Declined => {
                    tracing::warn!("Insecure retry declined for {}", self.display_name);
                    self.disable_reconnect();
                    Recovery::Abort
                }
            };
        }

        match self.ctx.credential_prompt.ask(&self.display_name).await {
            Some(credentials) => {
                self.lock().credentials = Some(credentials);
                Recovery::Retry
            }
            None => {
                tracing::warn!("Credential prompt cancelled for {}", self.display_name);
                self.disable_reconnect();
                Recovery::Abort
            }
        }
    }

    fn disable_reconnect(&self) {
        if let Err(e) = self.ctx.settings.set_reconnect_disabled(&self.target, true) {
            tracing::warn!(
                "Failed to disable reconnection for {}: {}",
                self.target,
                e
            );
        }
    }

    /// Returns true if the state changed
    fn set_state(&self, inner: &mut HandleInner, state: ConnectionState) -> bool {
        let old = inner.state;
        if old == state {
            return false;
        }
        inner.state = state;
        self.ctx.events.publish(MonitorEvent::ConnectionStateChanged {
            target: self.target.clone(),
            old,
            new: state,
        });
        true
    }

    fn lock(&self) -> MutexGuard<'_, HandleInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnectionHandle")
            .field("target", &self.target)
            .field("state", &inner.state)
            .field("insecure", &inner.insecure)
            .field("retired", &inner.retired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{context, ScriptedDescriptor, ScriptedPrompt};
    use crate::events::EventBus;
    use vg_core::settings::{MemorySettings, SettingsStore};
    use vg_core::TargetAddress;

    fn target() -> TargetId {
        TargetId::new(TargetAddress::parse("db-1:9010").unwrap(), None)
    }

    fn handle(
        descriptor: Arc<ScriptedDescriptor>,
        prompt: Arc<ScriptedPrompt>,
        settings: Arc<MemorySettings>,
        events: EventBus,
    ) -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new(
            target(),
            "db-1",
            descriptor,
            context(prompt, settings, events),
        ))
    }

    #[tokio::test]
    async fn test_connect_success() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![]));
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let h = handle(
            Arc::clone(&descriptor),
            Arc::new(ScriptedPrompt::cancelling()),
            Arc::new(MemorySettings::new()),
            events,
        );

        assert!(h.connect().await);
        assert_eq!(h.state(), ConnectionState::Connected);
        assert!(h.raw().is_some());
        assert_eq!(descriptor.attempts(), 1);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            MonitorEvent::ConnectionStateChanged { new: ConnectionState::Connecting, .. }
        ));
        assert!(matches!(
            second,
            MonitorEvent::ConnectionStateChanged { new: ConnectionState::Connected, .. }
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_retry() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![Err(
            ConnectError::transport("refused"),
        )]));
        let prompt = Arc::new(ScriptedPrompt::cancelling());
        let h = handle(
            Arc::clone(&descriptor),
            Arc::clone(&prompt),
            Arc::new(MemorySettings::new()),
            EventBus::default(),
        );

        assert!(!h.connect().await);
        assert_eq!(h.state(), ConnectionState::Disconnected);
        assert_eq!(descriptor.attempts(), 1);
        assert_eq!(prompt.credential_asks(), 0);
    }

    #[tokio::test]
    async fn test_credentials_are_cached_and_retried() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![Err(
            ConnectError::authorization("missing credentials"),
        )]));
        let prompt = Arc::new(ScriptedPrompt::supplying(Credentials::new("admin", "pw")));
        let h = handle(
            Arc::clone(&descriptor),
            Arc::clone(&prompt),
            Arc::new(MemorySettings::new()),
            EventBus::default(),
        );

        assert!(h.connect().await);
        assert_eq!(prompt.credential_asks(), 1);
        assert_eq!(descriptor.attempts(), 2);
        let envs = descriptor.envs();
        assert!(envs[0].credentials.is_none());
        assert_eq!(envs[1].credentials, Some(Credentials::new("admin", "pw")));
        assert_eq!(h.credentials(), Some(Credentials::new("admin", "pw")));
    }

    #[tokio::test]
    async fn test_cancelled_credentials_disable_reconnect() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![Err(
            ConnectError::authorization("denied"),
        )]));
        let settings = Arc::new(MemorySettings::new());
        let h = handle(
            descriptor,
            Arc::new(ScriptedPrompt::cancelling()),
            Arc::clone(&settings),
            EventBus::default(),
        );

        assert!(!h.connect().await);
        assert_eq!(h.state(), ConnectionState::Disconnected);
        assert!(settings.reconnect_disabled(&target()));
    }

    #[tokio::test]
    async fn test_trust_failure_prompts_and_remembers() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![Err(
            ConnectError::transport_trust("ssl stub check"),
        )]));
        let settings = Arc::new(MemorySettings::new());
        let prompt = Arc::new(ScriptedPrompt::cancelling().approving_insecure(true));
        let h = handle(
            Arc::clone(&descriptor),
            Arc::clone(&prompt),
            Arc::clone(&settings),
            EventBus::default(),
        );

        assert!(h.connect().await);
        assert!(h.is_insecure());
        assert_eq!(prompt.insecure_asks(), 1);
        assert_eq!(settings.insecure_approved(&target()), Some(true));
        assert!(descriptor.envs()[1].insecure);
    }

    #[tokio::test]
    async fn test_trust_failure_declined_aborts() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![Err(
            ConnectError::transport_trust("ssl stub check"),
        )]));
        let settings = Arc::new(MemorySettings::new());
        let prompt = Arc::new(ScriptedPrompt::cancelling());
        let h = handle(
            Arc::clone(&descriptor),
            Arc::clone(&prompt),
            Arc::clone(&settings),
            EventBus::default(),
        );

        assert!(!h.connect().await);
        assert_eq!(descriptor.attempts(), 1);
        assert_eq!(prompt.credential_asks(), 0);
        assert!(settings.reconnect_disabled(&target()));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let events = EventBus::new(16);
        let h = handle(
            Arc::new(ScriptedDescriptor::new(vec![])),
            Arc::new(ScriptedPrompt::cancelling()),
            Arc::new(MemorySettings::new()),
            events.clone(),
        );
        assert!(h.connect().await);

        let mut rx = events.subscribe();
        h.disconnect().await;
        h.disconnect().await;

        assert_eq!(h.state(), ConnectionState::Disconnected);
        assert!(h.is_retired());
        assert!(matches!(
            rx.try_recv(),
            Ok(MonitorEvent::ConnectionStateChanged { new: ConnectionState::Disconnected, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_retired_handle_does_not_reconnect() {
        let descriptor = Arc::new(ScriptedDescriptor::new(vec![]));
        let h = handle(
            Arc::clone(&descriptor),
            Arc::new(ScriptedPrompt::cancelling()),
            Arc::new(MemorySettings::new()),
            EventBus::default(),
        );
        h.disconnect().await;

        assert!(!h.connect().await);
        assert_eq!(descriptor.attempts(), 0);
    }
}
