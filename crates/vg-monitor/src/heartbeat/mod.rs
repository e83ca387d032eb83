//! Heartbeat scheduler
//!
//! Two strategies share one dispatcher:
//!
//! - [`ImmediateStrategy`] probes newly registered or explicitly requested
//!   targets once after a short delay.
//! - [`LazyStrategy`] keeps sweeping whatever is still unreachable with a
//!   long delay until every target has connected, been removed or had
//!   reconnection disabled.
//!
//! Targets that fail an immediate probe move to the lazy sweep. A target is
//! held by at most one batch at any time.

mod immediate;
mod lazy;
mod ping;

#[cfg(test)]
pub(crate) mod testing;

pub use immediate::ImmediateStrategy;
pub use lazy::LazyStrategy;
pub use ping::{BatchFinished, Dispatcher, PingFilter, Probe, ProbeRef};

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use vg_core::config::HeartbeatConfig;

use crate::events::EventBus;

/// Heartbeat lifecycle errors
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// `start` was called outside a tokio runtime
    #[error("Heartbeat must be started from within a tokio runtime")]
    NoRuntime,

    /// The heartbeat was stopped and cannot be restarted
    #[error("Heartbeat has been stopped")]
    Stopped,
}

struct HeartbeatInner {
    config: HeartbeatConfig,
    cancel: CancellationToken,
    dispatcher: Arc<Dispatcher>,
    immediate: ImmediateStrategy,
    lazy: Arc<LazyStrategy>,
}

/// Cloneable handle to the scheduler
#[derive(Clone)]
pub struct Heartbeat {
    inner: Arc<HeartbeatInner>,
}

impl Heartbeat {
    /// Build a stopped scheduler. Offered targets are queued until `start`.
    pub fn new(config: HeartbeatConfig, events: EventBus) -> Self {
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(config.max_workers, cancel.clone()));
        let lazy = Arc::new(LazyStrategy::new(
            Arc::clone(&dispatcher),
            config.poll_delay,
            events.clone(),
        ));
        let immediate = ImmediateStrategy::new(
            Arc::clone(&dispatcher),
            config.immediate_delay,
            Arc::clone(&lazy),
            events,
        );

        Self {
            inner: Arc::new(HeartbeatInner {
                config,
                cancel,
                dispatcher,
                immediate,
                lazy,
            }),
        }
    }

    /// Start dispatching on the current tokio runtime
    pub fn start(&self) -> Result<(), HeartbeatError> {
        if self.inner.cancel.is_cancelled() {
            return Err(HeartbeatError::Stopped);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| HeartbeatError::NoRuntime)?;

        if self.inner.dispatcher.attach(runtime) {
            tracing::info!(
                "Heartbeat started (immediate {:?}, poll {:?}, {} workers)",
                self.inner.config.immediate_delay,
                self.inner.config.poll_delay,
                self.inner.config.max_workers
            );
            self.inner.lazy.schedule(Vec::new());
        }
        Ok(())
    }

    /// Stop all scheduling. Probes already connecting run to completion;
    /// queued probes are abandoned.
    pub fn stop(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.lazy.clear();
        tracing::info!("Heartbeat stopped");
    }

    /// Whether probes are being dispatched
    pub fn is_running(&self) -> bool {
        self.inner.dispatcher.is_running()
    }

    /// Scheduler configuration
    pub fn config(&self) -> &HeartbeatConfig {
        &self.inner.config
    }

    /// Strategy for one-shot probes
    pub fn immediate(&self) -> &ImmediateStrategy {
        &self.inner.immediate
    }

    /// Strategy for recurring sweeps
    pub fn lazy(&self) -> &Arc<LazyStrategy> {
        &self.inner.lazy
    }

    /// Shared dispatcher, exposed for inspection
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .finish()
    }
}
