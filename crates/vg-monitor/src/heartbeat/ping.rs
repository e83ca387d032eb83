//! Batch dispatch of connection probes
//!
//! Each batch gets its own bounded worker pool. Targets are claimed in a set
//! shared by both strategies, so a target is never probed by two batches at
//! once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use vg_core::TargetId;

/// Something the heartbeat can try to connect
#[async_trait]
pub trait Probe: Send + Sync {
    /// Identity used for deduplication
    fn id(&self) -> &TargetId;

    /// Already connected
    fn is_available(&self) -> bool;

    /// Removed from the registry; never probed again
    fn is_removed(&self) -> bool;

    /// Automatic reconnection is turned off
    fn reconnect_disabled(&self) -> bool;

    /// Run one connect attempt; true when the target is now available
    async fn try_connect(&self) -> bool;
}

/// Shared reference to a probe
pub type ProbeRef = Arc<dyn Probe>;

/// Which targets a batch skips up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFilter {
    /// Skip available and removed targets
    Immediate,
    /// Also skip targets with reconnection disabled
    Lazy,
}

impl PingFilter {
    pub(crate) fn accepts(self, probe: &dyn Probe) -> bool {
        if probe.is_available() || probe.is_removed() {
            return false;
        }
        match self {
            PingFilter::Immediate => true,
            PingFilter::Lazy => !probe.reconnect_disabled(),
        }
    }
}

/// Completion callback; receives the probes that are still unreachable
pub type BatchFinished = Box<dyn FnOnce(Vec<ProbeRef>) + Send>;

/// Runs probe batches on the tokio runtime
pub struct Dispatcher {
    max_workers: usize,
    in_flight: Mutex<HashSet<TargetId>>,
    cancel: CancellationToken,
    runtime: OnceLock<Handle>,
}

impl Dispatcher {
    /// Create a dispatcher; batches are refused until `attach` is called
    pub fn new(max_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            in_flight: Mutex::new(HashSet::new()),
            cancel,
            runtime: OnceLock::new(),
        }
    }

    /// Bind to a runtime. Returns false if already bound.
    pub(crate) fn attach(&self, runtime: Handle) -> bool {
        self.runtime.set(runtime).is_ok()
    }

    /// Whether batches can currently run
    pub fn is_running(&self) -> bool {
        self.runtime.get().is_some() && !self.cancel.is_cancelled()
    }

    /// Whether the heartbeat was stopped for good
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether a batch currently holds this target
    pub fn is_in_flight(&self, id: &TargetId) -> bool {
        self.claims().contains(id)
    }

    /// Number of targets held by running batches
    pub fn in_flight_len(&self) -> usize {
        self.claims().len()
    }

    /// Probe `targets` after `delay`, at most `max_workers` at a time.
    ///
    /// `on_finished` is called exactly once with the probes that did not
    /// connect. Targets already held by another batch are skipped and are not
    /// reported back.
    pub fn ping_targets(
        self: &Arc<Self>,
        targets: Vec<ProbeRef>,
        delay: Duration,
        filter: PingFilter,
        on_finished: BatchFinished,
    ) {
        let runtime = match self.runtime.get() {
            Some(runtime) if !self.cancel.is_cancelled() => runtime.clone(),
            _ => {
                on_finished(targets);
                return;
            }
        };

        let batch = self.claim(targets, filter);
        if batch.is_empty() {
            on_finished(Vec::new());
            return;
        }

        tracing::trace!("Dispatching {} probes ({:?})", batch.len(), filter);

        let permits = Arc::new(Semaphore::new(batch.len().min(self.max_workers)));
        let remaining = Arc::new(AtomicUsize::new(batch.len()));
        let unresolved = Arc::new(Mutex::new(Vec::new()));
        let on_finished = Arc::new(Mutex::new(Some(on_finished)));

        for probe in batch {
            let dispatcher = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let remaining = Arc::clone(&remaining);
            let unresolved = Arc::clone(&unresolved);
            let on_finished = Arc::clone(&on_finished);

            runtime.spawn(async move {
                let connected = dispatcher.run_probe(&probe, delay, &permits).await;
                dispatcher.release(probe.id());

                // Checked after the release: a loss that raced the probe has
                // either flipped the state by now or can re-queue on its own
                let connected = connected && probe.is_available();
                if !connected && !probe.is_removed() {
                    lock(&unresolved).push(probe);
                }

                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let failed = std::mem::take(&mut *lock(&unresolved));
                    let callback = lock(&on_finished).take();
                    if let Some(callback) = callback {
                        callback(failed);
                    }
                }
            });
        }
    }

    async fn run_probe(&self, probe: &ProbeRef, delay: Duration, permits: &Semaphore) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }

        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            permit = permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        if self.cancel.is_cancelled() || probe.is_removed() {
            return false;
        }
        if probe.is_available() {
            return true;
        }

        let connected = probe.try_connect().await;
        tracing::debug!(
            "Probe of {} {}",
            probe.id(),
            if connected { "connected" } else { "failed" }
        );
        connected
    }

    fn claim(&self, targets: Vec<ProbeRef>, filter: PingFilter) -> Vec<ProbeRef> {
        let mut claims = self.claims();
        let batch = targets
            .into_iter()
            .filter(|probe| {
                if !filter.accepts(probe.as_ref()) {
                    tracing::trace!("Skipping {}", probe.id());
                    return false;
                }
                if !claims.insert(probe.id().clone()) {
                    tracing::trace!("{} already in flight", probe.id());
                    return false;
                }
                true
            })
            .collect();
        batch
    }

    fn release(&self, id: &TargetId) {
        self.claims().remove(id);
    }

    fn claims(&self) -> std::sync::MutexGuard<'_, HashSet<TargetId>> {
        lock(&self.in_flight)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
