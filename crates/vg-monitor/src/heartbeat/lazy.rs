//! Lazy strategy: periodic sweeps over unreachable targets
//!
//! Offered targets collect in a pending map. At most one sweep runs at a
//! time; when it finishes, whatever is still unreachable is merged back and
//! the next sweep starts on its own. The loop stops once the pending map is
//! empty.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use vg_core::TargetId;

use super::ping::{Dispatcher, PingFilter, ProbeRef};
use crate::events::{EventBus, MonitorEvent};

#[derive(Default)]
struct LazyState {
    pending: HashMap<TargetId, ProbeRef>,
    sweep_running: bool,
}

impl LazyState {
    fn merge(&mut self, targets: Vec<ProbeRef>) {
        for probe in targets {
            self.pending.insert(probe.id().clone(), probe);
        }
    }

    fn purge(&mut self) {
        self.pending.retain(|id, probe| {
            let keep = PingFilter::Lazy.accepts(probe.as_ref());
            if !keep {
                tracing::trace!("Dropping {} from the lazy sweep", id);
            }
            keep
        });
    }
}

/// Sweeps unreachable targets with a long delay between attempts
pub struct LazyStrategy {
    dispatcher: Arc<Dispatcher>,
    delay: Duration,
    events: EventBus,
    state: Mutex<LazyState>,
    sweeps: AtomicU64,
}

impl LazyStrategy {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, delay: Duration, events: EventBus) -> Self {
        Self {
            dispatcher,
            delay,
            events,
            state: Mutex::new(LazyState::default()),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Offer targets for the next sweep and start one if none is running.
    ///
    /// Available, removed and reconnect-disabled targets are dropped.
    pub fn schedule(self: &Arc<Self>, targets: Vec<ProbeRef>) {
        if self.dispatcher.is_stopped() {
            return;
        }
        let snapshot = {
            let mut state = self.lock();
            state.merge(targets);
            state.purge();

            if !self.dispatcher.is_running() || state.sweep_running || state.pending.is_empty() {
                return;
            }

            state.sweep_running = true;
            let snapshot: Vec<ProbeRef> = state.pending.drain().map(|(_, probe)| probe).collect();
            snapshot
        };

        let sweep = self.sweeps.fetch_add(1, Ordering::SeqCst) + 1;
        let ids: Vec<TargetId> = snapshot.iter().map(|p| p.id().clone()).collect();
        tracing::info!("Starting sweep {} over {} targets", sweep, ids.len());
        self.events.publish(MonitorEvent::SweepStarted { targets: ids });

        let lazy = Arc::clone(self);
        self.dispatcher.ping_targets(
            snapshot,
            self.delay,
            PingFilter::Lazy,
            Box::new(move |unresolved| lazy.ping_finished(unresolved)),
        );
    }

    fn ping_finished(self: &Arc<Self>, unresolved: Vec<ProbeRef>) {
        let ids: Vec<TargetId> = unresolved.iter().map(|p| p.id().clone()).collect();
        let reschedule = {
            let mut state = self.lock();
            state.sweep_running = false;
            if self.dispatcher.is_stopped() {
                state.pending.clear();
                return;
            }
            state.merge(unresolved);
            state.purge();
            !state.pending.is_empty()
        };

        tracing::info!("Sweep finished, {} targets still unreachable", ids.len());
        self.events.publish(MonitorEvent::SweepFinished { unresolved: ids });

        if reschedule {
            self.schedule(Vec::new());
        }
    }

    /// Number of sweeps started so far
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    /// Targets waiting for the next sweep
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether a sweep is in progress
    pub fn is_sweep_running(&self) -> bool {
        self.lock().sweep_running
    }

    /// Whether a target is waiting for the next sweep
    pub fn contains(&self, id: &TargetId) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Take targets out of the pending map; the caller probes them instead
    pub(crate) fn withdraw(&self, ids: &[TargetId]) {
        let mut state = self.lock();
        for id in ids {
            state.pending.remove(id);
        }
    }

    pub(crate) fn clear(&self) {
        self.lock().pending.clear();
    }

    fn lock(&self) -> MutexGuard<'_, LazyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
