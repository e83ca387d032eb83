//! Scripted probes for scheduler unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vg_core::{TargetAddress, TargetId};

use super::{Probe, ProbeRef};

/// Tracks how many probes run at once
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Connects on the `succeed_on`th attempt; `0` never connects
pub struct FakeProbe {
    id: TargetId,
    succeed_on: usize,
    attempts: AtomicUsize,
    available: AtomicBool,
    removed: AtomicBool,
    disabled: AtomicBool,
    latency: Mutex<Duration>,
    gauge: Mutex<Option<Gauge>>,
    /// Per-probe concurrency, must never exceed one
    own: Gauge,
}

impl FakeProbe {
    pub fn new(connection: &str, succeed_on: usize) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::new(TargetAddress::parse(connection).unwrap(), None),
            succeed_on,
            attempts: AtomicUsize::new(0),
            available: AtomicBool::new(false),
            removed: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            gauge: Mutex::new(None),
            own: Gauge::default(),
        })
    }

    pub fn with_gauge(self: Arc<Self>, gauge: Gauge) -> Arc<Self> {
        *self.gauge.lock().unwrap() = Some(gauge);
        self
    }

    pub fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub fn as_probe(self: &Arc<Self>) -> ProbeRef {
        Arc::clone(self) as ProbeRef
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.own.max()
    }

    pub fn set_reconnect_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn set_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for FakeProbe {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    fn reconnect_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    async fn try_connect(&self) -> bool {
        let gauge = self.gauge.lock().unwrap().clone();
        let latency = *self.latency.lock().unwrap();

        self.own.enter();
        if let Some(g) = &gauge {
            g.enter();
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(g) = &gauge {
            g.exit();
        }
        self.own.exit();

        let connected = self.succeed_on != 0 && attempt >= self.succeed_on;
        if connected {
            self.available.store(true, Ordering::SeqCst);
        }
        connected
    }
}
