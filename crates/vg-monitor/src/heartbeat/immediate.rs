//! Immediate strategy: one quick probe, then hand off to the lazy sweep

use std::sync::Arc;
use std::time::Duration;

use vg_core::TargetId;

use super::lazy::LazyStrategy;
use super::ping::{Dispatcher, PingFilter, ProbeRef};
use crate::events::{EventBus, MonitorEvent};

/// Probes targets right away, used for registration and explicit requests
pub struct ImmediateStrategy {
    dispatcher: Arc<Dispatcher>,
    delay: Duration,
    fallback: Arc<LazyStrategy>,
    events: EventBus,
}

impl ImmediateStrategy {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        delay: Duration,
        fallback: Arc<LazyStrategy>,
        events: EventBus,
    ) -> Self {
        Self {
            dispatcher,
            delay,
            fallback,
            events,
        }
    }

    /// Probe `targets` once. Targets that stay unreachable go to the lazy
    /// sweep; this strategy never retries them itself.
    pub fn schedule(&self, targets: Vec<ProbeRef>) {
        if self.dispatcher.is_stopped() {
            return;
        }
        let targets: Vec<ProbeRef> = targets
            .into_iter()
            .filter(|p| PingFilter::Immediate.accepts(p.as_ref()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let ids: Vec<TargetId> = targets.iter().map(|p| p.id().clone()).collect();
        self.fallback.withdraw(&ids);

        tracing::debug!("Immediate probe of {} targets", ids.len());

        let fallback = Arc::clone(&self.fallback);
        let events = self.events.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        self.dispatcher.ping_targets(
            targets,
            self.delay,
            PingFilter::Immediate,
            Box::new(move |unresolved| {
                if unresolved.is_empty() || dispatcher.is_stopped() {
                    return;
                }
                let ids = unresolved.iter().map(|p| p.id().clone()).collect();
                events.publish(MonitorEvent::FallbackScheduled { targets: ids });
                fallback.schedule(unresolved);
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::testing::FakeProbe;
    use crate::heartbeat::Probe;
    use tokio::runtime::Handle;
    use tokio_util::sync::CancellationToken;

    fn strategies(lazy_delay: Duration) -> (ImmediateStrategy, Arc<LazyStrategy>, EventBus) {
        let events = EventBus::new(64);
        let dispatcher = Arc::new(Dispatcher::new(4, CancellationToken::new()));
        dispatcher.attach(Handle::current());
        let lazy = Arc::new(LazyStrategy::new(
            Arc::clone(&dispatcher),
            lazy_delay,
            events.clone(),
        ));
        let immediate = ImmediateStrategy::new(
            dispatcher,
            Duration::from_millis(1),
            Arc::clone(&lazy),
            events.clone(),
        );
        (immediate, lazy, events)
    }

    #[tokio::test]
    async fn test_failures_fall_back_to_lazy() {
        let (immediate, lazy, events) = strategies(Duration::from_secs(60));
        let mut rx = events.subscribe();
        let ok = FakeProbe::new("db-1:1000", 1);
        let bad = FakeProbe::new("db-2:1000", 0);

        immediate.schedule(vec![ok.as_probe(), bad.as_probe()]);

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let MonitorEvent::FallbackScheduled { targets } = rx.recv().await.unwrap() {
                    return targets;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(event, vec![bad.id().clone()]);
        assert!(ok.is_available());
        assert_eq!(lazy.sweep_count(), 1);
        assert_eq!(bad.attempts(), 1);
    }

    #[tokio::test]
    async fn test_available_targets_are_skipped() {
        let (immediate, lazy, _) = strategies(Duration::from_secs(60));
        let probe = FakeProbe::new("db-1:1000", 1);
        assert!(probe.try_connect().await);

        immediate.schedule(vec![probe.as_probe()]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(probe.attempts(), 1);
        assert_eq!(lazy.sweep_count(), 0);
    }

    #[tokio::test]
    async fn test_withdraws_from_lazy_pending() {
        let (immediate, lazy, _) = strategies(Duration::from_secs(60));
        let blocker = FakeProbe::new("db-1:1000", 0);
        let probe = FakeProbe::new("db-2:1000", 1);

        lazy.schedule(vec![blocker.as_probe()]);
        lazy.schedule(vec![probe.as_probe()]);
        assert!(lazy.contains(probe.id()));

        immediate.schedule(vec![probe.as_probe()]);
        assert!(!lazy.contains(probe.id()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !probe.is_available() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(probe.attempts(), 1);
    }
}
