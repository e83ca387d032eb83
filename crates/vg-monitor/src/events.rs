//! Monitor event bus
//!
//! State changes are published on a broadcast channel. Publishing never
//! blocks; each subscriber receives events on its own task, and a subscriber
//! that falls behind loses the oldest events.

use serde::Serialize;
use tokio::sync::broadcast;

use vg_core::{ConnectionState, TargetId, TargetState};

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events published by targets, connection handles and the heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A target became available or unavailable
    TargetStateChanged {
        target: TargetId,
        old: TargetState,
        new: TargetState,
        /// Caused by an explicit user or system action
        explicit: bool,
    },

    /// A connection handle changed state
    ConnectionStateChanged {
        target: TargetId,
        old: ConnectionState,
        new: ConnectionState,
    },

    /// A target was added to the registry
    TargetRegistered { target: TargetId },

    /// A target was removed from the registry
    TargetRemoved { target: TargetId },

    /// A lazy sweep started probing these targets
    SweepStarted { targets: Vec<TargetId> },

    /// A lazy sweep finished; these targets are still unreachable
    SweepFinished { unresolved: Vec<TargetId> },

    /// An immediate batch handed its failures to the lazy strategy
    FallbackScheduled { targets: Vec<TargetId> },
}

/// Cloneable handle to the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// Create a bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped when nobody is listening
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
