//! vg-monitor: Keeps management connections to remote processes alive
//!
//! Targets are registered by address. Each target owns at most one
//! connection; the heartbeat scheduler probes new targets right away and
//! keeps sweeping unreachable ones until they connect, are removed or have
//! reconnection turned off.

pub mod connection;
pub mod events;
pub mod heartbeat;
pub mod prompt;
pub mod registry;
pub mod state;
pub mod target;

pub use connection::{ConnectContext, ConnectionHandle, TcpDescriptor};
pub use events::{EventBus, MonitorEvent};
pub use heartbeat::{Heartbeat, HeartbeatError};
pub use registry::{RegistryError, TargetRegistry};
pub use state::MonitorState;
pub use target::Target;
