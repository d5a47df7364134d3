//! Event handling system for battery and connection updates.
//!
//! Events are produced by the renderer from session snapshots and
//! dispatched to consumers such as the D-Bus interface.

use std::sync::Arc;

use crate::beacon::state::Snapshot;

/// Events that can be emitted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodsEvent {
   Connected,
   Disconnected,
   StateUpdated(Snapshot),
   /// The session started or stopped scanning.
   ScanningChanged(bool),
}

/// Trait for implementing event emission.
pub trait EventBus: Send + Sync {
   /// Emits an event to all registered listeners.
   fn emit(&self, event: PodsEvent);
}

/// Type alias for a thread-safe event sender.
pub type EventSender = Arc<dyn EventBus>;
