//! # Lifecycle event bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. Every
//! [`Lifecycle`](crate::Lifecycle) publishes its transitions here; the
//! service watcher, the subscriber fan-out and the session tracker read them.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                     Receivers:
//!   Lifecycle "db"  ──┐                ┌──► ServiceWatcher (restart / escalate)
//!   Lifecycle "api" ──┼──► Bus ────────┼──► subscriber_listener ──► SubscriberSet
//!   ServiceWatcher  ──┤  (broadcast)   └──► tests / ad-hoc receivers
//!   ShutdownGuard   ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never awaits.
//! - **Per-publisher order**: events sent by one publisher are received in send order.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events sent with no active receiver are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone; all clones share one ring buffer.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
