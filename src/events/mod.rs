//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`], [`LifecycleEvent`], [`FailureDetail`]: the data model
//! - [`Bus`]: thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: every `Lifecycle`, `ServiceWatcher`, `ShutdownGuard`, `SubscriberSet`
//!   workers (overflow/panic), and the supervisor's stop sequence.
//! - **Consumers**: `ServiceWatcher`, `Supervisor::subscriber_listener()` (fans out to
//!   `SubscriberSet`, which includes the session tracker when telemetry is enabled).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, FailureDetail, LifecycleEvent};
