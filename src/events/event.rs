//! # Runtime events.
//!
//! [`EventKind`] classifies what happened; [`Event`] carries the metadata.
//! Lifecycle transitions travel as [`EventKind::Transition`] with a
//! [`LifecycleEvent`] payload.
//!
//! ## Ordering guarantees
//! Each event has a process-wide monotonically increasing `seq`. Transitions of
//! one resource are published under that resource's status lock, so their
//! `seq` order equals their transition order.
//!
//! ## Example
//! ```rust
//! use servwatch::{Event, EventKind, FailureDetail, LifecycleEvent, ResourceStatus};
//!
//! let ev = Event::transition(LifecycleEvent {
//!     resource: "db".into(),
//!     from: ResourceStatus::Running,
//!     to: ResourceStatus::Failed,
//!     failure: Some(FailureDetail::new("resource_failed", "connection reset")),
//! });
//!
//! assert_eq!(ev.kind, EventKind::Transition);
//! assert_eq!(ev.resource.as_deref(), Some("db"));
//! assert_eq!(ev.reason.as_deref(), Some("connection reset"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::error::render_chain;
use crate::lifecycle::ResourceStatus;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A resource changed status. Sets `resource`, `lifecycle`, and `reason` on failures.
    Transition,
    /// A resource's readiness flag changed. Sets `resource`, `ready`, `reason`.
    ReadinessChanged,

    /// Watcher scheduled a restart. Sets `resource`, `attempt`, `delay_ms`, `reason`.
    RestartScheduled,
    /// A restarted resource reached `Running` and `Ready`; its counter was reset.
    RestartRecovered,
    /// A resource failed more often than allowed. Sets `resource`, `attempt`, `reason`.
    RestartExhausted,

    /// Shutdown was requested (signal, escalation or API). Sets `reason`.
    ShutdownRequested,
    /// All resources stopped within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded; `reason` lists stuck resources.
    GraceExceeded,

    /// A subscriber panicked while handling an event. Sets `resource` (subscriber name), `reason`.
    SubscriberPanicked,
    /// A subscriber queue was full or closed. Sets `resource` (subscriber name), `reason`.
    SubscriberOverflow,
}

/// Error detail attached to `Failed`/`Crashed` transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureDetail {
    /// Stable error type name.
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
    /// Rendered cause chain or panic location, when available.
    pub trace: Option<String>,
}

impl FailureDetail {
    /// Builds a detail without trace.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Builds a detail from an error, rendering its source chain as the trace.
    pub fn from_error(error_type: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            error_type: error_type.into(),
            message: err.to_string(),
            trace: Some(render_chain(err)),
        }
    }

    /// Attaches a trace.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl From<&crate::error::ResourceError> for FailureDetail {
    fn from(err: &crate::error::ResourceError) -> Self {
        FailureDetail::new(err.as_label(), err.to_string())
    }
}

/// One status transition of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Resource name.
    pub resource: Arc<str>,
    /// Status before the transition.
    pub from: ResourceStatus,
    /// Status after the transition.
    pub to: ResourceStatus,
    /// Failure detail for `Failed`/`Crashed`.
    pub failure: Option<FailureDetail>,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Process-wide monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Resource (or subscriber) name, if applicable.
    pub resource: Option<Arc<str>>,
    /// Transition payload for [`EventKind::Transition`].
    pub lifecycle: Option<LifecycleEvent>,
    /// Readiness flag for [`EventKind::ReadinessChanged`].
    pub ready: Option<bool>,
    /// Restart attempt number (1-based).
    pub attempt: Option<u32>,
    /// Restart delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event of the given kind with the current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            resource: None,
            lifecycle: None,
            ready: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Wraps a lifecycle transition.
    pub fn transition(lc: LifecycleEvent) -> Self {
        let mut ev = Event::new(EventKind::Transition).with_resource(Arc::clone(&lc.resource));
        if let Some(f) = &lc.failure {
            ev = ev.with_reason(f.message.as_str());
        }
        ev.lifecycle = Some(lc);
        ev
    }

    /// Readiness flip of `resource`.
    pub fn readiness(resource: Arc<str>, ready: bool, reason: Option<Arc<str>>) -> Self {
        let mut ev = Event::new(EventKind::ReadinessChanged).with_resource(resource);
        ev.ready = Some(ready);
        ev.reason = reason;
        ev
    }

    /// Attaches a resource name.
    #[inline]
    pub fn with_resource(mut self, resource: impl Into<Arc<str>>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Returns the new status if this is a transition event.
    pub fn transition_to(&self) -> Option<ResourceStatus> {
        self.lifecycle.as_ref().map(|lc| lc.to)
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_resource(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_resource(subscriber)
            .with_reason(info)
    }
}
