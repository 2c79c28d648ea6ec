//! Error types used by the servwatch runtime, resources and units of work.
//!
//! - [`RuntimeError`]: errors raised by the supervision runtime itself.
//! - [`ResourceError`]: errors returned by a resource's start/serve/stop hooks.
//! - [`WorkError`]: errors returned by a single unit of work (handler or job).
//! - [`TransitionError`]: an illegal lifecycle transition (a programming error).
//! - [`StoreError`]: failures of the telemetry store.
//! - [`Cancelled`]: marker re-propagated by the execution tracker.
//!
//! Each enum offers `as_label()` with a short stable snake_case name for logs.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::ResourceStatus;

/// Why one resource was unhealthy when an escalated shutdown began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    /// Resource name.
    pub resource: String,
    /// Status at the time of the snapshot.
    pub status: ResourceStatus,
    /// Last readiness reason reported by the resource.
    pub reason: Option<String>,
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({}): {}", self.resource, self.status, reason),
            None => write!(f, "{} ({}): no reason reported", self.resource, self.status),
        }
    }
}

fn join_failures(failures: &[ResourceFailure]) -> String {
    if failures.is_empty() {
        return "no unready resources".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// # Errors produced by the supervision runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some resources did not stop in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Resources that did not stop in time.
        stuck: Vec<String>,
    },

    /// An unrecoverable failure escalated to process shutdown.
    #[error("shutdown escalated by {trigger}: {}", join_failures(.failures))]
    Escalated {
        /// What triggered the escalation.
        trigger: String,
        /// Every resource that was not ready when shutdown began, with its reason.
        failures: Vec<ResourceFailure>,
    },

    /// Two resources were registered under the same name.
    #[error("resource {resource:?} is registered twice")]
    DuplicateResource {
        /// Offending name.
        resource: String,
    },

    /// A resource depends on a name that was never registered.
    #[error("resource {resource:?} depends on unknown resource {dependency:?}")]
    UnknownDependency {
        /// Dependent resource.
        resource: String,
        /// Missing dependency.
        dependency: String,
    },

    /// Dependencies form a cycle.
    #[error("dependency cycle through resource {resource:?}")]
    DependencyCycle {
        /// A resource on the cycle.
        resource: String,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to install shutdown signal handler: {0}")]
    Signal(#[from] std::io::Error),

    /// Telemetry store failure during startup or session finalization.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use servwatch::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Escalated { .. } => "runtime_escalated",
            RuntimeError::DuplicateResource { .. } => "runtime_duplicate_resource",
            RuntimeError::UnknownDependency { .. } => "runtime_unknown_dependency",
            RuntimeError::DependencyCycle { .. } => "runtime_dependency_cycle",
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Store(_) => "runtime_store",
        }
    }
}

/// # Errors returned by resource hooks.
///
/// The runner maps them onto lifecycle transitions:
/// `Failed` → [`ResourceStatus::Failed`] (restartable),
/// `Fatal` → [`ResourceStatus::Crashed`] (escalates),
/// `Canceled` → [`ResourceStatus::Stopped`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ResourceError {
    /// Recoverable failure; the watcher may restart the resource.
    #[error("{reason}")]
    Failed {
        /// Human-readable reason.
        reason: String,
    },

    /// Unrecoverable failure; the process shuts down.
    #[error("fatal: {reason}")]
    Fatal {
        /// Human-readable reason.
        reason: String,
    },

    /// The resource observed cancellation and exited cleanly.
    #[error("cancelled")]
    Canceled,
}

impl ResourceError {
    /// Recoverable failure shorthand.
    pub fn failed(reason: impl Into<String>) -> Self {
        ResourceError::Failed {
            reason: reason.into(),
        }
    }

    /// Unrecoverable failure shorthand.
    pub fn fatal(reason: impl Into<String>) -> Self {
        ResourceError::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ResourceError::Failed { .. } => "resource_failed",
            ResourceError::Fatal { .. } => "resource_fatal",
            ResourceError::Canceled => "resource_canceled",
        }
    }

    /// Indicates whether the watcher may restart after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResourceError::Failed { .. })
    }
}

/// # Errors returned by a unit of work.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkError {
    /// A recognized failure kind with a stable name; logged on one line.
    #[error("{kind}: {message}")]
    Framework {
        /// Stable kind name, e.g. `"entity_not_found"`.
        kind: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Anything unexpected; logged with its full source chain.
    #[error(transparent)]
    Unclassified(Box<dyn std::error::Error + Send + Sync>),

    /// Cooperative cancellation. Not an error; always re-propagated.
    #[error("cancelled")]
    Cancelled,
}

impl WorkError {
    /// Builds a framework-classified error.
    pub fn framework(kind: &'static str, message: impl Into<String>) -> Self {
        WorkError::Framework {
            kind,
            message: message.into(),
        }
    }

    /// Wraps any error as unclassified.
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        WorkError::Unclassified(err.into())
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkError::Framework { .. } => "work_framework",
            WorkError::Unclassified(_) => "work_unclassified",
            WorkError::Cancelled => "work_cancelled",
        }
    }
}

/// Returned by the execution tracker when a unit of work was cancelled.
///
/// Callers must propagate it (usually with `?`) so the cancellation reaches
/// the top of the call chain.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unit of work cancelled")]
pub struct Cancelled;

/// An illegal lifecycle transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal lifecycle transition for {resource:?}: {from} -> {to}")]
pub struct TransitionError {
    /// Resource name.
    pub resource: String,
    /// Status the resource was in.
    pub from: ResourceStatus,
    /// Requested status.
    pub to: ResourceStatus,
}

/// # Errors produced by the telemetry store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("store connection lock poisoned")]
    Poisoned,

    /// A blocking store task panicked or was cancelled.
    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A persisted column held a value this version cannot decode.
    #[error("cannot decode {column} value {value:?}")]
    Decode {
        /// Column name.
        column: &'static str,
        /// Raw value.
        value: String,
    },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Sqlite(_) => "store_sqlite",
            StoreError::Io(_) => "store_io",
            StoreError::Poisoned => "store_poisoned",
            StoreError::Join(_) => "store_join",
            StoreError::Decode { .. } => "store_decode",
        }
    }
}

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Renders an error and its `source()` chain, one cause per line.
pub(crate) fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(cause) = cur {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        cur = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn escalated_message_lists_reasons() {
        let err = RuntimeError::Escalated {
            trigger: "db exhausted restarts".into(),
            failures: vec![
                ResourceFailure {
                    resource: "db".into(),
                    status: ResourceStatus::Failed,
                    reason: Some("connection refused".into()),
                },
                ResourceFailure {
                    resource: "api".into(),
                    status: ResourceStatus::Running,
                    reason: None,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("db (failed): connection refused"), "{msg}");
        assert!(msg.contains("api (running): no reason reported"), "{msg}");
    }

    #[test]
    fn chain_includes_sources() {
        let err = Outer(std::io::Error::other("disk gone"));
        assert_eq!(render_chain(&err), "outer\ncaused by: disk gone");
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(ResourceError::failed("x").as_label(), "resource_failed");
        assert!(!ResourceError::fatal("x").is_retryable());
        assert_eq!(WorkError::Cancelled.as_label(), "work_cancelled");
        assert_eq!(
            WorkError::framework("entity_not_found", "light.kitchen").to_string(),
            "entity_not_found: light.kitchen"
        );
    }
}
