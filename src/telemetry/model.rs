//! Persisted telemetry types.
#![deny(missing_docs)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::execution::ExecutionResult;

/// Registration a record belongs to, by database id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ExecutionTarget {
    /// Event listener (`listeners.id`).
    Listener(i64),
    /// Scheduled job (`scheduled_jobs.id`).
    Job(i64),
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Listener(id) => write!(f, "listener#{id}"),
            ExecutionTarget::Job(id) => write!(f, "job#{id}"),
        }
    }
}

/// Persisted outcome of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Work completed.
    Success,
    /// Work returned an error or panicked.
    Error,
    /// Work was cancelled, abandoned or dropped before settling.
    Cancelled,
}

impl ExecutionStatus {
    /// Value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "error" => Some(ExecutionStatus::Error),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// One handler invocation or job execution. Built once, appended, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    /// Registration that ran.
    pub target: ExecutionTarget,
    /// Session the record belongs to.
    pub session_id: i64,
    /// Wall-clock start, for display and retention.
    pub started_at: DateTime<Utc>,
    /// Monotonic duration.
    pub duration: Duration,
    /// Classified outcome.
    pub status: ExecutionStatus,
    /// Error kind; set only for `Error`.
    pub error_type: Option<String>,
    /// Error message; set only for `Error`.
    pub error_message: Option<String>,
    /// Source chain or panic trace for unclassified errors.
    pub error_trace: Option<String>,
}

impl ExecutionRecord {
    /// Builds the record for a classified outcome.
    pub fn new(
        target: ExecutionTarget,
        session_id: i64,
        started_at: DateTime<Utc>,
        duration: Duration,
        result: &ExecutionResult,
    ) -> Self {
        let detail = result.detail();
        Self {
            target,
            session_id,
            started_at,
            duration,
            status: result.status(),
            error_type: detail.map(|d| d.error_type.clone()),
            error_message: detail.map(|d| d.message.clone()),
            error_trace: detail.and_then(|d| d.trace.clone()),
        }
    }
}

/// Natural key of a registration: `(app_key, instance_index, name, topic)`.
///
/// `topic` is empty when the registration has none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RegistrationKey {
    /// Owning application.
    pub app_key: String,
    /// Instance of the application, for apps configured more than once.
    pub instance_index: u32,
    /// Handler name for listeners, job name for scheduled jobs.
    pub name: String,
    /// Event topic, or empty.
    pub topic: String,
}

impl RegistrationKey {
    /// Key without a topic.
    pub fn new(app_key: impl Into<String>, instance_index: u32, name: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            instance_index,
            name: name.into(),
            topic: String::new(),
        }
    }

    /// Sets the topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// Event listener registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerRegistration {
    /// Natural key.
    pub key: RegistrationKey,
    /// Quiet period before an invocation.
    pub debounce: Option<Duration>,
    /// Minimum spacing between invocations.
    pub throttle: Option<Duration>,
    /// Listener removes itself after the first invocation.
    pub once: bool,
    /// Dispatch priority; higher runs first.
    pub priority: i32,
    /// Human-readable predicate description.
    pub predicate: Option<String>,
    /// `file:line` of the registration site.
    pub source_location: Option<String>,
}

impl ListenerRegistration {
    /// Registration with no debounce, throttle or predicate.
    pub fn new(key: RegistrationKey) -> Self {
        Self {
            key,
            debounce: None,
            throttle: None,
            once: false,
            priority: 0,
            predicate: None,
            source_location: None,
        }
    }
}

/// Scheduled job registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRegistration {
    /// Natural key.
    pub key: RegistrationKey,
    /// Callable the job runs.
    pub handler_name: String,
    /// Trigger kind, e.g. `interval` or `cron`.
    pub trigger_type: String,
    /// Human-readable schedule, e.g. `every 5m`.
    pub trigger_description: Option<String>,
    /// Job runs more than once.
    pub repeat: bool,
    /// `file:line` of the registration site.
    pub source_location: Option<String>,
}

impl JobRegistration {
    /// One-shot registration without a description.
    pub fn new(key: RegistrationKey, handler_name: impl Into<String>, trigger_type: impl Into<String>) -> Self {
        Self {
            key,
            handler_name: handler_name.into(),
            trigger_type: trigger_type.into(),
            trigger_description: None,
            repeat: false,
            source_location: None,
        }
    }
}

/// Lifecycle of one process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Process is alive and heartbeating.
    Running,
    /// Process stopped cleanly.
    Success,
    /// Process stopped after an error.
    Error,
    /// Process ended without finishing its session; finalized at next startup.
    Unknown,
}

impl SessionStatus {
    /// Value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Success => "success",
            SessionStatus::Error => "error",
            SessionStatus::Unknown => "unknown",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "success" => Some(SessionStatus::Success),
            "error" => Some(SessionStatus::Error),
            "unknown" => Some(SessionStatus::Unknown),
            _ => None,
        }
    }
}

/// Persisted session row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Row id.
    pub id: i64,
    /// When the process began the session.
    pub started_at: DateTime<Utc>,
    /// Set once the session is finished or finalized as unknown.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Latest liveness write.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Current status.
    pub status: SessionStatus,
    /// First error of the session; later errors do not overwrite it.
    pub error_type: Option<String>,
    /// Message of the first error.
    pub error_message: Option<String>,
    /// Trace of the first error, if any.
    pub error_trace: Option<String>,
}

/// Per-registration aggregate over its records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    /// Registration id.
    pub target: ExecutionTarget,
    /// Registration natural key.
    pub key: RegistrationKey,
    /// Number of records.
    pub total: u64,
    /// Records with status `success`.
    pub successes: u64,
    /// Records with status `error`.
    pub errors: u64,
    /// Records with status `cancelled`.
    pub cancelled: u64,
    /// Mean duration in milliseconds; 0 without records.
    pub avg_duration_ms: f64,
    /// Duration of the latest record.
    pub last_duration_ms: Option<f64>,
    /// Start of the latest record.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// One failed record with its registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentError {
    /// Registration id.
    pub target: ExecutionTarget,
    /// Registration natural key.
    pub key: RegistrationKey,
    /// When the failed work started.
    pub started_at: DateTime<Utc>,
    /// Error kind.
    pub error_type: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
}

/// Rows removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records older than the retention horizon.
    pub expired: usize,
    /// Records evicted by the size failsafe.
    pub evicted: usize,
    /// Registrations with no remaining records.
    pub registrations: usize,
}

impl SweepReport {
    /// `true` when the sweep removed nothing.
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.evicted == 0 && self.registrations == 0
    }
}
