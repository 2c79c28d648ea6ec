//! # Execution telemetry persisted in SQLite.
//!
//! - [`Telemetry`]: one session per process run; owns the writer, heartbeat and retention loops
//! - [`TelemetryStore`]: schema, registration upserts, record inserts, sweeps and queries
//! - [`RecordSink`]: non-blocking producer side of the single-writer queue
//! - [`SessionTracker`]: bus subscriber that stores the first crash on the session row

mod config;
mod model;
mod schema;
mod session;
mod store;
mod writer;

pub use config::TelemetryConfig;
pub use model::{
    ExecutionRecord, ExecutionStatus, ExecutionSummary, ExecutionTarget, JobRegistration,
    ListenerRegistration, RecentError, RegistrationKey, Session, SessionStatus, SweepReport,
};
pub use session::{SessionOutcome, SessionTracker, Telemetry};
pub use store::TelemetryStore;
pub use writer::{RecordSink, WriteOp};
