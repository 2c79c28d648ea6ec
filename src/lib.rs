//! # servwatch
//!
//! **Servwatch** supervises long-running services inside one process and
//! records what they execute.
//!
//! It tracks a lifecycle state machine per resource, gates startup on the
//! readiness of dependencies, restarts failed resources with exponential
//! backoff, escalates to a graceful process shutdown when restarts run out,
//! and persists execution telemetry into an embedded SQLite database.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Resource   │   │   Resource   │   │   Resource   │
//!     │     (db)     │   │   (cache)    │   │ (api → db)   │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - RuntimeContext (Bus + ShutdownGuard)                           │
//! │  - Registry (dependency order, one run per resource)              │
//! │  - ServiceWatcher (backoff restarts, escalation)                  │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!   run_resource()     run_resource()     run_resource()       │
//!   Starting           Starting           Starting             │
//!   Running            Failed             wait deps ready...   │
//!        │                  │                  │               │
//!        ▼                  ▼                  ▼               ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │              (capacity: SupervisorConfig::bus_capacity)           │
//! └───────────┬──────────────────────────────────────┬────────────────┘
//!             ▼                                      ▼
//!     ServiceWatcher                          subscriber listener
//!     Failed  → RestartScheduled / Exhausted        │
//!     Running → confirm ready, reset counter  ┌─────┼──────────┐
//!     Crashed → ShutdownGuard::request        ▼     ▼          ▼
//!                                         LogWriter SessionTracker  user
//! ```
//!
//! ### Telemetry
//! ```text
//! CommandExecutor::execute(target, work)
//!   ├─► classify: Success | Error{Framework|Unclassified} | Cancelled | panic
//!   └─► RecordSink::submit (never blocks) ─► writer task ─► TelemetryStore (SQLite)
//!
//! Telemetry::start: orphaned sessions → unknown, begin session,
//!                   heartbeat loop, retention sweep loop
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Lifecycle**     | Validated status transitions plus a readiness flag.           | [`Lifecycle`], [`LifecycleCapable`]         |
//! | **Readiness**     | Wait for dependencies, reporting which are pending and why.   | [`wait_for_ready`], [`ReadyOutcome`]        |
//! | **Supervision**   | Start in dependency order, restart, escalate, stop.           | [`Supervisor`], [`SupervisorBuilder`]       |
//! | **Policies**      | Exponential restart backoff with jitter.                      | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Execution**     | Time, classify and record units of work.                      | [`CommandExecutor`], [`WorkError`]          |
//! | **Telemetry**     | SQLite sessions, registrations, executions, retention.        | [`Telemetry`], [`TelemetryStore`]           |
//! | **Subscriber API**| Hook into runtime events.                                     | [`Subscribe`], [`LogWriter`]                |
//! | **Errors**        | Typed errors for orchestration, resources and storage.        | [`RuntimeError`], [`ResourceError`]         |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use servwatch::{
//!     Lifecycle, LifecycleCapable, LogWriter, Resource, ResourceError, Subscribe,
//!     SupervisorBuilder, SupervisorConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! struct Database {
//!     lc: Lifecycle,
//! }
//!
//! impl LifecycleCapable for Database {
//!     fn lifecycle(&self) -> &Lifecycle {
//!         &self.lc
//!     }
//! }
//!
//! #[async_trait]
//! impl Resource for Database {
//!     async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
//!         self.mark_ready();
//!         Ok(())
//!     }
//! }
//!
//! struct Api {
//!     lc: Lifecycle,
//! }
//!
//! impl LifecycleCapable for Api {
//!     fn lifecycle(&self) -> &Lifecycle {
//!         &self.lc
//!     }
//! }
//!
//! #[async_trait]
//! impl Resource for Api {
//!     fn depends_on(&self) -> Vec<String> {
//!         vec!["db".into()]
//!     }
//!
//!     async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
//!         self.mark_ready();
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::default())];
//!     let builder = SupervisorBuilder::new(SupervisorConfig::default()).with_subscribers(subs);
//!     let db = Arc::new(Database { lc: Lifecycle::new("db", builder.context()) });
//!     let api = Arc::new(Api { lc: Lifecycle::new("api", builder.context()) });
//!     let sup = builder.with_resource(db).with_resource(api).build()?;
//!
//!     let stopper = Arc::clone(&sup);
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         stopper.shutdown("done");
//!     });
//!     sup.run().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
pub mod events;
pub mod execution;
pub mod lifecycle;
mod policies;
pub mod subscribers;
pub mod telemetry;

// ---- Public re-exports ----

pub use config::SupervisorConfig;
pub use core::{
    ResourceSnapshot, RuntimeContext, ShutdownCause, ShutdownGuard, Supervisor, SupervisorBuilder,
};
pub use error::{
    Cancelled, ResourceError, ResourceFailure, RuntimeError, StoreError, TransitionError,
    WorkError,
};
pub use events::{Bus, Event, EventKind, FailureDetail, LifecycleEvent};
pub use execution::{CommandExecutor, ErrorClass, ExecutionResult};
pub use lifecycle::{
    wait_for_ready, Lifecycle, LifecycleCapable, PendingResource, ReadyOutcome, ReadyState,
    Resource, ResourceRef, ResourceStatus, WaitOutcome,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use telemetry::{
    ExecutionRecord, ExecutionStatus, ExecutionTarget, JobRegistration, ListenerRegistration,
    RegistrationKey, SessionOutcome, Telemetry, TelemetryConfig, TelemetryStore,
};
