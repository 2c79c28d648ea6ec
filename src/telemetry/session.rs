//! # Telemetry session: one per process run.
//!
//! ```text
//! Telemetry::start(cfg)
//!   ├─► open store, finalize orphaned `running` sessions as `unknown`
//!   ├─► begin_session()                        → session_id
//!   ├─► spawn writer      (mpsc → batched inserts)
//!   ├─► spawn heartbeat   (every heartbeat_interval)
//!   └─► spawn retention   (at startup, then every sweep_interval)
//!
//! Telemetry::finish(outcome)
//!   ├─► stop background tasks, writer drains its queue
//!   └─► finish_session(status, first error kept)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::events::{Event, EventKind, FailureDetail};
use crate::execution::CommandExecutor;
use crate::lifecycle::ResourceStatus;
use crate::subscribers::Subscribe;
use crate::telemetry::config::TelemetryConfig;
use crate::telemetry::model::{JobRegistration, ListenerRegistration, SessionStatus};
use crate::telemetry::store::TelemetryStore;
use crate::telemetry::writer::{run_writer, RecordSink};

const MIN_TICK: Duration = Duration::from_millis(10);

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Clean shutdown.
    Success,
    /// Shutdown caused by a failure.
    Error(FailureDetail),
}

/// Live telemetry session: store handle, writer queue and background loops.
#[derive(Debug)]
pub struct Telemetry {
    store: TelemetryStore,
    session_id: i64,
    sink: RecordSink,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    finished: AtomicBool,
}

impl Telemetry {
    /// Opens the store at `cfg.path` and starts a session.
    pub async fn start(cfg: TelemetryConfig) -> Result<Arc<Self>, StoreError> {
        let path = cfg.path.clone();
        let store = tokio::task::spawn_blocking(move || TelemetryStore::open(&path)).await??;
        Self::start_with_store(cfg, store).await
    }

    /// Starts a session on an already opened store.
    pub async fn start_with_store(
        cfg: TelemetryConfig,
        store: TelemetryStore,
    ) -> Result<Arc<Self>, StoreError> {
        let now = Utc::now();
        let (orphans, session_id) = store
            .run(move |s| {
                let orphans = s.finalize_orphans()?;
                Ok((orphans, s.begin_session(now)?))
            })
            .await?;
        if !orphans.is_empty() {
            warn!(count = orphans.len(), sessions = ?orphans, "finalized orphaned sessions as unknown");
        }
        info!(session_id, "telemetry session started");

        let stop = CancellationToken::new();
        let (sink, rx) = RecordSink::channel(cfg.queue_capacity);
        let tasks = vec![
            tokio::spawn(run_writer(store.clone(), rx, cfg.batch_size, stop.clone())),
            tokio::spawn(heartbeat_loop(
                store.clone(),
                session_id,
                cfg.heartbeat_interval,
                stop.clone(),
            )),
            tokio::spawn(retention_loop(store.clone(), cfg, stop.clone())),
        ];

        Ok(Arc::new(Self {
            store,
            session_id,
            sink,
            stop,
            tasks: Mutex::new(tasks),
            finished: AtomicBool::new(false),
        }))
    }

    /// Id of the live session.
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// Store handle for read-side queries.
    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    /// Producer side of the writer queue.
    pub fn sink(&self) -> RecordSink {
        self.sink.clone()
    }

    /// Executor recording into this session.
    pub fn executor(&self) -> CommandExecutor {
        CommandExecutor::new(self.sink.clone(), self.session_id)
    }

    /// Subscriber that records the first `Crashed` failure as the session error.
    pub fn tracker(&self) -> SessionTracker {
        SessionTracker {
            sink: self.sink.clone(),
            session_id: self.session_id,
        }
    }

    /// Upserts a listener and returns its id.
    pub async fn register_listener(&self, reg: ListenerRegistration) -> Result<i64, StoreError> {
        self.store
            .run(move |s| s.upsert_listener(&reg, Utc::now()))
            .await
    }

    /// Upserts a scheduled job and returns its id.
    pub async fn register_job(&self, reg: JobRegistration) -> Result<i64, StoreError> {
        self.store.run(move |s| s.upsert_job(&reg, Utc::now())).await
    }

    /// Waits until every queued write is persisted.
    pub async fn flush(&self) -> bool {
        self.sink.flush().await
    }

    /// Stops background loops, drains the writer and closes the session.
    ///
    /// Only the first call has an effect.
    pub async fn finish(&self, outcome: SessionOutcome) -> Result<(), StoreError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for t in tasks {
            let _ = t.await;
        }

        let session_id = self.session_id;
        let (status, failure) = match outcome {
            SessionOutcome::Success => (SessionStatus::Success, None),
            SessionOutcome::Error(detail) => (SessionStatus::Error, Some(detail)),
        };
        self.store
            .run(move |s| s.finish_session(session_id, status, failure.as_ref(), Utc::now()))
            .await?;
        info!(
            session_id,
            status = status.as_str(),
            dropped = self.sink.dropped(),
            "telemetry session finished"
        );
        Ok(())
    }
}

async fn heartbeat_loop(
    store: TelemetryStore,
    session_id: i64,
    every: Duration,
    stop: CancellationToken,
) {
    let mut tick = tokio::time::interval(every.max(MIN_TICK));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = store.run(move |s| s.heartbeat(session_id, Utc::now())).await {
                    warn!(error = %e, session_id, "session heartbeat failed");
                }
            }
        }
    }
}

async fn retention_loop(store: TelemetryStore, cfg: TelemetryConfig, stop: CancellationToken) {
    let mut tick = tokio::time::interval(cfg.sweep_interval.max(MIN_TICK));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tick.tick() => {
                let (retention, max_bytes) = (cfg.retention, cfg.max_db_bytes);
                match store.run(move |s| s.sweep(Utc::now(), retention, max_bytes)).await {
                    Ok(report) if !report.is_empty() => info!(
                        expired = report.expired,
                        evicted = report.evicted,
                        registrations = report.registrations,
                        "retention sweep"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
        }
    }
}

/// Records the first `Crashed` transition's failure on the session row.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    sink: RecordSink,
    session_id: i64,
}

#[async_trait]
impl Subscribe for SessionTracker {
    async fn on_event(&self, ev: &Event) {
        if ev.kind != EventKind::Transition {
            return;
        }
        let Some(lc) = &ev.lifecycle else { return };
        if lc.to != ResourceStatus::Crashed {
            return;
        }
        let detail = lc
            .failure
            .clone()
            .unwrap_or_else(|| FailureDetail::new("crashed", format!("{} crashed", lc.resource)));
        self.sink.submit_session_error(self.session_id, detail);
    }

    fn name(&self) -> &'static str {
        "session-tracker"
    }
}
