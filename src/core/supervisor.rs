//! # Supervisor: starts resources, watches them, and owns process shutdown.
//!
//! The [`Supervisor`] owns the event bus (through [`RuntimeContext`]), the
//! resource registry, the service watcher and the subscriber set.
//!
//! ## Architecture
//! ```text
//! Supervisor::run()
//!   ├─► subscriber listener: Bus ─► SubscriberSet (per-subscriber queues)
//!   ├─► service watcher:     Bus ─► restart / escalate
//!   ├─► Registry::start_all()          (dependency order)
//!   │
//!   ├─► wait: OS signal ─► ShutdownGuard::request(Signal)
//!   │         or any ShutdownGuard::request(..)
//!   │
//!   ├─► escalated? snapshot failure report (before stop overwrites reasons)
//!   ├─► Registry::stop_all(grace)      (reverse dependency order)
//!   │        ├─ all stopped ─► AllStoppedWithin
//!   │        └─ deadline    ─► GraceExceeded{stuck}
//!   ├─► drain subscribers
//!   └─► Telemetry::finish(outcome)     (if attached; a crash keeps its own detail)
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use servwatch::{
//!     Lifecycle, LifecycleCapable, Resource, ResourceError, SupervisorBuilder, SupervisorConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! struct Ticker {
//!     lc: Lifecycle,
//! }
//!
//! impl LifecycleCapable for Ticker {
//!     fn lifecycle(&self) -> &Lifecycle {
//!         &self.lc
//!     }
//! }
//!
//! #[async_trait]
//! impl Resource for Ticker {
//!     async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
//!         self.mark_ready();
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let builder = SupervisorBuilder::new(SupervisorConfig::default());
//!     let ticker = Arc::new(Ticker { lc: Lifecycle::new("ticker", builder.context()) });
//!     let sup = builder.with_resource(ticker).build()?;
//!
//!     let stopper = Arc::clone(&sup);
//!     tokio::spawn(async move {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!         stopper.shutdown("example done");
//!     });
//!     sup.run().await?;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SupervisorConfig;
use crate::core::context::RuntimeContext;
use crate::core::registry::{Registry, ResourceSnapshot};
use crate::core::shutdown::{self, ShutdownCause};
use crate::core::watcher::ServiceWatcher;
use crate::error::RuntimeError;
use crate::events::{Event, EventKind, FailureDetail};
use crate::lifecycle::{LifecycleCapable, ResourceStatus};
use crate::subscribers::SubscriberSet;
use crate::telemetry::{SessionOutcome, Telemetry};

/// Coordinates resources, restarts, event delivery and graceful shutdown.
pub struct Supervisor {
    cfg: SupervisorConfig,
    ctx: RuntimeContext,
    subs: Mutex<Option<SubscriberSet>>,
    registry: Arc<Registry>,
    watcher: Arc<ServiceWatcher>,
    telemetry: Option<Arc<Telemetry>>,
}

impl Supervisor {
    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        ctx: RuntimeContext,
        subs: SubscriberSet,
        registry: Arc<Registry>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        let watcher = ServiceWatcher::new(cfg.clone(), ctx.clone(), Arc::clone(&registry));
        Self {
            cfg,
            ctx,
            subs: Mutex::new(Some(subs)),
            registry,
            watcher,
            telemetry,
        }
    }

    /// Runtime context shared with every resource.
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Configuration this supervisor runs with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Attached telemetry session, if any.
    pub fn telemetry(&self) -> Option<&Arc<Telemetry>> {
        self.telemetry.as_ref()
    }

    /// Requests a graceful shutdown. Returns `false` if one was already requested.
    pub fn shutdown(&self, reason: impl Into<String>) -> bool {
        self.ctx
            .shutdown()
            .request(ShutdownCause::Requested(reason.into()))
    }

    /// Status and readiness of every resource, in start order.
    pub fn statuses(&self) -> Vec<ResourceSnapshot> {
        self.registry.snapshot()
    }

    /// Consecutive restarts of `resource` since it was last confirmed ready.
    pub fn restart_attempts(&self, resource: &str) -> u32 {
        self.watcher.attempts(resource)
    }

    /// Runs until shutdown is requested, then stops everything within `grace`.
    ///
    /// Meant to be called once; a second call runs without subscribers.
    ///
    /// # Errors
    /// - [`RuntimeError::Escalated`] when a resource crashed or ran out of restarts;
    /// - [`RuntimeError::GraceExceeded`] when resources did not stop in time;
    /// - [`RuntimeError::Signal`] when OS signal handlers could not be installed;
    /// - [`RuntimeError::Store`] when an otherwise clean run could not close its
    ///   telemetry session.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let stop_subs = CancellationToken::new();
        let subs_task = self.subscriber_listener(stop_subs.clone());
        let watcher_task = self.watcher.spawn_listener();

        self.registry.start_all().await;
        info!(resources = ?self.registry.names(), "supervisor started");

        let signal_error = self.wait_for_shutdown().await;
        let cause = self.ctx.shutdown().cause();

        let failures = match &cause {
            Some(ShutdownCause::Escalated { resource, reason }) => {
                let failures = self.registry.failure_report();
                error!(resource = %resource, reason = %reason, failed = failures.len(), "shutdown escalated");
                for f in &failures {
                    error!(
                        resource = %f.resource,
                        status = %f.status,
                        reason = f.reason.as_deref().unwrap_or("-"),
                        "resource not healthy at escalation"
                    );
                }
                Some(failures)
            }
            _ => None,
        };

        let grace = self.cfg.grace;
        let stopped = self.registry.stop_all(grace).await;
        match &stopped {
            Ok(()) => {
                info!(grace_ms = grace.as_millis() as u64, "all resources stopped");
                self.ctx.bus().publish(Event::new(EventKind::AllStoppedWithin));
            }
            Err(stuck) => {
                warn!(grace_ms = grace.as_millis() as u64, stuck = ?stuck, "grace period exceeded");
                self.ctx
                    .bus()
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
            }
        }

        let _ = watcher_task.await;
        stop_subs.cancel();
        if let Some(task) = subs_task {
            let _ = task.await;
        }

        // Taken from the lifecycle so it survives subscribers lagging behind the bus.
        let crash = match &cause {
            Some(ShutdownCause::Escalated { resource, .. }) => self
                .registry
                .get(resource)
                .filter(|r| r.status() == ResourceStatus::Crashed)
                .and_then(|r| r.lifecycle().last_failure()),
            _ => None,
        };

        let result = match (cause, failures, stopped, signal_error) {
            (Some(ShutdownCause::Escalated { resource, reason }), Some(failures), _, _) => {
                Err(RuntimeError::Escalated {
                    trigger: format!("{resource}: {reason}"),
                    failures,
                })
            }
            (_, _, Err(stuck), _) => Err(RuntimeError::GraceExceeded { grace, stuck }),
            (_, _, _, Some(e)) => Err(RuntimeError::Signal(e)),
            _ => Ok(()),
        };

        if let Some(telemetry) = &self.telemetry {
            let outcome = match (&result, crash) {
                (Ok(()), _) => SessionOutcome::Success,
                (Err(_), Some(detail)) => SessionOutcome::Error(detail),
                (Err(e), None) => SessionOutcome::Error(FailureDetail::new(e.as_label(), e.to_string())),
            };
            if let Err(e) = telemetry.finish(outcome).await {
                warn!(error = %e, label = e.as_label(), "closing telemetry session failed");
                if result.is_ok() {
                    return Err(RuntimeError::Store(e));
                }
            }
        }
        result
    }

    /// Returns the signal-handler error, if handlers could not be installed.
    async fn wait_for_shutdown(&self) -> Option<std::io::Error> {
        let guard = self.ctx.shutdown();
        tokio::select! {
            res = shutdown::wait_for_signal() => match res {
                Ok(()) => {
                    guard.request(ShutdownCause::Signal);
                    None
                }
                Err(e) => {
                    error!(error = %e, "installing signal handlers failed");
                    guard.request(ShutdownCause::Requested("signal handlers unavailable".into()));
                    Some(e)
                }
            },
            _ = guard.requested() => None,
        }
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains it.
    fn subscriber_listener(&self, stop: CancellationToken) -> Option<JoinHandle<()>> {
        let set = self.subs.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        let mut rx = self.ctx.bus().subscribe();
        Some(tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    msg = rx.recv() => msg,
                    _ = stop.cancelled() => break,
                };
                match msg {
                    Ok(ev) => set.emit_arc(Arc::new(ev)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged behind the bus")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            while let Ok(ev) = rx.try_recv() {
                set.emit_arc(Arc::new(ev));
            }
            set.shutdown().await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::core::builder::SupervisorBuilder;
    use crate::error::ResourceError;
    use crate::lifecycle::{Lifecycle, Resource, ResourceRef};
    use crate::policies::{BackoffPolicy, JitterPolicy};
    use crate::telemetry::{SessionStatus, TelemetryConfig, TelemetryStore};

    #[derive(Clone, Copy)]
    enum Script {
        /// Fails the first `n` cycles, then becomes ready and serves.
        FailTimes(u32),
        /// Reaches `Running`, never reports ready, fails after a second.
        NeverReady,
        /// Returns a fatal error from `on_start`.
        Fatal,
        /// Running, never ready, with a reason.
        Warming,
        /// Ignores cancellation.
        Stubborn,
        /// Ready at once, fails after the given time.
        ReadyThenFail(Duration),
    }

    struct Scripted {
        lc: Lifecycle,
        deps: Vec<String>,
        script: Script,
        cycles: AtomicU32,
    }

    impl LifecycleCapable for Scripted {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lc
        }
    }

    #[async_trait]
    impl Resource for Scripted {
        fn depends_on(&self) -> Vec<String> {
            self.deps.clone()
        }

        async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::FailTimes(n) if cycle >= n => self.mark_ready(),
                Script::Fatal => return Err(ResourceError::fatal("bad credentials")),
                Script::Warming => self.mark_not_ready("warming up"),
                Script::Stubborn | Script::ReadyThenFail(_) => self.mark_ready(),
                _ => {}
            }
            Ok(())
        }

        async fn serve(&self, ctx: CancellationToken) -> Result<(), ResourceError> {
            match self.script {
                Script::FailTimes(n) if self.cycles.load(Ordering::SeqCst) <= n => {
                    Err(ResourceError::failed("connection reset"))
                }
                Script::NeverReady => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Err(ResourceError::failed("lost upstream"))
                }
                Script::Stubborn => std::future::pending().await,
                Script::ReadyThenFail(after) => {
                    tokio::time::sleep(after).await;
                    Err(ResourceError::failed("dependency lost"))
                }
                _ => {
                    ctx.cancelled().await;
                    Err(ResourceError::Canceled)
                }
            }
        }
    }

    fn cfg(max: u32) -> SupervisorConfig {
        SupervisorConfig {
            max_restart_attempts: max,
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                multiplier: 2.0,
                max: Duration::from_secs(30),
                jitter: JitterPolicy::None,
            },
            startup_timeout: Duration::from_secs(2),
            ready_confirm_timeout: Duration::from_secs(5),
            grace: Duration::from_secs(1),
            ..SupervisorConfig::default()
        }
    }

    fn scripted(builder: &SupervisorBuilder, name: &str, deps: &[&str], script: Script) -> ResourceRef {
        Arc::new(Scripted {
            lc: Lifecycle::new(name, builder.context()),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            script,
            cycles: AtomicU32::new(0),
        })
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn count(events: &[Event], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_with_backoff_then_resets_after_ready() {
        let builder = SupervisorBuilder::new(cfg(3));
        let mut rx = builder.context().bus().subscribe();
        let flaky = scripted(&builder, "flaky", &[], Script::FailTimes(2));
        let sup = builder.with_resource(flaky).build().unwrap();

        let runner = Arc::clone(&sup);
        let task = tokio::spawn(async move { runner.run().await });

        let mut events = Vec::new();
        loop {
            let ev = rx.recv().await.unwrap();
            let done = ev.kind == EventKind::RestartRecovered;
            events.push(ev);
            if done {
                break;
            }
        }
        assert_eq!(sup.restart_attempts("flaky"), 0);
        assert!(sup.shutdown("test over"));
        task.await.unwrap().unwrap();

        let scheduled: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::RestartScheduled)
            .map(|e| (e.attempt, e.delay_ms))
            .collect();
        assert_eq!(scheduled, vec![(Some(1), Some(1000)), (Some(2), Some(2000))]);
        assert_eq!(sup.statuses()[0].status, ResourceStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_restarts_escalate_once() {
        let builder = SupervisorBuilder::new(cfg(3));
        let mut rx = builder.context().bus().subscribe();
        let flaky = scripted(&builder, "flaky", &[], Script::FailTimes(u32::MAX));
        let healthy = scripted(&builder, "healthy", &[], Script::FailTimes(0));
        let sup = builder.with_resources([flaky, healthy]).build().unwrap();

        let err = sup.run().await.unwrap_err();
        match err {
            RuntimeError::Escalated { trigger, failures } => {
                assert!(trigger.starts_with("flaky:"), "{trigger}");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].resource, "flaky");
                assert_eq!(failures[0].status, ResourceStatus::Failed);
                assert_eq!(failures[0].reason.as_deref(), Some("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::RestartScheduled), 3);
        assert_eq!(count(&events, EventKind::RestartExhausted), 1);
        assert_eq!(count(&events, EventKind::ShutdownRequested), 1);
        assert_eq!(count(&events, EventKind::AllStoppedWithin), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn running_without_ready_keeps_counter() {
        let builder = SupervisorBuilder::new(cfg(2));
        let mut rx = builder.context().bus().subscribe();
        let worker = scripted(&builder, "worker", &[], Script::NeverReady);
        let sup = builder.with_resource(worker).build().unwrap();

        let err = sup.run().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Escalated { .. }), "{err}");

        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::RestartScheduled), 2);
        assert_eq!(count(&events, EventKind::RestartRecovered), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_escalates_without_restart() {
        let builder = SupervisorBuilder::new(cfg(5));
        let mut rx = builder.context().bus().subscribe();
        let auth = scripted(&builder, "auth", &[], Script::Fatal);
        let sup = builder.with_resource(auth).build().unwrap();

        match sup.run().await.unwrap_err() {
            RuntimeError::Escalated { trigger, failures } => {
                assert_eq!(trigger, "auth: fatal: bad credentials");
                assert_eq!(failures[0].status, ResourceStatus::Crashed);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(count(&drain(&mut rx), EventKind::RestartScheduled), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unready_dependency_blocks_dependent() {
        let builder = SupervisorBuilder::new(cfg(0));
        let db = scripted(&builder, "db", &[], Script::Warming);
        let api = scripted(&builder, "api", &["db"], Script::FailTimes(0));
        let sup = builder.with_resources([api, db]).build().unwrap();

        match sup.run().await.unwrap_err() {
            RuntimeError::Escalated { trigger, failures } => {
                assert!(trigger.starts_with("api:"), "{trigger}");
                let api = failures.iter().find(|f| f.resource == "api").unwrap();
                assert_eq!(api.reason.as_deref(), Some("dependencies not ready: db (warming up)"));
                let db = failures.iter().find(|f| f.resource == "db").unwrap();
                assert_eq!(db.status, ResourceStatus::Running);
                assert_eq!(db.reason.as_deref(), Some("warming up"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn requested_shutdown_stops_everything() {
        let builder = SupervisorBuilder::new(cfg(3));
        let db = scripted(&builder, "db", &[], Script::FailTimes(0));
        let api = scripted(&builder, "api", &["db"], Script::FailTimes(0));
        let sup = builder.with_resources([db, api]).build().unwrap();

        let runner = Arc::clone(&sup);
        let task = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sup.statuses().iter().all(|s| s.ready));

        assert!(sup.shutdown("deploy"));
        assert!(!sup.shutdown("again"));
        task.await.unwrap().unwrap();
        assert!(sup
            .statuses()
            .iter()
            .all(|s| s.status == ResourceStatus::Stopped && !s.ready));
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_resource_exceeds_grace() {
        let builder = SupervisorBuilder::new(cfg(3));
        let stubborn = scripted(&builder, "stubborn", &[], Script::Stubborn);
        let sup = builder.with_resource(stubborn).build().unwrap();

        let runner = Arc::clone(&sup);
        let task = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        sup.shutdown("deploy");

        match task.await.unwrap().unwrap_err() {
            RuntimeError::GraceExceeded { stuck, .. } => assert_eq!(stuck, vec!["stubborn".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_session_records_crash() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let telemetry = Telemetry::start_with_store(TelemetryConfig::default(), store.clone())
            .await
            .unwrap();
        let builder = SupervisorBuilder::new(cfg(3)).with_telemetry(Arc::clone(&telemetry));
        let auth = scripted(&builder, "auth", &[], Script::Fatal);
        let sup = builder.with_resource(auth).build().unwrap();

        assert!(sup.run().await.is_err());

        let session = store.session(telemetry.session_id()).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error_type.as_deref(), Some("resource_fatal"));
        assert_eq!(session.error_message.as_deref(), Some("fatal: bad credentials"));
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_failing_with_the_trigger_are_reported_once() {
        let builder = SupervisorBuilder::new(cfg(3));
        let mut rx = builder.context().bus().subscribe();
        // api fails at t=1, 3, 6 and finally 11; db and cache fail at t=11 too.
        let db = scripted(&builder, "db", &[], Script::ReadyThenFail(Duration::from_secs(11)));
        let cache = scripted(&builder, "cache", &["db"], Script::ReadyThenFail(Duration::from_secs(11)));
        let api = scripted(&builder, "api", &["cache"], Script::NeverReady);
        let sup = builder.with_resources([api, cache, db]).build().unwrap();

        match sup.run().await.unwrap_err() {
            RuntimeError::Escalated { trigger, failures } => {
                assert!(trigger.starts_with("api: restart attempts exhausted after 3"), "{trigger}");
                let reason = |name: &str| {
                    let f = failures.iter().find(|f| f.resource == name).unwrap();
                    assert_eq!(f.status, ResourceStatus::Failed, "{name}");
                    f.reason.clone()
                };
                assert_eq!(reason("api").as_deref(), Some("lost upstream"));
                assert_eq!(reason("cache").as_deref(), Some("dependency lost"));
                assert_eq!(reason("db").as_deref(), Some("dependency lost"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let events = drain(&mut rx);
        assert_eq!(count(&events, EventKind::ShutdownRequested), 1);
        assert_eq!(count(&events, EventKind::RestartExhausted), 1);
        let requested = events
            .iter()
            .position(|e| e.kind == EventKind::ShutdownRequested)
            .unwrap();
        assert_eq!(count(&events[requested..], EventKind::RestartScheduled), 0);
        let api_restarts = events
            .iter()
            .filter(|e| e.kind == EventKind::RestartScheduled && e.resource.as_deref() == Some("api"))
            .count();
        assert_eq!(api_restarts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_detail_survives_a_lagging_bus() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let telemetry = Telemetry::start_with_store(TelemetryConfig::default(), store.clone())
            .await
            .unwrap();
        let cfg = SupervisorConfig {
            bus_capacity: 1,
            ..cfg(3)
        };
        let builder = SupervisorBuilder::new(cfg).with_telemetry(Arc::clone(&telemetry));
        let auth = scripted(&builder, "auth", &[], Script::Fatal);
        let noisy = scripted(&builder, "metrics", &[], Script::Warming);
        let sup = builder.with_resources([noisy, auth]).build().unwrap();

        match sup.run().await.unwrap_err() {
            RuntimeError::Escalated { trigger, .. } => assert_eq!(trigger, "auth: fatal: bad credentials"),
            other => panic!("unexpected error: {other}"),
        }

        let session = store.session(telemetry.session_id()).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error_type.as_deref(), Some("resource_fatal"));
        assert_eq!(session.error_message.as_deref(), Some("fatal: bad credentials"));
    }

    #[tokio::test]
    async fn unclosable_telemetry_session_fails_a_clean_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.db");
        let telemetry = Telemetry::start(TelemetryConfig::at(&path)).await.unwrap();
        let builder = SupervisorBuilder::new(cfg(3)).with_telemetry(Arc::clone(&telemetry));
        let db = scripted(&builder, "db", &[], Script::FailTimes(0));
        let sup = builder.with_resource(db).build().unwrap();

        let other = rusqlite::Connection::open(&path).unwrap();
        other.busy_timeout(Duration::from_secs(5)).unwrap();
        other.execute_batch("DROP TABLE sessions").unwrap();

        let runner = Arc::clone(&sup);
        let task = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sup.shutdown("deploy"));

        match task.await.unwrap() {
            Err(RuntimeError::Store(e)) => assert_eq!(e.as_label(), "store_sqlite"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
