//! # Service watcher: restart with backoff, escalate when restarts run out.
//!
//! Listens on the bus and reacts to lifecycle transitions:
//!
//! ```text
//! Failed ──► shutdown requested?  ─► ignore
//!        ──► restart pending?     ─► ignore
//!        ──► attempts >= max      ─► RestartExhausted ─► ShutdownGuard::request(Escalated)
//!        └─► RestartScheduled{attempt, delay}
//!              attempts += 1, pending = true
//!              sleep(delay) ─► pending = false ─► Registry::restart(name)
//!
//! Running ─► wait_ready(ready_confirm_timeout)
//!              Ready and still Running ─► attempts = 0 (RestartRecovered if > 0)
//!              otherwise               ─► counter kept
//!
//! Crashed ─► ShutdownGuard::request(Escalated)
//!
//! Lagged  ─► rescan registry: Failed/Crashed/Running handled as above
//! ```
//!
//! ## Rules
//! - At most one restart is pending per resource.
//! - A resource that reaches `Running` but never reports ready keeps its counter.
//! - Each entry into `Failed` is acted on once, whether it arrives as an event
//!   or is found by a registry scan after the listener lagged behind the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::core::context::RuntimeContext;
use crate::core::registry::Registry;
use crate::core::shutdown::ShutdownCause;
use crate::events::{Event, EventKind};
use crate::lifecycle::{LifecycleCapable, ResourceStatus, WaitOutcome};

#[derive(Debug, Default)]
struct RestartState {
    attempts: u32,
    pending: bool,
    /// `Lifecycle::failure_count` already acted on.
    handled: u64,
}

enum Decision {
    Handled,
    Pending,
    Exhausted(u32),
    Restart {
        attempt: u32,
        delay: std::time::Duration,
    },
}

pub(crate) struct ServiceWatcher {
    cfg: SupervisorConfig,
    ctx: RuntimeContext,
    registry: Arc<Registry>,
    restarts: Mutex<HashMap<String, RestartState>>,
}

impl ServiceWatcher {
    pub(crate) fn new(cfg: SupervisorConfig, ctx: RuntimeContext, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            ctx,
            registry,
            restarts: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribes now and handles events until shutdown is requested.
    pub(crate) fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.ctx.bus().subscribe();
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let guard = Arc::clone(me.ctx.shutdown());
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = guard.requested() => break,
                    msg = rx.recv() => msg,
                };
                match msg {
                    Ok(ev) => me.handle(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "service watcher lagged behind the bus; rescanning resources");
                        me.reconcile();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Current consecutive restart count of `resource`.
    pub(crate) fn attempts(&self, resource: &str) -> u32 {
        self.state()
            .get(resource)
            .map(|st| st.attempts)
            .unwrap_or(0)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HashMap<String, RestartState>> {
        self.restarts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(self: &Arc<Self>, ev: &Event) {
        if ev.kind != EventKind::Transition {
            return;
        }
        let Some(lc) = &ev.lifecycle else { return };
        let reason = lc.failure.as_ref().map(|f| f.message.clone());
        match lc.to {
            ResourceStatus::Failed => {
                self.on_failed(&lc.resource, reason.unwrap_or_else(|| "failed".to_string()))
            }
            ResourceStatus::Running => self.on_running(&lc.resource),
            ResourceStatus::Crashed => {
                self.escalate(&lc.resource, reason.unwrap_or_else(|| "crashed".to_string()))
            }
            _ => {}
        }
    }

    /// Rebuilds what missed events would have triggered from current statuses.
    fn reconcile(self: &Arc<Self>) {
        for name in self.registry.names() {
            let Some(r) = self.registry.get(&name) else { continue };
            let reason = r.lifecycle().last_failure().map(|f| f.message);
            match r.status() {
                ResourceStatus::Failed => {
                    self.on_failed(&name, reason.unwrap_or_else(|| "failed".to_string()))
                }
                ResourceStatus::Crashed => {
                    self.escalate(&name, reason.unwrap_or_else(|| "crashed".to_string()))
                }
                ResourceStatus::Running if self.attempts(&name) > 0 => self.on_running(&name),
                _ => {}
            }
        }
    }

    fn on_failed(self: &Arc<Self>, name: &str, reason: String) {
        if self.ctx.shutdown().is_requested() {
            debug!(resource = %name, "failure during shutdown; not restarting");
            return;
        }
        let Some(seen) = self.registry.get(name).map(|r| r.lifecycle().failure_count()) else {
            debug!(resource = %name, "failure of an unregistered resource");
            return;
        };
        let name = name.to_string();

        let decision = {
            let mut map = self.state();
            let st = map.entry(name.clone()).or_default();
            if seen <= st.handled {
                Decision::Handled
            } else if st.pending {
                st.handled = seen;
                Decision::Pending
            } else if st.attempts >= self.cfg.max_restart_attempts {
                st.handled = seen;
                Decision::Exhausted(st.attempts)
            } else {
                let delay = self.cfg.backoff.delay_for(st.attempts);
                st.handled = seen;
                st.attempts += 1;
                st.pending = true;
                Decision::Restart {
                    attempt: st.attempts,
                    delay,
                }
            }
        };

        match decision {
            Decision::Handled => debug!(resource = %name, "failure already handled"),
            Decision::Pending => debug!(resource = %name, "restart already pending"),
            Decision::Exhausted(attempts) => {
                self.ctx.bus().publish(
                    Event::new(EventKind::RestartExhausted)
                        .with_resource(name.as_str())
                        .with_attempt(attempts)
                        .with_reason(reason.as_str()),
                );
                self.escalate(
                    &name,
                    format!("restart attempts exhausted after {attempts}: {reason}"),
                );
            }
            Decision::Restart { attempt, delay } => {
                info!(resource = %name, attempt, delay_ms = delay.as_millis() as u64, reason = %reason, "scheduling restart");
                self.ctx.bus().publish(
                    Event::new(EventKind::RestartScheduled)
                        .with_resource(name.as_str())
                        .with_attempt(attempt)
                        .with_delay(delay)
                        .with_reason(reason.as_str()),
                );
                let me = Arc::clone(self);
                tokio::spawn(async move { me.restart_after(name, delay).await });
            }
        }
    }

    async fn restart_after(&self, name: String, delay: std::time::Duration) {
        let guard = self.ctx.shutdown();
        let shutting_down = tokio::select! {
            biased;
            _ = guard.requested() => true,
            _ = tokio::time::sleep(delay) => false,
        };
        if let Some(st) = self.state().get_mut(&name) {
            st.pending = false;
        }
        if shutting_down || guard.is_requested() {
            debug!(resource = %name, "restart abandoned; shutting down");
            return;
        }
        if !self.registry.restart(&name).await {
            debug!(resource = %name, "restart refused by registry");
        }
    }

    fn on_running(self: &Arc<Self>, resource: &str) {
        let Some(target) = self.registry.get(resource).cloned() else {
            return;
        };
        let me = Arc::clone(self);
        let name = resource.to_string();
        tokio::spawn(async move {
            let timeout = me.cfg.ready_confirm_timeout;
            match target.wait_ready(timeout).await {
                WaitOutcome::Ready if target.status() == ResourceStatus::Running => {
                    let previous = me
                        .state()
                        .get_mut(&name)
                        .map(|st| std::mem::take(&mut st.attempts))
                        .unwrap_or(0);
                    if previous > 0 {
                        info!(resource = %name, attempts = previous, "recovered; restart counter reset");
                        me.ctx.bus().publish(
                            Event::new(EventKind::RestartRecovered)
                                .with_resource(name.as_str())
                                .with_attempt(previous),
                        );
                    }
                }
                WaitOutcome::Ready => debug!(resource = %name, "ready but no longer running"),
                WaitOutcome::TimedOut => warn!(
                    resource = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "running but not ready; restart counter kept"
                ),
                WaitOutcome::Shutdown => {}
            }
        });
    }

    fn escalate(&self, resource: &str, reason: String) {
        let guard = self.ctx.shutdown();
        if guard.is_requested() {
            debug!(resource, reason = %reason, "already shutting down; not escalating");
            return;
        }
        error!(resource, reason = %reason, "escalating to process shutdown");
        guard.request(ShutdownCause::Escalated {
            resource: resource.to_string(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::ResourceError;
    use crate::events::{FailureDetail, LifecycleEvent};
    use crate::lifecycle::{Lifecycle, Resource, ResourceRef};
    use crate::policies::{BackoffPolicy, JitterPolicy};

    struct Idle {
        lc: Lifecycle,
    }

    impl LifecycleCapable for Idle {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lc
        }
    }

    #[async_trait]
    impl Resource for Idle {
        async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
            Ok(())
        }
    }

    fn cfg(max: u32) -> SupervisorConfig {
        SupervisorConfig {
            max_restart_attempts: max,
            backoff: BackoffPolicy {
                base: Duration::from_secs(1),
                multiplier: 2.0,
                max: Duration::from_secs(60),
                jitter: JitterPolicy::None,
            },
            ready_confirm_timeout: Duration::from_secs(5),
            ..SupervisorConfig::default()
        }
    }

    fn setup(max: u32) -> (RuntimeContext, Arc<ServiceWatcher>, ResourceRef) {
        let ctx = RuntimeContext::new(256);
        let r: ResourceRef = Arc::new(Idle {
            lc: Lifecycle::new("ws", &ctx),
        });
        let registry = Registry::new(vec![Arc::clone(&r)], Duration::from_secs(1)).unwrap();
        let watcher = ServiceWatcher::new(cfg(max), ctx.clone(), registry);
        (ctx, watcher, r)
    }

    /// Drives `r` into `Failed` and returns the matching transition event.
    fn fail(r: &ResourceRef, msg: &str) -> Event {
        let failure = FailureDetail::new("resource_failed", msg);
        r.mark_starting().unwrap();
        r.mark_failed(failure.clone()).unwrap();
        Event::transition(LifecycleEvent {
            resource: r.name().into(),
            from: ResourceStatus::Starting,
            to: ResourceStatus::Failed,
            failure: Some(failure),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn second_failure_while_pending_is_ignored() {
        let (ctx, watcher, r) = setup(3);
        let mut rx = ctx.bus().subscribe();

        watcher.handle(&fail(&r, "reset"));
        watcher.handle(&fail(&r, "reset again"));
        assert_eq!(watcher.attempts("ws"), 1);

        let mut scheduled = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::RestartScheduled {
                scheduled.push((ev.attempt, ev.delay_ms));
            }
        }
        assert_eq!(scheduled, vec![(Some(1), Some(1000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_failure_event_is_not_counted_twice() {
        let (_ctx, watcher, r) = setup(3);
        let ev = fail(&r, "reset");
        watcher.handle(&ev);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(r.status(), ResourceStatus::Running);

        watcher.handle(&ev);
        assert_eq!(watcher.attempts("ws"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_escalates() {
        let (ctx, watcher, r) = setup(0);
        watcher.handle(&fail(&r, "reset"));

        match ctx.shutdown().cause() {
            Some(ShutdownCause::Escalated { resource, reason }) => {
                assert_eq!(resource, "ws");
                assert!(reason.contains("reset"), "{reason}");
            }
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_shutdown_is_not_restarted() {
        let (ctx, watcher, r) = setup(3);
        ctx.shutdown().request(ShutdownCause::Requested("deploy".into()));
        watcher.handle(&fail(&r, "reset"));
        assert_eq!(watcher.attempts("ws"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_running_resets_counter() {
        let (ctx, watcher, r) = setup(3);
        let mut rx = ctx.bus().subscribe();
        watcher.handle(&fail(&r, "reset"));
        assert_eq!(watcher.attempts("ws"), 1);

        r.mark_starting().unwrap();
        r.mark_running().unwrap();
        watcher.handle(&Event::transition(LifecycleEvent {
            resource: "ws".into(),
            from: ResourceStatus::Starting,
            to: ResourceStatus::Running,
            failure: None,
        }));
        r.mark_ready();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(watcher.attempts("ws"), 0);
        let mut recovered = false;
        while let Ok(ev) = rx.try_recv() {
            recovered |= ev.kind == EventKind::RestartRecovered;
        }
        assert!(recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_lost_to_bus_lag_is_still_restarted() {
        let ctx = RuntimeContext::new(4);
        let ws: ResourceRef = Arc::new(Idle {
            lc: Lifecycle::new("ws", &ctx),
        });
        let noisy = Lifecycle::new("cache", &ctx);
        let registry = Registry::new(vec![Arc::clone(&ws)], Duration::from_secs(1)).unwrap();
        let watcher = ServiceWatcher::new(cfg(3), ctx.clone(), registry);
        let listener = watcher.spawn_listener();

        ws.mark_starting().unwrap();
        ws.mark_running().unwrap();
        ws.mark_failed(FailureDetail::new("resource_failed", "socket closed"))
            .unwrap();
        for i in 0..6 {
            noisy.mark_not_ready(format!("warming shard {i}"));
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(watcher.attempts("ws"), 1);
        assert_eq!(ws.status(), ResourceStatus::Running);
        assert!(!ctx.shutdown().is_requested());

        ctx.shutdown()
            .request(ShutdownCause::Requested("test".into()));
        listener.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn crash_lost_to_bus_lag_still_escalates() {
        let ctx = RuntimeContext::new(2);
        let ws: ResourceRef = Arc::new(Idle {
            lc: Lifecycle::new("ws", &ctx),
        });
        let noisy = Lifecycle::new("cache", &ctx);
        let registry = Registry::new(vec![Arc::clone(&ws)], Duration::from_secs(1)).unwrap();
        let watcher = ServiceWatcher::new(cfg(3), ctx.clone(), registry);
        let listener = watcher.spawn_listener();

        ws.mark_starting().unwrap();
        ws.mark_crashed(FailureDetail::new("resource_fatal", "bad credentials"))
            .unwrap();
        for i in 0..4 {
            noisy.mark_not_ready(format!("warming shard {i}"));
        }

        listener.await.unwrap();
        match ctx.shutdown().cause() {
            Some(ShutdownCause::Escalated { resource, reason }) => {
                assert_eq!(resource, "ws");
                assert_eq!(reason, "bad credentials");
            }
            other => panic!("unexpected cause: {other:?}"),
        }
    }
}
