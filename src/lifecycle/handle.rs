//! # Per-resource lifecycle state machine.
//!
//! [`Lifecycle`] owns a resource's [`ResourceStatus`], its readiness signal and
//! a handle to the shared [`RuntimeContext`]. Every legal transition publishes
//! exactly one [`LifecycleEvent`]; an illegal one returns [`TransitionError`]
//! and leaves the status untouched.
//!
//! ## Rules
//! - Transitions are published while the status lock is held, so events of one
//!   resource are observed in transition order.
//! - Entering `Failed`/`Crashed` drops readiness with the failure message as reason.
//! - Entering `Stopped` drops readiness with reason `"stopped"`.
//! - Readiness can also flip while `Running` (e.g. a client reconnecting).
//! - The latest failure and the number of `Failed` entries are kept on the
//!   lifecycle itself, so a consumer that missed events can catch up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error};

use crate::core::RuntimeContext;
use crate::error::TransitionError;
use crate::events::{Event, FailureDetail, LifecycleEvent};
use crate::lifecycle::readiness::{ReadyState, Readiness, WaitOutcome};
use crate::lifecycle::status::ResourceStatus;

/// Lifecycle state of one resource.
#[derive(Debug)]
pub struct Lifecycle {
    name: Arc<str>,
    status: Mutex<ResourceStatus>,
    readiness: Readiness,
    failures: AtomicU64,
    last_failure: Mutex<Option<FailureDetail>>,
    ctx: RuntimeContext,
}

impl Lifecycle {
    /// Creates a lifecycle in `NotStarted`, not ready.
    pub fn new(name: impl Into<Arc<str>>, ctx: &RuntimeContext) -> Self {
        Self {
            name: name.into(),
            status: Mutex::new(ResourceStatus::NotStarted),
            readiness: Readiness::new(),
            failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
            ctx: ctx.clone(),
        }
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub fn status(&self) -> ResourceStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `NotStarted | Failed → Starting`.
    pub fn mark_starting(&self) -> Result<(), TransitionError> {
        self.transition(ResourceStatus::Starting, None)
    }

    /// `Starting → Running`.
    pub fn mark_running(&self) -> Result<(), TransitionError> {
        self.transition(ResourceStatus::Running, None)
    }

    /// `Starting | Running → Stopped`.
    pub fn mark_stopped(&self) -> Result<(), TransitionError> {
        self.transition(ResourceStatus::Stopped, None)
    }

    /// `Starting | Running → Failed` (recoverable).
    pub fn mark_failed(&self, failure: FailureDetail) -> Result<(), TransitionError> {
        self.transition(ResourceStatus::Failed, Some(failure))
    }

    /// `Starting | Running → Crashed` (escalates).
    pub fn mark_crashed(&self, failure: FailureDetail) -> Result<(), TransitionError> {
        self.transition(ResourceStatus::Crashed, Some(failure))
    }

    /// Marks the resource ready and wakes every waiter.
    pub fn mark_ready(&self) {
        if self.readiness.set_ready() {
            debug!(resource = %self.name, "ready");
            self.ctx
                .bus()
                .publish(Event::readiness(Arc::clone(&self.name), true, None));
        }
    }

    /// Marks the resource not ready with a human-readable reason.
    pub fn mark_not_ready(&self, reason: impl Into<Arc<str>>) {
        let reason = reason.into();
        if self.readiness.set_not_ready(Arc::clone(&reason)) {
            debug!(resource = %self.name, reason = %reason, "not ready");
            self.ctx
                .bus()
                .publish(Event::readiness(Arc::clone(&self.name), false, Some(reason)));
        }
    }

    /// Non-blocking readiness read.
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Readiness flag with its reason.
    pub fn readiness(&self) -> ReadyState {
        self.readiness.state()
    }

    /// How many times the resource entered `Failed`.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Detail of the latest `Failed`/`Crashed` transition.
    pub fn last_failure(&self) -> Option<FailureDetail> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Blocks until ready, the timeout elapses, or host shutdown is requested.
    pub async fn wait_ready(&self, timeout: Duration) -> WaitOutcome {
        self.readiness
            .wait(timeout, self.ctx.shutdown().token())
            .await
    }

    fn transition(
        &self,
        to: ResourceStatus,
        failure: Option<FailureDetail>,
    ) -> Result<(), TransitionError> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *status;
        if !from.can_transition_to(to) {
            error!(resource = %self.name, %from, %to, "illegal lifecycle transition");
            return Err(TransitionError {
                resource: self.name.to_string(),
                from,
                to,
            });
        }
        *status = to;
        debug!(resource = %self.name, %from, %to, "transition");

        if let Some(f) = &failure {
            *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(f.clone());
        }
        if to == ResourceStatus::Failed {
            self.failures.fetch_add(1, Ordering::AcqRel);
        }

        match (&failure, to) {
            (Some(f), _) => self.mark_not_ready(f.message.as_str()),
            (None, ResourceStatus::Stopped) => self.mark_not_ready("stopped"),
            _ => {}
        }

        self.ctx.bus().publish(Event::transition(LifecycleEvent {
            resource: Arc::clone(&self.name),
            from,
            to,
            failure,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn transitions(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<(ResourceStatus, ResourceStatus)> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let Some(lc) = ev.lifecycle {
                out.push((lc.from, lc.to));
            }
        }
        out
    }

    #[test]
    fn each_transition_publishes_one_event_in_order() {
        let ctx = RuntimeContext::new(64);
        let mut rx = ctx.bus().subscribe();
        let lc = Lifecycle::new("db", &ctx);

        lc.mark_starting().unwrap();
        lc.mark_failed(FailureDetail::new("resource_failed", "refused")).unwrap();
        lc.mark_starting().unwrap();
        lc.mark_running().unwrap();
        lc.mark_stopped().unwrap();

        use ResourceStatus::*;
        assert_eq!(
            transitions(&mut rx),
            vec![
                (NotStarted, Starting),
                (Starting, Failed),
                (Failed, Starting),
                (Starting, Running),
                (Running, Stopped),
            ]
        );
    }

    #[test]
    fn illegal_transition_is_rejected_without_event() {
        let ctx = RuntimeContext::new(64);
        let lc = Lifecycle::new("db", &ctx);
        lc.mark_starting().unwrap();
        lc.mark_running().unwrap();
        lc.mark_stopped().unwrap();

        let mut rx = ctx.bus().subscribe();
        let err = lc.mark_running().unwrap_err();
        assert_eq!(err.from, ResourceStatus::Stopped);
        assert_eq!(err.to, ResourceStatus::Running);
        assert_eq!(lc.status(), ResourceStatus::Stopped);
        assert!(transitions(&mut rx).is_empty());
    }

    #[test]
    fn failure_drops_readiness_with_reason() {
        let ctx = RuntimeContext::new(64);
        let mut rx = ctx.bus().subscribe();
        let lc = Lifecycle::new("ws", &ctx);
        lc.mark_starting().unwrap();
        lc.mark_running().unwrap();
        lc.mark_ready();
        assert!(lc.is_ready());

        lc.mark_failed(FailureDetail::new("resource_failed", "socket closed"))
            .unwrap();
        let st = lc.readiness();
        assert!(!st.ready);
        assert_eq!(st.reason.as_deref(), Some("socket closed"));

        let kinds: Vec<EventKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Transition,
                EventKind::Transition,
                EventKind::ReadinessChanged,
                EventKind::ReadinessChanged,
                EventKind::Transition,
            ]
        );
    }

    #[test]
    fn failures_are_counted_and_last_detail_kept() {
        let ctx = RuntimeContext::new(64);
        let lc = Lifecycle::new("ws", &ctx);
        assert_eq!(lc.failure_count(), 0);
        assert!(lc.last_failure().is_none());

        lc.mark_starting().unwrap();
        lc.mark_failed(FailureDetail::new("resource_failed", "reset")).unwrap();
        lc.mark_starting().unwrap();
        lc.mark_crashed(FailureDetail::new("resource_fatal", "bad key")).unwrap();

        assert_eq!(lc.failure_count(), 1);
        let last = lc.last_failure().unwrap();
        assert_eq!(last.error_type, "resource_fatal");
        assert_eq!(last.message, "bad key");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_is_interrupted_by_shutdown() {
        let ctx = RuntimeContext::new(64);
        let lc = Arc::new(Lifecycle::new("api", &ctx));
        let waiter = {
            let lc = Arc::clone(&lc);
            tokio::spawn(async move { lc.wait_ready(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        ctx.shutdown()
            .request(crate::core::ShutdownCause::Requested("test".into()));
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Shutdown);
    }
}
