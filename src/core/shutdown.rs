//! # Process shutdown: the once-only guard and OS signal handling.
//!
//! [`ShutdownGuard`] is the single shared "shutdown in progress" flag. Any
//! number of callers (signal handler, watcher escalation, API) may race to
//! request shutdown; exactly one wins, publishes [`EventKind::ShutdownRequested`]
//! and cancels the shutdown token. Every later request is a no-op.
//!
//! ## Signals
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`, Ctrl-C. **Other:** Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::{Bus, Event, EventKind};

/// What started the shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// An OS termination signal.
    Signal,
    /// [`Supervisor::shutdown`](crate::Supervisor::shutdown) was called.
    Requested(String),
    /// A resource crashed or exhausted its restarts.
    Escalated {
        /// Resource that triggered the escalation.
        resource: String,
        /// Why.
        reason: String,
    },
}

impl std::fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownCause::Signal => f.write_str("termination signal"),
            ShutdownCause::Requested(reason) => write!(f, "requested: {reason}"),
            ShutdownCause::Escalated { resource, reason } => write!(f, "{resource}: {reason}"),
        }
    }
}

/// Once-only process shutdown trigger.
#[derive(Debug)]
pub struct ShutdownGuard {
    requested: AtomicBool,
    cause: Mutex<Option<ShutdownCause>>,
    token: CancellationToken,
    bus: Bus,
}

impl ShutdownGuard {
    pub(crate) fn new(bus: Bus) -> Self {
        Self {
            requested: AtomicBool::new(false),
            cause: Mutex::new(None),
            token: CancellationToken::new(),
            bus,
        }
    }

    /// Requests shutdown. Returns `true` only for the call that actually started it.
    pub fn request(&self, cause: ShutdownCause) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(cause = %cause, "shutdown already in progress; ignoring request");
            return false;
        }

        info!(cause = %cause, "shutdown requested");
        let reason = cause.to_string();
        *self.cause.lock().unwrap_or_else(PoisonError::into_inner) = Some(cause);
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(reason));
        self.token.cancel();
        true
    }

    /// True once any request has been admitted.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// The admitted cause, if any.
    pub fn cause(&self) -> Option<ShutdownCause> {
        self.cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completes when shutdown has been requested.
    pub async fn requested(&self) {
        self.token.cancelled().await
    }

    /// Token cancelled when shutdown is requested; used to interrupt waits.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Waits for a termination signal.
#[cfg(unix)]
pub(crate) async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub(crate) async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_admit_exactly_one() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let guard = Arc::new(ShutdownGuard::new(bus));

        let mut handles = Vec::new();
        for i in 0..16 {
            let g = Arc::clone(&guard);
            handles.push(tokio::spawn(async move {
                g.request(ShutdownCause::Escalated {
                    resource: format!("r{i}"),
                    reason: "boom".into(),
                })
            }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert!(guard.token().is_cancelled());

        let mut published = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::ShutdownRequested {
                published += 1;
            }
        }
        assert_eq!(published, 1);
    }

    #[test]
    fn cause_is_kept_from_first_request() {
        let guard = ShutdownGuard::new(Bus::new(4));
        assert!(guard.request(ShutdownCause::Requested("deploy".into())));
        assert!(!guard.request(ShutdownCause::Signal));
        assert_eq!(guard.cause(), Some(ShutdownCause::Requested("deploy".into())));
    }
}
