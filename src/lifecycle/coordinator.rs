//! # Readiness coordinator.
//!
//! Blocks a startup routine until every dependency reports readiness.
//!
//! ```text
//! wait_for_ready([db, ws], timeout)
//!     ├─► db.wait_ready(deadline) ──┐   (signal-based, concurrent)
//!     └─► ws.wait_ready(deadline) ──┤
//!                                   ▼
//!        all Ready ─► Ready | any Shutdown ─► Shutdown | else ─► TimedOut{pending}
//! ```
//!
//! Success is returned only when every wait itself returned `Ready`; nothing is
//! sampled with `is_ready()`. The guarantee covers initial readiness only:
//! a dependency may still go unready afterwards.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use crate::lifecycle::readiness::WaitOutcome;
use crate::lifecycle::resource::ResourceRef;

/// A dependency that was not ready when the wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResource {
    /// Resource name.
    pub name: String,
    /// Its readiness reason at the time.
    pub reason: Option<String>,
}

impl std::fmt::Display for PendingResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(r) => write!(f, "{} ({r})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Outcome of a coordinated wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Every dependency reported ready.
    Ready,
    /// The shared deadline passed; lists what was still pending.
    TimedOut {
        /// Dependencies that never reported ready.
        pending: Vec<PendingResource>,
    },
    /// Host shutdown interrupted the wait.
    Shutdown,
}

/// Waits until all `deps` are ready, the shared `timeout` elapses, or shutdown begins.
pub async fn wait_for_ready(deps: &[ResourceRef], timeout: Duration) -> ReadyOutcome {
    if deps.is_empty() {
        return ReadyOutcome::Ready;
    }
    let deadline = Instant::now() + timeout;

    let waits = deps.iter().map(|dep| async move {
        let remaining = deadline.saturating_duration_since(Instant::now());
        (dep, dep.lifecycle().wait_ready(remaining).await)
    });
    let results = join_all(waits).await;

    if results
        .iter()
        .any(|(_, outcome)| *outcome == WaitOutcome::Shutdown)
    {
        return ReadyOutcome::Shutdown;
    }

    let pending: Vec<PendingResource> = results
        .into_iter()
        .filter(|(_, outcome)| *outcome != WaitOutcome::Ready)
        .map(|(dep, _)| PendingResource {
            name: dep.name().to_string(),
            reason: dep.lifecycle().readiness().reason.map(|r| r.to_string()),
        })
        .collect();

    if pending.is_empty() {
        ReadyOutcome::Ready
    } else {
        ReadyOutcome::TimedOut { pending }
    }
}
