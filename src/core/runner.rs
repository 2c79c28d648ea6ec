//! # Drive one start/serve/stop cycle of a resource.
//!
//! ```text
//! mark_starting
//!   └─► wait_for_ready(deps, startup_timeout)
//!         ├─ TimedOut{pending} ─► mark_failed("dependencies not ready: ...")
//!         ├─ Shutdown / cancel ─► mark_stopped
//!         └─ Ready
//!               └─► on_start(token) ─► mark_running ─► serve(token)
//!                                                         │
//!                          on_stop() (always, once started)◄┘
//!                              └─► settle:
//!                                    Ok | Canceled ─► Stopped
//!                                    retryable     ─► Failed   (watcher restarts)
//!                                    otherwise     ─► Crashed  (watcher escalates)
//!                                    panic         ─► Failed
//! ```
//!
//! ## Rules
//! - Exactly one terminal transition per cycle, unless the resource already
//!   settled itself through its own `mark_*` calls.
//! - `on_stop` runs before the terminal transition, so a restart never overlaps
//!   the previous cycle's cleanup.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{panic_message, ResourceError};
use crate::events::FailureDetail;
use crate::lifecycle::{wait_for_ready, ReadyOutcome, ResourceRef};

/// How a hook ended.
enum Exit {
    Clean,
    Error(ResourceError),
    Panic(String),
}

impl Exit {
    fn from_hook(res: Result<Result<(), ResourceError>, Box<dyn std::any::Any + Send>>) -> Self {
        match res {
            Ok(Ok(())) => Exit::Clean,
            Ok(Err(e)) => Exit::Error(e),
            Err(payload) => Exit::Panic(panic_message(payload.as_ref())),
        }
    }
}

/// Runs one lifecycle cycle of `resource`.
pub(crate) async fn run_resource(
    resource: ResourceRef,
    deps: Vec<ResourceRef>,
    token: CancellationToken,
    startup_timeout: Duration,
) {
    let name = resource.name().to_string();
    if resource.mark_starting().is_err() {
        return;
    }

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => ReadyOutcome::Shutdown,
        outcome = wait_for_ready(&deps, startup_timeout) => outcome,
    };
    match outcome {
        ReadyOutcome::Ready => {}
        ReadyOutcome::Shutdown => {
            debug!(resource = %name, "start abandoned while waiting for dependencies");
            let _ = resource.mark_stopped();
            return;
        }
        ReadyOutcome::TimedOut { pending } => {
            let list = pending
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(resource = %name, pending = %list, "dependencies not ready");
            let _ = resource.mark_failed(FailureDetail::new(
                "dependencies_not_ready",
                format!("dependencies not ready: {list}"),
            ));
            return;
        }
    }

    let mut exit = Exit::from_hook(
        AssertUnwindSafe(resource.on_start(token.clone()))
            .catch_unwind()
            .await,
    );
    if matches!(exit, Exit::Clean) && resource.mark_running().is_ok() {
        exit = Exit::from_hook(
            AssertUnwindSafe(resource.serve(token.clone()))
                .catch_unwind()
                .await,
        );
    }

    match Exit::from_hook(AssertUnwindSafe(resource.on_stop()).catch_unwind().await) {
        Exit::Clean => {}
        Exit::Error(e) => warn!(resource = %name, error = %e, "on_stop failed"),
        Exit::Panic(msg) => warn!(resource = %name, panic = %msg, "on_stop panicked"),
    }

    settle(&resource, exit);
}

fn settle(resource: &ResourceRef, exit: Exit) {
    if resource.status().is_terminal() {
        return;
    }
    let res = match exit {
        Exit::Clean | Exit::Error(ResourceError::Canceled) => resource.mark_stopped(),
        Exit::Error(e) if e.is_retryable() => resource.mark_failed(FailureDetail::from(&e)),
        Exit::Error(e) => resource.mark_crashed(FailureDetail::from(&e)),
        Exit::Panic(msg) => resource.mark_failed(FailureDetail::new("panic", format!("panic: {msg}"))),
    };
    // Starting and Running both reach every terminal status.
    debug_assert!(res.is_ok(), "cycle settled through an illegal transition: {res:?}");
}
