//! # Logging subscriber.
//!
//! [`LogWriter`] renders every bus event through `tracing`, one line per event:
//!
//! ```text
//! INFO  resource=db from=starting to=running transition
//! WARN  resource=db from=running to=failed reason="connection reset" transition
//! INFO  resource=db attempt=1 delay_ms=1000 reason="connection reset" restart scheduled
//! ERROR resource=db attempt=3 reason="..." restarts exhausted
//! INFO  reason="signal" shutdown requested
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::lifecycle::ResourceStatus;
use crate::subscribers::Subscribe;

/// Subscriber that logs runtime events with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let resource = e.resource.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::Transition => {
                let Some(lc) = &e.lifecycle else { return };
                match lc.to {
                    ResourceStatus::Failed => {
                        warn!(resource, from = %lc.from, to = %lc.to, reason, "transition")
                    }
                    ResourceStatus::Crashed => {
                        error!(resource, from = %lc.from, to = %lc.to, reason, "transition")
                    }
                    _ => info!(resource, from = %lc.from, to = %lc.to, "transition"),
                }
            }
            EventKind::ReadinessChanged => {
                debug!(resource, ready = ?e.ready, reason, "readiness changed");
            }
            EventKind::RestartScheduled => {
                info!(resource, attempt = ?e.attempt, delay_ms = ?e.delay_ms, reason, "restart scheduled");
            }
            EventKind::RestartRecovered => {
                info!(resource, "restart counter reset");
            }
            EventKind::RestartExhausted => {
                error!(resource, attempt = ?e.attempt, reason, "restarts exhausted");
            }
            EventKind::ShutdownRequested => info!(reason, "shutdown requested"),
            EventKind::AllStoppedWithin => info!("all resources stopped within grace"),
            EventKind::GraceExceeded => warn!(stuck = reason, "grace exceeded"),
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                warn!(subscriber = resource, reason, kind = ?e.kind, "subscriber problem");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
