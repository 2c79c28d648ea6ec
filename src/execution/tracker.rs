//! # Command executor: uniform wrapper around one unit of work.
//!
//! ## Flow
//! ```text
//! execute(target, work)
//!   ├─► started_at = Utc::now(), start = Instant::now()
//!   ├─► work.await (panics caught)
//!   ├─► classify ─► ExecutionResult::{Success | Error{class, detail} | Cancelled}
//!   ├─► sink.submit(ExecutionRecord)            (non-blocking)
//!   └─► boundary:
//!         Success                 ─► Ok(())
//!         Cancelled               ─► Err(Cancelled)        (re-propagated)
//!         Error{Framework}        ─► warn!, Ok(())         (swallowed)
//!         Error{Unclassified}     ─► error! + trace, Ok(()) (swallowed)
//! ```
//!
//! ## Rules
//! - Exactly one record per call, built after the work settles. A call whose
//!   future is dropped first (task aborted, outer timeout) is recorded as
//!   `cancelled` from the drop.
//! - Duration comes from the monotonic clock only; `started_at` is for display.
//! - Bookkeeping that belongs to the dispatch loop (removing one-shot listeners,
//!   rescheduling jobs) stays with the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{panic_message, Cancelled, WorkError};
use crate::events::FailureDetail;
use crate::execution::outcome::{ErrorClass, ExecutionResult};
use crate::telemetry::{ExecutionRecord, ExecutionTarget, RecordSink};

/// Times, classifies and records units of work.
#[derive(Clone, Debug)]
pub struct CommandExecutor {
    sink: RecordSink,
    session_id: i64,
}

impl CommandExecutor {
    /// Creates an executor that records into `sink` under `session_id`.
    pub fn new(sink: RecordSink, session_id: i64) -> Self {
        Self { sink, session_id }
    }

    /// Executor that classifies and logs but persists nothing.
    pub fn detached() -> Self {
        Self::new(RecordSink::disabled(), 0)
    }

    /// Runs `work` for the registration `target`.
    ///
    /// Errors are recorded, logged and swallowed. Only cancellation is returned.
    pub async fn execute<F>(&self, target: ExecutionTarget, work: F) -> Result<(), Cancelled>
    where
        F: Future<Output = Result<(), WorkError>> + Send,
    {
        self.track(target, None, work).await
    }

    /// Like [`execute`](Self::execute), but `token` cancellation abandons the work
    /// and is recorded as `cancelled`.
    pub async fn execute_until<F>(
        &self,
        target: ExecutionTarget,
        token: &CancellationToken,
        work: F,
    ) -> Result<(), Cancelled>
    where
        F: Future<Output = Result<(), WorkError>> + Send,
    {
        self.track(target, Some(token), work).await
    }

    async fn track<F>(
        &self,
        target: ExecutionTarget,
        token: Option<&CancellationToken>,
        work: F,
    ) -> Result<(), Cancelled>
    where
        F: Future<Output = Result<(), WorkError>> + Send,
    {
        let in_flight = InFlight {
            sink: &self.sink,
            target,
            session_id: self.session_id,
            started_at: Utc::now(),
            start: Instant::now(),
            armed: true,
        };
        let result = invoke(work, token).await;
        let duration = in_flight.settle(&result);

        match result {
            ExecutionResult::Success => Ok(()),
            ExecutionResult::Cancelled => {
                debug!(registration = %target, ?duration, "unit of work cancelled");
                Err(Cancelled)
            }
            ExecutionResult::Error {
                class: ErrorClass::Framework,
                detail,
            } => {
                warn!(
                    registration = %target,
                    error_type = %detail.error_type,
                    "{}",
                    detail.message
                );
                Ok(())
            }
            ExecutionResult::Error {
                class: ErrorClass::Unclassified,
                detail,
            } => {
                error!(
                    registration = %target,
                    error_type = %detail.error_type,
                    trace = detail.trace.as_deref().unwrap_or(""),
                    "unit of work failed: {}",
                    detail.message
                );
                Ok(())
            }
        }
    }
}

/// Records the call as cancelled unless it settles first.
struct InFlight<'a> {
    sink: &'a RecordSink,
    target: ExecutionTarget,
    session_id: i64,
    started_at: DateTime<Utc>,
    start: Instant,
    armed: bool,
}

impl InFlight<'_> {
    fn submit(&self, result: &ExecutionResult) -> std::time::Duration {
        let duration = self.start.elapsed();
        self.sink.submit(ExecutionRecord::new(
            self.target,
            self.session_id,
            self.started_at,
            duration,
            result,
        ));
        duration
    }

    fn settle(mut self, result: &ExecutionResult) -> std::time::Duration {
        self.armed = false;
        self.submit(result)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            let duration = self.submit(&ExecutionResult::Cancelled);
            debug!(registration = %self.target, ?duration, "unit of work dropped before settling");
        }
    }
}

async fn invoke<F>(work: F, token: Option<&CancellationToken>) -> ExecutionResult
where
    F: Future<Output = Result<(), WorkError>> + Send,
{
    let guarded = AssertUnwindSafe(work).catch_unwind();
    let res = match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => return ExecutionResult::Cancelled,
            res = guarded => res,
        },
        None => guarded.await,
    };

    match res {
        Ok(Ok(())) => ExecutionResult::Success,
        Ok(Err(WorkError::Cancelled)) => ExecutionResult::Cancelled,
        Ok(Err(WorkError::Framework { kind, message })) => ExecutionResult::Error {
            class: ErrorClass::Framework,
            detail: FailureDetail::new(kind, message),
        },
        Ok(Err(WorkError::Unclassified(err))) => ExecutionResult::Error {
            class: ErrorClass::Unclassified,
            detail: FailureDetail::from_error("unclassified", err.as_ref()),
        },
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            // The unwind is over by now; this is the stack of the executor call site.
            let backtrace = Backtrace::capture();
            let trace = match backtrace.status() {
                BacktraceStatus::Captured => format!("panicked: {msg}\n{backtrace}"),
                _ => format!("panicked: {msg}"),
            };
            ExecutionResult::Error {
                class: ErrorClass::Unclassified,
                detail: FailureDetail::new("panic", msg).with_trace(trace),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::telemetry::{ExecutionStatus, WriteOp};

    fn executor() -> (CommandExecutor, mpsc::Receiver<WriteOp>) {
        let (sink, rx) = RecordSink::channel(16);
        (CommandExecutor::new(sink, 7), rx)
    }

    fn next_record(rx: &mut mpsc::Receiver<WriteOp>) -> ExecutionRecord {
        match rx.try_recv() {
            Ok(WriteOp::Record(r)) => r,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_is_recorded() {
        let (exec, mut rx) = executor();
        let res = exec
            .execute(ExecutionTarget::Listener(1), async { Ok(()) })
            .await;
        assert_eq!(res, Ok(()));

        let rec = next_record(&mut rx);
        assert_eq!(rec.status, ExecutionStatus::Success);
        assert_eq!(rec.session_id, 7);
        assert_eq!(rec.target, ExecutionTarget::Listener(1));
        assert!(rec.error_type.is_none());
    }

    #[tokio::test]
    async fn framework_error_is_swallowed_and_recorded() {
        let (exec, mut rx) = executor();
        let res = exec
            .execute(ExecutionTarget::Job(3), async {
                Err(WorkError::framework("entity_not_found", "light.porch"))
            })
            .await;
        assert_eq!(res, Ok(()));

        let rec = next_record(&mut rx);
        assert_eq!(rec.status, ExecutionStatus::Error);
        assert_eq!(rec.error_type.as_deref(), Some("entity_not_found"));
        assert_eq!(rec.error_message.as_deref(), Some("light.porch"));
        assert!(rec.error_trace.is_none());
    }

    #[tokio::test]
    async fn unclassified_error_keeps_trace() {
        let (exec, mut rx) = executor();
        let res = exec
            .execute(ExecutionTarget::Listener(2), async {
                Err(WorkError::other(std::io::Error::other("disk full")))
            })
            .await;
        assert_eq!(res, Ok(()));

        let rec = next_record(&mut rx);
        assert_eq!(rec.error_type.as_deref(), Some("unclassified"));
        assert_eq!(rec.error_message.as_deref(), Some("disk full"));
        assert!(rec.error_trace.as_deref().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn panic_becomes_unclassified_error() {
        let (exec, mut rx) = executor();
        let res = exec
            .execute(ExecutionTarget::Listener(2), async {
                if true {
                    panic!("handler exploded");
                }
                Ok(())
            })
            .await;
        assert_eq!(res, Ok(()));

        let rec = next_record(&mut rx);
        assert_eq!(rec.status, ExecutionStatus::Error);
        assert_eq!(rec.error_type.as_deref(), Some("panic"));
        assert_eq!(rec.error_message.as_deref(), Some("handler exploded"));
        let trace = rec.error_trace.unwrap();
        assert!(trace.starts_with("panicked: handler exploded"), "{trace}");
    }

    #[tokio::test]
    async fn cancellation_is_recorded_and_propagated() {
        let (exec, mut rx) = executor();
        let res = exec
            .execute(ExecutionTarget::Job(9), async { Err(WorkError::Cancelled) })
            .await;
        assert_eq!(res, Err(Cancelled));
        assert_eq!(next_record(&mut rx).status, ExecutionStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn token_cancellation_abandons_work() {
        let (exec, mut rx) = executor();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        });

        let res = exec
            .execute_until(ExecutionTarget::Job(4), &token, async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(Cancelled));

        let rec = next_record(&mut rx);
        assert_eq!(rec.status, ExecutionStatus::Cancelled);
        assert!(rec.duration < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn aborted_call_is_recorded_as_cancelled() {
        let (exec, mut rx) = executor();
        let task = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(ExecutionTarget::Job(1), async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let rec = next_record(&mut rx);
        assert_eq!(rec.status, ExecutionStatus::Cancelled);
        assert_eq!(rec.target, ExecutionTarget::Job(1));
        assert!(rec.error_type.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn outer_timeout_is_recorded_as_cancelled() {
        let (exec, mut rx) = executor();
        let res = tokio::time::timeout(
            Duration::from_millis(20),
            exec.execute(ExecutionTarget::Listener(5), async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }),
        )
        .await;
        assert!(res.is_err());

        let rec = next_record(&mut rx);
        assert_eq!(rec.status, ExecutionStatus::Cancelled);
        assert!(rx.try_recv().is_err());
    }
}
