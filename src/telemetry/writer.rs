//! # Single-writer queue in front of the telemetry store.
//!
//! ```text
//! CommandExecutor ─┐
//! SessionTracker ──┼─► RecordSink::try_send ─► mpsc (bounded) ─► writer task
//! flush() ─────────┘                                              │
//!                                        batch (≤ batch_size ops) │
//!                                        spawn_blocking:          ▼
//!                                          insert_records + session errors in one pass
//! ```
//!
//! - Enqueue never waits. A full queue drops the record and bumps a counter.
//! - On stop the writer closes the queue and drains what is buffered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::FailureDetail;
use crate::telemetry::model::ExecutionRecord;
use crate::telemetry::store::TelemetryStore;

/// One queued write.
#[derive(Debug)]
pub enum WriteOp {
    /// Append an execution record.
    Record(ExecutionRecord),
    /// Record the session's first error.
    SessionError {
        session_id: i64,
        detail: FailureDetail,
    },
    /// Acknowledge once every earlier op is written.
    Flush(oneshot::Sender<()>),
}

/// Non-blocking producer side of the writer queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RecordSink {
    tx: Option<mpsc::Sender<WriteOp>>,
    dropped: Arc<AtomicU64>,
}

impl RecordSink {
    /// Sink that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a sink and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WriteOp>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Enqueues a record. Returns `false` if it was dropped.
    pub fn submit(&self, record: ExecutionRecord) -> bool {
        self.try_send(WriteOp::Record(record))
    }

    /// Enqueues a session error. Returns `false` if it was dropped.
    pub fn submit_session_error(&self, session_id: i64, detail: FailureDetail) -> bool {
        self.try_send(WriteOp::SessionError { session_id, detail })
    }

    /// Waits until everything enqueued before this call is written.
    ///
    /// Returns `false` if the sink is disabled or the writer has stopped.
    pub async fn flush(&self) -> bool {
        let Some(tx) = &self.tx else { return false };
        let (ack, done) = oneshot::channel();
        if tx.send(WriteOp::Flush(ack)).await.is_err() {
            return false;
        }
        done.await.is_ok()
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True if this sink discards everything.
    pub fn is_disabled(&self) -> bool {
        self.tx.is_none()
    }

    fn try_send(&self, op: WriteOp) -> bool {
        let Some(tx) = &self.tx else { return false };
        match tx.try_send(op) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    warn!(dropped = n, "telemetry queue full; dropping writes");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("telemetry writer stopped; dropping write");
                false
            }
        }
    }
}

#[derive(Default)]
struct Batch {
    records: Vec<ExecutionRecord>,
    session_errors: Vec<(i64, FailureDetail)>,
    acks: Vec<oneshot::Sender<()>>,
}

impl Batch {
    fn push(&mut self, op: WriteOp) {
        match op {
            WriteOp::Record(r) => self.records.push(r),
            WriteOp::SessionError { session_id, detail } => {
                self.session_errors.push((session_id, detail))
            }
            WriteOp::Flush(ack) => self.acks.push(ack),
        }
    }

    fn len(&self) -> usize {
        self.records.len() + self.session_errors.len()
    }

    async fn write(&mut self, store: &TelemetryStore) {
        let records = std::mem::take(&mut self.records);
        let session_errors = std::mem::take(&mut self.session_errors);
        let pending = records.len();

        if pending > 0 || !session_errors.is_empty() {
            let res = store
                .run(move |s| {
                    let written = s.insert_records(&records)?;
                    for (id, detail) in &session_errors {
                        s.record_session_error(*id, detail)?;
                    }
                    Ok(written)
                })
                .await;
            match res {
                Ok(written) => debug!(written, "telemetry batch written"),
                Err(e) => error!(error = %e, label = e.as_label(), lost = pending, "telemetry batch write failed"),
            }
        }

        for ack in self.acks.drain(..) {
            let _ = ack.send(());
        }
    }
}

/// Drains the queue into the store until `stop` fires, then writes what is buffered.
pub(crate) async fn run_writer(
    store: TelemetryStore,
    mut rx: mpsc::Receiver<WriteOp>,
    batch_size: usize,
    stop: CancellationToken,
) {
    let batch_size = batch_size.max(1);
    let mut batch = Batch::default();

    loop {
        let op = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            op = rx.recv() => op,
        };
        let Some(op) = op else { break };
        batch.push(op);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(op) => batch.push(op),
                Err(_) => break,
            }
        }
        batch.write(&store).await;
    }

    rx.close();
    while let Some(op) = rx.recv().await {
        batch.push(op);
        if batch.len() >= batch_size {
            batch.write(&store).await;
        }
    }
    batch.write(&store).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::telemetry::model::{
        ExecutionStatus, ExecutionTarget, ListenerRegistration, RegistrationKey, SessionStatus,
    };

    fn record(target: ExecutionTarget, session_id: i64) -> ExecutionRecord {
        ExecutionRecord {
            target,
            session_id,
            started_at: Utc::now(),
            duration: Duration::from_millis(3),
            status: ExecutionStatus::Success,
            error_type: None,
            error_message: None,
            error_trace: None,
        }
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (sink, _rx) = RecordSink::channel(1);
        assert!(sink.submit(record(ExecutionTarget::Job(1), 1)));
        assert!(!sink.submit(record(ExecutionTarget::Job(1), 1)));
        assert!(!sink.submit(record(ExecutionTarget::Job(1), 1)));
        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn disabled_sink_discards() {
        let sink = RecordSink::disabled();
        assert!(sink.is_disabled());
        assert!(!sink.submit(record(ExecutionTarget::Job(1), 1)));
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn flush_waits_for_earlier_writes_and_stop_drains() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let session = store.begin_session(Utc::now()).unwrap();
        let listener = store
            .upsert_listener(&ListenerRegistration::new(RegistrationKey::new("app", 0, "h")), Utc::now())
            .unwrap();

        let (sink, rx) = RecordSink::channel(64);
        let stop = CancellationToken::new();
        let writer = tokio::spawn(run_writer(store.clone(), rx, 4, stop.clone()));

        for _ in 0..10 {
            assert!(sink.submit(record(ExecutionTarget::Listener(listener), session)));
        }
        assert!(sink.flush().await);
        let sums = store.listener_summaries(None).unwrap();
        assert_eq!(sums[0].total, 10);

        assert!(sink.submit_session_error(session, FailureDetail::new("resource_fatal", "db")));
        assert!(sink.submit(record(ExecutionTarget::Listener(listener), session)));
        stop.cancel();
        writer.await.unwrap();

        assert_eq!(store.listener_summaries(None).unwrap()[0].total, 11);
        let s = store.session(session).unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Running);
        assert_eq!(s.error_message.as_deref(), Some("db"));
        assert!(!sink.flush().await);
    }
}
