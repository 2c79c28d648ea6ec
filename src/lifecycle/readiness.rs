//! # Readiness signal.
//!
//! Readiness is a `tokio::sync::watch` cell holding [`ReadyState`]. Waiters
//! subscribe and block on the channel itself, so a successful wait always
//! observed `ready == true`; there is no sampling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Current readiness of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyState {
    /// Whether the resource can correctly serve requests now.
    pub ready: bool,
    /// Why the resource is not ready (or the last failure reason).
    pub reason: Option<Arc<str>>,
}

/// Result of waiting for readiness. The three outcomes are never coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Readiness was observed.
    Ready,
    /// The timeout elapsed first.
    TimedOut,
    /// Host shutdown interrupted the wait.
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct Readiness {
    tx: watch::Sender<ReadyState>,
}

impl Readiness {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ReadyState {
            ready: false,
            reason: Some(Arc::from("not started")),
        });
        Self { tx }
    }

    /// Returns true if the state actually changed.
    pub(crate) fn set_ready(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.ready {
                return false;
            }
            s.ready = true;
            s.reason = None;
            true
        })
    }

    /// Returns true if the state actually changed.
    pub(crate) fn set_not_ready(&self, reason: Arc<str>) -> bool {
        self.tx.send_if_modified(|s| {
            if !s.ready && s.reason.as_deref() == Some(&*reason) {
                return false;
            }
            s.ready = false;
            s.reason = Some(reason);
            true
        })
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.tx.borrow().ready
    }

    pub(crate) fn state(&self) -> ReadyState {
        self.tx.borrow().clone()
    }

    pub(crate) async fn wait(&self, timeout: Duration, shutdown: &CancellationToken) -> WaitOutcome {
        let mut rx = self.tx.subscribe();
        let ready = async move { rx.wait_for(|s| s.ready).await.map(|_| ()) };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => WaitOutcome::Shutdown,
            res = time::timeout(timeout, ready) => match res {
                Ok(Ok(())) => WaitOutcome::Ready,
                // Sender lives as long as `self`; a closed channel means teardown.
                Ok(Err(_closed)) => WaitOutcome::Shutdown,
                Err(_elapsed) => WaitOutcome::TimedOut,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_blocks_until_ready() {
        let r = Arc::new(Readiness::new());
        let token = CancellationToken::new();

        let waiter = {
            let r = Arc::clone(&r);
            let token = token.clone();
            tokio::spawn(async move { r.wait(Duration::from_secs(10), &token).await })
        };

        time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());
        assert!(r.set_ready());

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_shutdown_are_distinct() {
        let r = Readiness::new();
        let token = CancellationToken::new();
        assert_eq!(
            r.wait(Duration::from_millis(50), &token).await,
            WaitOutcome::TimedOut
        );

        token.cancel();
        assert_eq!(
            r.wait(Duration::from_secs(5), &token).await,
            WaitOutcome::Shutdown
        );
    }

    #[test]
    fn not_ready_keeps_reason() {
        let r = Readiness::new();
        r.set_ready();
        assert!(r.set_not_ready(Arc::from("reconnecting")));
        assert!(!r.set_not_ready(Arc::from("reconnecting")));
        let st = r.state();
        assert!(!st.ready);
        assert_eq!(st.reason.as_deref(), Some("reconnecting"));
    }
}
