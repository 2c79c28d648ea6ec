//! # Resource contract.
//!
//! [`LifecycleCapable`] is the capability every supervised unit exposes: the
//! `mark_*` transitions, readiness and `wait_ready`, all provided on top of a
//! single [`Lifecycle`] accessor. [`Resource`] adds the hooks the runner drives.
//!
//! # Example
//! ```
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use servwatch::{Lifecycle, LifecycleCapable, Resource, ResourceError, RuntimeContext};
//!
//! struct Cache { lc: Lifecycle }
//!
//! impl LifecycleCapable for Cache {
//!     fn lifecycle(&self) -> &Lifecycle { &self.lc }
//! }
//!
//! #[async_trait]
//! impl Resource for Cache {
//!     async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
//!         self.mark_ready();
//!         Ok(())
//!     }
//! }
//!
//! let ctx = RuntimeContext::new(16);
//! let cache = Cache { lc: Lifecycle::new("cache", &ctx) };
//! assert_eq!(cache.name(), "cache");
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ResourceError, TransitionError};
use crate::events::FailureDetail;
use crate::lifecycle::handle::Lifecycle;
use crate::lifecycle::readiness::WaitOutcome;
use crate::lifecycle::status::ResourceStatus;

/// Uniform lifecycle capability.
#[async_trait]
pub trait LifecycleCapable: Send + Sync {
    /// The resource's lifecycle state.
    fn lifecycle(&self) -> &Lifecycle;

    /// Stable resource name.
    fn name(&self) -> &str {
        self.lifecycle().name()
    }

    /// Current status.
    fn status(&self) -> ResourceStatus {
        self.lifecycle().status()
    }

    /// See [`Lifecycle::mark_starting`].
    fn mark_starting(&self) -> Result<(), TransitionError> {
        self.lifecycle().mark_starting()
    }

    /// See [`Lifecycle::mark_running`].
    fn mark_running(&self) -> Result<(), TransitionError> {
        self.lifecycle().mark_running()
    }

    /// See [`Lifecycle::mark_failed`].
    fn mark_failed(&self, failure: FailureDetail) -> Result<(), TransitionError> {
        self.lifecycle().mark_failed(failure)
    }

    /// See [`Lifecycle::mark_crashed`].
    fn mark_crashed(&self, failure: FailureDetail) -> Result<(), TransitionError> {
        self.lifecycle().mark_crashed(failure)
    }

    /// See [`Lifecycle::mark_stopped`].
    fn mark_stopped(&self) -> Result<(), TransitionError> {
        self.lifecycle().mark_stopped()
    }

    /// See [`Lifecycle::mark_ready`].
    fn mark_ready(&self) {
        self.lifecycle().mark_ready()
    }

    /// See [`Lifecycle::mark_not_ready`].
    fn mark_not_ready(&self, reason: &str) {
        self.lifecycle().mark_not_ready(reason)
    }

    /// See [`Lifecycle::is_ready`].
    fn is_ready(&self) -> bool {
        self.lifecycle().is_ready()
    }

    /// See [`Lifecycle::wait_ready`].
    async fn wait_ready(&self, timeout: Duration) -> WaitOutcome {
        self.lifecycle().wait_ready(timeout).await
    }
}

/// A supervised long-lived unit.
///
/// The runner drives one cycle as:
/// `mark_starting → wait for dependencies → on_start → mark_running → serve → on_stop`,
/// then settles the status from the outcome. Readiness is the resource's own
/// business: call [`LifecycleCapable::mark_ready`] when it can serve.
#[async_trait]
pub trait Resource: LifecycleCapable + 'static {
    /// Names of resources that must be ready before `on_start` runs.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Initializes the resource. Cancellation-aware.
    async fn on_start(&self, ctx: CancellationToken) -> Result<(), ResourceError>;

    /// Long-running work; returns when cancelled or on failure.
    async fn serve(&self, ctx: CancellationToken) -> Result<(), ResourceError> {
        ctx.cancelled().await;
        Ok(())
    }

    /// Cleanup after every cycle, including failed ones.
    async fn on_stop(&self) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Shared handle to a resource.
pub type ResourceRef = Arc<dyn Resource>;
