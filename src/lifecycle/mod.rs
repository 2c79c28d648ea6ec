//! # Resource lifecycle.
//!
//! - [`ResourceStatus`]: the status enum and its transition table
//! - [`Lifecycle`]: per-resource state machine + readiness signal
//! - [`LifecycleCapable`], [`Resource`]: the contract every supervised unit implements
//! - [`wait_for_ready`]: event-driven readiness coordinator

mod coordinator;
mod handle;
mod readiness;
mod resource;
mod status;

pub use coordinator::{wait_for_ready, PendingResource, ReadyOutcome};
pub use handle::Lifecycle;
pub use readiness::{ReadyState, WaitOutcome};
pub use resource::{LifecycleCapable, Resource, ResourceRef};
pub use status::ResourceStatus;
