//! Runtime core: orchestration, restarts and shutdown.
//!
//! The public API from this module is [`Supervisor`], built with
//! [`SupervisorBuilder`], plus the [`RuntimeContext`] resources are created with.
//!
//! Internal modules:
//! - [`runner`]: drives one start/serve/stop cycle of a resource;
//! - [`registry`]: resource table, dependency order, start/restart/stop;
//! - [`watcher`]: restart with backoff, escalation to shutdown;
//! - [`supervisor`]: wires everything and owns graceful shutdown;
//! - [`shutdown`]: the single-shot shutdown guard and OS signal handling.

mod builder;
mod context;
mod registry;
mod runner;
mod shutdown;
mod supervisor;
mod watcher;

pub use builder::SupervisorBuilder;
pub use context::RuntimeContext;
pub use registry::ResourceSnapshot;
pub use shutdown::{ShutdownCause, ShutdownGuard};
pub use supervisor::Supervisor;
