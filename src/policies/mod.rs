//! Restart backoff policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how restart delays grow (base / multiplier / max + jitter)
//! - [`JitterPolicy`] randomization to avoid synchronized restarts
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { max_restart_attempts, backoff: BackoffPolicy, .. }
//!      └─► core::watcher::ServiceWatcher:
//!           - attempts < max  → sleep(backoff.delay_for(attempts)), restart
//!           - attempts >= max → escalate to shutdown
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
