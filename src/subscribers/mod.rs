//! # Event subscribers.
//!
//! ```text
//!   Lifecycle / ServiceWatcher ── publish(Event) ──► Bus
//!                                                     │
//!                                   Supervisor listener (broadcast::Receiver)
//!                                                     │
//!                                              SubscriberSet::emit_arc
//!                                                     │
//!                                   ┌─────────────────┼────────────────┐
//!                                   ▼                 ▼                ▼
//!                               LogWriter      SessionTracker       Custom
//! ```
//!
//! - [`Subscribe`]: extension point
//! - [`SubscriberSet`]: bounded per-subscriber queues, panic isolation
//! - [`LogWriter`]: renders events through `tracing`

mod log;
mod subscribe;
mod subscriber_set;

pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
