//! # Runtime context shared by every resource.
//!
//! Replaces process-wide flags with one owned value: the event bus and the
//! shutdown guard. The [`SupervisorBuilder`](crate::SupervisorBuilder) creates
//! it; resources receive it when they construct their [`Lifecycle`](crate::Lifecycle).

use std::sync::Arc;

use crate::core::shutdown::ShutdownGuard;
use crate::events::Bus;

/// Bus + shutdown guard, cheap to clone.
#[derive(Clone, Debug)]
pub struct RuntimeContext {
    bus: Bus,
    shutdown: Arc<ShutdownGuard>,
}

impl RuntimeContext {
    /// Creates a fresh context with a bus of the given capacity.
    pub fn new(bus_capacity: usize) -> Self {
        let bus = Bus::new(bus_capacity);
        let shutdown = Arc::new(ShutdownGuard::new(bus.clone()));
        Self { bus, shutdown }
    }

    /// Event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Process shutdown guard.
    pub fn shutdown(&self) -> &Arc<ShutdownGuard> {
        &self.shutdown
    }
}
