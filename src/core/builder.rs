use std::sync::Arc;

use crate::config::SupervisorConfig;
use crate::error::RuntimeError;
use crate::lifecycle::ResourceRef;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::telemetry::Telemetry;

use super::{context::RuntimeContext, registry::Registry, supervisor::Supervisor};

/// Builder for a [`Supervisor`].
///
/// The builder owns the [`RuntimeContext`] from the start, so resources can
/// be constructed against [`SupervisorBuilder::context`] before they are added.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    ctx: RuntimeContext,
    subscribers: Vec<Arc<dyn Subscribe>>,
    resources: Vec<ResourceRef>,
    telemetry: Option<Arc<Telemetry>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: SupervisorConfig) -> Self {
        let ctx = RuntimeContext::new(cfg.bus_capacity_clamped());
        Self {
            cfg,
            ctx,
            subscribers: Vec::new(),
            resources: Vec::new(),
            telemetry: None,
        }
    }

    /// Context resources must be created with.
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Adds event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// Registers a resource. Names must be unique.
    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resources.push(resource);
        self
    }

    /// Registers several resources.
    pub fn with_resources(mut self, resources: impl IntoIterator<Item = ResourceRef>) -> Self {
        self.resources.extend(resources);
        self
    }

    /// Attaches a telemetry session.
    ///
    /// Adds its [`SessionTracker`](crate::telemetry::SessionTracker) subscriber and
    /// closes the session when [`Supervisor::run`] returns.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.subscribers.push(Arc::new(telemetry.tracker()));
        self.telemetry = Some(telemetry);
        self
    }

    /// Validates the resource table and builds the supervisor.
    ///
    /// # Errors
    /// [`RuntimeError::DuplicateResource`], [`RuntimeError::UnknownDependency`] or
    /// [`RuntimeError::DependencyCycle`] when the resource table is invalid.
    pub fn build(self) -> Result<Arc<Supervisor>, RuntimeError> {
        let registry = Registry::new(self.resources, self.cfg.startup_timeout)?;
        let subs = SubscriberSet::new(self.subscribers, self.ctx.bus().clone());
        Ok(Arc::new(Supervisor::new_internal(
            self.cfg,
            self.ctx,
            subs,
            registry,
            self.telemetry,
        )))
    }
}
