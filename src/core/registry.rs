//! # Resource registry: explicit table of supervised resources.
//!
//! Built once from the resources handed to the builder, then immutable except
//! for the per-resource run handles.
//!
//! ## Architecture
//! ```text
//! Registry::new(resources)
//!   ├─► duplicate names        → RuntimeError::DuplicateResource
//!   ├─► unknown depends_on     → RuntimeError::UnknownDependency
//!   └─► Kahn topological order → RuntimeError::DependencyCycle
//!
//! start_all()      spawn run_resource() for every entry (dependency order)
//! restart(name)    replace the finished run with a fresh cycle
//! stop_all(grace)  cancel + join in reverse dependency order under one deadline
//! ```
//!
//! ## Rules
//! - Each resource has its own run token; cancelling one never cancels another.
//! - After `stop_all` begins, `restart` is refused.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::runner::run_resource;
use crate::error::{ResourceFailure, RuntimeError};
use crate::lifecycle::{ResourceRef, ResourceStatus};

/// Point-in-time view of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Resource name.
    pub name: String,
    /// Current status.
    pub status: ResourceStatus,
    /// Current readiness flag.
    pub ready: bool,
    /// Readiness reason, if not ready.
    pub reason: Option<String>,
}

struct Entry {
    resource: ResourceRef,
    deps: Vec<ResourceRef>,
}

impl Entry {
    fn name(&self) -> &str {
        self.resource.name()
    }
}

/// Handle to one running cycle.
struct Run {
    token: CancellationToken,
    join: JoinHandle<()>,
}

pub(crate) struct Registry {
    /// Entries in dependency order.
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    runs: RwLock<HashMap<String, Run>>,
    stopping: AtomicBool,
    startup_timeout: Duration,
}

impl Registry {
    /// Validates `resources` and orders them by dependency.
    pub(crate) fn new(
        resources: Vec<ResourceRef>,
        startup_timeout: Duration,
    ) -> Result<Arc<Self>, RuntimeError> {
        let order = plan(&resources)?;

        let mut slots: Vec<Option<ResourceRef>> = resources.into_iter().map(Some).collect();
        let ordered: Vec<ResourceRef> = order.into_iter().filter_map(|i| slots[i].take()).collect();

        let index: HashMap<String, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name().to_string(), i))
            .collect();

        let entries = ordered
            .iter()
            .map(|r| Entry {
                resource: Arc::clone(r),
                deps: r
                    .depends_on()
                    .iter()
                    .filter_map(|d| index.get(d).map(|&i| Arc::clone(&ordered[i])))
                    .collect(),
            })
            .collect();

        Ok(Arc::new(Self {
            entries,
            index,
            runs: RwLock::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            startup_timeout,
        }))
    }

    /// Resource names in start order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name().to_string()).collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ResourceRef> {
        self.index.get(name).map(|&i| &self.entries[i].resource)
    }

    fn spawn(&self, entry: &Entry) -> Run {
        let token = CancellationToken::new();
        let join = tokio::spawn(run_resource(
            Arc::clone(&entry.resource),
            entry.deps.clone(),
            token.clone(),
            self.startup_timeout,
        ));
        Run { token, join }
    }

    /// Spawns one cycle per resource, in dependency order.
    pub(crate) async fn start_all(&self) {
        let mut runs = self.runs.write().await;
        for entry in &self.entries {
            debug!(resource = entry.name(), deps = entry.deps.len(), "spawning resource");
            runs.insert(entry.name().to_string(), self.spawn(entry));
        }
    }

    /// Starts a fresh cycle of `name` once its previous cycle has finished.
    ///
    /// Returns `false` if the resource is unknown or shutdown has begun.
    pub(crate) async fn restart(&self, name: &str) -> bool {
        let Some(&i) = self.index.get(name) else {
            return false;
        };
        let previous = self.runs.write().await.remove(name);
        if let Some(prev) = previous {
            prev.token.cancel();
            if let Err(e) = prev.join.await {
                warn!(resource = name, error = %e, "previous cycle ended abnormally");
            }
        }

        let mut runs = self.runs.write().await;
        if self.stopping.load(Ordering::Acquire) {
            return false;
        }
        runs.insert(name.to_string(), self.spawn(&self.entries[i]));
        true
    }

    /// Cancels and joins every run in reverse dependency order.
    ///
    /// Returns the names of resources that did not finish before `grace`.
    pub(crate) async fn stop_all(&self, grace: Duration) -> Result<(), Vec<String>> {
        let mut runs: HashMap<String, Run> = {
            let mut guard = self.runs.write().await;
            self.stopping.store(true, Ordering::Release);
            guard.drain().collect()
        };

        let deadline = Instant::now() + grace;
        let mut stuck = Vec::new();
        for entry in self.entries.iter().rev() {
            let Some(mut run) = runs.remove(entry.name()) else {
                continue;
            };
            run.token.cancel();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut run.join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(resource = entry.name(), error = %e, "resource task ended abnormally"),
                Err(_) => {
                    run.join.abort();
                    stuck.push(entry.name().to_string());
                }
            }
        }

        if stuck.is_empty() {
            Ok(())
        } else {
            Err(stuck)
        }
    }

    /// Every resource that is not ready, with its status and readiness reason.
    pub(crate) fn failure_report(&self) -> Vec<ResourceFailure> {
        self.entries
            .iter()
            .filter(|e| !e.resource.is_ready())
            .map(|e| ResourceFailure {
                resource: e.name().to_string(),
                status: e.resource.status(),
                reason: e.resource.lifecycle().readiness().reason.map(|r| r.to_string()),
            })
            .collect()
    }

    /// Status and readiness of every resource, in start order.
    pub(crate) fn snapshot(&self) -> Vec<ResourceSnapshot> {
        self.entries
            .iter()
            .map(|e| {
                let state = e.resource.lifecycle().readiness();
                ResourceSnapshot {
                    name: e.name().to_string(),
                    status: e.resource.status(),
                    ready: state.ready,
                    reason: state.reason.map(|r| r.to_string()),
                }
            })
            .collect()
    }
}

/// Validates names and dependencies; returns indices in start order.
///
/// Ties are broken by registration order.
fn plan(resources: &[ResourceRef]) -> Result<Vec<usize>, RuntimeError> {
    let mut index = HashMap::with_capacity(resources.len());
    for (i, r) in resources.iter().enumerate() {
        if index.insert(r.name().to_string(), i).is_some() {
            return Err(RuntimeError::DuplicateResource {
                resource: r.name().to_string(),
            });
        }
    }

    let n = resources.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, r) in resources.iter().enumerate() {
        let mut deps: Vec<usize> = Vec::new();
        for d in r.depends_on() {
            let Some(&j) = index.get(&d) else {
                return Err(RuntimeError::UnknownDependency {
                    resource: r.name().to_string(),
                    dependency: d,
                });
            };
            if !deps.contains(&j) {
                deps.push(j);
            }
        }
        indegree[i] = deps.len();
        for j in deps {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            indegree[k] -= 1;
            if indegree[k] == 0 {
                ready.insert(k);
            }
        }
    }

    if let Some(i) = (0..n).find(|&i| indegree[i] > 0) {
        return Err(RuntimeError::DependencyCycle {
            resource: resources[i].name().to_string(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::core::RuntimeContext;
    use crate::error::ResourceError;
    use crate::lifecycle::{Lifecycle, LifecycleCapable, Resource};

    struct Node {
        lc: Lifecycle,
        deps: Vec<String>,
        stubborn: bool,
    }

    impl LifecycleCapable for Node {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lc
        }
    }

    #[async_trait]
    impl Resource for Node {
        fn depends_on(&self) -> Vec<String> {
            self.deps.clone()
        }

        async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
            self.mark_ready();
            Ok(())
        }

        async fn serve(&self, ctx: CancellationToken) -> Result<(), ResourceError> {
            if self.stubborn {
                std::future::pending::<()>().await;
            }
            ctx.cancelled().await;
            Ok(())
        }
    }

    fn node(ctx: &RuntimeContext, name: &str, deps: &[&str]) -> ResourceRef {
        Arc::new(Node {
            lc: Lifecycle::new(name, ctx),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            stubborn: false,
        })
    }

    #[test]
    fn orders_dependencies_first_and_keeps_registration_order_otherwise() {
        let ctx = RuntimeContext::new(16);
        let reg = Registry::new(
            vec![
                node(&ctx, "api", &["db", "cache"]),
                node(&ctx, "metrics", &[]),
                node(&ctx, "cache", &["db"]),
                node(&ctx, "db", &[]),
            ],
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(reg.names(), vec!["metrics", "db", "cache", "api"]);
    }

    #[test]
    fn rejects_invalid_tables() {
        let ctx = RuntimeContext::new(16);
        let dup = Registry::new(vec![node(&ctx, "db", &[]), node(&ctx, "db", &[])], Duration::ZERO);
        assert!(matches!(dup, Err(RuntimeError::DuplicateResource { .. })));

        let unknown = Registry::new(vec![node(&ctx, "api", &["db"])], Duration::ZERO);
        assert!(matches!(
            unknown,
            Err(RuntimeError::UnknownDependency { ref dependency, .. }) if dependency == "db"
        ));

        let cycle = Registry::new(
            vec![node(&ctx, "a", &["b"]), node(&ctx, "b", &["a"]), node(&ctx, "c", &[])],
            Duration::ZERO,
        );
        assert!(matches!(cycle, Err(RuntimeError::DependencyCycle { .. })));
    }

    #[tokio::test]
    async fn stops_in_reverse_order_and_reports_stuck() {
        let ctx = RuntimeContext::new(64);
        let stubborn: ResourceRef = Arc::new(Node {
            lc: Lifecycle::new("stubborn", &ctx),
            deps: vec![],
            stubborn: true,
        });
        let reg = Registry::new(
            vec![stubborn, node(&ctx, "db", &[]), node(&ctx, "api", &["db"])],
            Duration::from_secs(1),
        )
        .unwrap();

        reg.start_all().await;
        for name in reg.names() {
            let r = reg.get(&name).unwrap();
            r.wait_ready(Duration::from_secs(5)).await;
        }
        assert!(reg.failure_report().is_empty());

        let stuck = reg.stop_all(Duration::from_millis(200)).await.unwrap_err();
        assert_eq!(stuck, vec!["stubborn".to_string()]);
        assert_eq!(reg.get("db").unwrap().status(), ResourceStatus::Stopped);
        assert_eq!(reg.get("api").unwrap().status(), ResourceStatus::Stopped);
        assert!(!reg.restart("db").await);
    }
}
