//! # Example: flaky_service
//!
//! Supervises a database and an API that depends on it. The API fails its
//! first two cycles, is restarted with backoff, then recovers. Every request
//! the API serves is recorded into a telemetry database.
//!
//! ## Flow
//! ```text
//! SupervisorBuilder
//!     ├─► with_resource(db), with_resource(api → db)
//!     ├─► with_telemetry(Telemetry::start(..))
//!     └─► Supervisor::run()
//!           ├─► db: Starting → Running → ready
//!           ├─► api: waits for db, then Failed, Failed (RestartScheduled 1s, 2s)
//!           ├─► api: Running → ready (RestartRecovered)
//!           └─► Ctrl-C ─► stop api, then db
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example flaky_service
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use servwatch::{
    CommandExecutor, Event, EventKind, ExecutionTarget, Lifecycle, LifecycleCapable,
    ListenerRegistration, RegistrationKey, Resource, ResourceError, Subscribe, SupervisorBuilder,
    SupervisorConfig, Telemetry, TelemetryConfig, WorkError,
};
use tokio_util::sync::CancellationToken;

struct ConsoleSubscriber;

#[async_trait]
impl Subscribe for ConsoleSubscriber {
    async fn on_event(&self, ev: &Event) {
        let resource = ev.resource.as_deref().unwrap_or("-");
        match ev.kind {
            EventKind::Transition => {
                if let Some(lc) = &ev.lifecycle {
                    println!("[sub] {resource}: {} -> {}", lc.from, lc.to);
                }
            }
            EventKind::RestartScheduled => println!(
                "[sub] {resource}: restart #{} in {}ms ({})",
                ev.attempt.unwrap_or(0),
                ev.delay_ms.unwrap_or(0),
                ev.reason.as_deref().unwrap_or("")
            ),
            EventKind::RestartRecovered => println!("[sub] {resource}: recovered"),
            EventKind::ShutdownRequested => {
                println!("[sub] shutdown: {}", ev.reason.as_deref().unwrap_or(""))
            }
            _ => {}
        }
    }

    fn name(&self) -> &'static str {
        "console"
    }
}

struct Database {
    lc: Lifecycle,
}

impl LifecycleCapable for Database {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lc
    }
}

#[async_trait]
impl Resource for Database {
    async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.mark_ready();
        Ok(())
    }
}

struct Api {
    lc: Lifecycle,
    cycles: AtomicU32,
    executor: CommandExecutor,
    listener_id: i64,
}

impl LifecycleCapable for Api {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lc
    }
}

#[async_trait]
impl Resource for Api {
    fn depends_on(&self) -> Vec<String> {
        vec!["db".into()]
    }

    async fn on_start(&self, _ctx: CancellationToken) -> Result<(), ResourceError> {
        if self.cycles.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(ResourceError::failed("port busy"));
        }
        self.mark_ready();
        Ok(())
    }

    async fn serve(&self, ctx: CancellationToken) -> Result<(), ResourceError> {
        let mut n = 0u32;
        while !ctx.is_cancelled() {
            n += 1;
            let target = ExecutionTarget::Listener(self.listener_id);
            let work = async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if n % 5 == 0 {
                    return Err(WorkError::framework("upstream_timeout", format!("request {n}")));
                }
                Ok(())
            };
            if self.executor.execute_until(target, &ctx, work).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join("servwatch-demo");
    let telemetry = Telemetry::start(TelemetryConfig::at(dir.join("telemetry.db"))).await?;
    let listener_id = telemetry
        .register_listener(ListenerRegistration::new(
            RegistrationKey::new("demo", 0, "handle_request").with_topic("http"),
        ))
        .await?;

    let cfg = SupervisorConfig {
        max_restart_attempts: 3,
        ..SupervisorConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(ConsoleSubscriber)];
    let builder = SupervisorBuilder::new(cfg)
        .with_subscribers(subs)
        .with_telemetry(Arc::clone(&telemetry));

    let db = Arc::new(Database {
        lc: Lifecycle::new("db", builder.context()),
    });
    let api = Arc::new(Api {
        lc: Lifecycle::new("api", builder.context()),
        cycles: AtomicU32::new(0),
        executor: telemetry.executor(),
        listener_id,
    });
    let sup = builder.with_resource(db).with_resource(api).build()?;

    println!("running; press Ctrl-C to stop");
    let res = sup.run().await;

    for s in telemetry.store().listener_summaries(Some("demo"))? {
        println!(
            "[telemetry] {}: total={} ok={} errors={} avg={:.1}ms",
            s.key.name, s.total, s.successes, s.errors, s.avg_duration_ms
        );
    }
    res?;
    Ok(())
}
