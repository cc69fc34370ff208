//! Switchboard daemon assembly.
//!
//! The switchboard is a butler like any other — database, session pool,
//! scheduler, tool server — plus the ingress RPC surface, the
//! classifier, the connector registry, and the rollup jobs.

use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::server::{Server, ServerHandle};
use tokio::sync::watch;
use tracing::{error, info};

use majordomo_butler::{core_tools, CoreToolDeps, JobRegistry, LogNotifier, Notifier, PoolDispatcher};
use majordomo_config::ButlerConfig;
use majordomo_connector::IngressRpcServer as _;
use majordomo_core::{FleetError, FleetResult};
use majordomo_mcp::{ButlerTool, McpServer, ToolRegistry};
use majordomo_scheduler::{run_scheduler, TaskDispatcher};
use majordomo_session::{CliLauncher, SessionLauncher, SessionPool};
use majordomo_storage::{
    AdvisoryLocks, ButlerRegistryStore, ConnectorRegistryStore, Database, InboxStore,
    NotificationStore, RoutingStore, ScheduleStore, SessionStore, StateStore, StatsStore,
};

use crate::classify::Classifier;
use crate::ingress::SwitchboardIngress;
use crate::route::RouteService;
use crate::tools::{ConnectorQuarantine, ConnectorReactivate, RouteTool};

/// Scheduler evaluation cadence.
const SCHEDULER_TICK: Duration = Duration::from_secs(15);
/// Connector liveness sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Timeout on cross-butler tool calls.
const ROUTE_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A running switchboard.
pub struct SwitchboardDaemon {
    db: Database,
    registry: ButlerRegistryStore,
    connectors: ConnectorRegistryStore,
    ingress: SwitchboardIngress,
    tool_server: McpServer,
    ingress_server: ServerHandle,
    ingress_endpoint: String,
    shutdown_tx: watch::Sender<bool>,
}

impl SwitchboardDaemon {
    /// Start the switchboard from its config, rescanning `fleet_dir` for
    /// butler declarations.
    ///
    /// # Errors
    ///
    /// Fails when the database or either server cannot come up.
    pub async fn start(
        config: &ButlerConfig,
        fleet_dir: Option<&std::path::Path>,
        launcher: Option<Arc<dyn SessionLauncher>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> FleetResult<Self> {
        let sb_config = config.switchboard.clone().unwrap_or_default();
        let db = if config.database.path == "memory" {
            Database::connect_memory("switchboard").await
        } else {
            Database::connect_embedded(&config.database.path, "switchboard").await
        }
        .map_err(FleetError::from)?;
        db.define_schema().await.map_err(FleetError::from)?;

        let inbox = InboxStore::new(db.clone(), AdvisoryLocks::new());
        let routing_log = RoutingStore::new(db.clone());
        let registry = ButlerRegistryStore::new(db.clone());
        let connectors = ConnectorRegistryStore::new(db.clone());
        let state = StateStore::new(db.clone());
        let schedule = ScheduleStore::new(db.clone());
        let sessions = SessionStore::new(db.clone());
        let notifications = NotificationStore::new(db.clone());
        let stats = StatsStore::new(db.clone());

        if let Some(dir) = fleet_dir {
            discover(&registry, dir).await?;
        }

        let notifier = notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let launcher: Arc<dyn SessionLauncher> = launcher.unwrap_or_else(|| {
            Arc::new(CliLauncher::new(
                &config.sessions.cli_binary,
                config.sessions.model.clone(),
                config.butler.endpoint_url(),
                "switchboard",
                vec!["route".to_owned()],
                Duration::from_secs(config.sessions.deadline_secs),
                Duration::from_secs(config.sessions.kill_grace_secs),
            ))
        });

        let routes = Arc::new(RouteService::new(registry.clone(), ROUTE_CALL_TIMEOUT));
        let classifier = Classifier::new(
            Arc::clone(&routes),
            routing_log.clone(),
            sessions.clone(),
            notifications.clone(),
            Arc::clone(&notifier),
            sb_config.classifier.max_fanout,
            sb_config.classifier.fallback_butler.clone(),
            config.sessions.queue_capacity,
        );
        Arc::clone(&classifier).start(Arc::clone(&launcher));

        // The switchboard's own pool serves `trigger` self-dispatch.
        let pool = Arc::new(SessionPool::start(
            "switchboard",
            sessions.clone(),
            Arc::clone(&launcher),
            config.sessions.max_concurrent,
            config.sessions.queue_capacity,
            config.sessions.system_prompt.clone(),
            config.sessions.skills.clone(),
        ));
        let _resumed = pool.resume_persisted().await?;

        let jobs = rollup_jobs(&stats, &connectors, &routing_log);
        let dispatcher: Arc<dyn TaskDispatcher> =
            Arc::new(PoolDispatcher::new(Arc::clone(&pool), jobs));
        upsert_rollup_tasks(&schedule).await?;

        let deps = Arc::new(CoreToolDeps {
            butler: "switchboard".to_owned(),
            state,
            schedule: schedule.clone(),
            pool,
            dispatcher: Arc::clone(&dispatcher),
            notifications: notifications.clone(),
            notifier: Arc::clone(&notifier),
            notify_config: config.notify.clone(),
        });
        let mut tools: Vec<Arc<dyn ButlerTool>> = core_tools(deps);
        // Registered after the core set so the real route tool replaces
        // the always-refusing stub.
        tools.push(Arc::new(RouteTool::new(Arc::clone(&classifier))));
        tools.push(Arc::new(ConnectorQuarantine::new(connectors.clone())));
        tools.push(Arc::new(ConnectorReactivate::new(connectors.clone())));
        let tool_registry = ToolRegistry::new("switchboard", tools);

        let tool_addr = format!("127.0.0.1:{}", config.butler.port)
            .parse()
            .map_err(|e| FleetError::Internal(format!("bad listen address: {e}")))?;
        let tool_server = McpServer::serve(tool_addr, tool_registry)
            .await
            .map_err(|e| FleetError::Internal(e.to_string()))?;

        let ingress = SwitchboardIngress::new(
            inbox,
            routing_log,
            connectors.clone(),
            &sb_config,
            Arc::clone(&classifier),
            notifier,
        );
        let ingress_addr: std::net::SocketAddr =
            format!("127.0.0.1:{}", sb_config.ingress_port)
                .parse()
                .map_err(|e| FleetError::Internal(format!("bad ingress address: {e}")))?;
        let ingress_rpc = Server::builder()
            .build(ingress_addr)
            .await
            .map_err(|e| FleetError::Internal(format!("ingress bind: {e}")))?;
        let bound = ingress_rpc
            .local_addr()
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        let ingress_server = ingress_rpc.start(ingress.clone().into_rpc());
        info!(addr = %bound, "ingress listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_scheduler(
            schedule,
            dispatcher,
            SCHEDULER_TICK,
            shutdown_rx.clone(),
        ));
        spawn_sweep(connectors.clone(), shutdown_rx);

        info!(
            tool_endpoint = %tool_server.endpoint_url(),
            ingress_endpoint = %format!("ws://{bound}"),
            "switchboard up"
        );
        Ok(Self {
            db,
            registry,
            connectors,
            ingress,
            tool_server,
            ingress_server,
            ingress_endpoint: format!("ws://{bound}"),
            shutdown_tx,
        })
    }

    /// Rescan the fleet config directory and upsert the registry.
    ///
    /// # Errors
    ///
    /// Propagates unreadable-directory and storage failures.
    pub async fn discover(&self, fleet_dir: &std::path::Path) -> FleetResult<usize> {
        discover(&self.registry, fleet_dir).await
    }

    /// The connector-facing endpoint.
    #[must_use]
    pub fn ingress_endpoint(&self) -> &str {
        &self.ingress_endpoint
    }

    /// The tool-server endpoint.
    #[must_use]
    pub fn tool_endpoint(&self) -> String {
        self.tool_server.endpoint_url()
    }

    /// In-process access to the accept pipeline.
    #[must_use]
    pub fn ingress(&self) -> &SwitchboardIngress {
        &self.ingress
    }

    /// The butler registry.
    #[must_use]
    pub fn registry(&self) -> &ButlerRegistryStore {
        &self.registry
    }

    /// The connector registry.
    #[must_use]
    pub fn connectors(&self) -> &ConnectorRegistryStore {
        &self.connectors
    }

    /// The switchboard's database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Stop everything.
    pub async fn shutdown(self) {
        let _ignored = self.shutdown_tx.send(true);
        let _stopped = self.ingress_server.stop();
        self.tool_server.shutdown().await;
        info!("switchboard down");
    }
}

async fn discover(registry: &ButlerRegistryStore, dir: &std::path::Path) -> FleetResult<usize> {
    let fleet = majordomo_config::discover_fleet(dir)
        .map_err(|e| FleetError::Internal(e.to_string()))?;
    let count = fleet.len();
    for butler in fleet {
        registry
            .upsert_from_config(
                &butler.name,
                &butler.endpoint_url(),
                &butler.description,
                &butler.modules,
            )
            .await
            .map_err(FleetError::from)?;
    }
    info!(count, "fleet discovery complete");
    Ok(count)
}

/// The periodic rollup jobs, runnable via `dispatch_mode = "job"` tasks.
fn rollup_jobs(
    stats: &StatsStore,
    connectors: &ConnectorRegistryStore,
    routing_log: &RoutingStore,
) -> JobRegistry {
    let mut jobs = JobRegistry::new();

    let (s, c) = (stats.clone(), connectors.clone());
    jobs.register("stats.rollup_hourly", move |_args| {
        let (s, c) = (s.clone(), c.clone());
        async move {
            let written = s
                .rollup_hourly(&c, chrono::Utc::now())
                .await
                .map_err(FleetError::from)?;
            info!(written, "hourly connector stats rolled up");
            Ok(())
        }
    });

    let (s, c) = (stats.clone(), connectors.clone());
    jobs.register("stats.rollup_daily", move |_args| {
        let (s, c) = (s.clone(), c.clone());
        async move {
            let written = s
                .rollup_daily(&c, chrono::Utc::now())
                .await
                .map_err(FleetError::from)?;
            info!(written, "daily connector stats rolled up");
            Ok(())
        }
    });

    let (s, r) = (stats.clone(), routing_log.clone());
    jobs.register("stats.rollup_fanout", move |_args| {
        let (s, r) = (s.clone(), r.clone());
        async move {
            let now = chrono::Utc::now();
            let since = now - chrono::Duration::hours(1);
            let rows = s
                .rollup_fanout(&r, since, now)
                .await
                .map_err(FleetError::from)?;
            info!(rows = rows.len(), "fanout stats rolled up");
            Ok(())
        }
    });

    jobs
}

/// Built-in rollup schedule, upserted so operators can still retune or
/// disable the rows.
async fn upsert_rollup_tasks(schedule: &ScheduleStore) -> FleetResult<()> {
    let entries = [
        ("stats-hourly", "7 * * * *", "stats.rollup_hourly"),
        ("stats-daily", "19 0 * * *", "stats.rollup_daily"),
        ("stats-fanout", "11 * * * *", "stats.rollup_fanout"),
    ];
    for (name, spec, job) in entries {
        let parsed = majordomo_scheduler::ScheduleSpec::parse(spec, "UTC")
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        let task = majordomo_storage::TaskRecord {
            id: uuid::Uuid::new_v4(),
            name: name.to_owned(),
            spec: spec.to_owned(),
            timezone: "UTC".to_owned(),
            dispatch_mode: "job".to_owned(),
            prompt: None,
            job_name: Some(job.to_owned()),
            job_args: None,
            enabled: true,
            next_run_at: parsed.initial_next_run(chrono::Utc::now()),
            last_run_at: None,
            last_result: None,
            until_at: None,
        };
        schedule
            .upsert_from_config(task)
            .await
            .map_err(FleetError::from)?;
    }
    Ok(())
}

fn spawn_sweep(connectors: ConnectorRegistryStore, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = connectors.sweep(chrono::Utc::now()).await {
                        error!(error = %e, "connector sweep failed");
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
