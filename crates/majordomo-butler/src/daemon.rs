//! Butler daemon assembly.
//!
//! Wires one butler's database, session pool, scheduler, and tool server
//! together from its `butler.toml`. Specialists pass their domain tools
//! and jobs in; everything else is the shared substrate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use majordomo_config::ButlerConfig;
use majordomo_core::{FleetError, FleetResult};
use majordomo_mcp::{ButlerTool, McpServer, ToolRegistry};
use majordomo_scheduler::{run_scheduler, ScheduleSpec, TaskDispatcher};
use majordomo_session::{CliLauncher, SessionLauncher, SessionPool};
use majordomo_storage::{
    Database, NotificationStore, ScheduleStore, SessionStore, StateStore, TaskRecord,
};

use crate::dispatch::PoolDispatcher;
use crate::jobs::JobRegistry;
use crate::notify::{LogNotifier, Notifier};
use crate::tools::{core_tools, CoreToolDeps};

/// Scheduler evaluation cadence.
const SCHEDULER_TICK: Duration = Duration::from_secs(15);

/// A running butler daemon.
pub struct ButlerDaemon {
    name: String,
    db: Database,
    pool: Arc<SessionPool>,
    server: McpServer,
    shutdown_tx: watch::Sender<bool>,
}

impl ButlerDaemon {
    /// Start a butler from its config.
    ///
    /// `domain_tools` and `jobs` come from the specialist; `launcher` and
    /// `notifier` default to the CLI launcher and the logging notifier
    /// when `None`.
    ///
    /// # Errors
    ///
    /// Fails when the database or the tool server cannot come up.
    pub async fn start(
        config: &ButlerConfig,
        domain_tools: Vec<Arc<dyn ButlerTool>>,
        jobs: JobRegistry,
        launcher: Option<Arc<dyn SessionLauncher>>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> FleetResult<Self> {
        let name = config.butler.name.clone();
        let db = if config.database.path == "memory" {
            Database::connect_memory(&name).await
        } else {
            Database::connect_embedded(&config.database.path, &name).await
        }
        .map_err(FleetError::from)?;
        db.define_schema().await.map_err(FleetError::from)?;

        let state = StateStore::new(db.clone());
        let schedule = ScheduleStore::new(db.clone());
        let sessions = SessionStore::new(db.clone());
        let notifications = NotificationStore::new(db.clone());

        // The ephemeral CLI config pins exactly this butler's tool surface.
        let mut authorized_tools: Vec<String> = [
            "state.get",
            "state.set",
            "state.delete",
            "state.list",
            "schedule.create",
            "schedule.delete",
            "schedule.list",
            "trigger",
            "tick",
            "notify",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();
        authorized_tools.extend(domain_tools.iter().map(|t| t.name().to_owned()));

        let launcher = launcher.unwrap_or_else(|| {
            Arc::new(CliLauncher::new(
                &config.sessions.cli_binary,
                config.sessions.model.clone(),
                config.butler.endpoint_url(),
                &name,
                authorized_tools,
                Duration::from_secs(config.sessions.deadline_secs),
                Duration::from_secs(config.sessions.kill_grace_secs),
            ))
        });
        let pool = Arc::new(SessionPool::start(
            &name,
            sessions,
            launcher,
            config.sessions.max_concurrent,
            config.sessions.queue_capacity,
            config.sessions.system_prompt.clone(),
            config.sessions.skills.clone(),
        ));
        let resumed = pool.resume_persisted().await?;
        if resumed > 0 {
            info!(butler = %name, resumed, "resumed persisted session requests");
        }

        let dispatcher: Arc<dyn TaskDispatcher> =
            Arc::new(PoolDispatcher::new(Arc::clone(&pool), jobs));

        upsert_config_tasks(&schedule, config).await?;

        let deps = Arc::new(CoreToolDeps {
            butler: name.clone(),
            state,
            schedule: schedule.clone(),
            pool: Arc::clone(&pool),
            dispatcher: Arc::clone(&dispatcher),
            notifications,
            notifier: notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            notify_config: config.notify.clone(),
        });
        let mut tools = core_tools(deps);
        tools.extend(domain_tools);
        let registry = ToolRegistry::new(&name, tools);

        let addr = format!("127.0.0.1:{}", config.butler.port)
            .parse()
            .map_err(|e| FleetError::Internal(format!("bad listen address: {e}")))?;
        let server = McpServer::serve(addr, registry)
            .await
            .map_err(|e| FleetError::Internal(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_scheduler(
            schedule,
            dispatcher,
            SCHEDULER_TICK,
            shutdown_rx,
        ));

        info!(butler = %name, endpoint = %server.endpoint_url(), "butler up");
        Ok(Self {
            name,
            db,
            pool,
            server,
            shutdown_tx,
        })
    }

    /// Butler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tool-server endpoint.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.server.endpoint_url()
    }

    /// The butler's database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The butler's session pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Stop the scheduler and the tool server.
    pub async fn shutdown(self) {
        let _ignored = self.shutdown_tx.send(true);
        self.server.shutdown().await;
        info!(butler = %self.name, "butler down");
    }
}

/// Upsert `[[scheduled_tasks]]` from config, computing each task's first
/// `next_run_at`. Run history on existing rows is preserved.
async fn upsert_config_tasks(schedule: &ScheduleStore, config: &ButlerConfig) -> FleetResult<()> {
    for entry in &config.scheduled_tasks {
        let spec = match ScheduleSpec::parse(&entry.spec, &entry.timezone) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(task = %entry.name, error = %e, "skipping unparseable configured task");
                continue;
            },
        };
        let next_run_at = spec.initial_next_run(chrono::Utc::now());
        let task = TaskRecord {
            id: uuid::Uuid::new_v4(),
            name: entry.name.clone(),
            spec: entry.spec.clone(),
            timezone: entry.timezone.clone(),
            dispatch_mode: entry.dispatch_mode.clone(),
            prompt: entry.prompt.clone(),
            job_name: entry.job_name.clone(),
            job_args: entry.job_args.clone(),
            enabled: next_run_at.is_some(),
            next_run_at,
            last_run_at: None,
            last_result: None,
            until_at: entry.until_at,
        };
        schedule
            .upsert_from_config(task)
            .await
            .map_err(FleetError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use majordomo_mcp::McpClient;
    use majordomo_session::SpawnOutcome;
    use majordomo_storage::QueuedSession;

    struct NoopLauncher;

    #[async_trait::async_trait]
    impl SessionLauncher for NoopLauncher {
        async fn launch(&self, _s: &QueuedSession, _p: &str) -> SpawnOutcome {
            SpawnOutcome::ok(None)
        }
    }

    fn config(port: u16) -> ButlerConfig {
        toml::from_str(&format!(
            r#"
            [butler]
            name = "health"
            port = {port}
            description = "Health tracking"

            [database]
            path = "memory"

            [[scheduled_tasks]]
            name = "morning-brief"
            spec = "0 7 * * *"
            dispatch_mode = "prompt"
            prompt = "Summarize the night"
            "#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn daemon_serves_core_tools_end_to_end() {
        let daemon = ButlerDaemon::start(
            &config(0),
            Vec::new(),
            JobRegistry::new(),
            Some(Arc::new(NoopLauncher)),
            None,
        )
        .await
        .unwrap();

        let client = McpClient::new(daemon.endpoint_url(), Duration::from_secs(5));
        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        for expected in [
            "state.get",
            "state.set",
            "state.delete",
            "state.list",
            "schedule.create",
            "schedule.delete",
            "schedule.list",
            "trigger",
            "tick",
            "notify",
            "route",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }

        // The configured task landed with a computed next run.
        let listed = client
            .call_tool("schedule.list", serde_json::json!({}))
            .await
            .unwrap();
        let tasks = listed.structured.unwrap();
        assert_eq!(tasks["tasks"][0]["name"], "morning-brief");
        assert!(!tasks["tasks"][0]["next_run_at"].is_null());

        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn port_zero_picks_a_free_port() {
        let daemon = ButlerDaemon::start(
            &config(0),
            Vec::new(),
            JobRegistry::new(),
            Some(Arc::new(NoopLauncher)),
            None,
        )
        .await
        .unwrap();
        assert!(!daemon.endpoint_url().ends_with(":0"));
        daemon.shutdown().await;
    }
}
