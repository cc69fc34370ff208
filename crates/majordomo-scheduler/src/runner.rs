//! The scheduler loop.
//!
//! Ticks at a fixed cadence, evaluates due tasks, and hands fires to a
//! [`TaskDispatcher`]. Advancement is persisted before dispatch side
//! effects become observable; dispatch outcomes are recorded afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use majordomo_core::FleetResult;
use majordomo_storage::{ScheduleStore, TaskRecord};

use crate::error::ScheduleResult;
use crate::spec::ScheduleSpec;

/// Where fired tasks go.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Dispatch a `prompt`-mode task: enqueue a session with
    /// `trigger_source = "schedule"`.
    async fn dispatch_prompt(&self, task: &TaskRecord, prompt: &str) -> FleetResult<()>;

    /// Dispatch a `job`-mode task: invoke a registered in-process job.
    async fn dispatch_job(
        &self,
        task: &TaskRecord,
        job_name: &str,
        job_args: Option<&Value>,
    ) -> FleetResult<()>;
}

/// One pass over the task table.
#[derive(Debug)]
pub struct SchedulerTick {
    /// Tasks fired this tick.
    pub fired: usize,
    /// Tasks disabled because `until_at` had passed.
    pub expired: usize,
}

/// Evaluate everything due right now. Exposed separately from
/// [`run_scheduler`] so tests and the `tick()` tool can drive it directly.
///
/// # Errors
///
/// Returns storage errors; individual dispatch failures are recorded on
/// the task, not raised.
pub async fn tick(
    store: &ScheduleStore,
    dispatcher: &Arc<dyn TaskDispatcher>,
) -> ScheduleResult<SchedulerTick> {
    let now = Utc::now();
    let due = store.list_due(now).await?;
    let mut fired = 0;
    let mut expired = 0;

    for task in due {
        // Expired tasks disable without firing.
        if task.until_at.is_some_and(|until| now > until) {
            info!(task = %task.name, "schedule expired; disabling without dispatch");
            store.disable_expired(&task.name).await?;
            expired += 1;
            continue;
        }

        // Advance before dispatching: re-evaluating after a crash must not
        // double-fire. Missed windows do not coalesce because the next
        // occurrence is computed from now, not from the missed instant.
        let next = match ScheduleSpec::parse(&task.spec, &task.timezone) {
            Ok(spec) => spec.next_after(now),
            Err(e) => {
                warn!(task = %task.name, error = %e, "unparseable spec; disabling");
                store.disable_expired(&task.name).await?;
                expired += 1;
                continue;
            },
        };
        store.mark_fired(&task.name, now, next, "dispatched").await?;

        let outcome = match task.dispatch_mode.as_str() {
            "prompt" => {
                let prompt = task.prompt.clone().unwrap_or_default();
                dispatcher.dispatch_prompt(&task, &prompt).await
            },
            "job" => {
                let job = task.job_name.clone().unwrap_or_default();
                dispatcher.dispatch_job(&task, &job, task.job_args.as_ref()).await
            },
            other => {
                error!(task = %task.name, mode = other, "unknown dispatch mode");
                store
                    .record_result(&task.name, &format!("unknown dispatch mode {other}"))
                    .await?;
                continue;
            },
        };

        match outcome {
            Ok(()) => {
                store.record_result(&task.name, "ok").await?;
            },
            Err(e) => {
                warn!(task = %task.name, error = %e, "dispatch failed");
                store
                    .record_result(&task.name, &format!("error: {e}"))
                    .await?;
            },
        }
        fired += 1;
    }

    Ok(SchedulerTick { fired, expired })
}

/// Run the scheduler until the shutdown signal flips.
///
/// Ticks every `interval`; a tick that fails logs and keeps going — the
/// store being briefly unavailable must not kill the daemon.
pub async fn run_scheduler(
    store: ScheduleStore,
    dispatcher: Arc<dyn TaskDispatcher>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval_s = interval.as_secs(), "scheduler started");
    let mut ticker = tokio::time::interval(interval);
    // The first tick of a tokio interval is immediate; skip it so startup
    // work (config task upserts) settles first.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tick(&store, &dispatcher).await {
                    Ok(result) if result.fired > 0 || result.expired > 0 => {
                        info!(fired = result.fired, expired = result.expired, "scheduler tick");
                    },
                    Ok(_) => {},
                    Err(e) => error!(error = %e, "scheduler tick failed"),
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use majordomo_storage::Database;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingDispatcher {
        prompts: Mutex<Vec<String>>,
        jobs: Mutex<Vec<(String, Option<Value>)>>,
        fail: bool,
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn dispatch_prompt(&self, _task: &TaskRecord, prompt: &str) -> FleetResult<()> {
            if self.fail {
                return Err(majordomo_core::FleetError::QueueFull);
            }
            self.prompts.lock().unwrap().push(prompt.to_owned());
            Ok(())
        }

        async fn dispatch_job(
            &self,
            _task: &TaskRecord,
            job_name: &str,
            job_args: Option<&Value>,
        ) -> FleetResult<()> {
            self.jobs
                .lock()
                .unwrap()
                .push((job_name.to_owned(), job_args.cloned()));
            Ok(())
        }
    }

    async fn store() -> ScheduleStore {
        let db = Database::connect_memory("health").await.unwrap();
        db.define_schema().await.unwrap();
        ScheduleStore::new(db)
    }

    fn one_shot(name: &str, at: chrono::DateTime<Utc>, until: Option<chrono::DateTime<Utc>>) -> TaskRecord {
        TaskRecord {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            spec: at.to_rfc3339(),
            timezone: "UTC".to_owned(),
            dispatch_mode: "prompt".to_owned(),
            prompt: Some(format!("run {name}")),
            job_name: None,
            job_args: None,
            enabled: true,
            next_run_at: Some(at),
            last_run_at: None,
            last_result: None,
            until_at: until,
        }
    }

    #[tokio::test]
    async fn due_one_shot_fires_once_then_disables() {
        let store = store().await;
        let dispatcher: Arc<RecordingDispatcher> = Arc::new(RecordingDispatcher::default());
        let sink: Arc<dyn TaskDispatcher> = Arc::clone(&dispatcher) as _;

        let past = Utc::now() - chrono::Duration::minutes(5);
        store.create(one_shot("review", past, None)).await.unwrap();

        let first = tick(&store, &sink).await.unwrap();
        assert_eq!(first.fired, 1);
        assert_eq!(dispatcher.prompts.lock().unwrap().as_slice(), ["run review"]);

        let task = store.find_by_name("review").await.unwrap().unwrap();
        assert!(!task.enabled);
        assert!(task.next_run_at.is_none());
        assert_eq!(task.last_result.as_deref(), Some("ok"));

        // Re-evaluating never double-fires.
        let second = tick(&store, &sink).await.unwrap();
        assert_eq!(second.fired, 0);
        assert_eq!(dispatcher.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_one_shot_disables_without_dispatch() {
        let store = store().await;
        let dispatcher: Arc<RecordingDispatcher> = Arc::new(RecordingDispatcher::default());
        let sink: Arc<dyn TaskDispatcher> = Arc::clone(&dispatcher) as _;

        // Due at T, expired at T+1d, evaluated well after both.
        let at = Utc::now() - chrono::Duration::days(2);
        let until = at + chrono::Duration::days(1);
        store.create(one_shot("review", at, Some(until))).await.unwrap();

        let result = tick(&store, &sink).await.unwrap();
        assert_eq!(result.expired, 1);
        assert_eq!(result.fired, 0);
        assert!(dispatcher.prompts.lock().unwrap().is_empty());

        let task = store.find_by_name("review").await.unwrap().unwrap();
        assert!(!task.enabled);
        assert!(task.next_run_at.is_none());
        assert!(task.last_run_at.is_none());
    }

    #[tokio::test]
    async fn cron_task_advances_to_next_occurrence() {
        let store = store().await;
        let dispatcher: Arc<RecordingDispatcher> = Arc::new(RecordingDispatcher::default());
        let sink: Arc<dyn TaskDispatcher> = Arc::clone(&dispatcher) as _;

        let past = Utc::now() - chrono::Duration::minutes(5);
        let mut task = one_shot("brief", past, None);
        task.spec = "0 7 * * *".to_owned();
        store.create(task).await.unwrap();

        let result = tick(&store, &sink).await.unwrap();
        assert_eq!(result.fired, 1);

        let task = store.find_by_name("brief").await.unwrap().unwrap();
        assert!(task.enabled);
        let next = task.next_run_at.unwrap();
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn dispatch_failure_is_recorded_not_refired() {
        let store = store().await;
        let dispatcher: Arc<RecordingDispatcher> = Arc::new(RecordingDispatcher {
            fail: true,
            ..RecordingDispatcher::default()
        });
        let sink: Arc<dyn TaskDispatcher> = Arc::clone(&dispatcher) as _;

        let past = Utc::now() - chrono::Duration::minutes(5);
        store.create(one_shot("review", past, None)).await.unwrap();

        tick(&store, &sink).await.unwrap();
        let task = store.find_by_name("review").await.unwrap().unwrap();
        assert!(task.last_result.as_deref().unwrap().starts_with("error:"));
        assert!(!task.enabled);
    }

    #[tokio::test]
    async fn job_mode_dispatches_with_args() {
        let store = store().await;
        let dispatcher: Arc<RecordingDispatcher> = Arc::new(RecordingDispatcher::default());
        let sink: Arc<dyn TaskDispatcher> = Arc::clone(&dispatcher) as _;

        let past = Utc::now() - chrono::Duration::minutes(5);
        let mut task = one_shot("rollup", past, None);
        task.dispatch_mode = "job".to_owned();
        task.prompt = None;
        task.job_name = Some("stats.rollup".to_owned());
        task.job_args = Some(serde_json::json!({"window": "hourly"}));
        store.create(task).await.unwrap();

        tick(&store, &sink).await.unwrap();
        let jobs = dispatcher.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, "stats.rollup");
        assert_eq!(jobs[0].1.as_ref().unwrap()["window"], "hourly");
    }
}
