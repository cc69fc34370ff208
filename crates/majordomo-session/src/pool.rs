//! The per-butler session pool.
//!
//! One FIFO queue, drained by `max_concurrent` workers (serial dispatch is
//! `max_concurrent = 1`). Submissions block when the queue is full; the
//! non-blocking variant fails fast with `queue_full`. Accepted requests
//! are persisted before they are queued, so a restart re-enqueues
//! whatever never spawned.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use majordomo_core::{FleetError, FleetResult, RequestContext, SessionId};
use majordomo_storage::sessions::truncate_prompt;
use majordomo_storage::{QueuedSession, SessionRecord, SessionStore};

use crate::prompt::assemble_prompt;
use crate::spawn::SessionLauncher;

/// What a caller hands the pool.
#[derive(Debug, Clone)]
pub struct SessionSubmission {
    /// `ingress`, `schedule`, `tick`, `mcp`, or `manual`.
    pub trigger_source: String,
    /// Trigger prompt text.
    pub prompt: String,
    /// Originating-request block, for ingress triggers.
    pub request_context: Option<RequestContext>,
}

/// Bounded-concurrency session dispatch for one butler.
pub struct SessionPool {
    butler: String,
    store: SessionStore,
    tx: mpsc::Sender<QueuedSession>,
    depth: Arc<AtomicUsize>,
}

impl SessionPool {
    /// Start the pool and its workers.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn start(
        butler: impl Into<String>,
        store: SessionStore,
        launcher: Arc<dyn SessionLauncher>,
        max_concurrent: usize,
        queue_capacity: usize,
        system_prompt: String,
        skills: Vec<String>,
    ) -> Self {
        let butler = butler.into();
        let (tx, rx) = mpsc::channel::<QueuedSession>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let depth = Arc::new(AtomicUsize::new(0));

        for worker in 0..max_concurrent.max(1) {
            let rx = Arc::clone(&rx);
            let store = store.clone();
            let launcher = Arc::clone(&launcher);
            let butler = butler.clone();
            let depth = Arc::clone(&depth);
            let system_prompt = system_prompt.clone();
            let skills = skills.clone();
            tokio::spawn(async move {
                loop {
                    // Lock only to dequeue; spawning runs unlocked so the
                    // other workers keep draining.
                    let next = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(queued) = next else {
                        break;
                    };
                    let new_depth = depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                    record_depth(&butler, new_depth);

                    run_session(&butler, &store, &launcher, &system_prompt, &skills, queued)
                        .await;
                }
                info!(butler = %butler, worker, "session worker stopped");
            });
        }

        Self {
            butler,
            store,
            tx,
            depth,
        }
    }

    /// Submit a session request, waiting for queue room.
    ///
    /// The request is persisted before it is queued; the returned id is
    /// the session id the outcome will be recorded under.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Internal`] when the pool is shut down, and
    /// storage errors from persisting the request.
    pub async fn submit(&self, submission: SessionSubmission) -> FleetResult<SessionId> {
        let queued = self.persist(submission).await?;
        let id = queued.id;
        self.tx
            .send(queued)
            .await
            .map_err(|_| FleetError::Internal("session pool is shut down".to_owned()))?;
        let new_depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        record_depth(&self.butler, new_depth);
        Ok(id)
    }

    /// Submit without blocking; a full queue fails fast.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::QueueFull`] under back-pressure.
    pub async fn try_submit(&self, submission: SessionSubmission) -> FleetResult<SessionId> {
        let queued = self.persist(submission).await?;
        let id = queued.id;
        match self.tx.try_send(queued) {
            Ok(()) => {
                let new_depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
                record_depth(&self.butler, new_depth);
                Ok(id)
            },
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                // Not accepted after all; drop the persisted entry.
                if let Err(e) = self.store.dequeue(rejected.id).await {
                    warn!(error = %e, "failed to roll back rejected queue entry");
                }
                Err(FleetError::QueueFull)
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(FleetError::Internal("session pool is shut down".to_owned()))
            },
        }
    }

    /// Re-enqueue requests persisted before a crash. Call once on startup.
    ///
    /// # Errors
    ///
    /// Returns storage errors from listing the persisted queue.
    pub async fn resume_persisted(&self) -> FleetResult<usize> {
        let pending = self.store.list_queued().await.map_err(FleetError::from)?;
        let count = pending.len();
        for queued in pending {
            info!(butler = %self.butler, session = %queued.id, "resuming persisted session request");
            self.tx
                .send(queued)
                .await
                .map_err(|_| FleetError::Internal("session pool is shut down".to_owned()))?;
            let new_depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
            record_depth(&self.butler, new_depth);
        }
        Ok(count)
    }

    /// Current queue depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    async fn persist(&self, submission: SessionSubmission) -> FleetResult<QueuedSession> {
        let queued = QueuedSession {
            id: SessionId::new(),
            trigger_source: submission.trigger_source,
            prompt: submission.prompt,
            request_context: submission.request_context,
            enqueued_at: Utc::now(),
        };
        self.store
            .enqueue(queued.clone())
            .await
            .map_err(FleetError::from)?;
        Ok(queued)
    }
}

fn record_depth(butler: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!("session_queue_depth", "butler" => butler.to_owned()).set(depth as f64);
}

/// One full session lifecycle: record start, drop the durable queue
/// entry, spawn, record the outcome.
async fn run_session(
    butler: &str,
    store: &SessionStore,
    launcher: &Arc<dyn SessionLauncher>,
    system_prompt: &str,
    skills: &[String],
    queued: QueuedSession,
) {
    let started = Utc::now();
    let record = SessionRecord {
        id: queued.id,
        butler: butler.to_owned(),
        trigger_source: queued.trigger_source.clone(),
        prompt: queued.prompt.clone(),
        started_at: started,
        started_at_ms: started.timestamp_millis(),
        completed_at: None,
        success: None,
        duration_ms: None,
        error: None,
        model: None,
        request_id: queued.request_context.as_ref().map(|c| c.request_id),
    };
    if let Err(e) = store.insert_started(record).await {
        error!(session = %queued.id, error = %e, "failed to record session start");
        return;
    }
    if let Err(e) = store.dequeue(queued.id).await {
        warn!(session = %queued.id, error = %e, "failed to drop durable queue entry");
    }

    info!(
        butler,
        session = %queued.id,
        trigger = %queued.trigger_source,
        prompt = %truncate_prompt(&queued.prompt),
        "session starting"
    );

    let full_prompt = assemble_prompt(
        system_prompt,
        skills,
        &queued.prompt,
        queued.request_context.as_ref(),
    );
    let clock = std::time::Instant::now();
    let outcome = launcher.launch(&queued, &full_prompt).await;
    let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Err(e) = store
        .complete(
            queued.id,
            outcome.success,
            duration_ms,
            outcome.error.clone(),
            outcome.model.clone(),
        )
        .await
    {
        error!(session = %queued.id, error = %e, "failed to record session outcome");
    }
    info!(
        butler,
        session = %queued.id,
        success = outcome.success,
        duration_ms,
        "session finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::SpawnOutcome;
    use async_trait::async_trait;
    use majordomo_storage::Database;
    use std::time::Duration;

    struct SlowLauncher {
        delay: Duration,
        order: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionLauncher for SlowLauncher {
        async fn launch(&self, session: &QueuedSession, _prompt: &str) -> SpawnOutcome {
            self.order.lock().await.push(session.prompt.clone());
            tokio::time::sleep(self.delay).await;
            SpawnOutcome::ok(None)
        }
    }

    async fn store() -> SessionStore {
        let db = Database::connect_memory("health").await.unwrap();
        SessionStore::new(db)
    }

    fn submission(prompt: &str) -> SessionSubmission {
        SessionSubmission {
            trigger_source: "manual".to_owned(),
            prompt: prompt.to_owned(),
            request_context: None,
        }
    }

    async fn wait_for_sessions(store: &SessionStore, n: usize) -> Vec<SessionRecord> {
        for _ in 0..200 {
            let records = store.list_recent(32).await.unwrap();
            if records.len() >= n && records.iter().all(|r| r.completed_at.is_some()) {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sessions never completed");
    }

    #[tokio::test]
    async fn serial_pool_preserves_fifo_order() {
        let store = store().await;
        let order = Arc::new(Mutex::new(Vec::new()));
        let launcher = Arc::new(SlowLauncher {
            delay: Duration::from_millis(5),
            order: Arc::clone(&order),
        });
        let pool = SessionPool::start(
            "health",
            store.clone(),
            launcher,
            1,
            16,
            String::new(),
            Vec::new(),
        );

        for prompt in ["a", "b", "c", "d"] {
            pool.submit(submission(prompt)).await.unwrap();
        }
        wait_for_sessions(&store, 4).await;
        assert_eq!(order.lock().await.as_slice(), ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn try_submit_fails_fast_when_full() {
        let store = store().await;
        let launcher = Arc::new(SlowLauncher {
            delay: Duration::from_secs(5),
            order: Arc::new(Mutex::new(Vec::new())),
        });
        let pool = SessionPool::start(
            "health",
            store.clone(),
            launcher,
            1,
            1,
            String::new(),
            Vec::new(),
        );

        // First fills the worker, second fills the queue slot; give the
        // worker a moment to pick the first up.
        pool.submit(submission("running")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.submit(submission("queued")).await.unwrap();

        let err = pool.try_submit(submission("rejected")).await.unwrap_err();
        assert!(matches!(err, FleetError::QueueFull));
        // The rejected request must not linger in the durable queue.
        let persisted = store.list_queued().await.unwrap();
        assert!(persisted.iter().all(|q| q.prompt != "rejected"));
    }

    #[tokio::test]
    async fn outcome_lands_in_session_row() {
        struct FailingLauncher;
        #[async_trait]
        impl SessionLauncher for FailingLauncher {
            async fn launch(&self, _s: &QueuedSession, _p: &str) -> SpawnOutcome {
                SpawnOutcome::failed("deadline_exceeded", Some("sonnet".to_owned()))
            }
        }

        let store = store().await;
        let pool = SessionPool::start(
            "health",
            store.clone(),
            Arc::new(FailingLauncher),
            2,
            16,
            String::new(),
            Vec::new(),
        );
        pool.submit(submission("doomed")).await.unwrap();

        let records = wait_for_sessions(&store, 1).await;
        assert_eq!(records[0].success, Some(false));
        assert_eq!(records[0].error.as_deref(), Some("deadline_exceeded"));
        assert_eq!(records[0].model.as_deref(), Some("sonnet"));
        // Durable queue entry is gone once the session row exists.
        assert!(store.list_queued().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persisted_requests_resume() {
        let store = store().await;
        // Simulate a crash: a request persisted but never spawned.
        store
            .enqueue(QueuedSession {
                id: SessionId::new(),
                trigger_source: "schedule".to_owned(),
                prompt: "resume me".to_owned(),
                request_context: None,
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let pool = SessionPool::start(
            "health",
            store.clone(),
            Arc::new(SlowLauncher {
                delay: Duration::from_millis(1),
                order: Arc::clone(&order),
            }),
            1,
            16,
            String::new(),
            Vec::new(),
        );
        let resumed = pool.resume_persisted().await.unwrap();
        assert_eq!(resumed, 1);

        wait_for_sessions(&store, 1).await;
        assert_eq!(order.lock().await.as_slice(), ["resume me"]);
    }
}
