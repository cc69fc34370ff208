//! The connector run loop.
//!
//! `starting → reading ↔ (rate_limited | reconnecting) → draining →
//! stopped`. Reads are batched; submissions run under a bounded in-flight
//! semaphore and an optional source-side token bucket; the cursor is
//! checkpointed only once the whole batch is accepted.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use rand::Rng as _;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use majordomo_core::heartbeat::{clamp_heartbeat_interval, ConnectorHealth};

use crate::checkpoint::CheckpointFile;
use crate::counters::ConnectorCounters;
use crate::error::{ConnectorError, ConnectorResult};
use crate::rpc::SwitchboardClient;
use crate::source::{MessageSource, SourceError, SourceItem};

/// Where the run loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Booting: loading the checkpoint.
    Starting,
    /// Reading the source and submitting.
    Reading,
    /// Waiting out a source rate limit.
    RateLimited,
    /// Waiting out an ingress or source failure.
    Reconnecting,
    /// Shutdown requested; finishing in-flight submissions.
    Draining,
    /// Done.
    Stopped,
}

/// Static settings of one connector process.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Connector implementation type (`telegram`, `gmail`, …).
    pub connector_type: String,
    /// Endpoint the connector bridges.
    pub endpoint_identity: String,
    /// Build version reported in heartbeats.
    pub version: Option<String>,
    /// Concurrent submissions cap.
    pub max_inflight: usize,
    /// Items per source read.
    pub batch_limit: usize,
    /// Heartbeat cadence, clamped to the accepted band.
    pub heartbeat_interval_s: u64,
    /// Source-API token bucket, submissions per second. `None` disables.
    pub rate_limit_per_sec: Option<u32>,
    /// Idle sleep when the source has nothing new.
    pub idle_poll: Duration,
}

impl ConnectorSettings {
    /// Reasonable defaults for a connector bridging `endpoint_identity`.
    #[must_use]
    pub fn new(connector_type: impl Into<String>, endpoint_identity: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            endpoint_identity: endpoint_identity.into(),
            version: Some(env!("CARGO_PKG_VERSION").to_owned()),
            max_inflight: 8,
            batch_limit: 32,
            heartbeat_interval_s: 120,
            rate_limit_per_sec: None,
            idle_poll: Duration::from_millis(500),
        }
    }

    /// The effective heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(clamp_heartbeat_interval(self.heartbeat_interval_s))
    }
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared pieces of one connector process.
pub struct ConnectorRuntime {
    settings: ConnectorSettings,
    instance_id: Uuid,
    client: Arc<SwitchboardClient>,
    counters: Arc<ConnectorCounters>,
    checkpoint: CheckpointFile,
    inflight: Arc<Semaphore>,
    backfill_inflight: Arc<Semaphore>,
    limiter: Option<Arc<DirectLimiter>>,
    state_tx: watch::Sender<ConnectorState>,
    health_tx: watch::Sender<(ConnectorHealth, Option<String>)>,
}

impl ConnectorRuntime {
    /// Assemble a runtime.
    #[must_use]
    pub fn new(
        settings: ConnectorSettings,
        client: Arc<SwitchboardClient>,
        checkpoint: CheckpointFile,
    ) -> Self {
        let limiter = settings
            .rate_limit_per_sec
            .and_then(NonZeroU32::new)
            .map(|per_sec| Arc::new(RateLimiter::direct(Quota::per_second(per_sec))));
        let max_inflight = settings.max_inflight.max(1);
        let (state_tx, _) = watch::channel(ConnectorState::Starting);
        let (health_tx, _) = watch::channel((ConnectorHealth::Healthy, None));
        Self {
            instance_id: Uuid::new_v4(),
            client,
            counters: Arc::new(ConnectorCounters::new()),
            checkpoint,
            inflight: Arc::new(Semaphore::new(max_inflight)),
            // Backfill keeps one slot free for live ingestion.
            backfill_inflight: Arc::new(Semaphore::new(max_inflight.saturating_sub(1).max(1))),
            limiter,
            state_tx,
            health_tx,
            settings,
        }
    }

    /// Static settings.
    #[must_use]
    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Stable per-process-lifetime id.
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Process-local counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<ConnectorCounters> {
        &self.counters
    }

    /// The checkpoint file.
    #[must_use]
    pub fn checkpoint(&self) -> &CheckpointFile {
        &self.checkpoint
    }

    /// Watch the run-loop state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        self.state_tx.subscribe()
    }

    /// Watch the reported health.
    #[must_use]
    pub fn health(&self) -> watch::Receiver<(ConnectorHealth, Option<String>)> {
        self.health_tx.subscribe()
    }

    /// The ingress client.
    #[must_use]
    pub fn client(&self) -> &Arc<SwitchboardClient> {
        &self.client
    }

    /// Submit one batch under the in-flight cap, then checkpoint its last
    /// cursor. Nothing is checkpointed unless every item was accepted —
    /// replaying the batch after a crash only produces harmless
    /// duplicates. Backfill batches report progress over RPC instead of
    /// touching the live checkpoint.
    ///
    /// # Errors
    ///
    /// The first submission failure aborts the batch (without
    /// checkpointing) and is returned.
    pub async fn submit_batch(&self, items: Vec<SourceItem>, backfill: bool) -> ConnectorResult<()> {
        let Some(last_cursor) = items.last().map(|i| i.cursor.clone()) else {
            return Ok(());
        };

        let semaphore = if backfill {
            &self.backfill_inflight
        } else {
            &self.inflight
        };

        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            // Both controls must admit: the token bucket and the cap.
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }
            let permit = Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map_err(|_| ConnectorError::ShuttingDown)?;
            let client = Arc::clone(&self.client);
            let counters = Arc::clone(&self.counters);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let response = client.ingest(item.envelope).await;
                match &response {
                    Ok(accepted) if accepted.duplicate => {
                        counters
                            .duplicates
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    },
                    Ok(_) => {
                        let counter = if backfill {
                            &counters.backfilled
                        } else {
                            &counters.ingested
                        };
                        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    },
                    Err(_) => {
                        counters
                            .errors
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    },
                }
                response.map(|_| ())
            }));
        }

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => first_error = first_error.or(Some(e)),
                Err(e) => {
                    first_error =
                        first_error.or(Some(ConnectorError::IngressUnreachable(e.to_string())));
                },
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if backfill {
            self.client
                .backfill_progress(
                    &self.settings.connector_type,
                    &self.settings.endpoint_identity,
                    &last_cursor,
                )
                .await?;
            debug!(cursor = %last_cursor, "backfill progress reported");
        } else {
            self.checkpoint.save(&last_cursor).await?;
            debug!(cursor = %last_cursor, "checkpoint advanced");
        }
        Ok(())
    }

    /// Drive one backfill round: ask the ingress for work, read a slice
    /// from the source at the backfill cursor, submit it under the
    /// reserved-slot semaphore, and report progress. Returns how many
    /// items were submitted (zero when there is no work).
    ///
    /// # Errors
    ///
    /// Propagates ingress and submission failures; source errors surface
    /// as [`ConnectorError::SourceTransient`] /
    /// [`ConnectorError::SourcePersistent`].
    pub async fn run_backfill_once<S: MessageSource>(
        &self,
        source: &mut S,
    ) -> ConnectorResult<usize> {
        let Some(job) = self
            .client
            .backfill_poll(
                &self.settings.connector_type,
                &self.settings.endpoint_identity,
            )
            .await?
        else {
            return Ok(0);
        };

        let batch = source
            .read_batch(job.from_cursor.as_deref(), job.batch_limit)
            .await
            .map_err(|e| match e {
                SourceError::Transient { reason, retry_after } => {
                    ConnectorError::SourceTransient { reason, retry_after }
                },
                SourceError::Persistent(reason) => ConnectorError::SourcePersistent(reason),
            })?;
        let submitted = batch.len();
        if submitted == 0 {
            return Ok(0);
        }
        self.submit_batch(batch, true).await?;
        Ok(submitted)
    }

    /// Drive a source until shutdown.
    ///
    /// Transient source errors back off with jitter (honoring a
    /// `retry_after` hint); persistent ones flip the reported health to
    /// `degraded` and keep retrying slowly — the heartbeat carries the
    /// failure upstream.
    pub async fn run<S: MessageSource>(
        &self,
        mut source: S,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut cursor = match self.checkpoint.load().await {
            Ok(cp) => cp.map(|c| c.cursor),
            Err(e) => {
                error!(error = %e, "checkpoint unreadable; refusing to guess a cursor");
                self.set_health(ConnectorHealth::Error, Some(e.to_string()));
                return;
            },
        };
        info!(
            connector = %self.settings.connector_type,
            endpoint = %self.settings.endpoint_identity,
            cursor = cursor.as_deref().unwrap_or("<start>"),
            "connector reading"
        );
        self.set_state(ConnectorState::Reading);

        let mut attempt: u32 = 0;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let read = tokio::select! {
                read = source.read_batch(cursor.as_deref(), self.settings.batch_limit) => read,
                _ = shutdown_rx.changed() => break,
            };
            self.counters
                .reads
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            let batch = match read {
                Ok(batch) => batch,
                Err(SourceError::Transient { reason, retry_after }) => {
                    attempt = attempt.saturating_add(1);
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(attempt));
                    warn!(reason = %reason, delay_ms = delay.as_millis() as u64, "source transient error");
                    self.set_state(if retry_after.is_some() {
                        ConnectorState::RateLimited
                    } else {
                        ConnectorState::Reconnecting
                    });
                    tokio::time::sleep(delay).await;
                    self.set_state(ConnectorState::Reading);
                    continue;
                },
                Err(SourceError::Persistent(reason)) => {
                    error!(reason = %reason, "source persistent error; degrading");
                    self.set_health(ConnectorHealth::Degraded, Some(reason));
                    self.set_state(ConnectorState::Reconnecting);
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_secs(30)) => {},
                        _ = shutdown_rx.changed() => break,
                    }
                    self.set_state(ConnectorState::Reading);
                    continue;
                },
            };

            if batch.is_empty() {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.idle_poll) => {},
                    _ = shutdown_rx.changed() => break,
                }
                continue;
            }

            let next_cursor = batch.last().map(|i| i.cursor.clone());
            match self.submit_batch(batch, false).await {
                Ok(()) => {
                    attempt = 0;
                    cursor = next_cursor;
                    self.set_health(ConnectorHealth::Healthy, None);
                },
                Err(e) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    let delay = backoff_delay(attempt);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "submission failed; will replay batch");
                    self.set_state(ConnectorState::Reconnecting);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {},
                        _ = shutdown_rx.changed() => break,
                    }
                    self.set_state(ConnectorState::Reading);
                    // The cursor was not advanced; the next read replays.
                },
                Err(e) => {
                    error!(error = %e, "submission rejected; skipping batch");
                    self.set_health(ConnectorHealth::Degraded, Some(e.to_string()));
                    cursor = next_cursor;
                },
            }
        }

        self.set_state(ConnectorState::Draining);
        // In-flight submissions hold semaphore permits; wait for them.
        let _all = self
            .inflight
            .acquire_many(u32::try_from(self.settings.max_inflight.max(1)).unwrap_or(1))
            .await;
        self.set_state(ConnectorState::Stopped);
        info!("connector stopped");
    }

    fn set_state(&self, state: ConnectorState) {
        let _ignored = self.state_tx.send(state);
    }

    fn set_health(&self, health: ConnectorHealth, message: Option<String>) {
        let _ignored = self.health_tx.send((health, message));
    }
}

impl std::fmt::Debug for ConnectorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRuntime")
            .field("connector_type", &self.settings.connector_type)
            .field("endpoint_identity", &self.settings.endpoint_identity)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

/// Exponential backoff with full jitter: base 500ms, doubling, 60s cap.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(7);
    let cap_ms = 500_u64.saturating_mul(1 << exp).min(60_000);
    let jittered = rand::thread_rng().gen_range(0..=cap_ms);
    Duration::from_millis(jittered.max(50))
}
