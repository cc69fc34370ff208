//! Bridges the scheduler to the session pool and job registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use majordomo_core::FleetResult;
use majordomo_scheduler::TaskDispatcher;
use majordomo_session::{SessionPool, SessionSubmission};
use majordomo_storage::TaskRecord;

use crate::jobs::JobRegistry;

/// Dispatches fired tasks: prompts into the pool, jobs into the registry.
pub struct PoolDispatcher {
    pool: Arc<SessionPool>,
    jobs: JobRegistry,
}

impl PoolDispatcher {
    /// Build a dispatcher.
    #[must_use]
    pub fn new(pool: Arc<SessionPool>, jobs: JobRegistry) -> Self {
        Self { pool, jobs }
    }
}

#[async_trait]
impl TaskDispatcher for PoolDispatcher {
    async fn dispatch_prompt(&self, _task: &TaskRecord, prompt: &str) -> FleetResult<()> {
        self.pool
            .submit(SessionSubmission {
                trigger_source: "schedule".to_owned(),
                prompt: prompt.to_owned(),
                request_context: None,
            })
            .await
            .map(|_id| ())
    }

    async fn dispatch_job(
        &self,
        _task: &TaskRecord,
        job_name: &str,
        job_args: Option<&Value>,
    ) -> FleetResult<()> {
        self.jobs.invoke(job_name, job_args.cloned()).await
    }
}

impl std::fmt::Debug for PoolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolDispatcher").finish_non_exhaustive()
    }
}
