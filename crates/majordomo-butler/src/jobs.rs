//! In-process jobs for `dispatch_mode = "job"` tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use majordomo_core::{FleetError, FleetResult};

type JobFuture = Pin<Box<dyn Future<Output = FleetResult<()>> + Send>>;
type JobFn = Arc<dyn Fn(Option<Value>) -> JobFuture + Send + Sync>;

/// Named async jobs a butler can schedule.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, JobFn>,
}

impl JobRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under `name`, replacing any previous registration.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, job: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FleetResult<()>> + Send + 'static,
    {
        self.jobs
            .insert(name.into(), Arc::new(move |args| Box::pin(job(args))));
    }

    /// Invoke a job by name.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown names, plus whatever the job raises.
    pub async fn invoke(&self, name: &str, args: Option<Value>) -> FleetResult<()> {
        let job = self
            .jobs
            .get(name)
            .ok_or_else(|| FleetError::not_found(format!("job {name}")))?;
        job(args).await
    }

    /// Registered job names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}
