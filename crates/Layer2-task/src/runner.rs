//! Execution Runner - drives one attempt of a job
//!
//! Reports milestone progress, resolves the capability, validates and
//! processes, then records the terminal result. Retry is not exception
//! control flow: one attempt returns an explicit `RunOutcome` and the
//! queue layer acts on it.
//!
//! The broker may redeliver, so every manager call made here is safe to
//! apply twice for the same logical transition; each call still appends
//! its own audit row.

use crate::bulk::BulkRunner;
use crate::manager::TaskManager;
use crate::queue::{JobPayload, WorkUnit};
use filepipe_foundation::{ErrorCode, Result};
use filepipe_processor::ProcessorRegistry;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Attempt ceiling: after this many deliveries the runner stops
/// signaling retry so the broker never reschedules indefinitely
pub const MAX_ATTEMPTS: u32 = 3;

/// Fixed base delay handed to the broker with a retry decision
pub const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Scheduler-facing result of one attempt
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The attempt finished and the record is completed
    Completed(serde_json::Value),

    /// The attempt failed below the ceiling; reschedule after the delay
    Retry { delay: Duration },

    /// Terminal failure payload; the broker must not reschedule
    Failed { error: String },
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunOutcome::Retry { .. })
    }
}

/// Drives job attempts against the manager and the capability registry
pub struct ExecutionRunner {
    manager: Arc<TaskManager>,
    registry: Arc<ProcessorRegistry>,
    retry_delay: Duration,
}

impl ExecutionRunner {
    pub fn new(manager: Arc<TaskManager>, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            manager,
            registry,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the base retry delay (the broker applies it as-is)
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// Run one delivery. Capability failures become Retry/Failed
    /// outcomes; only infrastructure errors (store unavailable) escape
    /// as Err for the worker's own recovery policy.
    pub async fn run(&self, payload: &JobPayload) -> Result<RunOutcome> {
        match &payload.unit {
            WorkUnit::Single(path) => self.run_single(payload, path).await,
            WorkUnit::Batch(paths) => {
                BulkRunner::new(Arc::clone(&self.manager), Arc::clone(&self.registry))
                    .with_retry_delay(self.retry_delay)
                    .run(payload, paths)
                    .await
            }
        }
    }

    async fn run_single(&self, payload: &JobPayload, path: &Path) -> Result<RunOutcome> {
        let job_id = &payload.job_id;
        info!(
            "Processing file: {} (type: {}, attempt {})",
            path.display(),
            payload.kind,
            payload.attempt
        );

        self.manager
            .update_progress(job_id, 10, "Initializing...", json!({}))
            .await?;

        let processor = match self.registry.get(payload.kind) {
            Ok(processor) => processor,
            Err(e) => return self.fail_attempt(payload, e.to_string()).await,
        };

        self.manager
            .update_progress(job_id, 25, "Validating file...", json!({}))
            .await?;

        if !processor.validate(path) {
            let error = format!("File validation failed: {}", path.display());
            return self.fail_attempt(payload, error).await;
        }

        self.manager
            .update_progress(job_id, 50, "Processing file...", json!({}))
            .await?;

        let result = match processor.process(path, &payload.options) {
            Ok(result) => result,
            Err(e) => return self.fail_attempt(payload, e.to_string()).await,
        };

        self.manager
            .update_progress(job_id, 90, "Finalizing...", json!({}))
            .await?;

        self.manager.complete_task(job_id, result.clone()).await?;

        self.manager
            .update_progress(job_id, 100, "Completed!", json!({}))
            .await?;

        self.on_success(payload);
        Ok(RunOutcome::Completed(result))
    }

    /// Record an attempt failure and decide between retry and terminal
    pub(crate) async fn fail_attempt(
        &self,
        payload: &JobPayload,
        error: String,
    ) -> Result<RunOutcome> {
        self.manager
            .fail_task(
                &payload.job_id,
                &error,
                ErrorCode::ProcessingError,
                true,
            )
            .await?;

        if payload.attempt < MAX_ATTEMPTS {
            self.on_retry(payload, &error).await?;
            Ok(RunOutcome::Retry {
                delay: self.retry_delay,
            })
        } else {
            warn!(
                "Job {} exhausted {} attempts: {}",
                payload.job_id, MAX_ATTEMPTS, error
            );
            Ok(RunOutcome::Failed { error })
        }
    }

    /// Scheduler hook: a retry decision was made for this delivery
    async fn on_retry(&self, payload: &JobPayload, error: &str) -> Result<()> {
        warn!("Task retry: {} - {}", payload.job_id, error);
        self.manager.mark_retrying(&payload.job_id, error).await?;
        Ok(())
    }

    /// Scheduler hook: the delivery died outside the attempt itself
    /// (worker crash, store unavailable mid-run). Marks the record
    /// terminally failed with the fixed infrastructure code.
    pub async fn on_failure(&self, payload: &JobPayload, error: &str) {
        error!("Task failed: {} - {}", payload.job_id, error);
        if let Err(e) = self
            .manager
            .fail_task(&payload.job_id, error, ErrorCode::WorkerError, false)
            .await
        {
            error!("Could not record worker failure for {}: {}", payload.job_id, e);
        }
    }

    /// Scheduler hook: completion was already recorded inside the
    /// attempt; nothing to persist here
    fn on_success(&self, payload: &JobPayload) {
        info!("Task completed: {}", payload.job_id);
    }
}
