//! Task Manager - owns every lifecycle transition
//!
//! All status changes and audit appends go through this service. Each
//! mutation is one storage write; there is no cross-write transaction. A
//! crash between a record write and its audit append leaves the history
//! one row short, which is tolerated because the record is authoritative
//! and every write is idempotent for its logical transition.

use crate::queue::Broker;
use chrono::{DateTime, Utc};
use filepipe_foundation::{
    Error, ErrorCode, EventKind, ProgressEntry, Result, StoreStats, SubStatus, TaskEvent,
    TaskKind, TaskRecord, TaskStatus, TaskStore,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Default per-job retry budget
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Read-only view of a record for status queries
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub job_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub sub_status: Option<SubStatus>,
    pub progress: i64,
    pub file_name: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub error_code: String,
    pub retry_count: i64,
    pub max_retries: i64,
}

impl From<&TaskRecord> for TaskSnapshot {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            job_id: record.job_id.clone(),
            kind: record.kind,
            status: record.status,
            sub_status: record.sub_status,
            progress: record.progress,
            file_name: record.file_name.clone(),
            file_size: record.file_size,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error_message: record.error_message.clone(),
            error_code: record.error_code.clone(),
            retry_count: record.retry_count,
            max_retries: record.max_retries,
        }
    }
}

/// Task Manager - lifecycle service over the record store
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<TaskStore>,
    broker: Arc<dyn Broker>,
    max_retries: i64,
}

impl TaskManager {
    pub fn new(store: Arc<TaskStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            store,
            broker,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the retry budget stamped on new records
    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Create a pending record for a resolvable source file.
    ///
    /// Fails NotFound when the path does not resolve; nothing is
    /// persisted in that case.
    pub async fn create_task(
        &self,
        path: &Path,
        kind: TaskKind,
        owner_id: Option<i64>,
        metadata: serde_json::Value,
    ) -> Result<TaskRecord> {
        let meta = std::fs::metadata(path)
            .map_err(|_| Error::NotFound(format!("File not found: {}", path.display())))?;
        if !meta.is_file() {
            return Err(Error::NotFound(format!("Not a file: {}", path.display())));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let job_id = Uuid::new_v4().to_string();
        let record = TaskRecord::new(
            &job_id,
            kind,
            &file_name,
            meta.len() as i64,
            path.to_string_lossy(),
            self.max_retries,
        )
        .with_owner(owner_id)
        .with_metadata(metadata);

        self.store.insert(&record)?;
        self.store.append_event(
            &job_id,
            EventKind::Created,
            &format!("Task created for file: {file_name}"),
            &json!({ "file_path": record.file_path, "kind": kind.as_str() }),
        )?;

        info!("Task created: {} ({})", job_id, kind);
        Ok(record)
    }

    /// Report progress for a running job.
    ///
    /// The first report above zero on a pending record transitions it to
    /// processing and stamps started_at; the conditional store update
    /// guarantees the transition fires at most once even when two workers
    /// report concurrently. Unknown job ids return Ok(false): progress
    /// may race with cancellation or retention, and that race must never
    /// bubble into the reporting worker's control flow.
    pub async fn update_progress(
        &self,
        job_id: &str,
        progress: i64,
        message: &str,
        data: serde_json::Value,
    ) -> Result<bool> {
        if !(0..=100).contains(&progress) {
            return Err(Error::Validation(
                "Progress must be between 0 and 100".to_string(),
            ));
        }

        let Some(record) = self.store.get(job_id)? else {
            warn!("Task record not found for job: {job_id}");
            return Ok(false);
        };

        if record.status == TaskStatus::Pending
            && progress > 0
            && self.store.mark_started_if_pending(job_id)?
        {
            self.store.append_event(
                job_id,
                EventKind::Started,
                "Task processing started",
                &json!({}),
            )?;
        }

        self.store.set_progress(job_id, progress)?;
        self.store.append_progress(job_id, progress, message, &data)?;

        let event_message = if message.is_empty() {
            format!("Progress: {progress}%")
        } else {
            message.to_string()
        };
        self.store.append_event(
            job_id,
            EventKind::Progress,
            &event_message,
            &json!({ "progress": progress, "data": data }),
        )?;

        info!("Progress updated: {job_id} -> {progress}%");
        Ok(true)
    }

    /// Complete a job and store its result payload
    pub async fn complete_task(&self, job_id: &str, result: serde_json::Value) -> Result<bool> {
        if !self.store.complete(job_id, &result)? {
            warn!("Task record not found for job: {job_id}");
            return Ok(false);
        }

        self.store.append_event(
            job_id,
            EventKind::Completed,
            "Task completed successfully",
            &result,
        )?;

        info!("Task completed: {job_id}");
        Ok(true)
    }

    /// Record a failure.
    ///
    /// `retryable=true` moves the record to retry while budget remains;
    /// `retryable=false` is an explicit caller override that fails the
    /// record terminally even with budget left.
    pub async fn fail_task(
        &self,
        job_id: &str,
        error_message: &str,
        error_code: ErrorCode,
        retryable: bool,
    ) -> Result<bool> {
        let Some(outcome) =
            self.store
                .apply_failure(job_id, error_message, error_code.as_str(), retryable)?
        else {
            warn!("Task record not found for job: {job_id}");
            return Ok(false);
        };

        self.store.append_event(
            job_id,
            EventKind::Failed,
            error_message,
            &json!({
                "error_code": error_code.as_str(),
                "retry_count": outcome.retry_count,
            }),
        )?;

        warn!(
            "Task failed: {job_id} - {error_message} (now {})",
            outcome.status
        );
        Ok(true)
    }

    /// Cancel a job.
    ///
    /// Permitted only from pending/processing/retry. The record mutation
    /// is authoritative; the broker revoke afterwards is best-effort and
    /// its failure does not roll anything back.
    pub async fn cancel_task(&self, job_id: &str) -> Result<()> {
        let record = self
            .store
            .get(job_id)?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {job_id}")))?;

        if !record.is_cancellable() {
            return Err(Error::InvalidState(format!(
                "Cannot cancel task with status: {}",
                record.status
            )));
        }

        if !self.store.cancel(job_id)? {
            // Lost a race with another transition since the read above
            return Err(Error::InvalidState(format!(
                "Cannot cancel task: {job_id}"
            )));
        }

        self.store
            .append_event(job_id, EventKind::Cancelled, "Task cancelled", &json!({}))?;

        if let Err(e) = self.broker.revoke(job_id).await {
            warn!("Broker revoke failed for {job_id}: {e}; record stays cancelled");
        }

        info!("Task cancelled: {job_id}");
        Ok(())
    }

    /// Manually retry a failed job.
    ///
    /// Re-enqueueing is the caller's responsibility.
    pub async fn retry_task(&self, job_id: &str) -> Result<()> {
        let record = self
            .store
            .get(job_id)?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {job_id}")))?;

        if !record.is_retryable() {
            return Err(Error::InvalidState(format!(
                "Cannot retry task {job_id}: status {} with {}/{} retries",
                record.status, record.retry_count, record.max_retries
            )));
        }

        let Some(retry_count) = self.store.mark_retry(job_id)? else {
            return Err(Error::InvalidState(format!("Cannot retry task: {job_id}")));
        };

        self.store.append_event(
            job_id,
            EventKind::Retried,
            &format!("Retry attempt #{retry_count}"),
            &json!({ "retry_count": retry_count }),
        )?;

        info!("Task retry: {job_id} - attempt #{retry_count}");
        Ok(())
    }

    /// Mark a redelivery as in flight without touching the numeric
    /// progress value. Appends a progress row carrying the last known
    /// percentage so the history shows when the retry happened.
    pub async fn mark_retrying(&self, job_id: &str, reason: &str) -> Result<bool> {
        let Some(record) = self.store.get(job_id)? else {
            warn!("Task record not found for job: {job_id}");
            return Ok(false);
        };

        self.store
            .set_sub_status(job_id, Some(SubStatus::Retrying))?;

        let message = format!("Retrying: {reason}");
        self.store.append_progress(
            job_id,
            record.progress,
            &message,
            &json!({ "sub_status": SubStatus::Retrying.as_str() }),
        )?;
        self.store.append_event(
            job_id,
            EventKind::Progress,
            &message,
            &json!({
                "progress": record.progress,
                "sub_status": SubStatus::Retrying.as_str(),
            }),
        )?;

        Ok(true)
    }

    /// Snapshot of the current record state
    pub async fn get_status(&self, job_id: &str) -> Result<TaskSnapshot> {
        let record = self
            .store
            .get(job_id)?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {job_id}")))?;
        Ok(TaskSnapshot::from(&record))
    }

    /// All records for one owner, optionally filtered by status
    pub async fn get_owner_tasks(
        &self,
        owner_id: i64,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>> {
        self.store.list_by_owner(owner_id, status)
    }

    /// Append-only progress history for a job
    pub async fn progress_history(&self, job_id: &str) -> Result<Vec<ProgressEntry>> {
        self.store.progress_history(job_id)
    }

    /// Append-only audit events for a job
    pub async fn events(&self, job_id: &str) -> Result<Vec<TaskEvent>> {
        self.store.events(job_id)
    }

    /// Aggregate record counts
    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}
