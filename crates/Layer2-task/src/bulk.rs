//! Bulk Execution Runner - one logical job over an ordered batch
//!
//! Items are processed sequentially; intra-batch parallelism is an
//! extension point, not part of the reference design. A per-item failure
//! is captured in the aggregate and never aborts the batch; only a
//! failure of the orchestration plumbing itself (an unresolvable task
//! kind) fails the whole batch through the normal retry policy.

use crate::manager::TaskManager;
use crate::queue::JobPayload;
use crate::runner::{RunOutcome, MAX_ATTEMPTS, RETRY_DELAY};
use filepipe_foundation::{ErrorCode, Result};
use filepipe_processor::ProcessorRegistry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-item disposition inside a batch result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
}

/// One entry of the aggregate result, in input order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub file: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    fn success(file: &PathBuf, result: serde_json::Value) -> Self {
        Self {
            file: file.to_string_lossy().to_string(),
            status: ItemStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    fn failed(file: &PathBuf, error: impl Into<String>) -> Self {
        Self {
            file: file.to_string_lossy().to_string(),
            status: ItemStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate delivered through `complete_task` for the whole batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<ItemOutcome>,
}

/// Drives a batch as one logical job
pub struct BulkRunner {
    manager: Arc<TaskManager>,
    registry: Arc<ProcessorRegistry>,
    retry_delay: std::time::Duration,
}

impl BulkRunner {
    pub fn new(manager: Arc<TaskManager>, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            manager,
            registry,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the base retry delay (the broker applies it as-is)
    pub fn with_retry_delay(mut self, retry_delay: std::time::Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn run(&self, payload: &JobPayload, paths: &[PathBuf]) -> Result<RunOutcome> {
        let job_id = &payload.job_id;
        let total = paths.len();
        info!("Starting bulk processing: {total} files (job {job_id})");

        let processor = match self.registry.get(payload.kind) {
            Ok(processor) => processor,
            // Plumbing failure: the whole batch fails and retries
            Err(e) => return self.fail_batch(payload, e.to_string()).await,
        };

        let mut results = Vec::with_capacity(total);
        let mut processed = 0usize;

        for (idx, path) in paths.iter().enumerate() {
            let progress = (idx * 100 / total) as i64;
            self.manager
                .update_progress(
                    job_id,
                    progress,
                    &format!("Processing file {}/{}: {}", idx + 1, total, path.display()),
                    json!({}),
                )
                .await?;

            if processor.validate(path) {
                match processor.process(path, &payload.options) {
                    Ok(result) => {
                        results.push(ItemOutcome::success(path, result));
                        processed += 1;
                    }
                    Err(e) => {
                        warn!("Error processing file {}: {}", path.display(), e);
                        results.push(ItemOutcome::failed(path, e.to_string()));
                    }
                }
            } else {
                results.push(ItemOutcome::failed(path, "Validation failed"));
            }
        }

        let summary = BatchSummary {
            total,
            processed,
            failed: total - processed,
            results,
        };
        let result = serde_json::to_value(&summary)?;

        self.manager.complete_task(job_id, result.clone()).await?;
        info!("Bulk processing completed: {processed}/{total} (job {job_id})");

        Ok(RunOutcome::Completed(result))
    }

    async fn fail_batch(&self, payload: &JobPayload, error: String) -> Result<RunOutcome> {
        self.manager
            .fail_task(&payload.job_id, &error, ErrorCode::ProcessingError, true)
            .await?;

        if payload.attempt < MAX_ATTEMPTS {
            warn!("Bulk retry: {} - {}", payload.job_id, error);
            self.manager.mark_retrying(&payload.job_id, &error).await?;
            Ok(RunOutcome::Retry {
                delay: self.retry_delay,
            })
        } else {
            warn!(
                "Bulk job {} exhausted {} attempts: {}",
                payload.job_id, MAX_ATTEMPTS, error
            );
            Ok(RunOutcome::Failed { error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;
    use filepipe_foundation::{TaskKind, TaskStatus, TaskStore};
    use std::path::Path;

    fn setup() -> (Arc<TaskManager>, BulkRunner, tempfile::TempDir) {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let (broker, _receiver) = MemoryBroker::channel();
        let manager = Arc::new(TaskManager::new(store, broker));
        let registry = Arc::new(ProcessorRegistry::with_builtins());
        let runner = BulkRunner::new(Arc::clone(&manager), registry);
        (manager, runner, tempfile::tempdir().unwrap())
    }

    fn write_docs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, format!("contents of {name}")).unwrap();
                path
            })
            .collect()
    }

    async fn create_batch_task(
        manager: &TaskManager,
        anchor: &PathBuf,
    ) -> filepipe_foundation::TaskRecord {
        manager
            .create_task(anchor, TaskKind::Document, None, json!({}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_all_success() {
        let (manager, runner, dir) = setup();
        let paths = write_docs(dir.path(), &["a.txt", "b.txt", "c.txt"]);
        let record = create_batch_task(&manager, &paths[0]).await;

        let payload = JobPayload::batch(&record.job_id, TaskKind::Document, paths.clone());
        let outcome = runner.run(&payload, &paths).await.unwrap();

        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        let summary: BatchSummary = serde_json::from_value(result).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 0);

        let snapshot = manager.get_status(&record.job_id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.progress, 100);
    }

    #[tokio::test]
    async fn test_batch_item_failure_does_not_abort() {
        let (manager, runner, dir) = setup();
        let mut paths = write_docs(dir.path(), &["a.txt", "b.txt"]);
        // Middle item has an unsupported extension and fails validation
        let bad = dir.path().join("virus.exe");
        std::fs::write(&bad, b"MZ").unwrap();
        paths.insert(1, bad);

        let record = create_batch_task(&manager, &paths[0]).await;
        let payload = JobPayload::batch(&record.job_id, TaskKind::Document, paths.clone());

        let outcome = runner.run(&payload, &paths).await.unwrap();
        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        let summary: BatchSummary = serde_json::from_value(result).unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.results.len(), 3);

        // Input order preserved; the failed entry sits in the middle
        assert!(summary.results[0].file.ends_with("a.txt"));
        assert!(summary.results[1].file.ends_with("virus.exe"));
        assert!(summary.results[2].file.ends_with("b.txt"));
        assert_eq!(summary.results[1].status, ItemStatus::Failed);
        assert_eq!(
            summary.results[1].error.as_deref(),
            Some("Validation failed")
        );
        assert_eq!(summary.results[0].status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn test_batch_progress_is_floor_of_fraction() {
        let (manager, runner, dir) = setup();
        let paths = write_docs(dir.path(), &["a.txt", "b.txt", "c.txt"]);
        let record = create_batch_task(&manager, &paths[0]).await;
        let payload = JobPayload::batch(&record.job_id, TaskKind::Document, paths.clone());

        runner.run(&payload, &paths).await.unwrap();

        let history = manager.progress_history(&record.job_id).await.unwrap();
        let values: Vec<i64> = history.iter().map(|e| e.progress).collect();
        // floor(0/3), floor(1/3), floor(2/3) of 100
        assert_eq!(values, vec![0, 33, 66]);
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let (manager, runner, dir) = setup();
        let paths = write_docs(dir.path(), &["a.txt"]);
        let record = create_batch_task(&manager, &paths[0]).await;
        let payload = JobPayload::batch(&record.job_id, TaskKind::Document, vec![]);

        let outcome = runner.run(&payload, &[]).await.unwrap();
        let RunOutcome::Completed(result) = outcome else {
            panic!("expected completion");
        };
        let summary: BatchSummary = serde_json::from_value(result).unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_unresolvable_kind_fails_whole_batch() {
        let (manager, runner, dir) = setup();
        let paths = write_docs(dir.path(), &["a.txt"]);
        let record = create_batch_task(&manager, &paths[0]).await;

        let payload = JobPayload::batch(&record.job_id, TaskKind::Archive, paths.clone());
        let outcome = runner.run(&payload, &paths).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Retry { .. }));

        let snapshot = manager.get_status(&record.job_id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Retry);
    }
}
