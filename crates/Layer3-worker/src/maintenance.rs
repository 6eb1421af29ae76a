//! Maintenance - periodic requeue and retention sweeps
//!
//! Two background passes over the record store:
//! - requeue: pending records and retry records with no redelivery in
//!   flight are put back on the queue (crash recovery and manual
//!   retries whose caller left re-enqueueing to us)
//! - cleanup: terminal records older than the retention window are
//!   removed; this sweeper is the retention policy the core defers to

use chrono::Utc;
use filepipe_foundation::{
    MaintenanceConfig, Result, SubStatus, TaskRecord, TaskStatus, TaskStore,
};
use filepipe_task::{Broker, JobPayload, WorkUnit};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Maintenance {
    store: Arc<TaskStore>,
    broker: Arc<dyn Broker>,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(
        store: Arc<TaskStore>,
        broker: Arc<dyn Broker>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Rebuild the queue payload for a stored record. Batch jobs keep
    /// their path list in the record metadata.
    fn payload_for(record: &TaskRecord) -> JobPayload {
        let unit = match record.metadata.get("batch_files") {
            Some(serde_json::Value::Array(files)) => WorkUnit::Batch(
                files
                    .iter()
                    .filter_map(|f| f.as_str().map(PathBuf::from))
                    .collect(),
            ),
            _ => WorkUnit::Single(PathBuf::from(&record.file_path)),
        };

        let options = record
            .metadata
            .get("options")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        JobPayload {
            job_id: record.job_id.clone(),
            kind: record.kind,
            unit,
            options,
            attempt: record.retry_count.max(0) as u32,
        }
    }

    /// Enqueue pending records and stranded retry records.
    ///
    /// A retry record whose sub_status is `Retrying` has a delayed
    /// redelivery in flight from a live worker and is left alone; one
    /// without it came from a manual retry or a crashed worker.
    pub async fn requeue_stranded(&self) -> Result<usize> {
        let mut requeued = 0;

        for record in self.store.list_by_status(TaskStatus::Pending)? {
            self.broker.enqueue(Self::payload_for(&record)).await?;
            requeued += 1;
        }

        for record in self.store.list_by_status(TaskStatus::Retry)? {
            if record.sub_status == Some(SubStatus::Retrying) {
                continue;
            }
            self.broker.enqueue(Self::payload_for(&record)).await?;
            requeued += 1;
        }

        if requeued > 0 {
            info!("Requeued {requeued} stranded jobs");
        }
        Ok(requeued)
    }

    /// Remove terminal records older than the retention window
    pub async fn cleanup(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retention_secs as i64);
        let removed = self.store.delete_terminal_older_than(cutoff)?;
        if removed > 0 {
            info!("Retention pass removed {removed} records");
        }
        Ok(removed)
    }

    /// Run both passes on their configured intervals until aborted
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let requeue_every = Duration::from_secs(self.config.requeue_interval_secs.max(1));
        let cleanup_every = Duration::from_secs(self.config.cleanup_interval_secs.max(1));

        tokio::spawn(async move {
            let mut requeue_timer = tokio::time::interval(requeue_every);
            let mut cleanup_timer = tokio::time::interval(cleanup_every);
            // Skip the immediate first tick of both timers
            requeue_timer.tick().await;
            cleanup_timer.tick().await;

            loop {
                tokio::select! {
                    _ = requeue_timer.tick() => {
                        if let Err(e) = self.requeue_stranded().await {
                            warn!("Requeue sweep failed: {e}");
                        }
                    }
                    _ = cleanup_timer.tick() => {
                        if let Err(e) = self.cleanup().await {
                            warn!("Retention sweep failed: {e}");
                        }
                    }
                }
                debug!("Maintenance tick done");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filepipe_foundation::{ErrorCode, TaskKind};
    use filepipe_task::{MemoryBroker, TaskManager};
    use serde_json::json;

    fn setup() -> (
        Arc<TaskStore>,
        Arc<TaskManager>,
        Arc<MemoryBroker>,
        filepipe_task::JobReceiver,
    ) {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let (broker, receiver) = MemoryBroker::channel();
        let manager = Arc::new(TaskManager::new(Arc::clone(&store), Arc::clone(&broker)));
        (store, manager, broker, receiver)
    }

    #[tokio::test]
    async fn test_requeue_pending_and_manual_retry() {
        let (store, manager, broker, receiver) = setup();
        let dir = tempfile::tempdir().unwrap();

        // One pending record
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let pending = manager
            .create_task(&path, TaskKind::Document, None, json!({}))
            .await
            .unwrap();

        // One manually retried record (no redelivery in flight)
        let path2 = dir.path().join("b.txt");
        std::fs::write(&path2, "x").unwrap();
        let retried = manager
            .create_task(&path2, TaskKind::Document, None, json!({}))
            .await
            .unwrap();
        manager
            .fail_task(&retried.job_id, "boom", ErrorCode::ProcessingError, false)
            .await
            .unwrap();
        manager.retry_task(&retried.job_id).await.unwrap();

        // One retry record with a redelivery in flight: left alone
        let path3 = dir.path().join("c.txt");
        std::fs::write(&path3, "x").unwrap();
        let inflight = manager
            .create_task(&path3, TaskKind::Document, None, json!({}))
            .await
            .unwrap();
        manager
            .fail_task(&inflight.job_id, "boom", ErrorCode::ProcessingError, true)
            .await
            .unwrap();
        manager
            .mark_retrying(&inflight.job_id, "boom")
            .await
            .unwrap();

        let maintenance = Maintenance::new(store, broker, MaintenanceConfig::default());
        let requeued = maintenance.requeue_stranded().await.unwrap();
        assert_eq!(requeued, 2);

        let mut job_ids = vec![
            receiver.recv().await.unwrap().job_id,
            receiver.recv().await.unwrap().job_id,
        ];
        job_ids.sort();
        let mut expected = vec![pending.job_id.clone(), retried.job_id.clone()];
        expected.sort();
        assert_eq!(job_ids, expected);
    }

    #[tokio::test]
    async fn test_requeue_restores_attempt_counter() {
        let (store, manager, broker, receiver) = setup();
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let record = manager
            .create_task(&path, TaskKind::Document, None, json!({}))
            .await
            .unwrap();
        manager
            .fail_task(&record.job_id, "boom", ErrorCode::ProcessingError, true)
            .await
            .unwrap();

        let maintenance = Maintenance::new(store, broker, MaintenanceConfig::default());
        maintenance.requeue_stranded().await.unwrap();

        let payload = receiver.recv().await.unwrap();
        assert_eq!(payload.attempt, 1);
        assert!(matches!(payload.unit, WorkUnit::Single(_)));
    }

    #[tokio::test]
    async fn test_requeue_rebuilds_batch_unit() {
        let (store, manager, broker, receiver) = setup();
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        manager
            .create_task(
                &path,
                TaskKind::Document,
                None,
                json!({"batch_files": ["a.txt", "b.txt"]}),
            )
            .await
            .unwrap();

        let maintenance = Maintenance::new(store, broker, MaintenanceConfig::default());
        maintenance.requeue_stranded().await.unwrap();

        let payload = receiver.recv().await.unwrap();
        match payload.unit {
            WorkUnit::Batch(paths) => assert_eq!(paths.len(), 2),
            other => panic!("expected batch unit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let (store, manager, broker, _receiver) = setup();
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let done = manager
            .create_task(&path, TaskKind::Document, None, json!({}))
            .await
            .unwrap();
        manager.complete_task(&done.job_id, json!({})).await.unwrap();

        let path2 = dir.path().join("b.txt");
        std::fs::write(&path2, "x").unwrap();
        let live = manager
            .create_task(&path2, TaskKind::Document, None, json!({}))
            .await
            .unwrap();

        // Generous retention keeps everything
        let keep = Maintenance::new(
            Arc::clone(&store),
            Arc::clone(&broker) as Arc<dyn Broker>,
            MaintenanceConfig::default(),
        );
        assert_eq!(keep.cleanup().await.unwrap(), 0);

        // Zero retention removes the completed record only
        let purge = Maintenance::new(
            Arc::clone(&store),
            broker,
            MaintenanceConfig {
                retention_secs: 0,
                ..MaintenanceConfig::default()
            },
        );
        assert_eq!(purge.cleanup().await.unwrap(), 1);
        assert!(store.get(&done.job_id).unwrap().is_none());
        assert!(store.get(&live.job_id).unwrap().is_some());
    }
}
