//! Worker Pool - concurrent consumers over the shared queue
//!
//! Each worker pulls one delivery at a time, skips revoked ids, drives
//! the runner and acts on the outcome. A retry decision is honored by
//! re-enqueueing the next attempt after the runner's delay; the pool
//! itself never inspects job state. Workers run in parallel bounded by
//! the configured pool size and never block on one another's jobs.

use filepipe_task::{Broker, ExecutionRunner, JobReceiver, MemoryBroker, RunOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Pool of queue consumers
pub struct WorkerPool {
    runner: Arc<ExecutionRunner>,
    broker: Arc<MemoryBroker>,
    receiver: JobReceiver,
    pool_size: usize,
}

impl WorkerPool {
    pub fn new(
        runner: Arc<ExecutionRunner>,
        broker: Arc<MemoryBroker>,
        receiver: JobReceiver,
        pool_size: usize,
    ) -> Self {
        Self {
            runner,
            broker,
            receiver,
            pool_size: pool_size.max(1),
        }
    }

    /// Spawn the consumers. Each handle runs until the queue closes.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        info!("Starting worker pool ({} workers)", self.pool_size);

        (0..self.pool_size)
            .map(|worker_id| {
                let runner = Arc::clone(&self.runner);
                let broker = Arc::clone(&self.broker);
                let receiver = self.receiver.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, runner, broker, receiver).await;
                })
            })
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    runner: Arc<ExecutionRunner>,
    broker: Arc<MemoryBroker>,
    receiver: JobReceiver,
) {
    debug!("Worker {worker_id} started");

    while let Some(payload) = receiver.recv().await {
        if receiver.is_revoked(&payload.job_id).await {
            info!(
                "Worker {worker_id} skipping revoked job {}",
                payload.job_id
            );
            continue;
        }

        debug!(
            "Worker {worker_id} picked up job {} (attempt {})",
            payload.job_id, payload.attempt
        );

        match runner.run(&payload).await {
            Ok(RunOutcome::Completed(_)) => {}
            Ok(RunOutcome::Failed { error }) => {
                debug!("Job {} terminal after retries: {error}", payload.job_id);
            }
            Ok(RunOutcome::Retry { delay }) => {
                // Broker-managed backoff: redeliver the next attempt
                // after the runner's delay
                let broker = Arc::clone(&broker);
                let next = payload.next_attempt();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = broker.enqueue(next).await {
                        error!("Failed to re-enqueue retry: {e}");
                    }
                });
            }
            Err(e) => {
                // Infrastructure failure outside the attempt itself
                runner.on_failure(&payload, &e.to_string()).await;
            }
        }
    }

    debug!("Worker {worker_id} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use filepipe_foundation::{TaskKind, TaskStatus, TaskStore};
    use filepipe_processor::ProcessorRegistry;
    use filepipe_task::{JobPayload, TaskManager};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    async fn wait_for_status(
        manager: &TaskManager,
        job_id: &str,
        expected: TaskStatus,
    ) -> TaskStatus {
        for _ in 0..100 {
            let status = manager.get_status(job_id).await.unwrap().status;
            if status == expected {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        manager.get_status(job_id).await.unwrap().status
    }

    fn write_doc(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "some text\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_pool_processes_queued_jobs() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let (broker, receiver) = MemoryBroker::channel();
        let manager = Arc::new(TaskManager::new(store, Arc::clone(&broker)));
        let registry = Arc::new(ProcessorRegistry::with_builtins());
        let runner = Arc::new(ExecutionRunner::new(Arc::clone(&manager), registry));

        let pool = WorkerPool::new(runner, Arc::clone(&broker), receiver, 2);
        let _handles = pool.spawn();

        let dir = tempfile::tempdir().unwrap();
        let mut job_ids = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let path = write_doc(dir.path(), name);
            let record = manager
                .create_task(&path, TaskKind::Document, None, json!({}))
                .await
                .unwrap();
            broker
                .enqueue(JobPayload::single(&record.job_id, TaskKind::Document, &path))
                .await
                .unwrap();
            job_ids.push(record.job_id);
        }

        for job_id in &job_ids {
            let status = wait_for_status(&manager, job_id, TaskStatus::Completed).await;
            assert_eq!(status, TaskStatus::Completed, "job {job_id}");
        }
    }

    #[tokio::test]
    async fn test_pool_retries_until_terminal() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let (broker, receiver) = MemoryBroker::channel();
        let manager = Arc::new(TaskManager::new(store, Arc::clone(&broker)));
        let registry = Arc::new(ProcessorRegistry::with_builtins());
        // Short delay so exhaustion happens quickly in the test
        let runner = Arc::new(
            ExecutionRunner::new(Arc::clone(&manager), registry)
                .with_retry_delay(Duration::from_millis(5)),
        );

        let pool = WorkerPool::new(runner, Arc::clone(&broker), receiver, 1);
        let _handles = pool.spawn();

        let dir = tempfile::tempdir().unwrap();
        // Wrong kind for a text file: every attempt fails validation
        let path = write_doc(dir.path(), "note.txt");
        let record = manager
            .create_task(&path, TaskKind::Image, None, json!({}))
            .await
            .unwrap();
        broker
            .enqueue(JobPayload::single(&record.job_id, TaskKind::Image, &path))
            .await
            .unwrap();

        let status = wait_for_status(&manager, &record.job_id, TaskStatus::Failed).await;
        assert_eq!(status, TaskStatus::Failed);

        let snapshot = manager.get_status(&record.job_id).await.unwrap();
        assert_eq!(snapshot.retry_count, snapshot.max_retries);
    }

    #[tokio::test]
    async fn test_pool_skips_revoked_jobs() {
        let store = Arc::new(TaskStore::in_memory().unwrap());
        let (broker, receiver) = MemoryBroker::channel();
        let manager = Arc::new(TaskManager::new(store, Arc::clone(&broker)));
        let registry = Arc::new(ProcessorRegistry::with_builtins());
        let runner = Arc::new(ExecutionRunner::new(Arc::clone(&manager), registry));

        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "a.txt");
        let record = manager
            .create_task(&path, TaskKind::Document, None, json!({}))
            .await
            .unwrap();

        // Cancel (which revokes) before any worker runs
        manager.cancel_task(&record.job_id).await.unwrap();
        broker
            .enqueue(JobPayload::single(&record.job_id, TaskKind::Document, &path))
            .await
            .unwrap();

        let pool = WorkerPool::new(runner, Arc::clone(&broker), receiver, 1);
        let _handles = pool.spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = manager.get_status(&record.job_id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        // The skipped delivery never reported progress
        assert!(manager
            .progress_history(&record.job_id)
            .await
            .unwrap()
            .is_empty());
    }
}
