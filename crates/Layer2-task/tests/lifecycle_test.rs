//! End-to-end lifecycle tests: create -> enqueue -> run -> terminal,
//! driven through the in-process queue the way a worker drives it.

use filepipe_foundation::{EventKind, TaskKind, TaskStatus, TaskStore};
use filepipe_processor::ProcessorRegistry;
use filepipe_task::{
    Broker, ExecutionRunner, JobPayload, MemoryBroker, RunOutcome, TaskManager,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn setup() -> (Arc<TaskManager>, ExecutionRunner, tempfile::TempDir) {
    let store = Arc::new(TaskStore::in_memory().unwrap());
    let (broker, _receiver) = MemoryBroker::channel();
    let manager = Arc::new(TaskManager::new(store, broker));
    let registry = Arc::new(ProcessorRegistry::with_builtins());
    let runner = ExecutionRunner::new(Arc::clone(&manager), registry);
    (manager, runner, tempfile::tempdir().unwrap())
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn full_document_lifecycle_through_queue() {
    let store = Arc::new(TaskStore::in_memory().unwrap());
    let (broker, receiver) = MemoryBroker::channel();
    let manager = Arc::new(TaskManager::new(store, broker.clone()));
    let registry = Arc::new(ProcessorRegistry::with_builtins());
    let runner = ExecutionRunner::new(Arc::clone(&manager), registry);

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "note.txt", b"one\ntwo\nthree\n");

    // Creator side: record + enqueue. No in-process state crosses to the
    // executor besides the store and this payload.
    let record = manager
        .create_task(&path, TaskKind::Document, Some(42), json!({"source": "api"}))
        .await
        .unwrap();
    assert_eq!(record.status, TaskStatus::Pending);

    broker
        .enqueue(JobPayload::single(&record.job_id, TaskKind::Document, &path))
        .await
        .unwrap();

    // Executor side: pull the delivery and drive the attempt
    let payload = receiver.recv().await.unwrap();
    assert!(!receiver.is_revoked(&payload.job_id).await);
    let outcome = runner.run(&payload).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    let snapshot = manager.get_status(&record.job_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.completed_at.is_some());

    // The audit trail tells the full story in causal order
    let events = manager.events(&record.job_id).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::Created));
    assert!(kinds.contains(&EventKind::Started));
    assert_eq!(kinds.last(), Some(&EventKind::Progress));
    assert!(kinds.contains(&EventKind::Completed));
}

#[tokio::test]
async fn scenario_image_task_first_progress() {
    let (manager, _runner, dir) = setup();
    // 10-byte source file
    let path = write_file(dir.path(), "photo.png", b"0123456789");

    let record = manager
        .create_task(&path, TaskKind::Image, None, json!({}))
        .await
        .unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.progress, 0);
    assert_eq!(record.file_size, 10);

    manager
        .update_progress(&record.job_id, 10, "init", json!({}))
        .await
        .unwrap();

    let snapshot = manager.get_status(&record.job_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Processing);

    let history = manager.progress_history(&record.job_id).await.unwrap();
    assert_eq!(history.len(), 1);

    let events = manager.events(&record.job_id).await.unwrap();
    let started = events.iter().filter(|e| e.kind == EventKind::Started).count();
    let progress = events.iter().filter(|e| e.kind == EventKind::Progress).count();
    assert_eq!(started, 1);
    assert_eq!(progress, 1);
}

#[tokio::test]
async fn redelivered_completion_is_idempotent() {
    let (manager, runner, dir) = setup();
    let path = write_file(dir.path(), "note.txt", b"hello\n");

    let record = manager
        .create_task(&path, TaskKind::Document, None, json!({}))
        .await
        .unwrap();
    let payload = JobPayload::single(&record.job_id, TaskKind::Document, &path);

    // The broker redelivers the same payload; both attempts complete
    let first = runner.run(&payload).await.unwrap();
    let completed_at = manager
        .get_status(&record.job_id)
        .await
        .unwrap()
        .completed_at;
    let second = runner.run(&payload).await.unwrap();

    assert!(matches!(first, RunOutcome::Completed(_)));
    assert!(matches!(second, RunOutcome::Completed(_)));

    // Same logical transition applied twice: status stable, the first
    // terminal timestamp wins, each run appended its own audit rows
    let snapshot = manager.get_status(&record.job_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.completed_at, completed_at);

    let history = manager.progress_history(&record.job_id).await.unwrap();
    assert_eq!(history.len(), 10);
}

#[tokio::test]
async fn cancellation_beats_late_progress() {
    let (manager, _runner, dir) = setup();
    let path = write_file(dir.path(), "note.txt", b"hello\n");

    let record = manager
        .create_task(&path, TaskKind::Document, None, json!({}))
        .await
        .unwrap();

    manager.cancel_task(&record.job_id).await.unwrap();

    // A worker that had not observed the cancel keeps reporting; the
    // report is accepted as best-effort, the terminal status stands
    manager
        .update_progress(&record.job_id, 50, "late", json!({}))
        .await
        .unwrap();

    let snapshot = manager.get_status(&record.job_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn failed_job_manual_retry_and_second_run_succeeds() {
    let (manager, runner, dir) = setup();
    let path = write_file(dir.path(), "data.json", br#"{"k": 1}"#);

    let record = manager
        .create_task(&path, TaskKind::Document, None, json!({}))
        .await
        .unwrap();

    // Force a terminal failure first
    manager
        .fail_task(
            &record.job_id,
            "upstream gone",
            filepipe_foundation::ErrorCode::ProcessingError,
            false,
        )
        .await
        .unwrap();
    assert_eq!(
        manager.get_status(&record.job_id).await.unwrap().status,
        TaskStatus::Failed
    );

    // Operator retries; caller re-enqueues; the next attempt completes
    manager.retry_task(&record.job_id).await.unwrap();
    let payload = JobPayload::single(&record.job_id, TaskKind::Document, &path);
    let outcome = runner.run(&payload).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    let snapshot = manager.get_status(&record.job_id).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.retry_count, 1);
}
