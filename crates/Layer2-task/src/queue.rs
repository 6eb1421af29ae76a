//! Queue abstraction - the seam to the delivery broker
//!
//! The engine assumes an external at-least-once broker; `Broker` is the
//! contract it codes against. `MemoryBroker` is the in-process reference
//! implementation used by the worker pool and the tests: an unbounded
//! channel plus a revoked-id set. No two consumers see the same delivery
//! concurrently, deliveries may repeat across re-enqueues.

use async_trait::async_trait;
use filepipe_foundation::{Error, Result, TaskKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

/// What a delivery asks a worker to do
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkUnit {
    /// One source file
    Single(PathBuf),

    /// An ordered batch processed as one logical job
    Batch(Vec<PathBuf>),
}

/// The payload travelling through the broker.
///
/// This is the only state shared between job creator and job executor
/// besides the record store itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    /// External job id, matches the task record
    pub job_id: String,

    /// Task kind to resolve through the registry
    pub kind: TaskKind,

    /// Work to perform
    pub unit: WorkUnit,

    /// Opaque processing options forwarded to the capability
    #[serde(default)]
    pub options: serde_json::Value,

    /// Zero-based attempt counter, bumped on every re-enqueue
    #[serde(default)]
    pub attempt: u32,
}

impl JobPayload {
    pub fn single(job_id: impl Into<String>, kind: TaskKind, path: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            unit: WorkUnit::Single(path.into()),
            options: serde_json::Value::Null,
            attempt: 0,
        }
    }

    pub fn batch(job_id: impl Into<String>, kind: TaskKind, paths: Vec<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            unit: WorkUnit::Batch(paths),
            options: serde_json::Value::Null,
            attempt: 0,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// The payload the broker redelivers after a retry decision
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next
    }
}

/// Broker contract: at-least-once delivery plus best-effort revoke
#[async_trait]
pub trait Broker: Send + Sync {
    /// Hand a payload to the delivery system
    async fn enqueue(&self, payload: JobPayload) -> Result<()>;

    /// Best-effort revoke by job id; may race with in-flight execution.
    /// Returns whether the id is now marked revoked.
    async fn revoke(&self, job_id: &str) -> Result<bool>;
}

/// In-process broker over an unbounded channel
pub struct MemoryBroker {
    tx: mpsc::UnboundedSender<JobPayload>,
    revoked: Arc<RwLock<HashSet<String>>>,
}

impl MemoryBroker {
    /// Build a broker and the consumer handle workers pull from
    pub fn channel() -> (Arc<Self>, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let revoked = Arc::new(RwLock::new(HashSet::new()));

        let broker = Arc::new(Self {
            tx,
            revoked: Arc::clone(&revoked),
        });
        let receiver = JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
            revoked,
        };

        (broker, receiver)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, payload: JobPayload) -> Result<()> {
        debug!(
            "Enqueue job {} (attempt {})",
            payload.job_id, payload.attempt
        );
        self.tx
            .send(payload)
            .map_err(|e| Error::Queue(format!("Failed to enqueue: {}", e)))
    }

    async fn revoke(&self, job_id: &str) -> Result<bool> {
        let mut revoked = self.revoked.write().await;
        revoked.insert(job_id.to_string());
        Ok(true)
    }
}

/// Consumer side of the in-process broker; clone one per worker
#[derive(Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<JobPayload>>>,
    revoked: Arc<RwLock<HashSet<String>>>,
}

impl JobReceiver {
    /// Next delivery; None once all senders are gone
    pub async fn recv(&self) -> Option<JobPayload> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Whether a revoke was issued for this job id
    pub async fn is_revoked(&self, job_id: &str) -> bool {
        self.revoked.read().await.contains(job_id)
    }
}
