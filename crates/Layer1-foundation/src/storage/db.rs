//! SQLite store for task records and their audit history
//!
//! Three tables:
//! - `task_records`: the mutable, authoritative record per job
//! - `task_progress`: append-only progress history
//! - `task_events`: append-only causal audit trail
//!
//! Every mutation is a single statement executed while holding the
//! connection lock, so concurrent updates for the same job id are
//! serialized here and each mutation is idempotent on its own. Status is
//! never derived by replaying the history tables; the record is
//! authoritative even if a crash lands between a record write and its
//! audit append.
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on startup.
//! - Version 1: Initial schema (task_records, task_progress, task_events)
//! - Version 2: Add sub_status column to task_records

use crate::types::{EventKind, SubStatus, TaskKind, TaskStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Database file name
pub const DB_FILE: &str = "filepipe.db";

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// A persisted task record
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Storage primary key
    pub id: Uuid,

    /// External job id shared with the broker, unique
    pub job_id: String,

    /// Task kind routed through the processor registry
    pub kind: TaskKind,

    /// Authoritative lifecycle status
    pub status: TaskStatus,

    /// Secondary state (e.g. retry in flight), cleared on progress writes
    pub sub_status: Option<SubStatus>,

    pub file_name: String,
    pub file_size: i64,
    pub file_path: String,

    /// Progress percentage, always within [0, 100]
    pub progress: i64,

    /// Opaque result payload stored on completion
    pub result: serde_json::Value,

    pub error_message: String,
    pub error_code: String,

    pub retry_count: i64,
    pub max_retries: i64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub owner_id: Option<i64>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl TaskRecord {
    /// Build a fresh pending record for a resolved source file
    pub fn new(
        job_id: impl Into<String>,
        kind: TaskKind,
        file_name: impl Into<String>,
        file_size: i64,
        file_path: impl Into<String>,
        max_retries: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            kind,
            status: TaskStatus::Pending,
            sub_status: None,
            file_name: file_name.into(),
            file_size,
            file_path: file_path.into(),
            progress: 0,
            result: serde_json::Value::Null,
            error_message: String::new(),
            error_code: String::new(),
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            owner_id: None,
            tags: Vec::new(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_owner(mut self, owner_id: Option<i64>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether `cancel_task` is permitted right now
    pub fn is_cancellable(&self) -> bool {
        self.status.is_cancellable()
    }

    /// Whether another retry is permitted: failed-or-retry status with
    /// budget remaining
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Retry)
            && self.retry_count < self.max_retries
    }

    /// Wall-clock time spent since the first start, if started
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.completed_at.or(self.cancelled_at).unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// One append-only progress history row
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    pub id: i64,
    pub job_id: String,
    pub progress: i64,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One append-only audit event row
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub id: i64,
    pub job_id: String,
    pub kind: EventKind,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Where a failure landed the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub status: TaskStatus,
    pub retry_count: i64,
}

/// Aggregate record counts
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub retry: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Task record store
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (or create) the store under a data directory
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.initialize_schema()?;
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.initialize_schema()?;
        store.run_migrations()?;

        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Authoritative task records
            CREATE TABLE IF NOT EXISTS task_records (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('pending', 'processing', 'completed', 'failed', 'cancelled', 'retry')),
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                file_path TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0 CHECK(progress BETWEEN 0 AND 100),
                result TEXT NOT NULL DEFAULT 'null',
                error_message TEXT NOT NULL DEFAULT '',
                error_code TEXT NOT NULL DEFAULT '',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                cancelled_at TEXT,
                owner_id INTEGER,
                tags TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_records_status
                ON task_records(status, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_records_owner
                ON task_records(owner_id, status);

            -- Append-only progress history
            CREATE TABLE IF NOT EXISTS task_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                progress INTEGER NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES task_records(job_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_progress_job
                ON task_progress(job_id, id);

            -- Append-only audit events
            CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                kind TEXT NOT NULL CHECK(kind IN ('created', 'started', 'progress', 'completed', 'failed', 'cancelled', 'retried', 'paused', 'resumed')),
                message TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES task_records(job_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_events_job
                ON task_events(job_id, id);

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Migration to version 2: sub_status replaces the old in-band retry
    /// marker on the progress channel
    fn migrate_v2(conn: &Connection) -> Result<()> {
        let _ = conn.execute(
            "ALTER TABLE task_records ADD COLUMN sub_status TEXT",
            [],
        );
        Ok(())
    }

    // ========================================================================
    // Task Record Operations
    // ========================================================================

    /// Insert a new pending record; the unique job_id constraint rejects
    /// duplicates
    pub fn insert(&self, record: &TaskRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO task_records (
                id, job_id, kind, status, sub_status, file_name, file_size, file_path,
                progress, result, error_message, error_code, retry_count, max_retries,
                created_at, started_at, completed_at, cancelled_at, owner_id, tags, metadata
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            "#,
            params![
                record.id.to_string(),
                record.job_id,
                record.kind.as_str(),
                record.status.as_str(),
                record.sub_status.map(|s| s.as_str()),
                record.file_name,
                record.file_size,
                record.file_path,
                record.progress,
                record.result.to_string(),
                record.error_message,
                record.error_code,
                record.retry_count,
                record.max_retries,
                record.created_at.to_rfc3339(),
                record.started_at.map(|t| t.to_rfc3339()),
                record.completed_at.map(|t| t.to_rfc3339()),
                record.cancelled_at.map(|t| t.to_rfc3339()),
                record.owner_id,
                serde_json::to_string(&record.tags)?,
                record.metadata.to_string(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to insert task record: {}", e)))?;

        Ok(())
    }

    /// Fetch a record by external job id
    pub fn get(&self, job_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!("SELECT {} FROM task_records WHERE job_id = ?1", RECORD_COLUMNS),
            params![job_id],
            row_to_record,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get task record: {}", e)))
    }

    /// First pending→processing transition. The conditional UPDATE makes
    /// this fire at most once per record even under concurrent callers.
    pub fn mark_started_if_pending(&self, job_id: &str) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                r#"
                UPDATE task_records
                SET status = 'processing', started_at = ?2, sub_status = NULL
                WHERE job_id = ?1 AND status = 'pending' AND started_at IS NULL
                "#,
                params![job_id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to mark started: {}", e)))?;

        Ok(rows > 0)
    }

    /// Write the current progress value; clears any sub_status
    pub fn set_progress(&self, job_id: &str, progress: i64) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE task_records SET progress = ?2, sub_status = NULL WHERE job_id = ?1",
                params![job_id, progress],
            )
            .map_err(|e| Error::Storage(format!("Failed to set progress: {}", e)))?;

        Ok(rows > 0)
    }

    /// Set or clear the sub_status marker
    pub fn set_sub_status(&self, job_id: &str, sub_status: Option<SubStatus>) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE task_records SET sub_status = ?2 WHERE job_id = ?1",
                params![job_id, sub_status.map(|s| s.as_str())],
            )
            .map_err(|e| Error::Storage(format!("Failed to set sub_status: {}", e)))?;

        Ok(rows > 0)
    }

    /// Complete a record. COALESCE keeps the first completed_at on
    /// redelivered completions.
    pub fn complete(&self, job_id: &str, result: &serde_json::Value) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                r#"
                UPDATE task_records
                SET status = 'completed', progress = 100, sub_status = NULL,
                    result = ?2, completed_at = COALESCE(completed_at, ?3)
                WHERE job_id = ?1
                "#,
                params![job_id, result.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to complete task: {}", e)))?;

        Ok(rows > 0)
    }

    /// Record a failure. Moves to retry while budget remains and the
    /// caller allows it, otherwise to failed. Read and write happen under
    /// one lock hold.
    pub fn apply_failure(
        &self,
        job_id: &str,
        error_message: &str,
        error_code: &str,
        retryable: bool,
    ) -> Result<Option<FailureOutcome>> {
        let conn = self.lock()?;

        let counts: Option<(i64, i64)> = conn
            .query_row(
                "SELECT retry_count, max_retries FROM task_records WHERE job_id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to read retry budget: {}", e)))?;

        let Some((retry_count, max_retries)) = counts else {
            return Ok(None);
        };

        let outcome = if retryable && retry_count < max_retries {
            FailureOutcome {
                status: TaskStatus::Retry,
                retry_count: retry_count + 1,
            }
        } else {
            FailureOutcome {
                status: TaskStatus::Failed,
                retry_count,
            }
        };

        conn.execute(
            r#"
            UPDATE task_records
            SET status = ?2, retry_count = ?3, error_message = ?4, error_code = ?5
            WHERE job_id = ?1
            "#,
            params![
                job_id,
                outcome.status.as_str(),
                outcome.retry_count,
                error_message,
                error_code,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to record failure: {}", e)))?;

        Ok(Some(outcome))
    }

    /// Cancel a record. Only fires from a cancellable status; the
    /// COALESCE keeps the first cancelled_at.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                r#"
                UPDATE task_records
                SET status = 'cancelled', cancelled_at = COALESCE(cancelled_at, ?2)
                WHERE job_id = ?1 AND status IN ('pending', 'processing', 'retry')
                "#,
                params![job_id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to cancel task: {}", e)))?;

        Ok(rows > 0)
    }

    /// Manual retry: move a failed-or-retry record with budget remaining
    /// back to retry, clearing prior error fields. Returns the new retry
    /// count when the transition fired.
    pub fn mark_retry(&self, job_id: &str) -> Result<Option<i64>> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                r#"
                UPDATE task_records
                SET status = 'retry', retry_count = retry_count + 1,
                    error_message = '', error_code = ''
                WHERE job_id = ?1
                  AND status IN ('failed', 'retry')
                  AND retry_count < max_retries
                "#,
                params![job_id],
            )
            .map_err(|e| Error::Storage(format!("Failed to mark retry: {}", e)))?;

        if rows == 0 {
            return Ok(None);
        }

        conn.query_row(
            "SELECT retry_count FROM task_records WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .map(Some)
        .map_err(|e| Error::Storage(format!("Failed to read retry count: {}", e)))
    }

    // ========================================================================
    // Progress History
    // ========================================================================

    /// Append one progress history row
    pub fn append_progress(
        &self,
        job_id: &str,
        progress: i64,
        message: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO task_progress (job_id, progress, message, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                job_id,
                progress,
                message,
                data.to_string(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to append progress: {}", e)))?;

        Ok(())
    }

    /// Progress history in insertion order
    pub fn progress_history(&self, job_id: &str) -> Result<Vec<ProgressEntry>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, job_id, progress, message, data, created_at
                FROM task_progress WHERE job_id = ?1 ORDER BY id
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt
            .query_map(params![job_id], |row| {
                Ok(ProgressEntry {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    progress: row.get(2)?,
                    message: row.get(3)?,
                    data: json_column(row, 4)?,
                    created_at: time_column(row, 5)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Failed to query progress: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("Failed to read progress rows: {}", e)))?;

        Ok(entries)
    }

    // ========================================================================
    // Event Log
    // ========================================================================

    /// Append one audit event row
    pub fn append_event(
        &self,
        job_id: &str,
        kind: EventKind,
        message: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO task_events (job_id, kind, message, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                job_id,
                kind.as_str(),
                message,
                metadata.to_string(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to append event: {}", e)))?;

        Ok(())
    }

    /// Audit events in insertion order
    pub fn events(&self, job_id: &str) -> Result<Vec<TaskEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, job_id, kind, message, metadata, created_at
                FROM task_events WHERE job_id = ?1 ORDER BY id
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let events = stmt
            .query_map(params![job_id], |row| {
                let kind_raw: String = row.get(2)?;
                let kind = EventKind::parse(&kind_raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        format!("unknown event kind: {kind_raw}").into(),
                    )
                })?;
                Ok(TaskEvent {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    kind,
                    message: row.get(3)?,
                    metadata: json_column(row, 4)?,
                    created_at: time_column(row, 5)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Failed to query events: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("Failed to read event rows: {}", e)))?;

        Ok(events)
    }

    // ========================================================================
    // Queries & Maintenance
    // ========================================================================

    /// Records for one owner, newest first, optionally filtered by status
    pub fn list_by_owner(
        &self,
        owner_id: i64,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;

        let mut records = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM task_records WHERE owner_id = ?1 AND status = ?2 ORDER BY created_at DESC",
                        RECORD_COLUMNS
                    ))
                    .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
                let rows = stmt
                    .query_map(params![owner_id, status.as_str()], row_to_record)
                    .map_err(|e| Error::Storage(format!("Failed to query records: {}", e)))?;
                for row in rows {
                    records.push(row.map_err(|e| {
                        Error::Storage(format!("Failed to read record row: {}", e))
                    })?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM task_records WHERE owner_id = ?1 ORDER BY created_at DESC",
                        RECORD_COLUMNS
                    ))
                    .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
                let rows = stmt
                    .query_map(params![owner_id], row_to_record)
                    .map_err(|e| Error::Storage(format!("Failed to query records: {}", e)))?;
                for row in rows {
                    records.push(row.map_err(|e| {
                        Error::Storage(format!("Failed to read record row: {}", e))
                    })?);
                }
            }
        }

        Ok(records)
    }

    /// All records currently in a given status, oldest first
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM task_records WHERE status = ?1 ORDER BY created_at",
                RECORD_COLUMNS
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![status.as_str()], row_to_record)
            .map_err(|e| Error::Storage(format!("Failed to query records: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records
                .push(row.map_err(|e| Error::Storage(format!("Failed to read record row: {}", e)))?);
        }

        Ok(records)
    }

    /// Retention pass: remove terminal records (and their history, via
    /// cascade) whose terminal timestamp is older than the cutoff. The
    /// core never calls this; it is the external retention policy's tool.
    pub fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;

        let rows = conn
            .execute(
                r#"
                DELETE FROM task_records
                WHERE status IN ('completed', 'failed', 'cancelled')
                  AND COALESCE(completed_at, cancelled_at, created_at) < ?1
                "#,
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| Error::Storage(format!("Failed to delete old records: {}", e)))?;

        if rows > 0 {
            debug!("Retention pass removed {} task records", rows);
        }

        Ok(rows)
    }

    /// Aggregate counts by status
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM task_records GROUP BY status")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })
            .map_err(|e| Error::Storage(format!("Failed to query stats: {}", e)))?;

        let mut stats = StoreStats::default();
        for row in rows {
            let (status, count) =
                row.map_err(|e| Error::Storage(format!("Failed to read stats row: {}", e)))?;
            let count = count as usize;
            stats.total += count;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => stats.pending = count,
                Some(TaskStatus::Processing) => stats.processing = count,
                Some(TaskStatus::Retry) => stats.retry = count,
                Some(TaskStatus::Completed) => stats.completed = count,
                Some(TaskStatus::Failed) => stats.failed = count,
                Some(TaskStatus::Cancelled) => stats.cancelled = count,
                None => {}
            }
        }

        Ok(stats)
    }
}

/// Column list shared by every record SELECT
const RECORD_COLUMNS: &str = "id, job_id, kind, status, sub_status, file_name, file_size, \
     file_path, progress, result, error_message, error_code, retry_count, max_retries, \
     created_at, started_at, completed_at, cancelled_at, owner_id, tags, metadata";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let id_raw: String = row.get(0)?;
    let id = Uuid::parse_str(&id_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind_raw: String = row.get(2)?;
    let kind = kind_raw.parse::<TaskKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;

    let status_raw: String = row.get(3)?;
    let status = TaskStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown status: {status_raw}").into(),
        )
    })?;

    let sub_status_raw: Option<String> = row.get(4)?;
    let sub_status = sub_status_raw.as_deref().and_then(SubStatus::parse);

    let tags_raw: String = row.get(19)?;
    let tags: Vec<String> = serde_json::from_str(&tags_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(19, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(TaskRecord {
        id,
        job_id: row.get(1)?,
        kind,
        status,
        sub_status,
        file_name: row.get(5)?,
        file_size: row.get(6)?,
        file_path: row.get(7)?,
        progress: row.get(8)?,
        result: json_column(row, 9)?,
        error_message: row.get(10)?,
        error_code: row.get(11)?,
        retry_count: row.get(12)?,
        max_retries: row.get(13)?,
        created_at: time_column(row, 14)?,
        started_at: opt_time_column(row, 15)?,
        completed_at: opt_time_column(row, 16)?,
        cancelled_at: opt_time_column(row, 17)?,
        owner_id: row.get(18)?,
        tags,
        metadata: json_column(row, 20)?,
    })
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn opt_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
        None => Ok(None),
    }
}
