//! # filepipe-foundation
//!
//! Foundation layer for FilePipe:
//! - Error: central error taxonomy and wire error codes
//! - Types: task status/sub-status/event/kind vocabulary and predicates
//! - Config: pipeline configuration (TOML)
//! - Storage: SQLite task record store + append-only history tables
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  CLI / request surface                                   │
//! │       │ create / cancel / retry / status                 │
//! │       ▼                                                  │
//! │  Task Manager ──── append ───► task_progress/task_events │
//! │       │ mutate                                           │
//! │       ▼                                                  │
//! │  task_records (authoritative status, progress, retries)  │
//! │       ▲                                                  │
//! │       │ progress / complete / fail                       │
//! │  Workers ◄── at-least-once ── Broker/Queue               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod storage;
pub mod types;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ErrorCode, Result};

// ============================================================================
// Types
// ============================================================================
pub use types::{EventKind, SubStatus, TaskKind, TaskStatus};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    MaintenanceConfig, PipelineConfig, StorageConfig, WorkerConfig, CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{
    FailureOutcome, ProgressEntry, StoreStats, TaskEvent, TaskRecord, TaskStore, DB_FILE,
};
