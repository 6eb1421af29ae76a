//! Storage layer
//!
//! SQLite-backed task record store plus the append-only progress and
//! event history tables.

mod db;

pub use db::{
    FailureOutcome, ProgressEntry, StoreStats, TaskEvent, TaskRecord, TaskStore, DB_FILE,
};
