//! Error types for FilePipe
//!
//! All errors are managed centrally so every layer speaks the same
//! taxonomy. Infrastructure failures (broker/store unavailable) convert
//! into `Queue`/`Storage` and propagate to the caller's recovery policy.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// FilePipe error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input validation
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Lifecycle
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // Processing
    // ========================================================================
    #[error("Processing failed [{code}]: {message}")]
    Processing { code: ErrorCode, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // Infrastructure
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // Misc
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retry machinery may reschedule after this error.
    ///
    /// NotFound is deliberately excluded: a missing record must never be
    /// retried forever.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Processing { .. } | Error::Timeout(_) | Error::Queue(_) | Error::Io(_)
        )
    }

    /// Whether this error is safe to surface to an end user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::InvalidState(_)
                | Error::Cancelled
        )
    }

    /// Processing error helper
    pub fn processing(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Processing {
            code,
            message: message.into(),
        }
    }

    /// Stable wire code recorded in `error_code` on the task record
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Processing { code, .. } => *code,
            Error::NotFound(_) => ErrorCode::FileNotFound,
            Error::Validation(_) | Error::InvalidInput(_) => ErrorCode::InvalidFormat,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Storage(_) | Error::Sqlite(_) => ErrorCode::StorageError,
            _ => ErrorCode::ProcessingError,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

/// Error classification codes persisted on failed task records
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    FileNotFound,
    InvalidFormat,
    ProcessingError,
    Timeout,
    StorageError,
    PermissionDenied,
    /// Fixed infrastructure code used when the worker harness itself fails
    WorkerError,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::ProcessingError => "PROCESSING_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::WorkerError => "WORKER_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
