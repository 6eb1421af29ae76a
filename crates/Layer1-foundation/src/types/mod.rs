//! Shared task vocabulary
//!
//! Status, sub-status, event and task-kind enums used by the store, the
//! manager and the workers. The predicates on these types are the single
//! source of truth for what transitions are permitted; the service layer
//! and any administrative override consult the same methods.

use serde::{Deserialize, Serialize};

/// Possible statuses of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet picked up by a worker
    Pending,

    /// A worker is driving an attempt
    Processing,

    /// Finished successfully
    Completed,

    /// Finished unsuccessfully, retry budget exhausted or retry refused
    Failed,

    /// Cancelled before reaching another terminal status
    Cancelled,

    /// Waiting for the broker to redeliver
    Retry,
}

impl TaskStatus {
    /// All status values, for exhaustive checks
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Retry,
    ];

    /// Terminal statuses permit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `cancel_task` is permitted from this status
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Retry
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            "retry" => Some(TaskStatus::Retry),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TaskStatus::parse(&s.to_ascii_lowercase()).ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// Secondary state riding alongside the main status.
///
/// Carries "retry in flight" without overloading the numeric progress
/// channel; cleared by the next progress write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubStatus {
    Retrying,
}

impl SubStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "retrying" => Some(SubStatus::Retrying),
            _ => None,
        }
    }
}

/// Event kinds forming the append-only audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Retried,
    Paused,
    Resumed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Started => "started",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Cancelled => "cancelled",
            EventKind::Retried => "retried",
            EventKind::Paused => "paused",
            EventKind::Resumed => "resumed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventKind::Created),
            "started" => Some(EventKind::Started),
            "progress" => Some(EventKind::Progress),
            "completed" => Some(EventKind::Completed),
            "failed" => Some(EventKind::Failed),
            "cancelled" => Some(EventKind::Cancelled),
            "retried" => Some(EventKind::Retried),
            "paused" => Some(EventKind::Paused),
            "resumed" => Some(EventKind::Resumed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of task kinds a processing capability can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Image,
    Video,
    Document,
    Archive,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Image => "image",
            TaskKind::Video => "video",
            TaskKind::Document => "document",
            TaskKind::Archive => "archive",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(TaskKind::Image),
            "video" => Ok(TaskKind::Video),
            "document" => Ok(TaskKind::Document),
            "archive" => Ok(TaskKind::Archive),
            _ => Err(format!("unknown task kind: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_terminal_set() {
        for status in TaskStatus::ALL {
            let expected = matches!(
                status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            );
            assert_eq!(status.is_terminal(), expected, "{status}");
        }
    }

    #[test]
    fn test_cancellable_set() {
        // cancellable ⟺ status ∈ {pending, processing, retry}
        for status in TaskStatus::ALL {
            let expected = matches!(
                status,
                TaskStatus::Pending | TaskStatus::Processing | TaskStatus::Retry
            );
            assert_eq!(status.is_cancellable(), expected, "{status}");
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("unknown"), None);
    }

    #[test]
    fn test_task_kind_case_insensitive() {
        assert_eq!(TaskKind::from_str("IMAGE").unwrap(), TaskKind::Image);
        assert_eq!(TaskKind::from_str("Document").unwrap(), TaskKind::Document);
        assert!(TaskKind::from_str("audio").is_err());
    }

    #[test]
    fn test_event_kind_round_trip() {
        let kinds = [
            EventKind::Created,
            EventKind::Started,
            EventKind::Progress,
            EventKind::Completed,
            EventKind::Failed,
            EventKind::Cancelled,
            EventKind::Retried,
            EventKind::Paused,
            EventKind::Resumed,
        ];
        for kind in kinds {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }
}
