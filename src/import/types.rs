use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unpack failed: {0}")]
    Unpack(#[from] zip::result::ZipError),
    #[error("Archive entry escapes extraction directory: {0}")]
    UnsafeEntry(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One archive to import: an already-saved file plus the client-supplied
/// display name the target directory is derived from.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub archive_path: PathBuf,
    pub display_name: String,
    pub categories: Vec<String>,
}

/// Task lifecycle. Transitions are forward-only: Queued → Running →
/// {Done | Error}, and the terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Running => 1,
            TaskStatus::Done => 2,
            TaskStatus::Error => 2,
        }
    }
}

/// Progress counter for one task. `total == 0` means "not yet determined",
/// not "zero files".
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pub phase: String,
    pub current: usize,
    pub total: usize,
}

/// Worker-to-registry messages. Workers never mutate the registry directly;
/// the tracker's applier task folds these into task records.
#[derive(Debug)]
pub enum TaskEvent {
    Started {
        task_id: String,
    },
    Log {
        task_id: String,
        line: String,
    },
    Progress {
        task_id: String,
        phase: String,
        current: usize,
        total: usize,
    },
    Completed {
        task_id: String,
        book_dir: String,
    },
    Failed {
        task_id: String,
        error: String,
    },
}

/// In-memory state of one import, owned by the tracker's registry.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only; indices are stable for the life of the record.
    pub logs: Vec<String>,
    pub progress: TaskProgress,
    pub book_dir: Option<String>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        TaskRecord {
            id,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            logs: Vec::new(),
            progress: TaskProgress::default(),
            book_dir: None,
            error: None,
        }
    }

    /// Move the status forward. Regressions are silently ignored.
    pub fn advance(&mut self, next: TaskStatus) {
        if next.rank() > self.status.rank() {
            self.status = next;
        }
    }
}

/// Snapshot returned by a poll: the log increment since the caller's cursor
/// plus the latest status and progress, all read under one lock acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct PollSnapshot {
    pub found: bool,
    pub status: Option<TaskStatus>,
    pub phase: String,
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    pub logs: Vec<String>,
    pub next_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PollSnapshot {
    pub fn not_found() -> Self {
        PollSnapshot {
            found: false,
            status: None,
            phase: String::new(),
            current: 0,
            total: 0,
            percent: 0,
            logs: Vec::new(),
            next_index: 0,
            book_dir: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        let mut record = TaskRecord::new("t".into());
        record.advance(TaskStatus::Running);
        assert_eq!(record.status, TaskStatus::Running);
        record.advance(TaskStatus::Queued);
        assert_eq!(record.status, TaskStatus::Running);
        record.advance(TaskStatus::Done);
        assert_eq!(record.status, TaskStatus::Done);
        record.advance(TaskStatus::Error);
        assert_eq!(record.status, TaskStatus::Done);
    }
}
