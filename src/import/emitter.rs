//! Worker-side handle for publishing task events.

use crate::import::types::TaskEvent;
use tokio::sync::mpsc;
use tracing::info;

/// Sends log lines and progress for one task over the tracker's event
/// channel. The worker owning an emitter is the only writer for its task, so
/// event order on the channel is the task's log order.
#[derive(Clone)]
pub struct TaskEmitter {
    task_id: String,
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl TaskEmitter {
    pub fn new(task_id: String, tx: mpsc::UnboundedSender<TaskEvent>) -> Self {
        TaskEmitter { task_id, tx }
    }

    pub fn started(&self) {
        let _ = self.tx.send(TaskEvent::Started {
            task_id: self.task_id.clone(),
        });
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!(task = %self.task_id, "{}", line);
        let _ = self.tx.send(TaskEvent::Log {
            task_id: self.task_id.clone(),
            line,
        });
    }

    pub fn progress(&self, phase: &str, current: usize, total: usize) {
        let _ = self.tx.send(TaskEvent::Progress {
            task_id: self.task_id.clone(),
            phase: phase.to_string(),
            current,
            total,
        });
    }

    pub fn completed(&self, book_dir: String) {
        let _ = self.tx.send(TaskEvent::Completed {
            task_id: self.task_id.clone(),
            book_dir,
        });
    }

    pub fn failed(&self, error: String) {
        let _ = self.tx.send(TaskEvent::Failed {
            task_id: self.task_id.clone(),
            error,
        });
    }
}
