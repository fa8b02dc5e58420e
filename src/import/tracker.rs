//! Registry of in-flight and recently finished import tasks.
//!
//! One mutex guards the whole registry; sweep has to enumerate every record
//! anyway, so per-record locks buy nothing. Workers never touch the registry
//! directly: they publish [`TaskEvent`]s over an mpsc channel and a single
//! applier task folds those into the records under the lock. Each task has
//! exactly one worker, so a task's log order is its emission order.

use crate::import::emitter::TaskEmitter;
use crate::import::pipeline;
use crate::import::types::{
    ImportError, ImportRequest, PollSnapshot, TaskEvent, TaskRecord, TaskStatus,
};
use crate::library::CategoryStore;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// How long finished (or stuck) task records stay queryable.
const TASK_RETENTION_SECS: i64 = 3600;

type Registry = Arc<Mutex<HashMap<String, TaskRecord>>>;

/// Owns the task registry and the per-import workers. Cheap to clone into
/// request handlers.
#[derive(Clone)]
pub struct ImportTracker {
    registry: Registry,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    library_root: PathBuf,
    categories: CategoryStore,
    retention: Duration,
}

impl ImportTracker {
    /// Start the tracker with the default one-hour retention window.
    pub fn start(library_root: PathBuf, categories: CategoryStore) -> Self {
        Self::start_with_retention(
            library_root,
            categories,
            Duration::seconds(TASK_RETENTION_SECS),
        )
    }

    /// Start with an explicit retention window.
    pub fn start_with_retention(
        library_root: PathBuf,
        categories: CategoryStore,
        retention: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(apply_events(registry.clone(), events_rx));
        ImportTracker {
            registry,
            events_tx,
            library_root,
            categories,
            retention,
        }
    }

    /// Allocate a Queued record and spawn the pipeline on a blocking worker.
    /// Returns the task id immediately; the caller never waits on pipeline
    /// work.
    pub fn submit(&self, request: ImportRequest) -> String {
        self.sweep();

        let task_id = Uuid::new_v4().to_string();
        {
            let mut tasks = self.registry.lock().unwrap();
            tasks.insert(task_id.clone(), TaskRecord::new(task_id.clone()));
        }
        info!("Submitted import task {} for {}", task_id, request.display_name);

        let emitter = TaskEmitter::new(task_id.clone(), self.events_tx.clone());
        let library_root = self.library_root.clone();
        let categories = self.categories.clone();
        tokio::task::spawn_blocking(move || {
            run_worker(&request, &emitter, || {
                pipeline::run_import(&library_root, &categories, &request, &emitter)
            });
        });

        task_id
    }

    /// Read a task's state and the log lines at indices `[since, len)`.
    ///
    /// `next_index` is the log length at the moment of this read, taken under
    /// the same lock acquisition as the log slice, so polling with the
    /// returned cursor yields every line exactly once.
    pub fn poll(&self, task_id: &str, since: usize) -> PollSnapshot {
        self.sweep();

        let tasks = self.registry.lock().unwrap();
        let Some(record) = tasks.get(task_id) else {
            return PollSnapshot::not_found();
        };
        let next_index = record.logs.len();
        let start = since.min(next_index);
        let percent = if record.progress.total > 0 {
            ((record.progress.current * 100) / record.progress.total).min(100) as u8
        } else {
            0
        };
        PollSnapshot {
            found: true,
            status: Some(record.status),
            phase: record.progress.phase.clone(),
            current: record.progress.current,
            total: record.progress.total,
            percent,
            logs: record.logs[start..].to_vec(),
            next_index,
            book_dir: record.book_dir.clone(),
            error: record.error.clone(),
        }
    }

    /// Drop records older than the retention window. Invoked lazily from
    /// `submit` and `poll` rather than on a timer; retention is generous
    /// relative to poll cadence, so request-driven staleness is fine.
    pub fn sweep(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut tasks = self.registry.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, record| record.created_at > cutoff);
        let swept = before - tasks.len();
        if swept > 0 {
            debug!("Swept {} expired import task(s)", swept);
        }
    }
}

/// Drive one import on its worker thread. Any failure — an error result or
/// a panic unwinding out of the pipeline — still reaches a Failed
/// transition. The pipeline removes the upload on its own error path, but a
/// panic skips that, so this is where the artifact gets cleaned up; cleanup
/// is best-effort and never replaces the failure itself.
fn run_worker<F>(request: &ImportRequest, emitter: &TaskEmitter, import: F)
where
    F: FnOnce() -> Result<String, ImportError>,
{
    emitter.started();
    let outcome = catch_unwind(AssertUnwindSafe(import));
    match outcome {
        Ok(Ok(book_dir)) => emitter.completed(book_dir),
        Ok(Err(e)) => {
            emitter.log(format!("Error processing: {}", e));
            emitter.failed(e.to_string());
        }
        Err(_) => {
            error!("Import worker panicked");
            if let Err(e) = std::fs::remove_file(&request.archive_path) {
                debug!(
                    "Could not remove upload {} after panic: {}",
                    request.archive_path.display(),
                    e
                );
            }
            emitter.failed("import worker panicked".to_string());
        }
    }
}

/// Single consumer of worker events: the only place registry records are
/// mutated.
async fn apply_events(registry: Registry, mut events_rx: mpsc::UnboundedReceiver<TaskEvent>) {
    while let Some(event) = events_rx.recv().await {
        let mut tasks = registry.lock().unwrap();
        apply_event(&mut tasks, event);
    }
    debug!("Import event channel closed");
}

fn apply_event(tasks: &mut HashMap<String, TaskRecord>, event: TaskEvent) {
    match event {
        TaskEvent::Started { task_id } => {
            with_record(tasks, &task_id, |record| {
                record.advance(TaskStatus::Running);
            });
        }
        TaskEvent::Log { task_id, line } => {
            with_record(tasks, &task_id, |record| {
                record.logs.push(line);
            });
        }
        TaskEvent::Progress {
            task_id,
            phase,
            current,
            total,
        } => {
            with_record(tasks, &task_id, |record| {
                record.progress.phase = phase;
                record.progress.current = current;
                record.progress.total = total;
            });
        }
        TaskEvent::Completed { task_id, book_dir } => {
            with_record(tasks, &task_id, |record| {
                record.book_dir = Some(book_dir);
                record.advance(TaskStatus::Done);
            });
        }
        TaskEvent::Failed { task_id, error } => {
            with_record(tasks, &task_id, |record| {
                record.error = Some(error);
                record.advance(TaskStatus::Error);
            });
        }
    }
}

/// Apply a mutation to a live record, stamping `updated_at`. Events for
/// unknown (swept) or already-terminal tasks are dropped.
fn with_record<F>(tasks: &mut HashMap<String, TaskRecord>, task_id: &str, mutate: F)
where
    F: FnOnce(&mut TaskRecord),
{
    match tasks.get_mut(task_id) {
        Some(record) if !record.status.is_terminal() => {
            mutate(record);
            record.updated_at = Utc::now();
        }
        Some(_) => debug!("Dropping event for terminal task {}", task_id),
        None => debug!("Dropping event for unknown task {}", task_id),
    }
}
