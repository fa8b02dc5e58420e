pub mod emitter;
pub mod pipeline;
pub mod tracker;
pub mod types;

pub use emitter::TaskEmitter;
pub use pipeline::{run_import, run_import_sync};
pub use tracker::ImportTracker;
pub use types::{
    ImportError, ImportRequest, PollSnapshot, TaskEvent, TaskProgress, TaskRecord, TaskStatus,
};
