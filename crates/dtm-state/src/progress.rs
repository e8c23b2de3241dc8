//! Optional progress reporting.
//!
//! Long-running operations announce themselves to a [`ProgressSink`] for
//! display purposes only. Nothing in the crate depends on a sink being
//! present, and a sink cannot influence results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier handed out by a sink for one running task.
pub type TaskId = u64;

/// Receiver of start/advance/complete ticks.
pub trait ProgressSink: Send + Sync {
    /// A task labelled `label` has started.
    fn start(&self, label: &str) -> TaskId;

    /// The task made progress.
    fn advance(&self, _task: TaskId) {}

    /// The task finished, successfully or not.
    fn complete(&self, task: TaskId);
}

/// Shared, optional sink as held by the store components.
pub type Progress = Option<Arc<dyn ProgressSink>>;

/// Guard that completes its task when dropped, on every exit path.
pub struct ProgressTask {
    sink: Progress,
    id: TaskId,
}

impl ProgressTask {
    pub fn start(sink: &Progress, label: &str) -> Self {
        let id = sink.as_ref().map(|s| s.start(label)).unwrap_or_default();
        Self {
            sink: sink.clone(),
            id,
        }
    }

    pub fn advance(&self) {
        if let Some(sink) = &self.sink {
            sink.advance(self.id);
        }
    }
}

impl Drop for ProgressTask {
    fn drop(&mut self) {
        if let Some(sink) = &self.sink {
            sink.complete(self.id);
        }
    }
}

/// Sink that forwards ticks to the `log` facade at debug level.
#[derive(Debug, Default)]
pub struct LogProgress {
    next: AtomicU64,
}

impl ProgressSink for LogProgress {
    fn start(&self, label: &str) -> TaskId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        log::debug!("[task {id}] {label}");
        id
    }

    fn advance(&self, task: TaskId) {
        log::debug!("[task {task}] advanced");
    }

    fn complete(&self, task: TaskId) {
        log::debug!("[task {task}] complete");
    }
}
