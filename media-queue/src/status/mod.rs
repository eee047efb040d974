//! In-memory task status registry.
//!
//! Holds one [`TaskStatus`] per id ever seen, the trailing completed/failed
//! histories and the console log ring shown by the API. Everything lives
//! behind a single mutex and every read hands out an owned snapshot.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::{JobId, TaskState, TaskStatus};

/// Number of ids kept in each trailing history.
pub const HISTORY_LIMIT: usize = 20;

/// Capacity of the console log ring.
pub const LOG_CAPACITY: usize = 200;

/// Number of log lines included in a status snapshot.
pub const SNAPSHOT_LOG_LIMIT: usize = 100;

/// One line in the console log ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub text: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub current_task: Option<JobId>,
    pub completed: Vec<TaskStatus>,
    pub failed: Vec<TaskStatus>,
    pub logs: Vec<LogEntry>,
}

#[derive(Default)]
struct Inner {
    current: Option<JobId>,
    statuses: HashMap<JobId, TaskStatus>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    logs: VecDeque<LogEntry>,
}

#[derive(Default)]
pub struct StatusRegistry {
    inner: Mutex<Inner>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the record for `id`.
    pub fn set_status(&self, id: &JobId, state: TaskState, message: impl Into<String>) {
        let status = TaskStatus::new(id.clone(), state, message);
        self.inner.lock().statuses.insert(id.clone(), status);
    }

    /// Record for `id`, if one exists.
    pub fn status(&self, id: &JobId) -> Option<TaskStatus> {
        self.inner.lock().statuses.get(id).cloned()
    }

    /// Record for `id`, or a synthesized one in `fallback` state.
    pub fn status_or(&self, id: &JobId, fallback: TaskState) -> TaskStatus {
        self.status(id)
            .unwrap_or_else(|| TaskStatus::new(id.clone(), fallback, ""))
    }

    /// Seed a pending record unless one already exists.
    pub fn ensure_pending(&self, id: &JobId, message: &str) {
        self.inner
            .lock()
            .statuses
            .entry(id.clone())
            .or_insert_with(|| TaskStatus::new(id.clone(), TaskState::Pending, message));
    }

    pub fn set_current(&self, id: Option<JobId>) {
        self.inner.lock().current = id;
    }

    pub fn current(&self) -> Option<JobId> {
        self.inner.lock().current.clone()
    }

    pub fn record_completed(&self, id: &JobId) {
        push_bounded(&mut self.inner.lock().completed, id.clone(), HISTORY_LIMIT);
    }

    pub fn record_failed(&self, id: &JobId) {
        push_bounded(&mut self.inner.lock().failed, id.clone(), HISTORY_LIMIT);
    }

    /// Append a line to the console log ring.
    pub fn log(&self, text: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            text: text.into(),
        };
        push_bounded(&mut self.inner.lock().logs, entry, LOG_CAPACITY);
    }

    /// Empty the failed history and drop the matching failed records.
    ///
    /// Returns the number of history entries cleared.
    pub fn clear_failed_history(&self) -> usize {
        let mut inner = self.inner.lock();
        let cleared: Vec<JobId> = inner.failed.drain(..).collect();

        for id in &cleared {
            if inner
                .statuses
                .get(id)
                .is_some_and(|status| status.state == TaskState::Failed)
            {
                inner.statuses.remove(id);
            }
        }

        cleared.len()
    }

    /// Number of records currently in `Downloading` state.
    pub fn downloading_count(&self) -> usize {
        self.inner
            .lock()
            .statuses
            .values()
            .filter(|status| status.state == TaskState::Downloading)
            .count()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner.lock().logs.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock();

        let render = |ids: &VecDeque<JobId>, fallback: TaskState| -> Vec<TaskStatus> {
            ids.iter()
                .map(|id| {
                    inner
                        .statuses
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| TaskStatus::new(id.clone(), fallback, ""))
                })
                .collect()
        };

        let skip = inner.logs.len().saturating_sub(SNAPSHOT_LOG_LIMIT);

        StatusSnapshot {
            current_task: inner.current.clone(),
            completed: render(&inner.completed, TaskState::Completed),
            failed: render(&inner.failed, TaskState::Failed),
            logs: inner.logs.iter().skip(skip).cloned().collect(),
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, limit: usize) {
    buf.push_back(item);
    while buf.len() > limit {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[test]
    fn test_log_ring_evicts_oldest() {
        let registry = StatusRegistry::new();
        for i in 0..LOG_CAPACITY {
            registry.log(format!("line {i}"));
        }
        assert_eq!(registry.logs().len(), LOG_CAPACITY);

        registry.log("line 200");
        let logs = registry.logs();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs.first().unwrap().text, "line 1");
        assert_eq!(logs.last().unwrap().text, "line 200");
    }

    #[test]
    fn test_snapshot_returns_last_hundred_logs() {
        let registry = StatusRegistry::new();
        for i in 0..150 {
            registry.log(format!("line {i}"));
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.logs.len(), SNAPSHOT_LOG_LIMIT);
        assert_eq!(snapshot.logs[0].text, "line 50");
    }

    #[test]
    fn test_histories_are_bounded_fifo() {
        let registry = StatusRegistry::new();
        for i in 0..25 {
            let job = id(&format!("c-{i}"));
            registry.set_status(&job, TaskState::Completed, "done");
            registry.record_completed(&job);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.completed.len(), HISTORY_LIMIT);
        assert_eq!(snapshot.completed[0].id, id("c-5"));
        assert_eq!(snapshot.completed[19].id, id("c-24"));
    }

    #[test]
    fn test_failed_history_is_bounded_fifo() {
        let registry = StatusRegistry::new();
        for i in 0..25 {
            let job = id(&format!("f-{i}"));
            registry.set_status(&job, TaskState::Failed, "boom");
            registry.record_failed(&job);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.failed.len(), HISTORY_LIMIT);
        assert_eq!(snapshot.failed[0].id, id("f-5"));
        assert_eq!(snapshot.failed[19].id, id("f-24"));
        assert!(snapshot.completed.is_empty());
    }

    #[test]
    fn test_clear_failed_history() {
        let registry = StatusRegistry::new();
        let failed = id("f-1");
        let retried = id("f-2");

        registry.set_status(&failed, TaskState::Failed, "boom");
        registry.record_failed(&failed);
        registry.set_status(&retried, TaskState::Failed, "boom");
        registry.record_failed(&retried);
        // Re-enqueued after failing: the record is no longer a failure.
        registry.set_status(&retried, TaskState::Pending, "waiting");

        assert_eq!(registry.clear_failed_history(), 2);
        assert!(registry.snapshot().failed.is_empty());
        assert!(registry.status(&failed).is_none());
        assert_eq!(registry.status(&retried).unwrap().state, TaskState::Pending);
    }

    #[test]
    fn test_ensure_pending_keeps_existing_record() {
        let registry = StatusRegistry::new();
        let job = id("p-1");

        registry.set_status(&job, TaskState::Downloading, "busy");
        registry.ensure_pending(&job, "waiting");
        assert_eq!(registry.status(&job).unwrap().state, TaskState::Downloading);

        let fresh = id("p-2");
        registry.ensure_pending(&fresh, "waiting");
        assert_eq!(registry.status(&fresh).unwrap().state, TaskState::Pending);
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry {
            timestamp: Local::now(),
            text: "hello".to_string(),
        };
        let rendered = entry.to_string();
        assert!(rendered.ends_with(" | hello"));
        assert_eq!(rendered.len(), "HH:MM:SS | hello".len());
    }
}
