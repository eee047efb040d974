//! Durable pending queue backed by a newline-delimited file.
//!
//! The file is the single source of truth: every read re-parses it and every
//! mutation rewrites it wholesale. All access goes through one async mutex so
//! the worker and API handlers cannot interleave read-modify-write cycles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::domain::JobId;
use crate::utils::fs;
use crate::{Error, Result};

pub struct QueueStore {
    path: PathBuf,
    lock: Mutex<()>,
    notify: Arc<Notify>,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signal raised after every successful enqueue.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Append `id` unless it is already queued.
    pub async fn enqueue(&self, id: &JobId) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut ids = self.read().await?;
        if ids.contains(id) {
            return Err(Error::DuplicateTask(id.to_string()));
        }

        ids.push(id.clone());
        self.write(&ids).await?;
        info!(job_id = %id, queued = ids.len(), "Task enqueued");

        self.notify.notify_one();
        Ok(())
    }

    /// Current queue contents in insertion order.
    pub async fn list(&self) -> Result<Vec<JobId>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Delete the first entry matching `id`. Returns whether anything was removed.
    pub async fn remove(&self, id: &JobId) -> Result<bool> {
        let _guard = self.lock.lock().await;

        let mut ids = self.read().await?;
        let Some(pos) = ids.iter().position(|queued| queued == id) else {
            debug!(job_id = %id, "Remove requested for task not in queue");
            return Ok(false);
        };

        ids.remove(pos);
        self.write(&ids).await?;
        info!(job_id = %id, queued = ids.len(), "Task removed from queue");
        Ok(true)
    }

    async fn read(&self) -> Result<Vec<JobId>> {
        let lines = fs::read_lines("reading queue", &self.path).await?;

        let mut ids = Vec::with_capacity(lines.len());
        for line in lines {
            match JobId::parse(&line) {
                Ok(id) => ids.push(id),
                Err(_) => warn!(line = %line, "Skipping malformed queue entry"),
            }
        }
        Ok(ids)
    }

    async fn write(&self, ids: &[JobId]) -> Result<()> {
        let lines: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        fs::write_lines("writing queue", &self.path, &lines).await
    }
}
