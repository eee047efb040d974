//! Orchestrator: owns the worker loop and serves controller requests.
//!
//! All shared state lives in the components handed to [`Orchestrator::new`];
//! the worker and the controller methods only ever reach it through them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{IterationOutcome, WorkerConfig};
use crate::domain::{JobId, TaskState, TaskStatus};
use crate::downloader::{BackendRegistry, MediaFetcher, OutputLayout};
use crate::process::ProcessSupervisor;
use crate::queue::{DownloadArchive, QueueStore};
use crate::status::{LogEntry, StatusRegistry};
use crate::{Error, Result};

const PENDING_MESSAGE: &str = "Waiting for download";

/// Collaborators the orchestrator drives.
pub struct Components {
    pub queue: Arc<QueueStore>,
    pub archive: DownloadArchive,
    pub status: Arc<StatusRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub registry: BackendRegistry,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub layout: OutputLayout,
}

/// Controller view of the whole system.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub current_task: Option<JobId>,
    pub queue: Vec<TaskStatus>,
    pub completed: Vec<TaskStatus>,
    pub failed: Vec<TaskStatus>,
    pub logs: Vec<LogEntry>,
}

/// How a claimed job was satisfied.
enum Delivery {
    /// Already listed in the download archive.
    Archived,
    /// Deliverable already on disk.
    Existing(PathBuf),
    /// Fetched in this iteration.
    Fetched(PathBuf),
}

impl Delivery {
    fn message(&self) -> String {
        match self {
            Self::Archived => "Already downloaded".to_string(),
            Self::Existing(path) => format!("Already on disk: {}", path.display()),
            Self::Fetched(path) => format!("Downloaded to {}", path.display()),
        }
    }
}

pub struct Orchestrator {
    queue: Arc<QueueStore>,
    archive: DownloadArchive,
    status: Arc<StatusRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    registry: BackendRegistry,
    fetcher: Arc<dyn MediaFetcher>,
    layout: OutputLayout,
    config: WorkerConfig,
    /// Stop flag of the current iteration.
    stop: Mutex<CancellationToken>,
    /// Process-wide shutdown; parent of every iteration's stop flag.
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(components: Components, config: WorkerConfig) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            queue: components.queue,
            archive: components.archive,
            status: components.status,
            supervisor: components.supervisor,
            registry: components.registry,
            fetcher: components.fetcher,
            layout: components.layout,
            config,
            stop: Mutex::new(shutdown.child_token()),
            shutdown,
        }
    }

    pub fn status_registry(&self) -> &Arc<StatusRegistry> {
        &self.status
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Seed pending records for everything already in the persisted queue.
    pub async fn restore(&self) -> Result<usize> {
        let queued = self.queue.list().await?;
        for id in &queued {
            self.status.ensure_pending(id, PENDING_MESSAGE);
        }
        if !queued.is_empty() {
            info!(count = queued.len(), "Restored pending tasks from queue");
        }
        Ok(queued.len())
    }

    /// Add a job to the queue.
    ///
    /// The running job counts as present even after it was removed, since
    /// settling it drops its queue entry.
    pub async fn enqueue(&self, raw: &str) -> Result<JobId> {
        let id = JobId::parse(raw)?;
        if self.status.current().as_ref() == Some(&id) {
            return Err(Error::DuplicateTask(id.to_string()));
        }
        self.queue.enqueue(&id).await?;
        self.status.set_status(&id, TaskState::Pending, PENDING_MESSAGE);
        Ok(id)
    }

    /// Drop a job from the queue. Removing an absent job is not an error.
    ///
    /// A job that is currently downloading keeps running; use
    /// [`request_stop`](Self::request_stop) to interrupt it.
    pub async fn remove(&self, raw: &str) -> Result<bool> {
        let id = JobId::parse(raw)?;
        let removed = self.queue.remove(&id).await?;
        if removed && self.status.current().as_ref() == Some(&id) {
            info!(job_id = %id, "Removed running task from queue, it continues until stopped");
        }
        Ok(removed)
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let queued = self.queue.list().await?;
        let snapshot = self.status.snapshot();

        Ok(QueueStatus {
            current_task: snapshot.current_task,
            queue: queued
                .iter()
                .map(|id| self.status.status_or(id, TaskState::Pending))
                .collect(),
            completed: snapshot.completed,
            failed: snapshot.failed,
            logs: snapshot.logs,
        })
    }

    /// Flag the running job for stopping and terminate its processes.
    ///
    /// Returns immediately. The return value tells whether a job was active.
    pub fn request_stop(&self) -> bool {
        let current = self.status.current();
        self.stop.lock().cancel();

        match &current {
            Some(id) => info!(job_id = %id, "Stop requested"),
            None => info!("Stop requested while idle"),
        }

        let supervisor = self.supervisor.clone();
        tokio::spawn(async move {
            let stopped = supervisor.terminate_all().await;
            if stopped > 0 {
                info!(count = stopped, "Tracked processes stopped");
            }
        });

        current.is_some()
    }

    /// Forget the failed history and the matching failed records.
    pub async fn clear_failed_history(&self) -> Result<usize> {
        let cleared = self.status.clear_failed_history();

        // A stopped job is still queued; keep it visible as pending.
        for id in self.queue.list().await? {
            self.status.ensure_pending(&id, PENDING_MESSAGE);
        }

        info!(count = cleared, "Cleared failed history");
        Ok(cleared)
    }

    /// Spawn the worker loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Stop the worker loop and any job it is running.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The worker loop. Returns only after [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        info!("Download worker started");
        let notify = self.queue.notifier();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let pause = match self.run_iteration().await {
                Ok(IterationOutcome::Continue) => continue,
                Ok(IterationOutcome::Idle) => {
                    tokio::select! {
                        _ = notify.notified() => debug!("Woken by enqueue"),
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                    continue;
                }
                Ok(IterationOutcome::Cooldown(pause)) => {
                    info!(secs = pause.as_secs(), "Cooling down before next task");
                    pause
                }
                Err(e) => {
                    error!(error = %e, "Worker iteration failed");
                    self.status.set_current(None);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("Download worker stopped");
    }

    /// Claim the head of the queue and drive it to a final state.
    pub async fn run_iteration(&self) -> Result<IterationOutcome> {
        let cancel = self.reset_stop();
        self.supervisor.clear();

        let Some(id) = self.queue.list().await?.into_iter().next() else {
            self.status.set_current(None);
            return Ok(IterationOutcome::Idle);
        };

        info!(job_id = %id, "Starting task");
        self.status.set_status(&id, TaskState::Downloading, "Downloading");
        self.status.set_current(Some(id.clone()));

        let result = self.process(&id, &cancel).await;
        let outcome = self.settle(&id, result, &cancel).await;

        self.status.set_current(None);
        outcome
    }

    fn reset_stop(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        *self.stop.lock() = token.clone();
        token
    }

    async fn process(&self, id: &JobId, cancel: &CancellationToken) -> Result<Delivery> {
        match self.archive.contains(id).await {
            Ok(true) => {
                info!(job_id = %id, "Already in download archive");
                return Ok(Delivery::Archived);
            }
            Ok(false) => {}
            Err(e) => warn!(job_id = %id, error = %e, "Failed to read download archive"),
        }

        let existing = self.layout.deliverable(id);
        if tokio::fs::try_exists(&existing).await.unwrap_or(false) {
            info!(job_id = %id, path = %existing.display(), "Deliverable already exists");
            self.record_archive(id).await;
            return Ok(Delivery::Existing(existing));
        }

        let path = self
            .registry
            .download(id, self.fetcher.as_ref(), cancel)
            .await?;
        self.record_archive(id).await;
        Ok(Delivery::Fetched(path))
    }

    async fn record_archive(&self, id: &JobId) {
        if let Err(e) = self.archive.record(id).await {
            warn!(job_id = %id, error = %e, "Failed to update download archive");
        }
    }

    async fn settle(
        &self,
        id: &JobId,
        result: Result<Delivery>,
        cancel: &CancellationToken,
    ) -> Result<IterationOutcome> {
        let stopped = cancel.is_cancelled() || matches!(result, Err(Error::Cancelled));
        if stopped {
            warn!(job_id = %id, "Task stopped, keeping it queued");
            self.status
                .set_status(id, TaskState::Failed, Error::Cancelled.to_string());
            self.status.record_failed(id);
            return Ok(IterationOutcome::Continue);
        }

        match result {
            Ok(delivery) => {
                info!(job_id = %id, "Task completed");
                self.status
                    .set_status(id, TaskState::Completed, delivery.message());
                self.status.record_completed(id);
                self.queue.remove(id).await?;

                match delivery {
                    Delivery::Fetched(_) => Ok(IterationOutcome::Cooldown(self.cooldown())),
                    Delivery::Archived | Delivery::Existing(_) => Ok(IterationOutcome::Continue),
                }
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Task failed");
                self.status.set_status(id, TaskState::Failed, e.to_string());
                self.status.record_failed(id);
                self.queue.remove(id).await?;
                Ok(IterationOutcome::Continue)
            }
        }
    }

    fn cooldown(&self) -> Duration {
        let min = self.config.cooldown_min.as_millis() as u64;
        let max = self.config.cooldown_max.as_millis() as u64;
        if min >= max {
            return self.config.cooldown_min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}
