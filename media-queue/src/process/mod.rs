//! Supervision of external download and transcode processes.
//!
//! Every spawned child is registered in a tracked set for as long as it is
//! alive. A stop request reaches a child only through that set: each entry
//! carries a stop token, and the task awaiting the child reacts to it with
//! terminate, a bounded grace period, then a hard kill.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use process_utils::{Termination, terminate_gracefully};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

/// Default time a process gets to exit after being asked to terminate.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Extra time `terminate_all` waits on top of the grace period for the
/// awaiting tasks to reap their children.
const DRAIN_MARGIN: Duration = Duration::from_secs(2);

/// Public view of a tracked process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub tool: String,
    pub started_at: DateTime<Utc>,
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// The process was stopped through the tracked set, or never started
    /// because a stop was already requested.
    Stopped,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

struct Tracked {
    handle: ProcessHandle,
    stop: CancellationToken,
}

pub struct ProcessSupervisor {
    tracked: Mutex<HashMap<u64, Tracked>>,
    next_key: AtomicU64,
    grace: Duration,
    drained: Notify,
}

impl ProcessSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            tracked: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(0),
            grace,
            drained: Notify::new(),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Snapshot of the live processes.
    pub fn tracked(&self) -> Vec<ProcessHandle> {
        self.tracked
            .lock()
            .values()
            .map(|t| t.handle.clone())
            .collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Forget every tracked entry, stopping any process still attached to one.
    pub fn clear(&self) {
        let stale: Vec<Tracked> = self.tracked.lock().drain().map(|(_, t)| t).collect();
        for entry in &stale {
            warn!(tool = %entry.handle.tool, pid = ?entry.handle.pid, "Dropping stale tracked process");
            entry.stop.cancel();
        }
        if !stale.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Spawn `command` and wait for it, forwarding its output to the log.
    ///
    /// The child is stopped when `cancel` fires or when [`terminate_all`]
    /// reaches its tracked entry. If `cancel` is already set the command is
    /// not spawned at all.
    ///
    /// [`terminate_all`]: Self::terminate_all
    pub async fn run(
        &self,
        tool: &str,
        mut command: Command,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        if cancel.is_cancelled() {
            debug!(tool, "Stop already requested, not spawning");
            return Ok(ProcessOutcome::Stopped);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Other(format!("Failed to spawn {tool}: {e}")))?;

        let stop = cancel.child_token();
        let handle = ProcessHandle {
            pid: child.id(),
            tool: tool.to_string(),
            started_at: Utc::now(),
        };
        info!(tool, pid = ?handle.pid, "Process started");
        let _registration = self.register(handle, stop.clone());

        // Forwarders are detached: a grandchild can keep a pipe open after
        // the direct child is gone.
        if let Some(stdout) = child.stdout.take() {
            forward_output(tool.to_string(), stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(tool.to_string(), stderr);
        }

        let outcome = tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| Error::Other(format!("Failed to wait for {tool}: {e}")))?;
                if status.success() {
                    debug!(tool, "Process exited successfully");
                } else {
                    warn!(tool, code = ?status.code(), "Process exited with failure");
                }
                ProcessOutcome::Exited(status)
            }
            _ = stop.cancelled() => {
                info!(tool, "Stop requested, terminating process");
                match terminate_gracefully(&mut child, self.grace).await {
                    Ok(Termination::Graceful(status)) => {
                        info!(tool, ?status, "Process terminated");
                    }
                    Ok(Termination::Killed(status)) => {
                        warn!(tool, ?status, "Process ignored terminate request, killed");
                    }
                    Err(e) => {
                        error!(tool, error = %e, "Failed to terminate process");
                    }
                }
                ProcessOutcome::Stopped
            }
        };

        Ok(outcome)
    }

    /// Stop every tracked process and wait until the set drains.
    ///
    /// Waiting is bounded by the grace period plus a small margin. Returns the
    /// number of processes that were signalled.
    pub async fn terminate_all(&self) -> usize {
        let entries: Vec<(ProcessHandle, CancellationToken)> = self
            .tracked
            .lock()
            .values()
            .map(|t| (t.handle.clone(), t.stop.clone()))
            .collect();

        for (handle, stop) in &entries {
            info!(tool = %handle.tool, pid = ?handle.pid, "Stopping process");
            stop.cancel();
        }

        let drained = tokio::time::timeout(self.grace + DRAIN_MARGIN, async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.tracked.lock().is_empty() {
                    break;
                }
                notified.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tracked_count(),
                "Tracked processes did not drain in time"
            );
        }

        entries.len()
    }

    fn register(&self, handle: ProcessHandle, stop: CancellationToken) -> Registration<'_> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.tracked.lock().insert(key, Tracked { handle, stop });
        Registration { supervisor: self, key }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_GRACE)
    }
}

/// Removes a process from the tracked set when dropped.
struct Registration<'a> {
    supervisor: &'a ProcessSupervisor,
    key: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.supervisor.tracked.lock().remove(&self.key);
        self.supervisor.drained.notify_waiters();
    }
}

fn forward_output<R>(tool: String, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        info!("[{}] {}", tool, line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(tool = %tool, error = %e, "Stopped reading process output");
                    break;
                }
            }
        }
    });
}
