//! Ledger of ids that already produced a deliverable.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::debug;

use crate::Result;
use crate::domain::JobId;
use crate::utils::fs;

pub struct DownloadArchive {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DownloadArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, id: &JobId) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let lines = fs::read_lines("reading download archive", &self.path).await?;
        Ok(lines.iter().any(|line| line.eq_ignore_ascii_case(id.as_str())))
    }

    /// Add `id` to the archive. Recording an id twice is a no-op.
    pub async fn record(&self, id: &JobId) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut lines = fs::read_lines("reading download archive", &self.path).await?;
        if lines.iter().any(|line| line.eq_ignore_ascii_case(id.as_str())) {
            return Ok(());
        }

        lines.push(id.to_string());
        fs::write_lines("writing download archive", &self.path, &lines).await?;
        debug!(job_id = %id, "Recorded in download archive");
        Ok(())
    }
}
