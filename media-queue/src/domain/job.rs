//! Job identity and task status.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Normalized job identifier (trimmed, uppercased).
///
/// Ids name directories under the save directory, so only ASCII
/// alphanumerics, `-`, `_` and `.` are accepted, and `..` never appears.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Normalize and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty()
            || normalized.starts_with('.')
            || normalized.contains("..")
            || !normalized.chars().all(is_id_char)
        {
            return Err(Error::InvalidJobId(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Claimed by the worker.
    Downloading,
    /// Deliverable produced.
    Completed,
    /// Every backend failed, or the task was stopped.
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: JobId,
    #[serde(rename = "status")]
    pub state: TaskState,
    pub message: String,
}

impl TaskStatus {
    pub fn new(id: JobId, state: TaskState, message: impl Into<String>) -> Self {
        Self {
            id,
            state,
            message: message.into(),
        }
    }
}
