//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::domain::JobId;
use crate::downloader::BackendDescriptor;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    /// Raw job id; normalized before queueing.
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub id: JobId,
    /// False when the id was not queued.
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    /// Whether a task was running when the stop was requested.
    pub active: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClearFailedResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub current_task: Option<JobId>,
    pub tracked_processes: usize,
    pub backends: Vec<BackendDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
    pub available_modules: Vec<ModuleInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}
