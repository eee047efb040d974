//! The single download worker and the controller operations around it.

mod orchestrator;

use std::time::Duration;

pub use orchestrator::{Components, Orchestrator, QueueStatus};

use crate::config::WorkerSection;

/// Timings of the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fallback re-check interval while the queue is empty.
    pub poll_interval: Duration,
    /// Lower bound of the randomized pause after a completed download.
    pub cooldown_min: Duration,
    /// Upper bound of the randomized pause after a completed download.
    pub cooldown_max: Duration,
    /// Pause after an iteration failed unexpectedly.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerSection::default())
    }
}

impl From<&WorkerSection> for WorkerConfig {
    fn from(section: &WorkerSection) -> Self {
        Self {
            poll_interval: Duration::from_secs(section.poll_interval_secs),
            cooldown_min: Duration::from_secs(section.cooldown_min_secs),
            cooldown_max: Duration::from_secs(section.cooldown_max_secs),
            error_backoff: Duration::from_secs(section.error_backoff_secs),
        }
    }
}

/// What the loop should do after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The queue was empty.
    Idle,
    /// Re-enter the loop right away.
    Continue,
    /// Pause before the next iteration.
    Cooldown(Duration),
}
