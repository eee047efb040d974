//! Domain types shared by the queue, the worker and the API.

pub mod job;

pub use job::{JobId, TaskState, TaskStatus};
