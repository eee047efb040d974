//! media-queue library crate.
//!
//! A single-worker download queue for streamable media: jobs are persisted in
//! a plain queue file, resolved through weighted backends, fetched and
//! transcoded by supervised external tools, and controlled over HTTP.

pub mod api;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod process;
pub mod queue;
pub mod status;
pub mod utils;
pub mod worker;

pub use error::{Error, Result};
