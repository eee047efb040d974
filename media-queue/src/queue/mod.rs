//! Durable state: the pending queue and the download archive.

pub mod archive;
pub mod store;

pub use archive::DownloadArchive;
pub use store::QueueStore;
