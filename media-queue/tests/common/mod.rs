//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use media_queue::domain::JobId;
use media_queue::downloader::{
    BackendDescriptor, BackendRegistry, FetchRequest, MediaFetcher, MediaLocator, OutputLayout,
    Resolver,
};
use media_queue::process::ProcessSupervisor;
use media_queue::queue::{DownloadArchive, QueueStore};
use media_queue::status::StatusRegistry;
use media_queue::worker::{Components, Orchestrator, WorkerConfig};
use media_queue::{Error, Result};

/// Worker timings short enough for tests.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(50),
        cooldown_min: Duration::from_millis(10),
        cooldown_max: Duration::from_millis(10),
        error_backoff: Duration::from_millis(50),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub queue: Arc<QueueStore>,
    pub status: Arc<StatusRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub layout: OutputLayout,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(registry: BackendRegistry, fetcher: Arc<dyn MediaFetcher>, config: WorkerConfig) -> Self {
        Self::with_supervisor(
            registry,
            fetcher,
            config,
            Arc::new(ProcessSupervisor::default()),
            tempfile::tempdir().unwrap(),
        )
    }

    pub fn with_supervisor(
        registry: BackendRegistry,
        fetcher: Arc<dyn MediaFetcher>,
        config: WorkerConfig,
        supervisor: Arc<ProcessSupervisor>,
        dir: TempDir,
    ) -> Self {
        let queue = Arc::new(QueueStore::new(dir.path().join("queue.txt")));
        let status = Arc::new(StatusRegistry::new());
        let layout = OutputLayout::new(dir.path().join("videos"));

        let orchestrator = Arc::new(Orchestrator::new(
            Components {
                queue: queue.clone(),
                archive: DownloadArchive::new(dir.path().join("archive.txt")),
                status: status.clone(),
                supervisor: supervisor.clone(),
                registry,
                fetcher,
                layout: layout.clone(),
            },
            config,
        ));

        Self {
            dir,
            queue,
            status,
            supervisor,
            layout,
            orchestrator,
        }
    }

    pub async fn queued(&self) -> Vec<String> {
        self.queue
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

pub fn job(raw: &str) -> JobId {
    JobId::parse(raw).unwrap()
}

/// Resolver that either always succeeds or always fails, counting calls.
pub struct FakeResolver {
    succeed: bool,
    pub calls: AtomicUsize,
}

impl FakeResolver {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn identify(&self, id: &JobId, domain: &str) -> Result<MediaLocator> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(MediaLocator::new(format!("https://{domain}/{id}/index.m3u8")))
        } else {
            Err(Error::resolve(domain, "page not found"))
        }
    }
}

/// Registry with one enabled backend per resolver, in the given order.
pub fn registry_of(resolvers: &[Arc<FakeResolver>]) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    let count = resolvers.len() as u32;
    for (i, resolver) in resolvers.iter().enumerate() {
        let name = format!("backend-{i}");
        registry.register(
            BackendDescriptor::new(name.clone(), Some(format!("{name}.example")), count - i as u32),
            resolver.clone(),
        );
    }
    registry
}

/// How [`FakeFetcher`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBehavior {
    Succeed,
    Fail,
    /// Block until the stop flag fires.
    BlockUntilCancelled,
}

/// Fetcher recording each request with its start and end times.
pub struct FakeFetcher {
    behavior: FetchBehavior,
    delay: Duration,
    pub requests: Mutex<Vec<(FetchRequest, Instant, Instant)>>,
    pub started: Notify,
}

impl FakeFetcher {
    pub fn new(behavior: FetchBehavior) -> Arc<Self> {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: FetchBehavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delay,
            requests: Mutex::new(Vec::new()),
            started: Notify::new(),
        })
    }

    pub fn backends(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|(request, _, _)| request.backend.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> Result<PathBuf> {
        let start = Instant::now();
        self.started.notify_one();

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = match self.behavior {
            FetchBehavior::Succeed => Ok(PathBuf::from(format!("/videos/{}.mp4", request.id))),
            FetchBehavior::Fail => Err(Error::Download("tool exited with code 1".to_string())),
            FetchBehavior::BlockUntilCancelled => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        };

        self.requests
            .lock()
            .push((request.clone(), start, Instant::now()));
        result
    }
}
