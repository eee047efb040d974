//! Weighted backend registry with ordered fallback.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::fetch::{FetchRequest, MediaFetcher};
use super::resolver::Resolver;
use crate::domain::JobId;
use crate::{Error, Result};

/// Static description of a configured backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    /// Site domain; a backend without one is skipped.
    pub domain: Option<String>,
    /// Higher runs first, zero disables the backend.
    pub weight: u32,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, domain: Option<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            domain: domain.filter(|d| !d.trim().is_empty()),
            weight,
        }
    }
}

struct Backend {
    descriptor: BackendDescriptor,
    resolver: Arc<dyn Resolver>,
}

/// Backends kept in attempt order: weight descending, ties in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: BackendDescriptor, resolver: Arc<dyn Resolver>) {
        info!(
            backend = %descriptor.name,
            weight = descriptor.weight,
            domain = descriptor.domain.as_deref().unwrap_or("<unset>"),
            "Registered backend"
        );
        self.backends.push(Backend {
            descriptor,
            resolver,
        });
        // Stable sort keeps registration order among equal weights.
        self.backends
            .sort_by(|a, b| b.descriptor.weight.cmp(&a.descriptor.weight));
    }

    /// Every registered backend in attempt order, disabled ones included.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends.iter().map(|b| b.descriptor.clone()).collect()
    }

    fn active(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter().filter(|b| b.descriptor.weight > 0)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Try each active backend in order until one delivers the job.
    ///
    /// A stop request ends the walk with [`Error::Cancelled`]; otherwise the
    /// first backend whose resolve and fetch both succeed wins.
    pub async fn download(
        &self,
        id: &JobId,
        fetcher: &dyn MediaFetcher,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let mut failures = Vec::new();

        for backend in self.active() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let name = &backend.descriptor.name;
            let Some(domain) = backend.descriptor.domain.as_deref() else {
                warn!(backend = %name, job_id = %id, "Backend has no domain configured, skipping");
                failures.push(format!("{name}: no domain configured"));
                continue;
            };

            info!(backend = %name, job_id = %id, "Resolving media");
            let resolved = tokio::select! {
                result = backend.resolver.identify(id, domain) => result,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };

            let locator = match resolved {
                Ok(locator) => locator,
                Err(e) => {
                    warn!(backend = %name, job_id = %id, error = %e, "Resolution failed, trying next backend");
                    failures.push(format!("{name}: {e}"));
                    continue;
                }
            };

            let request = FetchRequest {
                id: id.clone(),
                backend: name.clone(),
                domain: domain.to_string(),
                locator,
            };

            match fetcher.fetch(&request, cancel).await {
                Ok(path) => {
                    info!(backend = %name, job_id = %id, path = %path.display(), "Backend delivered media");
                    return Ok(path);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(backend = %name, job_id = %id, error = %e, "Fetch failed, trying next backend");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        let summary = if failures.is_empty() {
            "no backends configured".to_string()
        } else {
            failures.join("; ")
        };

        Err(Error::AllBackendsFailed {
            id: id.to_string(),
            summary,
        })
    }
}
