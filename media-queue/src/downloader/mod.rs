//! Media acquisition: backend resolution followed by fetch and transcode.

pub mod fetch;
pub mod page_resolver;
pub mod registry;
pub mod resolver;

use std::sync::Arc;

pub use fetch::{
    ExternalFetcher, ExternalFetcherConfig, FetchRequest, MediaFetcher, OutputLayout, ProxyMode,
};
pub use page_resolver::PageResolver;
pub use registry::{BackendDescriptor, BackendRegistry};
pub use resolver::{MediaLocator, Resolver};

use crate::Result;
use crate::config::BackendConfig;

/// Build the registry for the configured backends, sharing one HTTP client.
pub fn build_registry(backends: &[BackendConfig], client: &reqwest::Client) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();

    for backend in backends {
        let pattern = backend
            .locator_pattern
            .as_deref()
            .unwrap_or(page_resolver::DEFAULT_LOCATOR_PATTERN);
        let resolver = PageResolver::new(
            backend.name.clone(),
            client.clone(),
            backend.page_templates.clone(),
            pattern,
        )?
        .with_preferred_height(backend.preferred_height);

        registry.register(
            BackendDescriptor::new(backend.name.clone(), backend.domain.clone(), backend.weight),
            Arc::new(resolver),
        );
    }

    Ok(registry)
}
