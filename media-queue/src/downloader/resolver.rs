//! Resolver capability: turn a job id into a streamable locator.

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::domain::JobId;

/// A streamable media location produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaLocator {
    /// Playlist or stream URL handed to the download tool.
    pub url: String,
    /// Human-readable label for logs (e.g. the selected resolution).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl MediaLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl std::fmt::Display for MediaLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{} ({})", self.url, label),
            None => f.write_str(&self.url),
        }
    }
}

/// Source-specific lookup of a media locator.
///
/// Implementations own every site detail (page URLs, scraping rules, network
/// timeouts). The core only sees success or a [`crate::Error::Resolve`].
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Find the locator for `id` on the site served at `domain`.
    async fn identify(&self, id: &JobId, domain: &str) -> Result<MediaLocator>;
}
