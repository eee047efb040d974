//! Resolver that scrapes a playlist URL out of a content page.
//!
//! Page URLs come from templates (`{domain}`, `{id}`, `{id_lower}`), the
//! playlist URL from the first capture group of a per-backend pattern. When
//! the playlist turns out to be an HLS master playlist a single variant is
//! selected from it.

use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, Playlist, VariantStream};
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER};
use tracing::{debug, info, warn};
use url::Url;

use super::resolver::{MediaLocator, Resolver};
use crate::domain::JobId;
use crate::{Error, Result};

/// Default page template.
pub const DEFAULT_PAGE_TEMPLATE: &str = "https://{domain}/{id_lower}";

/// Default playlist pattern: the first absolute `.m3u8` URL on the page.
pub const DEFAULT_LOCATOR_PATTERN: &str = r#"(https?://[^"'\s<>]+?\.m3u8[^"'\s<>]*)"#;

pub struct PageResolver {
    name: String,
    client: reqwest::Client,
    page_templates: Vec<String>,
    pattern: Regex,
    preferred_height: Option<u64>,
}

impl PageResolver {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        page_templates: Vec<String>,
        pattern: &str,
    ) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid locator pattern for {name}: {e}")))?;
        let page_templates = if page_templates.is_empty() {
            vec![DEFAULT_PAGE_TEMPLATE.to_string()]
        } else {
            page_templates
        };

        Ok(Self {
            name,
            client,
            page_templates,
            pattern,
            preferred_height: None,
        })
    }

    pub fn with_preferred_height(mut self, height: Option<u64>) -> Self {
        self.preferred_height = height;
        self
    }

    fn page_urls(&self, id: &JobId, domain: &str) -> Vec<String> {
        self.page_templates
            .iter()
            .map(|template| render_template(template, id, domain))
            .collect()
    }

    async fn fetch_text(&self, url: &str, referer: Option<&str>) -> Result<String> {
        let mut request = self
            .client
            .get(url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Find the playlist URL on a page, resolved against the page URL.
    fn extract_locator(&self, page_url: &str, body: &str) -> Option<String> {
        let captures = self.pattern.captures(body)?;
        let raw = captures.get(1).or_else(|| captures.get(0))?.as_str();
        let raw = raw.replace("\\/", "/");

        match Url::parse(page_url).and_then(|base| base.join(&raw)) {
            Ok(url) => Some(url.to_string()),
            Err(_) => Some(raw),
        }
    }

    /// Follow a master playlist down to one variant.
    async fn select_stream(&self, playlist_url: &str, referer: &str) -> Result<MediaLocator> {
        let body = self
            .fetch_text(playlist_url, Some(referer))
            .await
            .map_err(|e| Error::resolve(&self.name, format!("playlist fetch failed: {e}")))?;

        match m3u8_rs::parse_playlist_res(body.as_bytes()) {
            Ok(Playlist::MasterPlaylist(master)) => {
                let variant = select_variant(&master, self.preferred_height).ok_or_else(|| {
                    Error::resolve(&self.name, "master playlist has no variants")
                })?;
                let url = Url::parse(playlist_url)
                    .and_then(|base| base.join(&variant.uri))
                    .map_err(|e| {
                        Error::resolve(&self.name, format!("bad variant uri {}: {e}", variant.uri))
                    })?;

                let mut locator = MediaLocator::new(url.to_string());
                if let Some(resolution) = variant.resolution {
                    locator = locator.with_label(format!("{}x{}", resolution.width, resolution.height));
                }
                Ok(locator)
            }
            Ok(Playlist::MediaPlaylist(_)) => Ok(MediaLocator::new(playlist_url)),
            Err(e) => Err(Error::resolve(
                &self.name,
                format!("unparsable playlist at {playlist_url}: {e}"),
            )),
        }
    }
}

#[async_trait]
impl Resolver for PageResolver {
    async fn identify(&self, id: &JobId, domain: &str) -> Result<MediaLocator> {
        for page_url in self.page_urls(id, domain) {
            debug!(resolver = %self.name, url = %page_url, "Fetching page");

            let body = match self.fetch_text(&page_url, None).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(resolver = %self.name, url = %page_url, error = %e, "Page request failed");
                    continue;
                }
            };

            if looks_like_not_found(&body) {
                warn!(resolver = %self.name, url = %page_url, "Page looks like a not-found page");
                continue;
            }

            let Some(playlist_url) = self.extract_locator(&page_url, &body) else {
                debug!(resolver = %self.name, url = %page_url, "No playlist on page");
                continue;
            };

            info!(resolver = %self.name, url = %page_url, playlist = %playlist_url, "Found playlist");
            let locator = self.select_stream(&playlist_url, &page_url).await?;
            info!(resolver = %self.name, locator = %locator, "Selected stream");
            return Ok(locator);
        }

        Err(Error::resolve(
            &self.name,
            format!("no playlist found for {id}"),
        ))
    }
}

fn render_template(template: &str, id: &JobId, domain: &str) -> String {
    template
        .replace("{domain}", domain)
        .replace("{id_lower}", &id.as_str().to_lowercase())
        .replace("{id}", id.as_str())
}

/// Heuristic for soft-404 pages that still answer 200.
fn looks_like_not_found(body: &str) -> bool {
    let Some(start) = body.find("<title") else {
        return false;
    };
    let rest = &body[start..];
    let title = rest
        .find('>')
        .and_then(|open| rest[open + 1..].find("</title>").map(|end| &rest[open + 1..open + 1 + end]))
        .unwrap_or_default()
        .to_lowercase();

    title.trim_start().starts_with("404") || title.contains("not found")
}

/// Pick the variant at `preferred_height`, else the highest bandwidth.
fn select_variant(master: &MasterPlaylist, preferred_height: Option<u64>) -> Option<&VariantStream> {
    let candidates = master.variants.iter().filter(|v| !v.is_i_frame);

    if let Some(height) = preferred_height
        && let Some(variant) = candidates
            .clone()
            .find(|v| v.resolution.is_some_and(|r| r.height == height))
    {
        return Some(variant);
    }

    candidates.max_by_key(|v| v.bandwidth)
}
