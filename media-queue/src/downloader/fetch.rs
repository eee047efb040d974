//! Fetch path: external download tool followed by an external transcode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use process_utils::tokio_command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resolver::MediaLocator;
use crate::domain::JobId;
use crate::process::{ProcessOutcome, ProcessSupervisor};
use crate::utils::fs;
use crate::{Error, Result};

/// Everything a fetcher needs for one backend attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: JobId,
    pub backend: String,
    pub domain: String,
    pub locator: MediaLocator,
}

/// Retrieve and convert the media behind a locator.
///
/// Returns the path of the finished deliverable.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> Result<PathBuf>;
}

/// Whether the download tool is pointed at the configured proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Direct,
    Proxied,
}

impl ProxyMode {
    pub fn flipped(self) -> Self {
        match self {
            Self::Direct => Self::Proxied,
            Self::Proxied => Self::Direct,
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Proxied => f.write_str("proxied"),
        }
    }
}

/// On-disk layout of job artifacts: `<root>/<ID>/<ID>.{ts,mp4}`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Container written by the download tool.
    pub fn intermediate(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(format!("{id}.ts"))
    }

    /// Final deliverable written by the transcode tool.
    pub fn deliverable(&self, id: &JobId) -> PathBuf {
        self.job_dir(id).join(format!("{id}.mp4"))
    }
}

/// Settings for [`ExternalFetcher`].
#[derive(Debug, Clone)]
pub struct ExternalFetcherConfig {
    pub download_tool: String,
    pub transcode_tool: String,
    pub proxy: Option<String>,
    /// Start with the proxy when one is configured.
    pub prefer_proxy: bool,
}

/// [`MediaFetcher`] driving external executables through the supervisor.
pub struct ExternalFetcher {
    config: ExternalFetcherConfig,
    layout: OutputLayout,
    supervisor: Arc<ProcessSupervisor>,
}

impl ExternalFetcher {
    pub fn new(
        config: ExternalFetcherConfig,
        layout: OutputLayout,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            config,
            layout,
            supervisor,
        }
    }

    fn initial_mode(&self) -> ProxyMode {
        if self.config.prefer_proxy && self.config.proxy.is_some() {
            ProxyMode::Proxied
        } else {
            ProxyMode::Direct
        }
    }

    /// Proxy URL for `mode`; proxied mode without a proxy runs direct.
    fn proxy_for(&self, mode: ProxyMode) -> Option<&str> {
        match mode {
            ProxyMode::Proxied => self.config.proxy.as_deref(),
            ProxyMode::Direct => None,
        }
    }

    fn download_args(&self, request: &FetchRequest, output: &Path, mode: ProxyMode) -> Vec<String> {
        let mut args = vec![
            "-u".to_string(),
            request.locator.url.clone(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
        ];

        if let Some(proxy) = self.proxy_for(mode) {
            args.extend(["-p".to_string(), proxy.to_string()]);
        }

        args.extend([
            "-H".to_string(),
            format!("Referer:http://{}", request.domain),
        ]);
        args
    }

    fn transcode_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    async fn download_attempt(
        &self,
        request: &FetchRequest,
        output: &Path,
        mode: ProxyMode,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let args = self.download_args(request, output, mode);
        info!(job_id = %request.id, backend = %request.backend, %mode, "Downloading stream");
        debug!(tool = %self.config.download_tool, ?args, "Download command");

        let mut command = tokio_command(&self.config.download_tool);
        command.args(&args);

        self.supervisor
            .run("download", command, cancel)
            .await
            .map_err(|e| Error::Download(e.to_string()))
    }

    /// Download with one retry in the opposite proxy mode.
    async fn download(&self, request: &FetchRequest, cancel: &CancellationToken) -> Result<PathBuf> {
        let output = self.layout.intermediate(&request.id);
        fs::ensure_dir_all_with_op("creating job directory", &self.layout.job_dir(&request.id))
            .await?;

        let first = self.initial_mode();
        match self.download_attempt(request, &output, first, cancel).await? {
            ProcessOutcome::Stopped => return Err(Error::Cancelled),
            outcome if outcome.success() => return Ok(output),
            _ if cancel.is_cancelled() => return Err(Error::Cancelled),
            _ => {}
        }

        let second = first.flipped();
        if second == ProxyMode::Proxied && self.config.proxy.is_none() {
            info!(job_id = %request.id, "First download attempt failed, retrying without proxy (none configured)");
        } else {
            info!(job_id = %request.id, %second, "First download attempt failed, retrying");
        }

        match self.download_attempt(request, &output, second, cancel).await? {
            ProcessOutcome::Stopped => Err(Error::Cancelled),
            outcome if outcome.success() => Ok(output),
            _ if cancel.is_cancelled() => Err(Error::Cancelled),
            ProcessOutcome::Exited(status) => Err(Error::Download(format!(
                "download tool failed in both proxy modes (last exit code {:?})",
                status.code()
            ))),
        }
    }

    async fn transcode(&self, id: &JobId, input: &Path, cancel: &CancellationToken) -> Result<PathBuf> {
        let output = self.layout.deliverable(id);
        let args = Self::transcode_args(input, &output);
        info!(job_id = %id, "Stream downloaded, transcoding to mp4");
        debug!(tool = %self.config.transcode_tool, ?args, "Transcode command");

        let mut command = tokio_command(&self.config.transcode_tool);
        command.args(&args);

        let outcome = self
            .supervisor
            .run("transcode", command, cancel)
            .await
            .map_err(|e| Error::Transcode(e.to_string()))?;

        let produced = tokio::fs::try_exists(&output).await.unwrap_or(false);
        match outcome {
            ProcessOutcome::Stopped => {
                remove_best_effort(&output, "partial deliverable").await;
                Err(Error::Cancelled)
            }
            ProcessOutcome::Exited(status) if status.success() && produced => {
                remove_best_effort(input, "intermediate file").await;
                Ok(output)
            }
            ProcessOutcome::Exited(status) if status.success() => Err(Error::Transcode(format!(
                "transcode tool exited successfully but {} is missing",
                output.display()
            ))),
            ProcessOutcome::Exited(status) => {
                remove_best_effort(&output, "partial deliverable").await;
                Err(Error::Transcode(format!(
                    "transcode tool exited with code {:?}",
                    status.code()
                )))
            }
        }
    }
}

#[async_trait]
impl MediaFetcher for ExternalFetcher {
    async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> Result<PathBuf> {
        let intermediate = self.download(request, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.transcode(&request.id, &intermediate, cancel).await
    }
}

async fn remove_best_effort(path: &Path, what: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed {}", what),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove {}", what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(proxy: Option<&str>, prefer_proxy: bool) -> ExternalFetcher {
        ExternalFetcher::new(
            ExternalFetcherConfig {
                download_tool: "m3u8-dl".to_string(),
                transcode_tool: "ffmpeg".to_string(),
                proxy: proxy.map(str::to_string),
                prefer_proxy,
            },
            OutputLayout::new("/videos"),
            Arc::new(ProcessSupervisor::default()),
        )
    }

    fn request() -> FetchRequest {
        FetchRequest {
            id: JobId::parse("abc-123").unwrap(),
            backend: "primary".to_string(),
            domain: "example.com".to_string(),
            locator: MediaLocator::new("https://cdn.example.com/v.m3u8"),
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("/videos");
        let id = JobId::parse("abc-123").unwrap();
        assert_eq!(layout.job_dir(&id), PathBuf::from("/videos/ABC-123"));
        assert_eq!(layout.intermediate(&id), PathBuf::from("/videos/ABC-123/ABC-123.ts"));
        assert_eq!(layout.deliverable(&id), PathBuf::from("/videos/ABC-123/ABC-123.mp4"));
    }

    #[test]
    fn test_initial_mode() {
        assert_eq!(fetcher(Some("http://p:1"), true).initial_mode(), ProxyMode::Proxied);
        assert_eq!(fetcher(Some("http://p:1"), false).initial_mode(), ProxyMode::Direct);
        assert_eq!(fetcher(None, true).initial_mode(), ProxyMode::Direct);
    }

    #[test]
    fn test_download_args() {
        let f = fetcher(Some("http://127.0.0.1:7890"), true);
        let output = PathBuf::from("/videos/ABC-123/ABC-123.ts");

        let proxied = f.download_args(&request(), &output, ProxyMode::Proxied);
        assert_eq!(
            proxied,
            vec![
                "-u",
                "https://cdn.example.com/v.m3u8",
                "-o",
                "/videos/ABC-123/ABC-123.ts",
                "-p",
                "http://127.0.0.1:7890",
                "-H",
                "Referer:http://example.com",
            ]
        );

        let direct = f.download_args(&request(), &output, ProxyMode::Direct);
        assert!(!direct.contains(&"-p".to_string()));
    }

    #[test]
    fn test_proxied_without_proxy_runs_direct() {
        let f = fetcher(None, true);
        let args = f.download_args(&request(), Path::new("/o.ts"), ProxyMode::Proxied);
        assert!(!args.contains(&"-p".to_string()));
    }

    #[test]
    fn test_transcode_args() {
        let args = ExternalFetcher::transcode_args(Path::new("/in.ts"), Path::new("/out.mp4"));
        assert_eq!(
            args,
            vec!["-y", "-hide_banner", "-i", "/in.ts", "-c", "copy", "-f", "mp4", "/out.mp4"]
        );
    }

    #[test]
    fn test_proxy_mode_flip() {
        assert_eq!(ProxyMode::Direct.flipped(), ProxyMode::Proxied);
        assert_eq!(ProxyMode::Proxied.flipped(), ProxyMode::Direct);
    }
}
