//! Application configuration loaded from a JSON file.
//!
//! Every key is optional. A missing file yields the defaults, so a fresh
//! install starts with an empty backend list and local directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Environment variable pointing at the configuration file.
pub const CONFIG_PATH_ENV: &str = "MEDIA_QUEUE_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
    /// Newline-delimited list of ids already downloaded.
    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,
    /// Proxy URL; an empty string means no proxy.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub proxy: Option<String>,
    /// Start the download tool through the proxy.
    #[serde(default)]
    pub use_proxy_for_video: bool,
    #[serde(default = "default_download_tool")]
    pub download_tool: String,
    #[serde(default = "default_transcode_tool")]
    pub transcode_tool: String,
    /// Per-request timeout for page and playlist requests.
    #[serde(default = "default_resolver_timeout")]
    pub resolver_timeout_secs: u64,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue.txt")
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("data/downloaded.txt")
}

fn default_download_tool() -> String {
    "m3u8-downloader".to_string()
}

fn default_transcode_tool() -> String {
    "ffmpeg".to_string()
}

fn default_resolver_timeout() -> u64 {
    15
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            save_dir: default_save_dir(),
            queue_path: default_queue_path(),
            archive_path: default_archive_path(),
            proxy: None,
            use_proxy_for_video: false,
            download_tool: default_download_tool(),
            transcode_tool: default_transcode_tool(),
            resolver_timeout_secs: default_resolver_timeout(),
            worker: WorkerSection::default(),
            api: ApiSection::default(),
            backends: Vec::new(),
        }
    }
}

/// Worker loop timings, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub poll_interval_secs: u64,
    pub cooldown_min_secs: u64,
    pub cooldown_max_secs: u64,
    pub error_backoff_secs: u64,
    pub stop_grace_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            cooldown_min_secs: 300,
            cooldown_max_secs: 900,
            error_backoff_secs: 60,
            stop_grace_secs: 5,
        }
    }
}

impl WorkerSection {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 12580,
            enable_cors: true,
        }
    }
}

/// One download backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// Site domain; the backend is skipped while unset or empty.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub domain: Option<String>,
    /// Attempt priority, higher first. Zero disables the backend.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Page URL templates with `{domain}`, `{id}` and `{id_lower}` placeholders.
    #[serde(default)]
    pub page_templates: Vec<String>,
    /// Regex whose first capture group is the playlist URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_height: Option<u64>,
}

fn default_weight() -> u32 {
    1
}

fn empty_string_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl AppConfig {
    /// Resolve the configuration path from the environment.
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load and validate the file at `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw).map_err(|e| {
                Error::config(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(Error::io_path("reading config", path, e)),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let worker = &self.worker;
        if worker.cooldown_min_secs > worker.cooldown_max_secs {
            return Err(Error::config(format!(
                "worker.cooldown_min_secs ({}) exceeds worker.cooldown_max_secs ({})",
                worker.cooldown_min_secs, worker.cooldown_max_secs
            )));
        }
        if worker.poll_interval_secs == 0 {
            return Err(Error::config("worker.poll_interval_secs must be positive"));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let name = backend.name.trim();
            if name.is_empty() {
                return Err(Error::config("backend name must not be empty"));
            }
            if !seen.insert(name.to_string()) {
                return Err(Error::config(format!("duplicate backend name: {name}")));
            }
        }

        Ok(())
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver_timeout_secs)
    }
}
