use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use media_queue::api::{ApiServer, ApiServerConfig, AppState};
use media_queue::config::AppConfig;
use media_queue::downloader::{self, ExternalFetcher, ExternalFetcherConfig, OutputLayout};
use media_queue::logging;
use media_queue::process::ProcessSupervisor;
use media_queue::queue::{DownloadArchive, QueueStore};
use media_queue::status::StatusRegistry;
use media_queue::utils::http_client;
use media_queue::worker::{Components, Orchestrator, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = AppConfig::path_from_env();
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let status = Arc::new(StatusRegistry::new());
    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir, status.clone())
        .context("initializing logging")?;

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.clone());

    info!(
        config = %config_path.display(),
        queue = %config.queue_path.display(),
        save_dir = %config.save_dir.display(),
        backends = config.backends.len(),
        "media-queue starting"
    );

    http_client::install_rustls_provider();
    let client = http_client::build_client(config.proxy.as_deref(), config.resolver_timeout())
        .context("building HTTP client")?;
    let registry = downloader::build_registry(&config.backends, &client)
        .context("building backend registry")?;

    let supervisor = Arc::new(ProcessSupervisor::new(config.worker.stop_grace()));
    let layout = OutputLayout::new(&config.save_dir);
    let fetcher = ExternalFetcher::new(
        ExternalFetcherConfig {
            download_tool: config.download_tool.clone(),
            transcode_tool: config.transcode_tool.clone(),
            proxy: config.proxy.clone(),
            prefer_proxy: config.use_proxy_for_video,
        },
        layout.clone(),
        supervisor.clone(),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        Components {
            queue: Arc::new(QueueStore::new(&config.queue_path)),
            archive: DownloadArchive::new(&config.archive_path),
            status,
            supervisor,
            registry,
            fetcher: Arc::new(fetcher),
            layout,
        },
        WorkerConfig::from(&config.worker),
    ));

    orchestrator
        .restore()
        .await
        .context("reading persisted queue")?;
    let worker = orchestrator.start();

    let state = AppState::new(orchestrator.clone()).with_logging_config(logging_config);
    let server = ApiServer::new(
        ApiServerConfig::from(&config.api).with_env_overrides(),
        state,
    );
    let server_token = server.cancel_token();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        server_token.cancel();
    });

    let served = server.run().await;

    shutdown.cancel();
    orchestrator.shutdown();
    if let Err(e) = worker.await {
        error!(error = %e, "Worker task panicked");
    }
    info!("media-queue stopped");

    served.context("running API server")
}
