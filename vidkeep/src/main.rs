use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vidkeep::api::{ApiServer, ApiServerConfig};
use vidkeep::config::ServiceConfig;
use vidkeep::database;
use vidkeep::downloader::{FetchProvider, YtDlpConfig, YtDlpProvider};
use vidkeep::logging;
use vidkeep::services::ServiceContainer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServiceConfig::from_env_or_default();
    config.validate()?;

    let (logging_config, _log_guard) = logging::init_logging(&config.log_dir)?;

    let pool = database::init_pool(&config.database_url)
        .await
        .context("opening database")?;
    database::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let provider = YtDlpProvider::new(YtDlpConfig {
        binary_path: config.ytdlp_path.clone(),
        max_height: config.max_video_height,
    });
    if provider.is_available() {
        info!(
            version = provider.version().as_deref().unwrap_or("unknown"),
            "Using yt-dlp"
        );
    } else {
        warn!(path = %config.ytdlp_path, "yt-dlp not found; jobs will fail until it is installed");
    }

    let services = ServiceContainer::new(&config, pool, Arc::new(provider));
    services.initialize().await?;

    let background = CancellationToken::new();
    logging_config.start_retention_cleanup(background.clone());

    let server = ApiServer::with_state(
        ApiServerConfig::from_env_or_default(),
        services.app_state().with_logging_config(logging_config),
    );
    let shutdown = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
        shutdown.cancel();
    });

    let served = server.run().await;

    background.cancel();
    services.shutdown().await;

    served?;
    info!("vidkeep stopped");
    Ok(())
}
