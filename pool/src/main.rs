// forgepool - multi-coin Stratum mining pool core
//
// Wiring: template poller -> job manager -> stratum server; accepted shares
// and block candidates leave on a channel for the persistence / submission
// services.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use forgepool::blockchain::TemplateManager;
use forgepool::config::Config;
use forgepool::jobs::manager::JobFactory;
use forgepool::jobs::JobManager;
use forgepool::stratum::server::ShareEvent;
use forgepool::stratum::StratumServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "forgepool.toml".to_string());
    let config = Config::load(&config_path)?;
    tracing::info!(
        coin = ?config.coin,
        listen = %config.listen,
        "forgepool starting"
    );

    let (share_tx, share_rx) = mpsc::unbounded_channel();
    spawn_share_sink(share_rx);

    let factory = JobFactory::from_config(&config);
    let jobs = Arc::new(JobManager::new(factory));

    let templates = TemplateManager::new(config.coin, &config.upstream)?;
    templates.start(Arc::clone(&jobs));

    let server = Arc::new(StratumServer::new(config, jobs, share_tx));
    server.start().await
}

/// Boundary to the persistence / block-submission services. They consume
/// this stream out-of-process; here every event is logged and block
/// candidates are surfaced loudly.
fn spawn_share_sink(mut share_rx: mpsc::UnboundedReceiver<ShareEvent>) {
    tokio::spawn(async move {
        while let Some(event) = share_rx.recv().await {
            if event.share.is_block_candidate {
                tracing::info!(
                    worker = %event.worker,
                    height = event.share.block_height,
                    hash = event.share.block_hash.as_deref().unwrap_or(""),
                    has_block_hex = event.block_hex.is_some(),
                    "block candidate ready for submission"
                );
            }
            tracing::debug!(
                worker = %event.worker,
                job = %event.job_id,
                difficulty = event.share.difficulty,
                "share forwarded"
            );
        }
    });
}
