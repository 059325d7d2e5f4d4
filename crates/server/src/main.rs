//! relayhub daemon entry point.

mod config;

use std::sync::Arc;
use std::time::Duration;

use relayhub::Hub;
use relayhub_server::HubServer;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relayhub");

    let config = Config::load(config::config_path().as_deref())?;
    tracing::info!(bind = %config.bind, outbox = config.outbox_capacity, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("relayhub shut down cleanly");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let hub = Hub::spawn(config.hub_config());
    let server = HubServer::new(config.server_config(), hub.clone());

    let server_run = Arc::clone(&server);
    let mut serve = tokio::spawn(async move { server_run.run().await });

    if config.stats_interval_secs > 0 {
        let stats_hub = hub.clone();
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            while !stats_hub.is_shut_down() {
                interval.tick().await;
                let stats = stats_hub.stats().await;
                tracing::info!(
                    members = stats.members,
                    broadcasts = stats.broadcasts,
                    delivered = stats.delivered,
                    dropped = stats.dropped,
                    evicted = stats.evicted,
                    "hub stats"
                );
            }
        });
    }

    tokio::select! {
        result = &mut serve => {
            // The accept loop only returns early on a bind/listen failure.
            result??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutdown requested");
            server.shutdown();
            serve.await??;
        }
    }

    Ok(())
}
