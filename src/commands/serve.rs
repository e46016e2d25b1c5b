//! HTTP server command

use anyhow::{Context, Result};
use std::net::SocketAddr;

use herald::config::Config;
use herald::server::HeraldServer;

use super::build_orchestrator;

/// Run the trigger surface until Ctrl-C
pub async fn serve(config: &Config, bind: Option<SocketAddr>, ticker: bool) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(addr) = bind {
        server_config.bind_address = addr;
    }
    server_config.enable_ticker |= ticker;

    let orchestrator = build_orchestrator(config).await?;
    let server = HeraldServer::new(server_config, orchestrator).context("Invalid server config")?;

    for line in server.info().display().lines() {
        tracing::info!("{line}");
    }

    server
        .start_with_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
