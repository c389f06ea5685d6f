//! Revtun Connector
//!
//! The private half of the tunnel:
//! - Dials the listener's signaling address
//! - Asks it to expose a target service
//! - Dials the target for every public client the listener reports

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use revtun::config::{parse_target, Config};
use revtun::tunnel::TunnelEngine;
use tracing::info;

/// Revtun Connector - private side of a reverse TCP tunnel
#[derive(Parser, Debug)]
#[command(name = "revtun-connector")]
#[command(about = "Revtun Connector - exposes a private TCP service through a listener")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Signaling address of the listener (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Target service to expose, as host or host:port (overrides config)
    #[arg(short, long)]
    target: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.as_str())
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    let connector_config = config.connector;

    let server = args
        .server
        .or_else(|| connector_config.as_ref().map(|c| c.server.clone()))
        .ok_or_else(|| anyhow!("No signaling address; pass --server or a config file"))?;
    let target = args
        .target
        .or_else(|| connector_config.as_ref().map(|c| c.target.clone()))
        .ok_or_else(|| anyhow!("No target; pass --target or a config file"))?;

    let (target_host, target_port) = parse_target(&target)?;

    info!("Revtun Connector v{}", revtun::VERSION);
    info!("Dialing listener at {}", server);

    let engine = TunnelEngine::new();
    let link = engine
        .dial_control(&server)
        .await
        .context("Failed to dial the listener")?;

    engine
        .start_tunnel_for(&link, &target_host, u32::from(target_port))
        .await
        .context("Failed to request the tunnel")?;
    info!("Tunnel requested for {}:{}", target_host, target_port);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
