//! Revtun Listener
//!
//! The publicly reachable half of the tunnel:
//! - Accepts signaling connections from connectors
//! - Binds an ephemeral public port per tunnel
//! - Multiplexes public clients over the signaling connection

use anyhow::{Context, Result};
use clap::Parser;
use revtun::config::{Config, ListenerConfig};
use revtun::tunnel::TunnelEngine;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Revtun Listener - public side of a reverse TCP tunnel
#[derive(Parser, Debug)]
#[command(name = "revtun-listener")]
#[command(about = "Revtun Listener - accepts tunnels and exposes public ports")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Signaling address to bind (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

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

    let listen_addr = args
        .listen
        .or_else(|| config.listener.map(|l| l.listen))
        .unwrap_or_else(|| ListenerConfig::default().listen);

    info!("Revtun Listener v{}", revtun::VERSION);
    info!("Signaling on {}", listen_addr);

    let signaling = TcpListener::bind(&listen_addr)
        .await
        .context("Failed to bind signaling address")?;

    let engine = TunnelEngine::new();

    loop {
        tokio::select! {
            accept_result = signaling.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        info!("Connector attached from {}", peer_addr);
                        stream.set_nodelay(true).ok();
                        engine.attach_incoming_control(Box::new(stream));
                        debug!("{} control link(s) active", engine.link_count());
                    }
                    Err(e) => {
                        error!("Signaling accept error: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
