//! Reverse-tunnel relay daemon
//!
//! Binds the public external listener and the agent tunnel listener,
//! wires both to one shared relay engine, and keeps the accept loops
//! alive under supervision until ctrl-c.

mod config;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_core::{EngineConfig, RelayEngine};
use burrow_relay::{
    supervise, ExternalServer, ExternalServerConfig, TunnelServer, TunnelServerConfig,
};

use config::FileConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_EXTERNAL_PORT: u16 = 8002;
const DEFAULT_TUNNEL_PORT: u16 = 8003;
const SUPERVISOR_COOLDOWN: Duration = Duration::from_secs(1);

/// Reverse-tunnel relay: exposes a NAT'd service through one outbound
/// agent connection.
#[derive(Parser, Debug)]
#[command(name = "burrowd")]
#[command(about = "Run a reverse-tunnel relay server", long_about = None)]
struct Args {
    /// JSON config file providing defaults for the flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address both listeners bind on
    #[arg(long)]
    bind_addr: Option<IpAddr>,

    /// TCP port public clients connect to
    #[arg(long)]
    external_port: Option<u16>,

    /// TCP port the internal agent connects to
    #[arg(long)]
    tunnel_port: Option<u16>,

    /// Shared secret the agent must present
    #[arg(long, env = "BURROW_SECRET")]
    secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let bind_addr: IpAddr = match args.bind_addr {
        Some(addr) => addr,
        None => file
            .bind_addr
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse()
            .context("invalid bind_addr in config file")?,
    };
    let external_port = args
        .external_port
        .or(file.external_port)
        .unwrap_or(DEFAULT_EXTERNAL_PORT);
    let tunnel_port = args
        .tunnel_port
        .or(file.tunnel_port)
        .unwrap_or(DEFAULT_TUNNEL_PORT);
    let secret = args
        .secret
        .or(file.secret)
        .context("shared secret is required (--secret, BURROW_SECRET, or config file)")?;

    info!("starting burrow relay");
    let engine = Arc::new(RelayEngine::new(EngineConfig::default()));

    // Bind both sockets up front: a bind failure is the one fatal
    // startup error. Everything past this point is supervised.
    let external_config = ExternalServerConfig {
        bind_addr: SocketAddr::new(bind_addr, external_port),
        ..ExternalServerConfig::default()
    };
    let external = Arc::new(
        ExternalServer::bind(external_config, engine.clone())
            .await
            .context("failed to bind external listener")?,
    );

    let tunnel_config = TunnelServerConfig::new(SocketAddr::new(bind_addr, tunnel_port), secret);
    let tunnel = Arc::new(
        TunnelServer::bind(tunnel_config, engine.clone())
            .await
            .context("failed to bind tunnel listener")?,
    );

    let external_handle = tokio::spawn(async move {
        supervise("external listener", SUPERVISOR_COOLDOWN, move || {
            external.clone().run()
        })
        .await;
    });
    let tunnel_handle = tokio::spawn(async move {
        supervise("tunnel listener", SUPERVISOR_COOLDOWN, move || {
            tunnel.clone().run()
        })
        .await;
    });

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    external_handle.abort();
    tunnel_handle.abort();
    info!("relay stopped");

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
