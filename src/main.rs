//! chainpulse server
//!
//! Polls the node, maintains the snapshot cache and serves viewers over
//! WebSocket until SIGINT/SIGTERM.
//!
//! Usage:
//!   chainpulse --config config/chainpulse.toml
//!   chainpulse --listen 127.0.0.1:9000 --log-json

use anyhow::{Context, Result};
use chainpulse::hub::server;
use chainpulse::{
    run_data_collector, shutdown, AppConfig, CacheStore, Collector, Hub, JsonRpcClient,
    LifecycleTracker, Poller,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Live blockchain dashboard backend
#[derive(Parser)]
#[command(name = "chainpulse")]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long, env = "CHAINPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Override hub.listen
    #[arg(short, long)]
    listen: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.apply_env();
    if let Some(listen) = args.listen {
        config.hub.listen = listen;
    }
    config.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    if args.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    info!("===========================================");
    info!("   chainpulse v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    match &args.config {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using defaults"),
    }
    info!("Node RPC: {}", config.node.rpc_url);
    info!("Poll interval: {}s", config.poller.poll_interval_secs);
    info!(
        "Windows: {} blocks, {} confirmed txs",
        config.cache.block_capacity, config.cache.confirmed_capacity
    );
    info!("Known pools: {}", config.pools.len());

    let shutdown_rx = shutdown::listen()?;

    let rpc = Arc::new(JsonRpcClient::new(&config.node).context("Failed to build RPC client")?);
    let store = Arc::new(CacheStore::new(
        config.cache.block_capacity,
        config.cache.confirmed_capacity,
    ));
    let hub = Arc::new(Hub::new(Arc::clone(&store), config.hub.session_queue_capacity));

    let collector = Collector::new(
        Poller::new(rpc, &config),
        LifecycleTracker::new(&config.tracker),
        Arc::clone(&store),
        Arc::clone(&hub),
    );
    let collector_task = tokio::spawn(run_data_collector(
        collector,
        config.poll_interval(),
        config.general.stats_every_ticks,
        shutdown_rx.clone(),
    ));

    let served = server::serve(Arc::clone(&hub), &config.hub.listen, shutdown_rx).await;
    if let Err(e) = &served {
        error!("Hub server error: {:#}", e);
        collector_task.abort();
        return served;
    }

    match collector_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Data collector error: {:#}", e),
        Err(e) => error!("Data collector task panicked: {}", e),
    }

    info!("chainpulse stopped");
    served
}
