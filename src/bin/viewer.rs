//! chainpulse headless viewer
//!
//! Connects to a chainpulse hub, applies snapshots and "renders" each view
//! as a log line. Reconnects on abnormal closes within the configured budget.
//!
//! Usage:
//!   chainpulse-viewer --url ws://127.0.0.1:8080/ws
//!   chainpulse-viewer --config config/chainpulse.toml

use anyhow::Result;
use chainpulse::viewer::{run_viewer, ConnectionState, LogSurface, ReconnectPolicy, ViewerSession};
use chainpulse::{shutdown, AppConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Headless chainpulse viewer
#[derive(Parser)]
#[command(name = "chainpulse-viewer")]
struct Args {
    /// TOML config file; only the [viewer] section is used
    #[arg(short, long, env = "CHAINPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Hub WebSocket endpoint (overrides viewer.url)
    #[arg(short, long, env = "CHAINPULSE_URL")]
    url: Option<String>,

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
    if let Some(url) = args.url {
        config.viewer.url = url;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    if args.log_json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    let policy = ReconnectPolicy::from_config(&config.viewer);
    info!(
        "Viewer starting: {} (max {} reconnects, base delay {:?}, stale after {:?})",
        config.viewer.url,
        policy.max_attempts,
        policy.base_delay,
        config.viewer.stale_after()
    );

    let shutdown_rx = shutdown::listen()?;
    let mut session = ViewerSession::new(LogSurface::default(), policy, config.viewer.stale_after());

    let state = run_viewer(&config.viewer.url, &mut session, shutdown_rx).await;
    session.teardown();

    let surface = session.slots().surface();
    info!(
        "Viewer done: {:?} | {} frames, {} outdated, {} unknown, {} malformed | {} renders",
        state,
        session.counters.frames,
        session.counters.outdated,
        session.counters.unknown,
        session.counters.malformed,
        surface.created
    );

    if state == ConnectionState::Unavailable {
        warn!("Hub unavailable at {}", config.viewer.url);
        std::process::exit(2);
    }
    Ok(())
}
