//! SIGINT/SIGTERM -> watch channel shared by every long-running task

use anyhow::{Context, Result};
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::watch;
use tracing::info;

/// Flag flips to `true` on the first SIGINT or SIGTERM
pub fn listen() -> Result<watch::Receiver<bool>> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Some(sig) = signals.next().await {
            let name = if sig == SIGINT { "SIGINT" } else { "SIGTERM" };
            info!("Received {}, shutting down", name);
            let _ = tx.send(true);
        }
        // Keep the sender alive so receivers see the flag, not a closed channel
        tx.closed().await;
    });

    Ok(rx)
}
