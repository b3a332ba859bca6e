//! `serve` command — run the hub broker in the foreground.
//!
//! This is what the bridge spawns (detached) when no hub is running, and
//! what you run by hand when debugging. Startup fails if a live hub
//! already owns the runtime directory. The process exits on its own once
//! the last consumer disconnects, or on SIGINT/SIGTERM/SIGHUP.

// Rust guideline compliant 2026-08

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::constants::SIGNAL_POLL_INTERVAL;
use crate::hub::Hub;

/// Run the hub until shutdown.
///
/// # Errors
///
/// Returns an error if startup fails or graceful shutdown exceeds its
/// bound (the caller turns that into a non-zero exit).
pub fn run() -> Result<()> {
    let config = Config::load();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone())?;

    let (hub, event_rx) = Hub::start(config).await?;
    hub.run(event_rx, shutdown).await
}

/// Translate process signals into a cancellation.
///
/// signal-hook only flips flags from the handler, so a poller task watches
/// the flag and fires the token from safe async context.
fn spawn_signal_watcher(shutdown: CancellationToken) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;

    let signaled = Arc::new(AtomicBool::new(false));
    flag::register(SIGINT, Arc::clone(&signaled))?;
    flag::register(SIGTERM, Arc::clone(&signaled))?;
    flag::register(SIGHUP, Arc::clone(&signaled))?;

    tokio::spawn(async move {
        loop {
            if signaled.load(Ordering::SeqCst) {
                log::info!("[Serve] Signal received, beginning shutdown");
                shutdown.cancel();
                return;
            }
            tokio::time::sleep(SIGNAL_POLL_INTERVAL).await;
        }
    });

    Ok(())
}
