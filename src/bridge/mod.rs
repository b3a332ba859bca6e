//! Client-side singleton bridge: find or start the hub, then relay stdio.
//!
//! Every `connect` invocation runs the same sequence, so any number of
//! consumers can race without ever producing two hubs:
//!
//! ```text
//! probe socket ──ok──► bridge stdio
//!      │fail
//!      ▼
//! try hub.lock ──busy──► wait + poll-connect (someone else is electing)
//!      │held
//!      ▼
//! re-probe ──ok──► bridge stdio
//!      │fail
//!      ▼
//! spawn `canvas-hub serve` (detached) ──► poll-connect ──► bridge stdio
//! ```
//!
//! The lock is released on every path; a spawned child that never becomes
//! reachable is killed rather than orphaned. A hub-side disconnect restarts
//! the whole sequence, so a hub crash heals itself from the consumer's
//! point of view; local end-of-input ends the bridge cleanly.

// Rust guideline compliant 2026-08

pub mod lock;

pub use lock::LeaderLock;

use std::path::Path;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::config::Config;
use crate::constants::{
    CONNECT_BACKOFF_BASE, CONNECT_BACKOFF_CAP, HUB_STARTUP_TIMEOUT, LOCK_ATTEMPTS,
    LOCK_RETRY_DELAY, MAX_LINE_BYTES, RECONNECT_DELAY,
};

/// How a bridge session ended.
#[derive(Debug, PartialEq, Eq)]
enum BridgeEnd {
    /// Local input reached end-of-file; the consumer is done.
    LocalEof,
    /// The hub side closed or errored; worth reconnecting.
    HubClosed,
}

/// Connect to the hub (starting one if needed) and relay stdio until the
/// local side closes.
///
/// # Errors
///
/// Returns an error if no hub becomes reachable within the startup
/// timeout, or spawning one fails.
pub async fn run_bridge(config: &Config) -> Result<()> {
    let socket_path = config.socket_path();
    let lock_path = config.lock_path();

    // stdin is read on a blocking thread for the life of the process so a
    // reconnect never loses buffered input.
    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
    tokio::task::spawn_blocking(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if stdin_tx.send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        // Dropping the sender is the end-of-input signal.
    });

    let mut stdout = tokio::io::stdout();

    loop {
        let stream = connect_or_elect(&socket_path, &lock_path).await?;
        log::info!("[Bridge] Session established");

        match bridge_session(stream, &mut stdin_rx, &mut stdout).await {
            BridgeEnd::LocalEof => {
                log::info!("[Bridge] Local input closed, exiting");
                return Ok(());
            }
            BridgeEnd::HubClosed => {
                log::warn!(
                    "[Bridge] Hub connection lost, reconnecting in {}ms",
                    RECONNECT_DELAY.as_millis()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Connect to a running hub, or win the election and start one.
async fn connect_or_elect(socket_path: &Path, lock_path: &Path) -> Result<UnixStream> {
    if let Ok(stream) = UnixStream::connect(socket_path).await {
        log::debug!("[Bridge] Hub already running");
        return Ok(stream);
    }

    match acquire_lock_with_retries(lock_path).await? {
        Some(lock) => {
            // We are the elected spawner. Probe once more first: the
            // previous holder may have finished while we were retrying.
            if let Ok(stream) = UnixStream::connect(socket_path).await {
                drop(lock);
                return Ok(stream);
            }

            let child = spawn_hub()?;
            let pid = child.id();
            let child_guard = scopeguard::guard(child, move |mut child| {
                log::warn!("[Bridge] Spawned hub (pid={pid}) never became reachable, killing it");
                let _ = child.kill();
            });

            let result = poll_connect(socket_path, HUB_STARTUP_TIMEOUT).await;
            if result.is_ok() {
                // Reachable: the hub owns its own lifetime from here.
                let _ = scopeguard::ScopeGuard::into_inner(child_guard);
                log::info!("[Bridge] Spawned hub (pid={pid}) is ready");
            }
            drop(lock);
            result
        }
        None => {
            log::debug!("[Bridge] Another process is electing, waiting for its hub");
            poll_connect(socket_path, HUB_STARTUP_TIMEOUT).await
        }
    }
}

/// Try the leader lock a bounded number of times.
async fn acquire_lock_with_retries(lock_path: &Path) -> Result<Option<LeaderLock>> {
    for attempt in 0..LOCK_ATTEMPTS {
        if let Some(lock) = LeaderLock::try_acquire(lock_path)? {
            return Ok(Some(lock));
        }
        if attempt + 1 < LOCK_ATTEMPTS {
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }
    }
    Ok(None)
}

/// Spawn a detached hub process.
///
/// The child gets its own process group and nulled stdio so it survives
/// this consumer's terminal and exits on its own reference-count policy.
fn spawn_hub() -> Result<std::process::Child> {
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    let child = Command::new(&exe)
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .with_context(|| format!("Failed to spawn hub: {} serve", exe.display()))?;

    log::info!("[Bridge] Spawned hub process (pid={})", child.id());
    Ok(child)
}

/// Poll-connect to the socket with exponential backoff until `timeout`.
async fn poll_connect(socket_path: &Path, timeout: std::time::Duration) -> Result<UnixStream> {
    let deadline = Instant::now() + timeout;
    let mut delay = CONNECT_BACKOFF_BASE;

    loop {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if Instant::now() + delay >= deadline {
                    anyhow::bail!(
                        "Hub did not become reachable within {}s: {e}",
                        timeout.as_secs()
                    );
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(CONNECT_BACKOFF_CAP);
            }
        }
    }
}

/// Relay lines between local stdio and the hub socket until one side ends.
///
/// Write failures toward the local side are treated as end-of-input: the
/// consumer downstream of us is gone, so there is nobody left to serve.
async fn bridge_session<W>(
    stream: UnixStream,
    stdin_rx: &mut UnboundedReceiver<String>,
    local_out: &mut W,
) -> BridgeEnd
where
    W: AsyncWrite + Unpin,
{
    let (read_half, write_half) = stream.into_split();
    let mut hub_lines = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(MAX_LINE_BYTES),
    );
    let mut hub_out = FramedWrite::new(write_half, LinesCodec::new());

    loop {
        tokio::select! {
            maybe = stdin_rx.recv() => {
                let Some(line) = maybe else {
                    return BridgeEnd::LocalEof;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = hub_out.send(line).await {
                    log::warn!("[Bridge] Socket write failed: {e}");
                    return BridgeEnd::HubClosed;
                }
            }
            maybe = hub_lines.next() => {
                match maybe {
                    Some(Ok(line)) => {
                        if let Err(e) = write_line(local_out, &line).await {
                            log::debug!("[Bridge] Local output closed: {e}");
                            return BridgeEnd::LocalEof;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("[Bridge] Socket read error: {e}");
                        return BridgeEnd::HubClosed;
                    }
                    None => return BridgeEnd::HubClosed,
                }
            }
        }
    }
}

/// Write one line plus newline and flush.
async fn write_line<W>(out: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

/// Read the hub's recorded pid, if the pid file exists and parses.
#[must_use]
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Whether a process with the given pid is alive.
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    // Signal 0 checks existence without delivering anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
