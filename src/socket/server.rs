//! Unix domain socket server for accepting consumer connections.
//!
//! Listens on the hub socket and creates a [`ConsumerSession`] for each
//! accepted connection. Each session is announced to the hub via
//! `HubEvent::ConsumerConnected`; the hub owns session lifetime from
//! there.

// Rust guideline compliant 2026-08

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::session::ConsumerSession;
use crate::constants::MAX_SOCKET_PATH;
use crate::hub::events::HubEvent;

/// Unix domain socket server for the consumer tool-call protocol.
///
/// Binds a `UnixListener` and spawns an accept loop that creates
/// [`ConsumerSession`] instances for each connection.
#[derive(Debug)]
pub struct SocketServer {
    /// Path to the socket file (for cleanup).
    socket_path: PathBuf,
    /// Handle to the accept loop task.
    accept_handle: JoinHandle<()>,
}

impl SocketServer {
    /// Start the socket server at the given path.
    ///
    /// Removes any stale socket file, binds the listener, sets permissions
    /// to 0600, and spawns the accept loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exceeds the kernel limit or the socket
    /// cannot be bound.
    pub fn start(socket_path: PathBuf, hub_event_tx: UnboundedSender<HubEvent>) -> Result<Self> {
        // sun_path is 104 bytes on macOS, 108 on Linux; enforce the
        // conservative limit so the same config works on both.
        let path_len = socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "Socket path too long ({path_len} bytes, max {}): {}\n\
                 Consider setting CANVAS_HUB_SOCKET to a shorter path.",
                MAX_SOCKET_PATH - 1,
                socket_path.display()
            );
        }

        // A previous hub that crashed leaves its socket file behind.
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket: {}", socket_path.display())
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;

        // Owner-only: the tool channel carries whatever the consumer asks.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&socket_path, perms)?;
        }

        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        log::info!("[Socket] Listening on {}", socket_path.display());

        let path_clone = socket_path.clone();
        let accept_handle = tokio::spawn(Self::accept_loop(listener, hub_event_tx, path_clone));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    /// Accept loop — runs as a tokio task.
    async fn accept_loop(
        listener: UnixListener,
        hub_event_tx: UnboundedSender<HubEvent>,
        socket_path: PathBuf,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let session = ConsumerSession::new(stream, hub_event_tx.clone());
                    log::info!("[Socket] Consumer connected: {}", session.session_id());

                    if hub_event_tx
                        .send(HubEvent::ConsumerConnected { session })
                        .is_err()
                    {
                        log::warn!("[Socket] Hub event channel closed, stopping accept loop");
                        break;
                    }
                }
                Err(e) => {
                    // The socket file disappears when shutdown already ran.
                    if !socket_path.exists() {
                        log::info!("[Socket] Socket file removed, stopping accept loop");
                        break;
                    }
                    log::error!("[Socket] Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Stop accepting consumers and remove the socket file.
    pub fn shutdown(self) {
        self.accept_handle.abort();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            log::debug!(
                "[Socket] Could not remove {}: {e}",
                self.socket_path.display()
            );
        }
    }

    /// Path to the socket file.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}
