//! Runtime configuration for the hub.
//!
//! There is no config file: everything is defaulted from [`crate::constants`]
//! and overridable through `CANVAS_HUB_*` environment variables, so a hub
//! spawned by a bridge inherits its configuration from the parent process
//! environment without any handshake.
//!
//! # File Layout
//!
//! ```text
//! /tmp/canvas-hub-{uid}/
//!   hub.sock             # Unix domain socket for tool-call consumers
//!   hub.lock             # advisory leader-election lock
//!   hub.pid              # PID of the running hub process
//!
//! {cache_dir}/canvas-hub/assets/
//!   index.json           # asset metadata index
//!   {hash}.{ext}         # content-addressed asset files
//! ```
//!
//! Sockets and lock files live in `/tmp` because macOS limits Unix socket
//! paths to 104 bytes, and platform cache directories can exceed that.

// Rust guideline compliant 2026-07

use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};

use crate::constants::{
    ASSET_TTL, AUTO_ACTIVATION_GRACE, EXTENSION_PORT_CANDIDATES, MAX_SOCKET_PATH,
    MAX_UPLOAD_BYTES, TOOL_CALL_TIMEOUT,
};

/// Configuration for a hub process and its clients.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the socket, lock, and PID files.
    pub runtime_dir: PathBuf,
    /// Explicit socket path override; `None` means `{runtime_dir}/hub.sock`.
    pub socket_override: Option<PathBuf>,
    /// Directory holding content-addressed asset files and the index.
    pub asset_dir: PathBuf,
    /// Directory for hub log files.
    pub log_dir: PathBuf,
    /// Candidate TCP ports tried in order for the extension listener.
    pub extension_ports: Vec<u16>,
    /// How long a routed tool call may wait for the extension to answer.
    pub tool_timeout: Duration,
    /// Quiet period before a lone registered extension is auto-activated.
    pub activation_grace: Duration,
    /// Upper bound on a single asset upload body.
    pub max_upload_bytes: u64,
    /// Age after which untouched assets are swept. Zero disables sweeping.
    pub asset_ttl: Duration,
    /// Whether the asset store and transfer server are started at all.
    pub assets_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let uid = unsafe { libc::getuid() };
        let runtime_dir = PathBuf::from(format!("/tmp/canvas-hub-{uid}"));

        let asset_dir = dirs::cache_dir()
            .map(|d| d.join("canvas-hub/assets"))
            .unwrap_or_else(|| runtime_dir.join("assets"));

        let log_dir = dirs::cache_dir()
            .map(|d| d.join("canvas-hub/logs"))
            .unwrap_or_else(|| runtime_dir.join("logs"));

        Self {
            runtime_dir,
            socket_override: None,
            asset_dir,
            log_dir,
            extension_ports: EXTENSION_PORT_CANDIDATES.to_vec(),
            tool_timeout: TOOL_CALL_TIMEOUT,
            activation_grace: AUTO_ACTIVATION_GRACE,
            max_upload_bytes: MAX_UPLOAD_BYTES,
            asset_ttl: ASSET_TTL,
            assets_enabled: true,
        }
    }
}

impl Config {
    /// Loads configuration: defaults plus `CANVAS_HUB_*` environment overrides.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("CANVAS_HUB_RUNTIME_DIR") {
            self.runtime_dir = PathBuf::from(dir);
        }

        if let Ok(path) = env::var("CANVAS_HUB_SOCKET") {
            self.socket_override = Some(PathBuf::from(path));
        }

        if let Ok(dir) = env::var("CANVAS_HUB_ASSET_DIR") {
            self.asset_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var("CANVAS_HUB_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }

        if let Ok(ports) = env::var("CANVAS_HUB_EXTENSION_PORTS") {
            if let Some(parsed) = parse_port_list(&ports) {
                self.extension_ports = parsed;
            } else {
                log::warn!("[Config] Ignoring unparseable CANVAS_HUB_EXTENSION_PORTS: {ports:?}");
            }
        }

        if let Ok(timeout) = env::var("CANVAS_HUB_TOOL_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.tool_timeout = Duration::from_millis(ms);
            } else {
                log::warn!("[Config] Ignoring unparseable CANVAS_HUB_TOOL_TIMEOUT_MS: {timeout:?}");
            }
        }

        if let Ok(grace) = env::var("CANVAS_HUB_ACTIVATION_GRACE_MS") {
            if let Ok(ms) = grace.parse::<u64>() {
                self.activation_grace = Duration::from_millis(ms);
            } else {
                log::warn!(
                    "[Config] Ignoring unparseable CANVAS_HUB_ACTIVATION_GRACE_MS: {grace:?}"
                );
            }
        }

        if let Ok(max) = env::var("CANVAS_HUB_MAX_UPLOAD_BYTES") {
            if let Ok(bytes) = max.parse::<u64>() {
                self.max_upload_bytes = bytes;
            } else {
                log::warn!("[Config] Ignoring unparseable CANVAS_HUB_MAX_UPLOAD_BYTES: {max:?}");
            }
        }

        if let Ok(ttl) = env::var("CANVAS_HUB_ASSET_TTL_SECS") {
            if let Ok(secs) = ttl.parse::<u64>() {
                self.asset_ttl = Duration::from_secs(secs);
            } else {
                log::warn!("[Config] Ignoring unparseable CANVAS_HUB_ASSET_TTL_SECS: {ttl:?}");
            }
        }

        if let Ok(enabled) = env::var("CANVAS_HUB_ASSETS") {
            self.assets_enabled = !matches!(enabled.trim(), "0" | "false" | "off" | "no");
        }
    }

    /// The Unix socket path consumers connect to.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.socket_override
            .clone()
            .unwrap_or_else(|| self.runtime_dir.join("hub.sock"))
    }

    /// The advisory lock file used for leader election.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.runtime_dir.join("hub.lock")
    }

    /// The PID file written by a running hub.
    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.runtime_dir.join("hub.pid")
    }

    /// Create the runtime directory with owner-only permissions.
    ///
    /// `/tmp` is world-writable, so the directory is created under a
    /// restrictive umask rather than chmod'd after the fact to avoid a
    /// TOCTOU window on shared machines.
    pub fn ensure_runtime_dir(&self) -> Result<()> {
        if !self.runtime_dir.exists() {
            let old_umask = unsafe { libc::umask(0o077) };
            let result = fs::create_dir_all(&self.runtime_dir);
            unsafe {
                libc::umask(old_umask);
            }
            result.with_context(|| {
                format!(
                    "Failed to create runtime directory: {}",
                    self.runtime_dir.display()
                )
            })?;
        }
        Ok(())
    }

    /// Validate constraints that would otherwise fail deep inside bind calls.
    ///
    /// The only hard one is the socket path length: `sockaddr_un.sun_path`
    /// is 104 bytes on macOS, and exceeding it produces an opaque EINVAL.
    pub fn validate(&self) -> Result<()> {
        let socket = self.socket_path();
        let len = socket.as_os_str().len();
        if len > MAX_SOCKET_PATH {
            anyhow::bail!(
                "Socket path too long ({len} bytes, max {MAX_SOCKET_PATH}): {}",
                socket.display()
            );
        }
        if self.extension_ports.is_empty() {
            anyhow::bail!("No extension listener ports configured");
        }
        Ok(())
    }
}

/// Parse a comma-separated port list like `"4114,4115,4116"`.
///
/// Returns `None` if any entry fails to parse or the list is empty, so a
/// typo falls back to the defaults instead of silently shrinking the list.
fn parse_port_list(raw: &str) -> Option<Vec<u16>> {
    let ports: Vec<u16> = raw
        .split(',')
        .map(|p| p.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .ok()?;
    if ports.is_empty() {
        None
    } else {
        Some(ports)
    }
}
