//! `status` command — one-shot health probe of a running hub.
//!
//! Connects straight to the socket without taking the election path: a
//! status probe must never spawn a hub just to report on it. Absence of a
//! reachable socket is an answer, not an error.

// Rust guideline compliant 2026-08

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::bridge;
use crate::config::Config;
use crate::wire::{ToolRequest, ToolResponse};

/// How long to wait for the hub to answer the probe. The call never
/// leaves the machine, so a slow answer means a wedged hub.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Query the running hub and print its status report.
///
/// # Errors
///
/// Returns an error if a hub process exists but cannot be queried, or if
/// the probe exchange itself fails.
pub fn run() -> Result<()> {
    let config = Config::load();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(probe(&config))
}

async fn probe(config: &Config) -> Result<()> {
    let socket_path = config.socket_path();
    let stream = match UnixStream::connect(&socket_path).await {
        Ok(stream) => stream,
        Err(err) => {
            // Distinguish "nothing running" from "running but wedged"
            // via the PID file the hub writes at startup.
            if let Some(pid) = bridge::read_pid_file(&config.pid_path()) {
                if bridge::pid_alive(pid) {
                    anyhow::bail!(
                        "Hub process (pid={pid}) is alive but not accepting connections \
                         on {}: {err}",
                        socket_path.display()
                    );
                }
            }
            println!("Hub is not running (socket: {})", socket_path.display());
            return Ok(());
        }
    };

    let request = ToolRequest {
        id: format!("status:{}", std::process::id()),
        name: "hub_status".to_owned(),
        args: json!({}),
    };
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');

    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(line.as_bytes())
        .await
        .context("Failed to send status request")?;

    let mut reader = BufReader::new(read_half);
    let mut answer = String::new();
    tokio::time::timeout(PROBE_TIMEOUT, reader.read_line(&mut answer))
        .await
        .context("Hub did not answer the status probe in time")?
        .context("Failed to read status response")?;

    let response: ToolResponse =
        serde_json::from_str(answer.trim()).context("Hub sent an unparseable status response")?;
    if let Some(error) = response.error {
        anyhow::bail!("Hub reported an error: {}", error.message);
    }

    let payload = response.payload.unwrap_or(Value::Null);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
