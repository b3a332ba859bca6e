//! `connect` command — bridge stdio to the hub socket.
//!
//! This is the entry point consumers actually invoke. It finds or elects a
//! hub, then relays NDJSON lines between stdin/stdout and the hub socket
//! until local end-of-input.

// Rust guideline compliant 2026-08

use anyhow::Result;

use crate::bridge;
use crate::config::Config;

/// Run the stdio bridge until local end-of-input.
///
/// # Errors
///
/// Returns an error if no hub could be reached or elected.
pub fn run() -> Result<()> {
    let config = Config::load();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(bridge::run_bridge(&config))
}
