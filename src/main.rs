//! Canvas Hub CLI - loopback broker between canvas extensions and tool
//! consumers.
//!
//! This is the main binary entry point. See the `canvas_hub` library for
//! the core functionality.

// Rust guideline compliant 2026-08

use std::path::PathBuf;

use anyhow::{Context, Result};
use canvas_hub::commands;
use canvas_hub::config::Config;
use canvas_hub::env::Environment;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "canvas-hub")]
#[command(version)]
#[command(about = "Loopback broker between canvas extensions and local tool consumers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub broker in the foreground
    Serve,
    /// Bridge stdin/stdout to the hub, starting one if none is running
    Connect,
    /// Query a running hub and print its status report
    Status,
}

fn main() -> Result<()> {
    // Log to a file: stdout carries the NDJSON protocol during `connect`,
    // so nothing else may ever be printed there.
    // Use CANVAS_HUB_LOG_FILE or CANVAS_HUB_LOG_DIR/canvas-hub.log or fallback
    let config = Config::load();
    let log_path = log_destination(&config);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file at {}", log_path.display()))?;
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .default_filter_or(Environment::current().default_log_level().to_string()),
    )
    .target(env_logger::Target::Pipe(Box::new(log_file)))
    .format_timestamp_secs()
    .init();

    // Set up panic hook to log panics before the process dies
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {panic_info:?}");
        default_hook(panic_info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => commands::serve::run(),
        Commands::Connect => commands::connect::run(),
        Commands::Status => commands::status::run(),
    }
}

/// Resolve the log file path.
///
/// The bridge and any hub it spawns share this file, which is why it is
/// opened in append mode rather than truncated per process.
fn log_destination(config: &Config) -> PathBuf {
    if let Ok(path) = std::env::var("CANVAS_HUB_LOG_FILE") {
        return PathBuf::from(path);
    }
    if std::fs::create_dir_all(&config.log_dir).is_ok() {
        return config.log_dir.join("canvas-hub.log");
    }
    PathBuf::from("/tmp/canvas-hub.log")
}
