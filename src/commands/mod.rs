//! CLI subcommand implementations for canvas-hub.
//!
//! Each submodule owns one subcommand and exposes a blocking `run`
//! entry point that builds its own Tokio runtime:
//!
//! - [`serve`] - run the hub broker in the foreground
//! - [`connect`] - bridge stdio to the hub, electing one if needed
//! - [`status`] - one-shot health probe of a running hub
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use canvas_hub::commands;
//!
//! commands::serve::run()?;
//! commands::connect::run()?;
//! commands::status::run()?;
//! ```

// Rust guideline compliant 2026-08

pub mod connect;
pub mod serve;
pub mod status;

// Re-export commonly used functions for convenience
#[doc(inline)]
pub use connect::run as run_connect;
#[doc(inline)]
pub use serve::run as run_serve;
#[doc(inline)]
pub use status::run as run_status;
