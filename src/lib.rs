//! Canvas Hub - loopback broker between rich clients and tool consumers.
//!
//! This crate provides the core functionality for the canvas-hub CLI:
//! a single-machine broker that lets short-lived tool consumers drive a
//! long-lived canvas extension without either side knowing about the
//! other's transport.
//!
//! # Architecture
//!
//! The crate follows a single-event-loop pattern:
//!
//! - **Hub** - Central orchestrator, owns all state, runs the event loop
//! - **Socket** - NDJSON Unix-socket server for tool-call consumers
//! - **Extension** - WebSocket listener and registry for rich clients
//! - **Assets** - Content-addressed store plus loopback HTTP transfer server
//! - **Bridge** - stdio relay with hub leader election for consumers
//!
//! # Modules
//!
//! - [`hub`] - Event loop and subsystem lifecycle
//! - [`router`] - Tool-call validation, dispatch, and hub-served tools
//! - [`correlation`] - In-flight request table with per-call timeouts
//! - [`config`] - Environment-driven configuration

// Rust guideline compliant 2026-08

// Library modules
pub mod assets;
pub mod bridge;
pub mod commands;
pub mod correlation;
pub mod extension;
pub mod hub;
pub mod router;
pub mod socket;

pub mod config;
pub mod constants;
pub mod env;
pub mod error;
pub mod timer;
pub mod wire;

// Re-export commonly used types
pub use assets::{AssetServer, AssetStore};
pub use config::Config;
pub use correlation::CorrelationTable;
pub use error::HubError;
pub use router::ToolRouter;

// Re-export Hub
pub use hub::Hub;
