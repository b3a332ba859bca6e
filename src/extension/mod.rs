//! Extension connectivity: WebSocket transport plus activation state.
//!
//! Extensions are long-lived rich clients (editor panels, preview
//! windows) that receive routed tool calls and answer them. They connect
//! over loopback WebSocket on a well-known candidate port, register, and
//! one of them becomes the active target for routing.
//!
//! # Architecture
//!
//! ```text
//! Hub Process                              Extension Process
//! ┌─────────────────────┐                 ┌──────────────────┐
//! │ ExtensionListener   │                 │                  │
//! │  TcpListener        │◄───────────────►│  WebSocket       │
//! │  ExtensionConn      │  JSON text      │  client          │
//! │  per connection     │  frames         │                  │
//! └────────┬────────────┘                 └──────────────────┘
//!          │ HubEvent
//!          ▼
//!   Hub event loop ──► ExtensionRegistry (single active selection)
//! ```
//!
//! Messages are JSON objects tagged with a `type` field; see
//! [`crate::wire`] for the envelopes.

// Rust guideline compliant 2026-07

pub mod registry;
pub mod transport;

pub use registry::{ExtensionHandle, ExtensionRegistry};
pub use transport::{ExtensionConn, ExtensionListener};
