//! Unix domain socket IPC for consumer↔hub communication.
//!
//! Consumers are short-lived callers (CLI invocations, editor plugins)
//! speaking newline-delimited JSON over a local socket. Each accepted
//! connection becomes an independent protocol session sharing the same
//! tool registry and hub state.
//!
//! # Architecture
//!
//! ```text
//! Hub Process                          Consumer Process
//! ┌──────────────────┐                ┌──────────────────┐
//! │ SocketServer     │                │ bridge::connect  │
//! │  UnixListener    │◄──────────────►│  UnixStream      │
//! │  ConsumerSession │  one JSON      │  stdin/stdout    │
//! │  per connection  │  object/line   │  relay           │
//! └────────┬─────────┘                └────────┬─────────┘
//!          │ HubEvent                          │ ToolRequest/ToolResponse
//!          ▼                                   ▼
//!       Hub event loop                     Calling process
//! ```
//!
//! # Wire Protocol
//!
//! One JSON object per line. Requests are [`crate::wire::ToolRequest`],
//! responses are [`crate::wire::ToolResponse`]; malformed lines are
//! logged and dropped.

// Rust guideline compliant 2026-08

pub mod server;
pub mod session;

pub use server::SocketServer;
pub use session::ConsumerSession;
