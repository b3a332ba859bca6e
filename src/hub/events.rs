//! Unified event channel for the hub event loop.
//!
//! All background producers (the extension WebSocket accept loop and its
//! per-connection read tasks, the consumer socket accept loop and its
//! per-session read tasks, and the auto-activation grace timer) send events
//! through a single `mpsc::UnboundedSender<HubEvent>`. The `select!` loop
//! in [`crate::hub::Hub::run`] receives on the corresponding receiver and
//! dispatches each variant.

// Rust guideline compliant 2026-08

use crate::extension::ExtensionConn;
use crate::socket::ConsumerSession;
use crate::wire::{ExtensionMessage, ToolRequest};

/// Event from a background producer delivered to the hub event loop.
///
/// Background tasks send events through a single
/// `mpsc::UnboundedSender<HubEvent>`; the hub owns the receiving end and
/// is the only place connection state is mutated.
#[derive(Debug)]
pub enum HubEvent {
    /// A rich client completed the WebSocket handshake.
    ///
    /// Sent from the extension accept loop. The handler registers the
    /// connection, replies with `registered`, and broadcasts fresh state.
    ExtensionConnected {
        /// Connection state, owned by the hub from here on.
        conn: ExtensionConn,
    },

    /// A parsed message from an extension's read task.
    ///
    /// `activate` mutates the registry; `toolResult` settles the matching
    /// pending call.
    ExtensionMessage {
        /// Extension the message arrived from.
        extension_id: String,
        /// The decoded envelope.
        msg: ExtensionMessage,
    },

    /// An extension's read task observed EOF or a transport error.
    ///
    /// The handler drops the connection, fails the extension's outstanding
    /// calls, and broadcasts fresh state.
    ExtensionDisconnected {
        /// Extension that went away.
        extension_id: String,
    },

    /// A consumer connected to the local socket.
    ///
    /// Sent from the socket accept loop. Consumers count toward the
    /// reference-counted shutdown policy.
    ConsumerConnected {
        /// Session state, owned by the hub from here on.
        session: ConsumerSession,
    },

    /// A parsed tool request line from a consumer's read task.
    ///
    /// Dispatched through the tool router; the response is queued on the
    /// session's write task.
    ConsumerRequest {
        /// Session the request arrived on.
        session_id: String,
        /// The decoded request.
        request: ToolRequest,
    },

    /// A consumer's read task observed EOF or a transport error.
    ///
    /// When the last session closes after at least one was served, the hub
    /// begins graceful shutdown.
    ConsumerDisconnected {
        /// Session that went away.
        session_id: String,
    },

    /// The auto-activation grace timer fired.
    ///
    /// Scheduled by the handler of every registry mutation. The handler
    /// re-validates against the live registry, so a stale fire is harmless.
    AutoActivate,
}
