//! WebSocket transport for extension connections.
//!
//! Extensions are long-lived rich clients. They find the hub by trying a
//! fixed candidate port list, so the hub binds the first free candidate
//! and advertises it in every `state` message. Each accepted connection
//! gets an [`ExtensionConn`] that owns read/write tasks and translates
//! between JSON text frames and `HubEvent`s, mirroring how consumer
//! socket sessions are handled.

// Rust guideline compliant 2026-08

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::registry::ExtensionHandle;
use crate::hub::events::HubEvent;
use crate::wire::HubMessage;

/// Concrete server-side WebSocket stream type.
type WsStream = WebSocketStream<TcpStream>;

/// Loopback WebSocket listener for extensions.
///
/// Binds the first free port from the candidate list and spawns an accept
/// loop that announces each connection to the hub via
/// `HubEvent::ExtensionConnected`.
#[derive(Debug)]
pub struct ExtensionListener {
    port: u16,
    accept_handle: JoinHandle<()>,
}

impl ExtensionListener {
    /// Bind the first free candidate port and start accepting extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if every candidate port is taken.
    pub async fn start(
        candidates: &[u16],
        hub_event_tx: UnboundedSender<HubEvent>,
    ) -> Result<Self> {
        let listener = bind_first_free(candidates).await?;
        // local_addr resolves port 0 to the real ephemeral port.
        let port = listener.local_addr()?.port();
        log::info!("[Extension] Listening on 127.0.0.1:{port}");

        let accept_handle = tokio::spawn(Self::accept_loop(listener, hub_event_tx));

        Ok(Self {
            port,
            accept_handle,
        })
    }

    /// Accept loop — runs as a tokio task.
    async fn accept_loop(listener: TcpListener, hub_event_tx: UnboundedSender<HubEvent>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    // Handshake in its own task so a stalled client cannot
                    // hold up the accept loop.
                    let event_tx = hub_event_tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws) => {
                                let conn = ExtensionConn::new(ws, event_tx.clone());
                                log::info!(
                                    "[Extension] Connected: {} from {addr}",
                                    conn.extension_id()
                                );
                                if event_tx
                                    .send(HubEvent::ExtensionConnected { conn })
                                    .is_err()
                                {
                                    log::warn!("[Extension] Hub event channel closed");
                                }
                            }
                            Err(e) => {
                                log::warn!(
                                    "[Extension] WebSocket handshake failed from {addr}: {e}"
                                );
                            }
                        }
                    });
                }
                Err(e) => {
                    log::error!("[Extension] Accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Port the listener is bound to; advertised in `state` messages.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting new extensions. Existing connections are untouched.
    pub fn shutdown(self) {
        self.accept_handle.abort();
    }
}

/// Bind the first free port from the candidate list on loopback.
async fn bind_first_free(candidates: &[u16]) -> Result<TcpListener> {
    for &port in candidates {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => log::debug!("[Extension] Port {port} unavailable: {e}"),
        }
    }
    anyhow::bail!("No free extension port among candidates: {candidates:?}")
}

/// Hub-side connection state for a single extension.
///
/// Owns read/write tasks that bridge between the WebSocket and the hub
/// event loop. Outgoing messages are queued on an unbounded channel and
/// serialized by the write task.
pub struct ExtensionConn {
    extension_id: String,
    outbox: UnboundedSender<HubMessage>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for ExtensionConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionConn")
            .field("extension_id", &self.extension_id)
            .finish_non_exhaustive()
    }
}

impl ExtensionConn {
    /// Create a connection handler for an accepted WebSocket.
    pub(crate) fn new(ws: WsStream, hub_event_tx: UnboundedSender<HubEvent>) -> Self {
        let (sink, stream) = ws.split();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<HubMessage>();
        let extension_id = generate_extension_id();

        let read_id = extension_id.clone();
        let read_handle = tokio::spawn(Self::read_loop(read_id, stream, hub_event_tx));

        let write_id = extension_id.clone();
        let write_handle = tokio::spawn(Self::write_loop(write_id, sink, outbox_rx));

        Self {
            extension_id,
            outbox: outbox_tx,
            read_handle,
            write_handle,
        }
    }

    /// Queue a message for this extension.
    ///
    /// Returns `false` if the write task is gone (connection closing).
    pub fn send(&self, msg: HubMessage) -> bool {
        self.outbox.send(msg).is_ok()
    }

    /// Extension identifier.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Build the registry handle for this connection.
    #[must_use]
    pub fn handle(&self) -> ExtensionHandle {
        ExtensionHandle {
            id: self.extension_id.clone(),
            outbox: self.outbox.clone(),
            connected_at: Utc::now(),
        }
    }

    /// Tear down the connection, aborting read/write tasks.
    pub fn disconnect(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }

    /// Read loop — parses JSON text frames and sends HubEvents.
    async fn read_loop(
        extension_id: String,
        mut stream: SplitStream<WsStream>,
        hub_event_tx: UnboundedSender<HubEvent>,
    ) {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<crate::wire::ExtensionMessage>(&text) {
                        Ok(msg) => {
                            let event = HubEvent::ExtensionMessage {
                                extension_id: extension_id.clone(),
                                msg,
                            };
                            if hub_event_tx.send(event).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            // Malformed input from a rich client is logged
                            // and dropped, never fatal to the connection.
                            log::warn!(
                                "[Extension] Unparseable message from {extension_id}: {e}"
                            );
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    log::warn!("[Extension] Ignoring binary frame from {extension_id}");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // tungstenite answers pings itself.
                }
                Ok(Message::Close(_)) => {
                    log::info!("[Extension] Close frame from {extension_id}");
                    break;
                }
                Ok(Message::Frame(_)) => {
                    // Raw frames — skip
                }
                Err(e) => {
                    log::warn!("[Extension] Read error for {extension_id}: {e}");
                    break;
                }
            }
        }

        let _ = hub_event_tx.send(HubEvent::ExtensionDisconnected { extension_id });
    }

    /// Write loop — serializes queued messages onto the WebSocket.
    async fn write_loop(
        extension_id: String,
        mut sink: SplitSink<WsStream, Message>,
        mut outbox_rx: UnboundedReceiver<HubMessage>,
    ) {
        while let Some(msg) = outbox_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("[Extension] Failed to encode message for {extension_id}: {e}");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                log::warn!("[Extension] Write error for {extension_id}: {e}");
                break;
            }
        }
        // Outbox closed: the hub dropped this extension. Close politely.
        let _ = sink.close().await;
    }
}

/// Generate a unique extension ID using a monotonic counter + random suffix.
fn generate_extension_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("ext:{seq:x}{rand:04x}")
}
