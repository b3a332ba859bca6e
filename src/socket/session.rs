//! Per-connection state for consumer sessions (hub-side).
//!
//! Each accepted socket connection gets a [`ConsumerSession`] that owns the
//! read/write tasks and translates between newline-delimited JSON and
//! `HubEvent`s. Requests and responses on one session are independent of
//! every other session; they share only the hub state behind the event
//! loop.

// Rust guideline compliant 2026-08

use futures_util::{SinkExt, StreamExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::constants::MAX_LINE_BYTES;
use crate::hub::events::HubEvent;
use crate::wire::{ToolRequest, ToolResponse};

/// Hub-side state for a single consumer connection.
///
/// Owns read/write tasks that bridge between the Unix socket and the hub
/// event loop. Responses are queued on an unbounded channel and written
/// one JSON object per line by the write task.
pub struct ConsumerSession {
    session_id: String,
    outbox: UnboundedSender<ToolResponse>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for ConsumerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSession")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl ConsumerSession {
    /// Create a session for an accepted socket connection.
    ///
    /// Spawns read and write tasks:
    /// - Read task: decodes request lines → sends `HubEvent`s
    /// - Write task: receives responses → writes JSON lines
    pub(crate) fn new(stream: UnixStream, hub_event_tx: UnboundedSender<HubEvent>) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel::<ToolResponse>();
        let session_id = generate_session_id();

        let read_id = session_id.clone();
        let read_handle = tokio::spawn(Self::read_loop(read_id, read_half, hub_event_tx));

        let write_id = session_id.clone();
        let write_handle = tokio::spawn(Self::write_loop(write_id, write_half, outbox_rx));

        Self {
            session_id,
            outbox: outbox_tx,
            read_handle,
            write_handle,
        }
    }

    /// Queue a response line for this consumer.
    ///
    /// Returns `false` if the write task is gone (session closing).
    pub fn send(&self, response: ToolResponse) -> bool {
        self.outbox.send(response).is_ok()
    }

    /// Get a clone of the response sender for responder tasks.
    ///
    /// Lets a spawned task settle a call after this session has already
    /// been looked up and released by the event loop.
    #[must_use]
    pub fn outbox(&self) -> UnboundedSender<ToolResponse> {
        self.outbox.clone()
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Tear down the session, aborting read/write tasks.
    pub fn disconnect(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }

    /// Read loop — decodes newline-delimited requests and sends HubEvents.
    async fn read_loop(
        session_id: String,
        read_half: OwnedReadHalf,
        hub_event_tx: UnboundedSender<HubEvent>,
    ) {
        // The length cap bounds memory for a session that never sends a
        // newline; hitting it poisons the framing, so the session ends.
        let mut lines = FramedRead::new(
            read_half,
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        );

        while let Some(result) = lines.next().await {
            match result {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ToolRequest>(&line) {
                        Ok(request) => {
                            let event = HubEvent::ConsumerRequest {
                                session_id: session_id.clone(),
                                request,
                            };
                            if hub_event_tx.send(event).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            // Malformed lines are logged and dropped; there
                            // is no request id to correlate an error to.
                            log::warn!("[Socket] Unparseable line from {session_id}: {e}");
                        }
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    log::error!(
                        "[Socket] Line exceeds {MAX_LINE_BYTES} bytes from {session_id}, closing"
                    );
                    break;
                }
                Err(LinesCodecError::Io(e)) => {
                    log::warn!("[Socket] Read error for {session_id}: {e}");
                    break;
                }
            }
        }

        log::info!("[Socket] Consumer disconnected: {session_id}");
        let _ = hub_event_tx.send(HubEvent::ConsumerDisconnected { session_id });
    }

    /// Write loop — serializes queued responses as JSON lines.
    async fn write_loop(
        session_id: String,
        write_half: OwnedWriteHalf,
        mut outbox_rx: UnboundedReceiver<ToolResponse>,
    ) {
        let mut lines = FramedWrite::new(write_half, LinesCodec::new());

        while let Some(response) = outbox_rx.recv().await {
            let text = match serde_json::to_string(&response) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("[Socket] Failed to encode response for {session_id}: {e}");
                    continue;
                }
            };
            if let Err(e) = lines.send(text).await {
                log::warn!("[Socket] Write error for {session_id}: {e}");
                break;
            }
        }
    }
}

/// Generate a unique session ID using a monotonic counter + random suffix.
fn generate_session_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("consumer:{seq:x}{rand:04x}")
}
