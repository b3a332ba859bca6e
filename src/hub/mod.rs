//! Hub — central orchestrator for the tool-call broker.
//!
//! The hub owns every piece of connection state and runs the single event
//! loop all mutations flow through. Listener accept loops, connection read
//! tasks, and timers only ever send [`HubEvent`]s; the loop applies them
//! one at a time, so no registry or session state needs cross-task locks.
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────┐
//!                      │          Hub           │
//!                      │  - Owns all state      │
//!                      │  - Runs event loop     │
//!                      │  - Source of truth     │
//!                      └───────────┬────────────┘
//!                                  │ HubEvent
//!            ┌─────────────────────┼─────────────────────┐
//!            │                     │                     │
//!      SocketServer        ExtensionListener       ResetTimer
//!   (consumer NDJSON)      (extension WS)        (auto-activate)
//! ```
//!
//! The asset transfer server is the one exception: it serves HTTP from its
//! own tasks against the shared [`AssetStore`], which carries its own lock.
//!
//! # Lifecycle
//!
//! The hub is not a resident daemon. It exits once the last consumer
//! disconnects after at least one was served, flushing the asset index and
//! closing listeners on the way out, bounded by a hard shutdown timeout.

// Rust guideline compliant 2026-08

pub mod events;

pub use events::HubEvent;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::{AssetServer, AssetStore};
use crate::config::Config;
use crate::constants::SHUTDOWN_TIMEOUT;
use crate::correlation::CorrelationTable;
use crate::error::HubError;
use crate::extension::{ExtensionConn, ExtensionListener, ExtensionRegistry};
use crate::router::ToolRouter;
use crate::socket::{ConsumerSession, SocketServer};
use crate::timer::ResetTimer;
use crate::wire::{ExtensionMessage, HubMessage, ToolRequest};

/// Central orchestrator owning all broker state.
///
/// Constructed by [`Hub::start`], which binds every listener, then driven
/// by [`Hub::run`] until shutdown.
pub struct Hub {
    config: Config,
    registry: ExtensionRegistry,
    extension_conns: HashMap<String, ExtensionConn>,
    sessions: HashMap<String, ConsumerSession>,
    correlation: CorrelationTable,
    router: ToolRouter,
    store: Option<AssetStore>,
    asset_server: Option<AssetServer>,
    asset_server_url: Option<String>,
    sweeper: Option<JoinHandle<()>>,
    socket_server: Option<SocketServer>,
    extension_listener: Option<ExtensionListener>,
    extension_port: u16,
    activation_timer: ResetTimer,
    hub_event_tx: UnboundedSender<HubEvent>,
    cancel: CancellationToken,
    served_consumers: u64,
    quit: bool,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("extensions", &self.registry.len())
            .field("sessions", &self.sessions.len())
            .field("extension_port", &self.extension_port)
            .field("served_consumers", &self.served_consumers)
            .field("quit", &self.quit)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Bind all listeners and assemble the hub.
    ///
    /// Returns the hub plus the receiving end of its event channel; pass
    /// both to [`Hub::run`]. The asset subsystem is skipped entirely when
    /// disabled in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, the runtime directory
    /// cannot be prepared, a live hub already owns it, or any listener
    /// fails to bind.
    pub async fn start(config: Config) -> Result<(Self, UnboundedReceiver<HubEvent>)> {
        config.validate()?;
        config.ensure_runtime_dir()?;

        // A second hub on the same runtime dir would delete the first
        // one's socket out from under it. Losing here is the safe side.
        if let Some(pid) = crate::bridge::read_pid_file(&config.pid_path()) {
            if crate::bridge::pid_alive(pid) {
                anyhow::bail!(
                    "A hub is already running (pid={pid}, socket {})",
                    config.socket_path().display()
                );
            }
        }

        let (hub_event_tx, hub_event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let correlation = CorrelationTable::new();

        // Assets come up first so the router and state broadcasts can
        // advertise the transfer URL from the beginning.
        let (store, asset_server, sweeper) = if config.assets_enabled {
            let store = AssetStore::open(config.asset_dir.clone(), config.asset_ttl)?;
            let server = AssetServer::start(
                store.clone(),
                config.max_upload_bytes,
                cancel.child_token(),
            )
            .await?;
            let sweeper = store.spawn_sweeper(cancel.child_token());
            (Some(store), Some(server), sweeper)
        } else {
            log::info!("[Hub] Asset subsystem disabled");
            (None, None, None)
        };
        let asset_server_url = asset_server.as_ref().map(|s| s.base_url().to_string());

        let extension_listener =
            ExtensionListener::start(&config.extension_ports, hub_event_tx.clone()).await?;
        let extension_port = extension_listener.port();

        let socket_server = SocketServer::start(config.socket_path(), hub_event_tx.clone())?;

        let router = ToolRouter::new(
            correlation.clone(),
            store.clone(),
            asset_server_url.clone(),
            extension_port,
            config.tool_timeout,
        );

        write_pid_file(&config.pid_path())?;

        log::info!(
            "[Hub] Ready: socket {}, extension port {extension_port}, assets {}",
            config.socket_path().display(),
            asset_server_url.as_deref().unwrap_or("disabled"),
        );

        let hub = Self {
            config,
            registry: ExtensionRegistry::new(),
            extension_conns: HashMap::new(),
            sessions: HashMap::new(),
            correlation,
            router,
            store,
            asset_server,
            asset_server_url,
            sweeper,
            socket_server: Some(socket_server),
            extension_listener: Some(extension_listener),
            extension_port,
            activation_timer: ResetTimer::new(),
            hub_event_tx,
            cancel,
            served_consumers: 0,
            quit: false,
        };

        Ok((hub, hub_event_rx))
    }

    /// Port the extension listener is bound to.
    #[must_use]
    pub fn extension_port(&self) -> u16 {
        self.extension_port
    }

    /// Base URL of the asset transfer server, if enabled.
    #[must_use]
    pub fn asset_server_url(&self) -> Option<&str> {
        self.asset_server_url.as_deref()
    }

    /// Drive the event loop until shutdown.
    ///
    /// Exits when the reference count of consumers drops back to zero or
    /// `shutdown` fires, then runs graceful cleanup bounded by the hard
    /// shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if graceful cleanup exceeds its bound.
    pub async fn run(
        mut self,
        mut event_rx: UnboundedReceiver<HubEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        log::info!("[Hub] Event loop starting");

        loop {
            tokio::select! {
                maybe = event_rx.recv() => {
                    let Some(event) = maybe else {
                        log::warn!("[Hub] Event channel closed");
                        break;
                    };
                    self.handle_event(event);
                    if self.quit {
                        break;
                    }
                }
                () = shutdown.cancelled() => {
                    log::info!("[Hub] Shutdown signal received");
                    break;
                }
            }
        }

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.shutdown_gracefully())
            .await
            .is_err()
        {
            anyhow::bail!(
                "Graceful shutdown exceeded {}s, forcing exit",
                SHUTDOWN_TIMEOUT.as_secs()
            );
        }

        log::info!("[Hub] Event loop exiting");
        Ok(())
    }

    /// Apply one event to the hub state.
    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::ExtensionConnected { conn } => self.on_extension_connected(conn),
            HubEvent::ExtensionMessage { extension_id, msg } => {
                self.on_extension_message(&extension_id, msg);
            }
            HubEvent::ExtensionDisconnected { extension_id } => {
                self.on_extension_disconnected(&extension_id);
            }
            HubEvent::ConsumerConnected { session } => self.on_consumer_connected(session),
            HubEvent::ConsumerRequest {
                session_id,
                request,
            } => self.on_consumer_request(&session_id, request),
            HubEvent::ConsumerDisconnected { session_id } => {
                self.on_consumer_disconnected(&session_id);
            }
            HubEvent::AutoActivate => self.on_auto_activate(),
        }
    }

    fn on_extension_connected(&mut self, conn: ExtensionConn) {
        let handle = conn.handle();
        let id = handle.id.clone();

        // Ack first so the client learns its id before any state message.
        conn.send(HubMessage::Registered { id: id.clone() });
        self.registry.register(handle);
        self.extension_conns.insert(id, conn);
        self.after_registry_mutation();
    }

    fn on_extension_message(&mut self, extension_id: &str, msg: ExtensionMessage) {
        match msg {
            ExtensionMessage::Activate => {
                if self.registry.activate(extension_id) {
                    self.after_registry_mutation();
                }
            }
            ExtensionMessage::ToolResult { id, payload, error } => {
                // A result carrying both fields is treated as a failure.
                if let Some(wire_error) = error {
                    self.correlation.reject(&id, HubError::from_wire(wire_error));
                } else {
                    self.correlation
                        .resolve(&id, payload.unwrap_or(serde_json::Value::Null));
                }
            }
        }
    }

    fn on_extension_disconnected(&mut self, extension_id: &str) {
        if let Some(conn) = self.extension_conns.remove(extension_id) {
            conn.disconnect();
        }
        if self.registry.remove(extension_id).is_none() {
            return;
        }
        self.correlation.cleanup_owner(extension_id);
        self.after_registry_mutation();
    }

    fn on_consumer_connected(&mut self, session: ConsumerSession) {
        self.served_consumers += 1;
        self.sessions
            .insert(session.session_id().to_string(), session);
    }

    fn on_consumer_request(&mut self, session_id: &str, request: ToolRequest) {
        let Some(session) = self.sessions.get(session_id) else {
            log::warn!("[Hub] Request from unknown session {session_id}");
            return;
        };
        let reply = session.outbox();
        self.router.dispatch(&self.registry, request, &reply);
    }

    fn on_consumer_disconnected(&mut self, session_id: &str) {
        if let Some(session) = self.sessions.remove(session_id) {
            session.disconnect();
        }
        if self.sessions.is_empty() && self.served_consumers > 0 {
            log::info!("[Hub] Last consumer disconnected, shutting down");
            self.quit = true;
        }
    }

    fn on_auto_activate(&mut self) {
        // Re-validate against the live registry: the timer may have been
        // armed before a mutation that disqualified the candidate.
        let Some(id) = self.registry.auto_activation_candidate() else {
            return;
        };
        log::info!("[Hub] Auto-activating sole extension {id}");
        if self.registry.activate(&id) {
            self.after_registry_mutation();
        }
    }

    /// Broadcast fresh state and re-arm the auto-activation grace timer.
    ///
    /// Runs after every registry mutation, so no extension observes stale
    /// state after a newer one was sent and connect churn keeps pushing
    /// activation back.
    fn after_registry_mutation(&mut self) {
        let msg = self
            .registry
            .state_message(self.extension_port, self.asset_server_url.clone());
        self.registry.broadcast(&msg);

        let tx = self.hub_event_tx.clone();
        self.activation_timer
            .schedule(self.config.activation_grace, move || {
                let _ = tx.send(HubEvent::AutoActivate);
            });
    }

    /// Tear everything down: listeners, pending calls, connections, index.
    async fn shutdown_gracefully(&mut self) {
        log::info!("[Hub] Shutting down");

        self.activation_timer.cancel();

        if let Some(server) = self.socket_server.take() {
            server.shutdown();
        }
        if let Some(listener) = self.extension_listener.take() {
            listener.shutdown();
        }

        self.correlation.cleanup_all();

        // The sweeper and transfer server both stop on this token.
        self.cancel.cancel();

        if let Some(store) = self.store.take() {
            if let Err(e) = store.flush() {
                log::error!("[Hub] Failed to flush asset index: {e}");
            }
        }
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
        if let Some(server) = self.asset_server.take() {
            server.finished().await;
        }

        for (_, conn) in self.extension_conns.drain() {
            conn.disconnect();
        }
        for (_, session) in self.sessions.drain() {
            session.disconnect();
        }

        let pid_path = self.config.pid_path();
        if let Err(e) = std::fs::remove_file(&pid_path) {
            log::debug!("[Hub] Could not remove {}: {e}", pid_path.display());
        }
    }
}

/// Record this process's pid in the runtime directory.
///
/// The bridge reads it to tell a live hub from a stale socket file.
fn write_pid_file(path: &Path) -> Result<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())
        .with_context(|| format!("Failed to write PID file: {}", path.display()))?;
    log::info!("[Hub] Wrote PID file: {} (pid={pid})", path.display());
    Ok(())
}
