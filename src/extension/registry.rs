//! Extension registry and activation state.
//!
//! Tracks every connected extension and which one, if any, is active.
//! At most one extension is active at a time: tool calls route only to
//! the active one, and activating an extension implicitly deactivates
//! the previous. The registry is plain data owned by the hub event loop;
//! connection task lifecycles live in [`super::transport`].

// Rust guideline compliant 2026-07

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::wire::HubMessage;

/// Routing handle for a connected extension.
///
/// Holds the outbox consumed by the connection's write task. Dropping the
/// handle does not close the connection; that is the hub's job.
#[derive(Debug, Clone)]
pub struct ExtensionHandle {
    /// Unique id assigned when the connection was accepted.
    pub id: String,
    /// Queue of outgoing messages for this extension.
    pub outbox: UnboundedSender<HubMessage>,
    /// When the extension connected.
    pub connected_at: DateTime<Utc>,
}

impl ExtensionHandle {
    /// Queue a message for this extension.
    ///
    /// Returns `false` if the write task is gone (connection closing).
    pub fn send(&self, msg: HubMessage) -> bool {
        self.outbox.send(msg).is_ok()
    }
}

/// Registry of connected extensions plus the single-active selection.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, ExtensionHandle>,
    active_id: Option<String>,
}

impl ExtensionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected extension.
    pub fn register(&mut self, handle: ExtensionHandle) {
        log::info!("[Registry] Extension registered: {}", handle.id);
        self.extensions.insert(handle.id.clone(), handle);
    }

    /// Remove an extension, clearing the active selection if it held it.
    ///
    /// Returns `Some(was_active)` if the extension existed.
    pub fn remove(&mut self, id: &str) -> Option<bool> {
        self.extensions.remove(id)?;
        let was_active = self.active_id.as_deref() == Some(id);
        if was_active {
            self.active_id = None;
            log::info!("[Registry] Active extension removed: {id}");
        } else {
            log::info!("[Registry] Extension removed: {id}");
        }
        Some(was_active)
    }

    /// Make the given extension the active one.
    ///
    /// Any previously active extension is deactivated. Unknown ids are
    /// ignored so a stale activate from a closing connection cannot
    /// disturb the current selection. Returns whether the id was known.
    pub fn activate(&mut self, id: &str) -> bool {
        if !self.extensions.contains_key(id) {
            log::warn!("[Registry] Ignoring activate for unknown extension: {id}");
            return false;
        }
        if self.active_id.as_deref() == Some(id) {
            return true;
        }
        if let Some(previous) = &self.active_id {
            log::info!("[Registry] Extension {id} replaces {previous} as active");
        } else {
            log::info!("[Registry] Extension {id} is now active");
        }
        self.active_id = Some(id.to_string());
        true
    }

    /// The currently active extension, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ExtensionHandle> {
        self.active_id.as_ref().and_then(|id| self.extensions.get(id))
    }

    /// Id of the currently active extension, if any.
    #[must_use]
    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// Look up an extension by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ExtensionHandle> {
        self.extensions.get(id)
    }

    /// Number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether no extensions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Iterate over all registered extensions in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ExtensionHandle> {
        self.extensions.values()
    }

    /// The sole candidate for automatic activation, if the state allows it.
    ///
    /// Auto-activation applies only when exactly one extension is
    /// registered and none is active. Callers re-check this at the moment
    /// the grace timer fires; registrations in between change the answer.
    #[must_use]
    pub fn auto_activation_candidate(&self) -> Option<String> {
        if self.active_id.is_some() || self.extensions.len() != 1 {
            return None;
        }
        self.extensions.keys().next().cloned()
    }

    /// Build the `state` message describing the current registry.
    #[must_use]
    pub fn state_message(&self, port: u16, asset_server_url: Option<String>) -> HubMessage {
        HubMessage::State {
            active_id: self.active_id.clone(),
            count: self.extensions.len(),
            port,
            asset_server_url,
        }
    }

    /// Send a message to every registered extension.
    ///
    /// Send failures are ignored here; a dead write task surfaces as a
    /// disconnect event shortly after. Returns how many sends succeeded.
    pub fn broadcast(&self, msg: &HubMessage) -> usize {
        self.extensions
            .values()
            .filter(|handle| handle.send(msg.clone()))
            .count()
    }
}
