//! Correlation of in-flight tool calls with their eventual results.
//!
//! Every call routed to the active extension gets an entry here: the
//! consumer side holds the receiving half of a oneshot channel, and the
//! wire side settles it by id when a `toolResult` comes back. Each entry
//! carries an armed timeout task. Whichever of result, timeout, extension
//! disconnect, or shutdown happens first removes the entry and settles
//! the channel, so every call is answered exactly once.

// Rust guideline compliant 2026-07

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::HubError;

/// Outcome delivered to the task awaiting a routed tool call.
pub type CallOutcome = Result<serde_json::Value, HubError>;

type Table = HashMap<String, PendingCall>;

/// A single in-flight tool call awaiting its result.
struct PendingCall {
    /// Extension the call was forwarded to.
    owner: String,
    resolver: oneshot::Sender<CallOutcome>,
    timer: JoinHandle<()>,
}

/// Shared table mapping call ids to in-flight tool calls.
///
/// Clones share the same underlying table, so the socket server, the
/// extension reader, and timeout tasks all settle against the same state.
#[derive(Clone, Default)]
pub struct CorrelationTable {
    inner: Arc<Mutex<Table>>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending call against the extension `owner` and arm
    /// its timeout.
    ///
    /// Returns the generated call id and the receiver the caller awaits.
    /// If the timeout fires before anything settles the call, the entry is
    /// removed and the receiver yields [`HubError::ExtensionTimeout`].
    pub fn register(
        &self,
        owner: &str,
        timeout: Duration,
    ) -> (String, oneshot::Receiver<CallOutcome>) {
        let id = next_call_id();
        let (tx, rx) = oneshot::channel();

        // A zero timeout could fire before the entry below is inserted.
        let timeout = timeout.max(Duration::from_millis(1));

        let table = Arc::clone(&self.inner);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(call) = lock(&table).remove(&timer_id) {
                let _ = call.resolver.send(Err(HubError::ExtensionTimeout));
                log::debug!("[Correlation] Call {timer_id} timed out after {timeout:?}");
            }
        });

        lock(&self.inner).insert(
            id.clone(),
            PendingCall {
                owner: owner.to_string(),
                resolver: tx,
                timer,
            },
        );
        (id, rx)
    }

    /// Settle a pending call with the extension's result payload.
    ///
    /// Returns `false` if the id is unknown: already timed out, already
    /// settled, or never issued by this hub.
    pub fn resolve(&self, id: &str, payload: serde_json::Value) -> bool {
        self.settle(id, Ok(payload))
    }

    /// Settle a pending call with an error.
    pub fn reject(&self, id: &str, error: HubError) -> bool {
        self.settle(id, Err(error))
    }

    fn settle(&self, id: &str, outcome: CallOutcome) -> bool {
        // Remove first so nothing else can settle the same entry.
        let entry = lock(&self.inner).remove(id);
        match entry {
            Some(call) => {
                call.timer.abort();
                // Receiver may already be gone if the consumer vanished.
                let _ = call.resolver.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Reject every call forwarded to a now-disconnected extension with
    /// [`HubError::ExtensionDisconnected`].
    ///
    /// Other extensions' calls are untouched. Returns how many calls
    /// were rejected.
    pub fn cleanup_owner(&self, owner: &str) -> usize {
        let orphaned: Vec<PendingCall> = {
            let mut map = lock(&self.inner);
            let ids: Vec<String> = map
                .iter()
                .filter(|(_, call)| call.owner == owner)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| map.remove(id)).collect()
        };
        let count = orphaned.len();
        for call in orphaned {
            call.timer.abort();
            let _ = call.resolver.send(Err(HubError::ExtensionDisconnected));
        }
        if count > 0 {
            log::info!("[Correlation] Rejected {count} pending call(s) for {owner}: disconnected");
        }
        count
    }

    /// Reject every outstanding call with [`HubError::HubShutdown`].
    ///
    /// Used once at process exit. Returns how many calls were rejected.
    pub fn cleanup_all(&self) -> usize {
        let drained: Vec<(String, PendingCall)> = lock(&self.inner).drain().collect();
        let count = drained.len();
        for (_, call) in drained {
            call.timer.abort();
            let _ = call.resolver.send(Err(HubError::HubShutdown));
        }
        if count > 0 {
            log::info!("[Correlation] Rejected {count} pending call(s): shutting down");
        }
        count
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    /// Whether no calls are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

/// Lock the table, recovering the guard if a holder panicked.
///
/// Critical sections only touch `HashMap` entries, which cannot panic, so
/// a poisoned guard still holds a consistent map.
fn lock(inner: &Mutex<Table>) -> MutexGuard<'_, Table> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Generate a unique call ID using a monotonic counter + random suffix.
fn next_call_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("call:{seq:x}{rand:04x}")
}
