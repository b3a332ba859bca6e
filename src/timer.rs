//! Cancellable one-shot timers.
//!
//! [`ResetTimer`] backs every deadline in the hub that must survive
//! being rearmed: the auto-activation grace period (reset on each
//! registry mutation) and the asset index debounce (reset on each
//! mutation, trailing edge wins). Rescheduling cancels the previous
//! deadline, so at most one action is ever in flight per timer.

// Rust guideline compliant 2026-06

use std::time::Duration;

use tokio::task::JoinHandle;

/// A one-shot timer whose deadline can be rearmed or cancelled.
///
/// Must be used from within a tokio runtime; the pending action runs on
/// a spawned task. Dropping the timer cancels any pending action.
#[derive(Default)]
pub struct ResetTimer {
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ResetTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTimer")
            .field("armed", &self.is_armed())
            .finish_non_exhaustive()
    }
}

impl ResetTimer {
    /// Create a disarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Arm (or rearm) the timer: cancel any pending action and run
    /// `action` after `delay`.
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    /// Cancel the pending action, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether an action is currently pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ResetTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
