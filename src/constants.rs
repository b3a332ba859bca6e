//! Application-wide constants for canvas-hub.
//!
//! This module centralizes all magic numbers and configuration defaults
//! to improve maintainability and discoverability. Constants are grouped
//! by domain with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Tool routing**: Call timeouts and activation timing
//! - **Assets**: Cache sizing, persistence, and expiry
//! - **Transport**: Socket and WebSocket listener configuration
//! - **Bridge**: Leader election and reconnect timing
//! - **Shutdown**: Graceful-exit bounds

// Rust guideline compliant 2026-06

use std::time::Duration;

// ============================================================================
// Tool routing
// ============================================================================

/// Default timeout for a tool call forwarded to the active extension.
///
/// Canvas-side tools can involve user interaction (export dialogs, large
/// scene traversals), so this is generous. Overridable via
/// `CANVAS_HUB_TOOL_TIMEOUT_MS`.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period before a sole registered extension auto-activates.
///
/// Long enough that rapid connect/disconnect churn (page reloads in the
/// canvas client) settles before the registry commits to an activation,
/// short enough that the common single-extension case needs no manual
/// step. Overridable via `CANVAS_HUB_ACTIVATION_GRACE_MS`.
pub const AUTO_ACTIVATION_GRACE: Duration = Duration::from_secs(2);

/// Maximum number of hashes accepted by a single `resolve_assets` call.
///
/// Bounds the response size without forcing callers to fail a whole
/// batch over a partial miss.
pub const MAX_RESOLVE_BATCH: usize = 64;

// ============================================================================
// Assets
// ============================================================================

/// Number of hex characters in an asset hash.
///
/// Asset identity is the first 16 bytes of the SHA-256 digest rendered
/// as lowercase hex. 128 bits is enough uniqueness for a local cache
/// while keeping URLs short.
pub const ASSET_HASH_LEN: usize = 32;

/// Default ceiling for a single asset upload body.
///
/// 32 MiB comfortably covers exported images while keeping a runaway
/// client from filling the disk. Overridable via
/// `CANVAS_HUB_MAX_UPLOAD_BYTES`.
pub const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

/// Default time-to-live for unused assets.
///
/// Records whose `last_access` is older than this are removed by the
/// sweep task. Zero disables sweeping. Overridable via
/// `CANVAS_HUB_ASSET_TTL_SECS`.
pub const ASSET_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Hard cap on the sweep interval.
///
/// The sweep runs every `min(ttl, ASSET_SWEEP_INTERVAL_CAP)` so a very
/// long TTL still gets bounded worst-case staleness.
pub const ASSET_SWEEP_INTERVAL_CAP: Duration = Duration::from_secs(60 * 60);

/// Debounce window for asset index writes.
///
/// Mutation bursts (multi-asset exports) coalesce into a single disk
/// write on the trailing edge of this window.
pub const ASSET_INDEX_DEBOUNCE: Duration = Duration::from_millis(500);

/// Age after which an abandoned partial-upload temp file is deleted.
///
/// In-progress uploads write `*.part` files next to the final asset;
/// reconciliation removes any that outlive this age so crashed uploads
/// never accumulate.
pub const PARTIAL_UPLOAD_MAX_AGE: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// Transport
// ============================================================================

/// Ordered candidate ports for the extension WebSocket listener.
///
/// The hub binds the first free port from this list so the canvas
/// extension can probe the same ports in the same order. Overridable via
/// `CANVAS_HUB_EXTENSION_PORTS`.
pub const EXTENSION_PORT_CANDIDATES: [u16; 5] = [4114, 4115, 4116, 4117, 4118];

/// Maximum length of one NDJSON line on the consumer socket.
///
/// Tool payloads stay small because asset bytes travel over the transfer
/// server, never the tool channel. Oversized lines are dropped.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Maximum Unix socket path length (kernel `sun_path` limit minus NUL).
pub const MAX_SOCKET_PATH: usize = 104;

// ============================================================================
// Bridge / leader election
// ============================================================================

/// Total time a consumer waits for a hub to become connectable.
///
/// Covers both "another process is electing" and "we spawned the hub
/// ourselves and are waiting for its socket".
pub const HUB_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay for the exponential connect backoff.
///
/// Attempts wait `CONNECT_BACKOFF_BASE * 2^n`, capped at
/// [`CONNECT_BACKOFF_CAP`].
pub const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(150);

/// Ceiling for the exponential connect backoff.
pub const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Attempts to acquire the leader-election file lock before falling back
/// to connect-only waiting.
pub const LOCK_ATTEMPTS: u32 = 3;

/// Delay between leader-election lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Delay before the bridge re-runs connect-or-elect after the hub side
/// of an established session drops.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Shutdown
// ============================================================================

/// Bound on graceful shutdown (flush index, close listeners, reject
/// pending calls). Exceeding it forces process exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval at which the signal watcher polls the signal-hook flags.
pub const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);
