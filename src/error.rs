//! Coded error taxonomy for tool routing and asset transfer.
//!
//! Every failure the hub reports to a consumer is one of the variants
//! below, each carrying a stable machine-checkable code. Untrusted input
//! (extension tool results) is converted exactly once, in
//! [`HubError::from_wire`]; only the enumerated selection codes are
//! trusted from that boundary — everything else becomes an uncoded
//! extension failure. Internal errors are logged with context at the
//! call site and surfaced as a generic failure rather than crashing.

// Rust guideline compliant 2026-07

use crate::wire::{ErrorBody, WireError};

/// Error category used to select user-facing troubleshooting hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The extension side is missing, slow, or gone.
    Connectivity,
    /// The canvas selection does not match what the tool needs.
    Selection,
    /// Asset upload/download failures.
    Transfer,
    /// Everything else (internal faults, bad arguments, shutdown).
    Other,
}

/// Closed error type for every failure the hub can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// A proxied tool call arrived while no extension is active.
    #[error("no active extension")]
    NoActiveExtension,

    /// The active extension did not answer within the tool-call timeout.
    #[error("tool call timed out waiting for the extension")]
    ExtensionTimeout,

    /// The owning extension disconnected before answering.
    #[error("extension disconnected before responding")]
    ExtensionDisconnected,

    /// Sending on the extension connection failed outright.
    #[error("extension transport is not connected")]
    TransportNotConnected,

    /// The extension rejected the call because of the current selection.
    /// Passed through verbatim; the hub never generates this itself.
    #[error("{0}")]
    InvalidSelection(String),

    /// The extension rejected the call because the target node is not
    /// visible. Passed through verbatim like [`Self::InvalidSelection`].
    #[error("{0}")]
    NodeNotVisible(String),

    /// An asset operation was requested but the asset subsystem is
    /// disabled or failed to start.
    #[error("asset server is not configured")]
    AssetServerNotConfigured,

    /// The hash path segment is not a well-formed asset hash.
    #[error("invalid asset hash: {0:?}")]
    InvalidHashFormat(String),

    /// Uploaded bytes do not digest to the claimed hash.
    #[error("asset digest mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch {
        /// Hash claimed in the request path.
        claimed: String,
        /// Hash computed from the uploaded bytes.
        computed: String,
    },

    /// The upload body exceeded the configured ceiling.
    #[error("upload exceeds the {limit}-byte limit")]
    PayloadTooLarge {
        /// Configured maximum body size in bytes.
        limit: u64,
    },

    /// The upload body stream ended or errored before completion.
    #[error("upload did not complete: {0}")]
    UploadIncomplete(String),

    /// A tool call failed validation against its declared spec.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The hub is shutting down and rejected outstanding work.
    #[error("hub is shutting down")]
    HubShutdown,

    /// An extension-reported failure with no trusted code.
    #[error("{0}")]
    Extension(String),

    /// An unexpected internal failure, already logged with context.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Stable machine-checkable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveExtension => "NO_ACTIVE_EXTENSION",
            Self::ExtensionTimeout => "EXTENSION_TIMEOUT",
            Self::ExtensionDisconnected => "EXTENSION_DISCONNECTED",
            Self::TransportNotConnected => "TRANSPORT_NOT_CONNECTED",
            Self::InvalidSelection(_) => "INVALID_SELECTION",
            Self::NodeNotVisible(_) => "NODE_NOT_VISIBLE",
            Self::AssetServerNotConfigured => "ASSET_SERVER_NOT_CONFIGURED",
            Self::InvalidHashFormat(_) => "INVALID_HASH_FORMAT",
            Self::HashMismatch { .. } => "HASH_MISMATCH",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::UploadIncomplete(_) => "UPLOAD_INCOMPLETE",
            Self::InvalidArguments(_) => "INVALID_ARGUMENTS",
            Self::HubShutdown => "HUB_SHUTDOWN",
            Self::Extension(_) => "EXTENSION_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Category this error belongs to, for hint selection.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoActiveExtension
            | Self::ExtensionTimeout
            | Self::ExtensionDisconnected
            | Self::TransportNotConnected => ErrorCategory::Connectivity,
            Self::InvalidSelection(_) | Self::NodeNotVisible(_) => ErrorCategory::Selection,
            Self::AssetServerNotConfigured
            | Self::InvalidHashFormat(_)
            | Self::HashMismatch { .. }
            | Self::PayloadTooLarge { .. }
            | Self::UploadIncomplete(_) => ErrorCategory::Transfer,
            Self::InvalidArguments(_)
            | Self::HubShutdown
            | Self::Extension(_)
            | Self::Internal(_) => ErrorCategory::Other,
        }
    }

    /// Short troubleshooting hint for the user, selected by category.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self.category() {
            ErrorCategory::Connectivity => Some(
                "Check that a canvas extension is open and activated, then retry.",
            ),
            ErrorCategory::Selection => {
                Some("Select exactly one visible node in the canvas and retry.")
            }
            ErrorCategory::Transfer => {
                Some("Re-export the asset and upload it again against its own hash.")
            }
            ErrorCategory::Other => None,
        }
    }

    /// Convert an extension-reported wire error into the closed taxonomy.
    ///
    /// This is the single conversion point for the extension trust
    /// boundary: only the selection codes are honored; any other code is
    /// discarded and the message kept as an uncoded extension failure.
    #[must_use]
    pub fn from_wire(err: WireError) -> Self {
        match err.code.as_deref() {
            Some("INVALID_SELECTION") => Self::InvalidSelection(err.message),
            Some("NODE_NOT_VISIBLE") => Self::NodeNotVisible(err.message),
            _ => Self::Extension(err.message),
        }
    }

    /// Render this error as the consumer-facing wire body.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: Some(self.code().to_owned()),
            message: self.to_string(),
            hint: self.hint().map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            HubError::NoActiveExtension,
            HubError::ExtensionTimeout,
            HubError::ExtensionDisconnected,
            HubError::TransportNotConnected,
            HubError::InvalidSelection("s".into()),
            HubError::NodeNotVisible("n".into()),
            HubError::AssetServerNotConfigured,
            HubError::InvalidHashFormat("x".into()),
            HubError::HashMismatch {
                claimed: "a".into(),
                computed: "b".into(),
            },
            HubError::PayloadTooLarge { limit: 1 },
            HubError::UploadIncomplete("eof".into()),
            HubError::InvalidArguments("bad".into()),
            HubError::HubShutdown,
            HubError::Extension("oops".into()),
            HubError::Internal("io".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(HubError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len(), "duplicate error code");
    }

    #[test]
    fn test_from_wire_trusts_only_selection_codes() {
        let sel = HubError::from_wire(WireError {
            code: Some("INVALID_SELECTION".into()),
            message: "pick one node".into(),
        });
        assert_eq!(sel, HubError::InvalidSelection("pick one node".into()));

        let vis = HubError::from_wire(WireError {
            code: Some("NODE_NOT_VISIBLE".into()),
            message: "hidden".into(),
        });
        assert_eq!(vis, HubError::NodeNotVisible("hidden".into()));

        // An extension must not be able to forge hub-side codes
        let forged = HubError::from_wire(WireError {
            code: Some("EXTENSION_TIMEOUT".into()),
            message: "fake".into(),
        });
        assert_eq!(forged, HubError::Extension("fake".into()));

        let uncoded = HubError::from_wire(WireError {
            code: None,
            message: "plain failure".into(),
        });
        assert_eq!(uncoded, HubError::Extension("plain failure".into()));
    }

    #[test]
    fn test_hints_branch_by_category() {
        let connectivity = HubError::NoActiveExtension.hint().unwrap();
        assert!(connectivity.contains("activated"));

        let selection = HubError::InvalidSelection("s".into()).hint().unwrap();
        assert!(selection.contains("Select"));

        let transfer = HubError::HashMismatch {
            claimed: "a".into(),
            computed: "b".into(),
        }
        .hint()
        .unwrap();
        assert!(transfer.contains("upload"));

        assert!(HubError::Internal("x".into()).hint().is_none());
    }

    #[test]
    fn test_body_carries_code_message_hint() {
        let body = HubError::ExtensionTimeout.to_body();
        assert_eq!(body.code.as_deref(), Some("EXTENSION_TIMEOUT"));
        assert!(body.message.contains("timed out"));
        assert!(body.hint.is_some());
    }
}
