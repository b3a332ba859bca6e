//! Runtime environment detection.
//!
//! Provides a single source of truth for determining the runtime environment
//! (test, development, production) based on the `CANVAS_HUB_ENV` environment
//! variable.
//!
//! # Usage
//!
//! ```rust
//! use canvas_hub::env::Environment;
//!
//! if Environment::current().is_test() {
//!     // Use temp directories, short timeouts, etc.
//! }
//! ```
//!
//! # Environment Variable
//!
//! Set `CANVAS_HUB_ENV` to one of:
//! - `test` - Test mode (isolated runtime directories, debug logging)
//! - `development` or `dev` - Development mode (debug logging)
//! - (anything else or unset) - Production mode

// Rust guideline compliant 2026-06

/// Runtime environment for the hub and its companion commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - isolated runtime directories.
    Test,
}

impl Environment {
    /// Detect current environment from `CANVAS_HUB_ENV`.
    ///
    /// Returns `Test` if `CANVAS_HUB_ENV=test`, `Development` if
    /// `CANVAS_HUB_ENV=development` or `CANVAS_HUB_ENV=dev`, otherwise
    /// `Production`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("CANVAS_HUB_ENV").as_deref() {
            Ok("test") => Self::Test,
            Ok("development") | Ok("dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if this is the production environment.
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Returns `true` if this is the development environment.
    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    /// Default log level filter for this environment.
    ///
    /// `RUST_LOG` always wins; this is only the fallback.
    #[must_use]
    pub fn default_log_level(self) -> log::LevelFilter {
        match self {
            Self::Production => log::LevelFilter::Info,
            Self::Development | Self::Test => log::LevelFilter::Debug,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}
