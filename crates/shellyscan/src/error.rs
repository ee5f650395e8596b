//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use shellyscan_config::ConfigError;
use shellyscan_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Discovery ────────────────────────────────────────────────────
    #[error("Could not start device discovery: {message}")]
    #[diagnostic(
        code(shellyscan::discovery),
        help(
            "mDNS needs a usable multicast interface.\n\
             Try an active sweep instead: shellyscan scan --mode range --base-ip 192.168.1.0"
        )
    )]
    Discovery { message: String },

    #[error("Could not reach {address}")]
    #[diagnostic(code(shellyscan::connection_failed))]
    ConnectionFailed { address: String, reason: String },

    #[error("Authentication failed: {message}")]
    #[diagnostic(code(shellyscan::auth_failed))]
    AuthFailed { message: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(shellyscan::timeout),
        help("Raise transport.probe_timeout_secs in the configuration file.")
    )]
    Timeout { seconds: u64 },

    #[error("No device at index {index}")]
    #[diagnostic(code(shellyscan::not_found))]
    NotFound { index: usize },

    // ── Store ────────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(shellyscan::store),
        help("Fix or delete the file, or run with --no-store.")
    )]
    Store { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(shellyscan::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration file already exists: {path}")]
    #[diagnostic(
        code(shellyscan::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(shellyscan::config))]
    Config(ConfigError),

    // ── Everything else ──────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(shellyscan::internal))]
    Core(CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Discovery { .. } | Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Discovery { message } => Self::Discovery { message },
            CoreError::ConnectionFailed { address, reason } => {
                Self::ConnectionFailed { address, reason }
            }
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::DeviceNotFound { index } => Self::NotFound { index },
            err @ (CoreError::Store { .. } | CoreError::StoreFormat { .. }) => Self::Store {
                message: err.to_string(),
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other => Self::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}
