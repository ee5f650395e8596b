// ── Core error types ──
//
// User-facing errors from shellyscan-core. The `From<shellyscan_api::Error>`
// impl translates transport-layer errors into the taxonomy the engine
// branches on: transient, authentication, protocol, everything else.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Device exchange errors ───────────────────────────────────────
    #[error("Cannot reach {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Device request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Unexpected device response: {message}")]
    Protocol { message: String },

    #[error("Device rejected command: {message}")]
    Rejected { message: String },

    #[error("Operation not supported by this device: {operation}")]
    Unsupported { operation: String },

    // ── Registry errors ──────────────────────────────────────────────
    #[error("No device at index {index}")]
    DeviceNotFound { index: usize },

    // ── Discovery errors ─────────────────────────────────────────────
    #[error("Discovery setup failed: {message}")]
    Discovery { message: String },

    // ── Store errors ─────────────────────────────────────────────────
    #[error("Store I/O error on {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store file {} is malformed: {message}", path.display())]
    StoreFormat { path: PathBuf, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors the next scheduled cycle may resolve on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Malformed or unexpected answers from a device.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Rejected { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<shellyscan_api::Error> for CoreError {
    fn from(err: shellyscan_api::Error) -> Self {
        use shellyscan_api::Error as Api;

        match err {
            Api::Authentication { status } => CoreError::AuthenticationFailed {
                message: format!("HTTP {status}"),
            },
            Api::Digest(message) => CoreError::AuthenticationFailed { message },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() || e.is_request() {
                    CoreError::ConnectionFailed {
                        address: e
                            .url()
                            .and_then(|u| u.host_str().map(str::to_owned))
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Protocol {
                        message: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Internal(format!("invalid URL: {e}")),
            Api::Http { status, body } => CoreError::Protocol {
                message: format!("HTTP {status}: {body}"),
            },
            Api::Deserialization { message, .. } => CoreError::Protocol { message },
            Api::NotADevice { address, reason } => CoreError::Protocol {
                message: format!("{address}: {reason}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoreError;

    #[test]
    fn api_errors_keep_their_class() {
        let timeout: CoreError = shellyscan_api::Error::Timeout { timeout_secs: 20 }.into();
        assert!(timeout.is_transient());

        let auth: CoreError = shellyscan_api::Error::Authentication { status: 401 }.into();
        assert!(auth.is_auth());

        let http: CoreError = shellyscan_api::Error::Http {
            status: 500,
            body: "oops".into(),
        }
        .into();
        assert!(http.is_protocol());
        assert!(!http.is_transient());
    }
}
