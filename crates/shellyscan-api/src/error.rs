use thiserror::Error;

/// Top-level error type for the `shellyscan-api` crate.
///
/// Covers every failure mode of a single device exchange: transport,
/// authentication, HTTP status, and payload decoding. `shellyscan-core`
/// maps these onto device status values.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The device answered 401 (missing or rejected credentials).
    #[error("Authentication required (HTTP {status})")]
    Authentication { status: u16 },

    /// A Digest challenge could not be parsed or answered.
    #[error("Digest challenge error: {0}")]
    Digest(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Protocol ────────────────────────────────────────────────────
    /// Non-success HTTP status other than 401.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// The endpoint answered but is not a device of interest
    /// (no hardware identity in the identification payload).
    #[error("{address} is not a recognized device: {reason}")]
    NotADevice { address: String, reason: String },
}

impl Error {
    /// Returns `true` for errors the next scheduled cycle may resolve
    /// on its own (timeouts, refused or reset connections).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the device rejected or requires credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if the request ran into its bounded timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` for malformed or unexpected response bodies.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Deserialization { .. } | Self::NotADevice { .. }
        )
    }
}
