//! Discovery and liveness engine for Shelly devices on a local network.
//!
//! - **[`Engine`]** — Facade wiring everything below. [`start()`](Engine::start)
//!   loads the ghost store and begins discovery; [`rescan()`](Engine::rescan)
//!   clears the registry and discovers again, reconciling stored ghosts.
//!
//! - **[`NetworkScanner`]** — Candidate endpoints from passive mDNS browsing
//!   (`_http._tcp`, `shelly*` instances) or an active IPv4 range sweep.
//!
//! - **[`DeviceIdentifier`]** — Probes `GET /shelly`, classifies generation and
//!   model through the [`driver`] catalog, negotiates credentials through a
//!   [`CredentialProvider`], and materializes a [`Device`].
//!
//! - **[`DeviceRegistry`]** — Stable-indexed inventory deduplicated by MAC,
//!   broadcasting [`RegistryEvent`]s to observers.
//!
//! - **[`RefreshScheduler`]** — One timer per registry slot alternating
//!   status polls with periodic full refreshes, inside a bounded task pool
//!   that a rescan discards whole.
//!
//! - **[`GhostStore`]** — Versioned JSON snapshot of the registry so devices
//!   unreachable at startup still appear, with user notes.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod ghost;
pub mod identify;
pub mod model;
pub mod registry;
pub mod scanner;
pub mod scheduler;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DEFAULT_PORT, EngineConfig, ScanMode};
pub use driver::{BackupOutcome, DeviceCommand, DeviceDriver};
pub use engine::Engine;
pub use error::CoreError;
pub use ghost::GhostStore;
pub use identify::{CredentialProvider, CredentialRequest, DeviceIdentifier, NoCredentials};
pub use model::{
    Device, DeviceKind, DeviceState, DeviceStatus, Generation, GhostRecord, Locator, MacAddress,
    ModelInfo,
};
pub use registry::{DeviceRegistry, RegistryEvent, RegistryEventKind};
pub use scanner::{Candidate, CandidateSource, NetworkScanner};
pub use scheduler::RefreshScheduler;

pub use shellyscan_api::{AuthScheme, Credentials, TransportConfig};
