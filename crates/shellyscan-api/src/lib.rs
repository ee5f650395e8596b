//! Async HTTP transport for Shelly devices on a local network.
//!
//! This crate knows how to talk to a single device endpoint and nothing
//! about inventories or scheduling:
//!
//! - **[`DeviceHttp`]** — shared, connection-pooled `reqwest` client with a
//!   per-address concurrency cap, so constrained embedded targets never see
//!   more than a handful of simultaneous connections.
//! - **[`Endpoint`]** — a `(address, port, credentials)` binding that
//!   issues JSON requests, transparently answering Basic (gen1) and
//!   SHA-256 Digest (gen2/gen3) challenges.
//! - **[`DeviceInfo`]** — the parsed `GET /shelly` identification payload.
//! - **[`Error`]** — transport/protocol/authentication taxonomy with the
//!   predicates the discovery engine branches on.

pub mod auth;
pub mod client;
pub mod error;
pub mod info;
pub mod transport;

pub use auth::{AuthScheme, Authorization, Credentials, DigestChallenge};
pub use client::{DeviceHttp, Endpoint};
pub use error::Error;
pub use info::DeviceInfo;
pub use transport::TransportConfig;
