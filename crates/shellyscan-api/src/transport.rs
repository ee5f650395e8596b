// Shared transport configuration for the device HTTP client.
//
// One pooled `reqwest::Client` serves every device; the timeouts here
// bound identification probes and regular polling separately.

use std::time::Duration;

use crate::error::Error;

/// Shared transport configuration for building the device HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for the `GET /shelly` identification probe.
    pub probe_timeout: Duration,
    /// Timeout for status/settings/command requests.
    pub request_timeout: Duration,
    /// Maximum simultaneous requests per device address.
    pub max_connections_per_host: usize,
    /// Idle pooled connections are dropped after this long.
    pub pool_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(20),
            max_connections_per_host: 8,
            pool_idle_timeout: Duration::from_secs(300),
        }
    }
}

impl TransportConfig {
    /// Build the pooled `reqwest::Client` from this config.
    ///
    /// Per-request timeouts are applied by [`Endpoint`](crate::Endpoint),
    /// so the client itself carries only pool settings.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.max_connections_per_host)
            .connect_timeout(self.request_timeout)
            .user_agent(concat!("shellyscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Transport)
    }
}
