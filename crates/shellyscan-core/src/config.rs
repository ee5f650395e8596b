// ── Engine configuration ──
//
// Built by `shellyscan-config` (or directly by tests); the core never
// reads configuration files itself.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use shellyscan_api::TransportConfig;

/// Default device HTTP port.
pub const DEFAULT_PORT: u16 = 80;

/// How candidates are discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Multicast service discovery on every usable interface.
    Mdns,
    /// Probe `base.first ..= base.last` on `port`.
    Range {
        /// Network prefix; the last octet is ignored.
        base: Ipv4Addr,
        first: u8,
        last: u8,
    },
}

impl ScanMode {
    /// Addresses covered by an active sweep, in order.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        match self {
            Self::Mdns => Vec::new(),
            Self::Range { base, first, last } => {
                let [a, b, c, _] = base.octets();
                (*first..=*last)
                    .map(|host| Ipv4Addr::new(a, b, c, host))
                    .collect()
            }
        }
    }
}

/// Configuration for the discovery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scan: ScanMode,
    /// Port probed by active sweeps and ghost reconnects.
    pub probe_port: u16,
    /// Fixed delay between firings of each device's refresh timer.
    pub refresh_interval: Duration,
    /// Every N-th firing performs a full (settings + status) refresh.
    pub full_refresh_ticks: u32,
    /// Pause between consecutive requests to the same device.
    pub query_delay: Duration,
    /// Wait after a reboot command before polling resumes.
    pub reboot_settle: Duration,
    /// Stagger between consecutive probes of an active sweep.
    pub probe_stagger: Duration,
    /// Bound on the TCP reachability check done before probing.
    pub liveness_timeout: Duration,
    /// Ghost store file, if persistence is enabled.
    pub store_path: Option<PathBuf>,
    /// Delay before re-probing ghosts after startup (`None` disables).
    pub auto_reconnect: Option<Duration>,
    /// Probe secondary ports of devices in range-extender mode.
    pub extender_probe: bool,
    /// Concurrent discovery and refresh tasks.
    pub pool_size: usize,
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan: ScanMode::Mdns,
            probe_port: DEFAULT_PORT,
            refresh_interval: Duration::from_millis(2000),
            full_refresh_ticks: 3,
            query_delay: Duration::from_millis(59),
            reboot_settle: Duration::from_secs(3),
            probe_stagger: Duration::from_millis(4),
            liveness_timeout: Duration::from_secs(30),
            store_path: None,
            auto_reconnect: Some(Duration::from_secs(45)),
            extender_probe: true,
            pool_size: 128,
            transport: TransportConfig::default(),
        }
    }
}
