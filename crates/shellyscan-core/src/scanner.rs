// ── Network scanner ──
//
// Two discovery strategies feeding the same candidate stream:
//
// - passive: browse `_http._tcp.local.` and keep every advertised
//   instance whose name starts with "shelly";
// - active: sweep an IPv4 host range, checking reachability of the probe
//   port before handing the address on.
//
// Candidates are only *suggestions*; identification decides what they are.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ScanMode;
use crate::error::CoreError;
use crate::model::Locator;

/// Service type browsed in passive mode.
pub const SERVICE_TYPE: &str = "_http._tcp.local.";

/// Instance name prefix of devices of interest (compared case-insensitively).
const NAME_PREFIX: &str = "shelly";

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Mdns,
    Range,
    /// Secondary port of a device in range-extender mode.
    Extender,
    GhostReconnect,
    /// Re-identification of an errored placeholder.
    Refresh,
}

/// An endpoint worth identifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub locator: Locator,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn new(locator: Locator, source: CandidateSource) -> Self {
        Self { locator, source }
    }

    /// Forced candidates are tracked even when identification fails:
    /// something announced itself (or was already listed) at this address.
    pub fn force(&self) -> bool {
        matches!(self.source, CandidateSource::Mdns | CandidateSource::Refresh)
    }
}

/// `shellyplus1-a8032ab1e2f4._http._tcp.local.` → `shellyplus1-a8032ab1e2f4`
fn instance_name(fullname: &str) -> &str {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map_or(fullname, |n| n.trim_end_matches('.'))
}

fn is_device_name(name: &str) -> bool {
    name.get(..NAME_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(NAME_PREFIX))
}

/// Locator of a resolved service, preferring IPv4.
fn service_locator(info: &ServiceInfo) -> Option<Locator> {
    let name = instance_name(info.get_fullname());
    if !is_device_name(name) {
        return None;
    }
    let addresses = info.get_addresses();
    let address = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()?;
    Some(Locator::new(address, info.get_port(), name))
}

/// TCP reachability check of `address`, bounded by `timeout`.
pub async fn is_reachable(address: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

// ── Passive browser ─────────────────────────────────────────────────

struct Browser {
    daemon: ServiceDaemon,
    /// Resolved instances by full service name; replayed on rescan.
    services: Arc<Mutex<HashMap<String, Locator>>>,
}

/// Next interface change; never resolves when the monitor is unavailable.
async fn next_daemon_event(monitor: Option<&mdns_sd::Receiver<DaemonEvent>>) -> Option<DaemonEvent> {
    match monitor {
        Some(rx) => rx.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

async fn browse_loop(
    events: mdns_sd::Receiver<ServiceEvent>,
    monitor: Option<mdns_sd::Receiver<DaemonEvent>>,
    services: Arc<Mutex<HashMap<String, Locator>>>,
    sink: mpsc::UnboundedSender<Candidate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            daemon_event = next_daemon_event(monitor.as_ref()) => {
                match daemon_event {
                    Some(DaemonEvent::IpAdd(ip)) => {
                        debug!(%ip, "interface up");
                    }
                    Some(DaemonEvent::IpDel(ip)) => {
                        debug!(%ip, "interface down");
                    }
                    Some(_) => {}
                    None => {
                        trace!("mdns monitor closed");
                        break;
                    }
                }
            }
            event = events.recv_async() => {
                let Ok(event) = event else {
                    debug!("mdns browse channel closed");
                    break;
                };
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let Some(locator) = service_locator(&info) else {
                            continue;
                        };
                        trace!(address = %locator, name = %locator.hostname, "service resolved");
                        services
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(info.get_fullname().to_owned(), locator.clone());
                        if sink.send(Candidate::new(locator, CandidateSource::Mdns)).is_err() {
                            break;
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        services
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&fullname);
                    }
                    _ => {}
                }
            }
        }
    }
}

// ── NetworkScanner ──────────────────────────────────────────────────

pub struct NetworkScanner {
    mode: Mutex<ScanMode>,
    probe_port: u16,
    stagger: Duration,
    liveness_timeout: Duration,
    browser: Mutex<Option<Browser>>,
}

impl NetworkScanner {
    pub fn new(mode: ScanMode, probe_port: u16, stagger: Duration, liveness_timeout: Duration) -> Self {
        Self {
            mode: Mutex::new(mode),
            probe_port,
            stagger,
            liveness_timeout,
            browser: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Change the active sweep range; takes effect on the next scan.
    pub fn set_range(&self, first: u8, last: u8) {
        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        if let ScanMode::Range {
            first: f, last: l, ..
        } = &mut *mode
        {
            *f = first;
            *l = last;
        }
    }

    pub fn stagger(&self) -> Duration {
        self.stagger
    }

    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    /// Start passive discovery (no-op in range mode).
    ///
    /// Resolved services are pushed into `sink` until `cancel` fires or
    /// [`close`](Self::close) is called.
    pub fn start(
        &self,
        sink: mpsc::UnboundedSender<Candidate>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        if !matches!(self.mode(), ScanMode::Mdns) {
            return Ok(());
        }
        let mut slot = self.browser.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let discovery = |e: mdns_sd::Error| CoreError::Discovery {
            message: e.to_string(),
        };
        let daemon = ServiceDaemon::new().map_err(discovery)?;
        let events = daemon.browse(SERVICE_TYPE).map_err(discovery)?;
        let monitor = daemon
            .monitor()
            .inspect_err(|e| warn!(error = %e, "interface monitor unavailable"))
            .ok();

        let browser = Browser {
            daemon,
            services: Arc::default(),
        };
        tokio::spawn(browse_loop(
            events,
            monitor,
            Arc::clone(&browser.services),
            sink,
            cancel,
        ));
        debug!(service = SERVICE_TYPE, "mdns browsing started");
        *slot = Some(browser);
        Ok(())
    }

    /// Candidates for one scan pass.
    ///
    /// Passive mode re-lists the advertisements seen so far; active mode
    /// lists every address of the range. Active candidates still need a
    /// reachability check before identification.
    pub fn candidates(&self) -> Vec<Candidate> {
        match self.mode() {
            ScanMode::Mdns => self
                .browser
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map(|b| {
                    b.services
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .values()
                        .map(|l| Candidate::new(l.clone(), CandidateSource::Mdns))
                        .collect()
                })
                .unwrap_or_default(),
            mode @ ScanMode::Range { .. } => mode
                .addresses()
                .into_iter()
                .map(|ip| {
                    let address = IpAddr::V4(ip);
                    Candidate::new(
                        Locator::new(address, self.probe_port, address.to_string()),
                        CandidateSource::Range,
                    )
                })
                .collect(),
        }
    }

    /// Stop passive discovery and shut the mDNS daemon down.
    pub fn close(&self) {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(browser) = browser {
            if let Err(e) = browser.daemon.shutdown() {
                debug!(error = %e, "mdns shutdown");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn instance_names() {
        assert_eq!(
            instance_name("shellyplus1-a8032ab1e2f4._http._tcp.local."),
            "shellyplus1-a8032ab1e2f4"
        );
        assert!(is_device_name("ShellyPlug-S-7A1B2C"));
        assert!(is_device_name("shelly1-98CDAC"));
        assert!(!is_device_name("printer"));
        assert!(!is_device_name("she"));
    }

    #[test]
    fn resolved_service_becomes_locator() {
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            "shellypro4pm-c8f09e8812ab",
            "shellypro4pm-c8f09e8812ab.local.",
            "192.168.1.77",
            80,
            None,
        )
        .unwrap();
        let locator = service_locator(&info).unwrap();
        assert_eq!(locator.address, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77)));
        assert_eq!(locator.port, 80);
        assert_eq!(locator.hostname, "shellypro4pm-c8f09e8812ab");

        let other = ServiceInfo::new(SERVICE_TYPE, "router", "router.local.", "192.168.1.1", 80, None)
            .unwrap();
        assert!(service_locator(&other).is_none());
    }

    #[test]
    fn range_candidates_use_probe_port() {
        let scanner = NetworkScanner::new(
            ScanMode::Range {
                base: Ipv4Addr::new(192, 168, 1, 0),
                first: 10,
                last: 12,
            },
            8080,
            Duration::from_millis(4),
            Duration::from_secs(1),
        );
        let candidates = scanner.candidates();
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.locator.port == 8080 && !c.force()));

        scanner.set_range(10, 10);
        assert_eq!(scanner.candidates().len(), 1);
    }

    #[test]
    fn forced_sources() {
        let locator = Locator::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 80, "x");
        assert!(Candidate::new(locator.clone(), CandidateSource::Mdns).force());
        assert!(Candidate::new(locator.clone(), CandidateSource::Refresh).force());
        assert!(!Candidate::new(locator.clone(), CandidateSource::Extender).force());
        assert!(!Candidate::new(locator, CandidateSource::GhostReconnect).force());
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        assert!(is_reachable(address, Duration::from_secs(1)).await);
        drop(listener);
        assert!(!is_reachable(address, Duration::from_secs(1)).await);
    }
}
